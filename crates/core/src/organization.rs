//! Organization (tenant) and membership records.

use std::borrow::Cow;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::id::{IdentityId, OrganizationId};
use crate::validate;

// ─────────────────────────────────────────────────────────────────────────────
// Organization
// ─────────────────────────────────────────────────────────────────────────────

/// One company/workspace.
///
/// Organizations are never hard-deleted here; deactivation goes through
/// `is_active` and is enforced by the data layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub id: OrganizationId,
    pub name: String,
    #[serde(default)]
    pub industry: Option<String>,
    #[serde(default)]
    pub plan: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub integration: Option<ExternalIntegration>,
}

/// Third-party accounting integration fields.
///
/// Opaque pass-through data; nothing in this workspace interprets it.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalIntegration {
    #[serde(default)]
    pub company_id: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_expires_at: Option<DateTime<Utc>>,
}

impl core::fmt::Debug for ExternalIntegration {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let redact = |t: &Option<String>| t.as_ref().map(|_| "<redacted>");
        f.debug_struct("ExternalIntegration")
            .field("company_id", &self.company_id)
            .field("access_token", &redact(&self.access_token))
            .field("refresh_token", &redact(&self.refresh_token))
            .field("token_expires_at", &self.token_expires_at)
            .finish()
    }
}

/// Fields for creating an organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrganization {
    pub name: String,
    pub industry: Option<String>,
    pub plan: Option<String>,
    pub timezone: Option<String>,
}

impl NewOrganization {
    /// Validate and normalize creation input. A blank industry is treated as absent.
    pub fn new(name: &str, industry: Option<&str>) -> DomainResult<Self> {
        let name = validate::require_non_empty("organization name", name)?;
        Ok(Self {
            name: name.to_string(),
            industry: normalize_optional(industry),
            plan: None,
            timezone: None,
        })
    }
}

/// Partial update of an organization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationPatch {
    pub name: Option<String>,
    pub industry: Option<String>,
    pub plan: Option<String>,
    pub timezone: Option<String>,
    pub is_active: Option<bool>,
}

impl OrganizationPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.industry.is_none()
            && self.plan.is_none()
            && self.timezone.is_none()
            && self.is_active.is_none()
    }

    /// Reject empty patches and blank names.
    pub fn validate(&self) -> DomainResult<()> {
        if self.is_empty() {
            return Err(DomainError::validation("organization update has no fields"));
        }
        if let Some(name) = &self.name {
            validate::require_non_empty("organization name", name)?;
        }
        Ok(())
    }

    /// Apply the patch to a record in place.
    pub fn apply_to(&self, organization: &mut Organization) {
        if let Some(name) = &self.name {
            organization.name = name.trim().to_string();
        }
        if let Some(industry) = &self.industry {
            organization.industry = normalize_optional(Some(industry));
        }
        if let Some(plan) = &self.plan {
            organization.plan = normalize_optional(Some(plan));
        }
        if let Some(timezone) = &self.timezone {
            organization.timezone = normalize_optional(Some(timezone));
        }
        if let Some(active) = self.is_active {
            organization.is_active = active;
        }
    }
}

fn normalize_optional(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

// ─────────────────────────────────────────────────────────────────────────────
// Membership
// ─────────────────────────────────────────────────────────────────────────────

/// Per-organization role string carried by a membership.
///
/// Distinct from the global `Role` set used for feature gating; route checks
/// never consult it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MembershipRole(Cow<'static, str>);

impl MembershipRole {
    pub const ADMIN: &'static str = "admin";
    pub const OWNER: &'static str = "owner";

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    /// Role granted to the identity that creates an organization.
    pub fn admin() -> Self {
        Self(Cow::Borrowed(Self::ADMIN))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this membership may manage the organization record.
    pub fn is_elevated(&self) -> bool {
        matches!(self.as_str(), Self::ADMIN | Self::OWNER)
    }
}

impl core::fmt::Display for MembershipRole {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Link between an identity and an organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub identity_id: IdentityId,
    pub organization_id: OrganizationId,
    pub role: MembershipRole,
    pub is_active: bool,
}

impl Membership {
    /// An active membership.
    pub fn new(identity_id: IdentityId, organization_id: OrganizationId, role: MembershipRole) -> Self {
        Self {
            identity_id,
            organization_id,
            role,
            is_active: true,
        }
    }
}

/// An organization annotated with the caller's membership role in it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationMembership {
    pub organization: Organization,
    pub role: MembershipRole,
}

impl OrganizationMembership {
    pub fn id(&self) -> &OrganizationId {
        &self.organization.id
    }

    pub fn name(&self) -> &str {
        &self.organization.name
    }
}
