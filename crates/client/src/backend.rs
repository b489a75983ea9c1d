//! Contracts of the hosted data/auth backend.
//!
//! Wire formats belong to the backend; these traits only fix typed request and
//! response shapes so store logic never inspects untyped payloads.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use ledgerline_auth::{ProviderSession, Role, UnknownRole};
use ledgerline_core::{
    IdentityId, Membership, NewOrganization, Organization, OrganizationId, OrganizationMembership,
    OrganizationPatch,
};

use crate::error::ClientError;
use crate::events::AuthSubscription;

/// Structured failure reported by the backend.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct BackendError {
    pub message: String,
    pub code: Option<String>,
}

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

/// Profile metadata attached at sign-up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignUpMetadata {
    pub first_name: String,
    pub last_name: String,
}

/// One `(identity, role)` membership row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRow {
    pub user_id: IdentityId,
    pub role: String,
}

impl RoleRow {
    pub fn parse(&self) -> Result<Role, UnknownRole> {
        self.role.parse()
    }
}

/// A membership row joined with its organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipRow {
    pub membership: Membership,
    pub organization: Organization,
}

impl MembershipRow {
    /// Whether the row is usable for `identity_id`: active, addressed to that
    /// identity, and joined to the organization it references.
    pub fn is_visible_to(&self, identity_id: &IdentityId) -> bool {
        self.membership.is_active
            && &self.membership.identity_id == identity_id
            && self.membership.organization_id == self.organization.id
    }

    pub fn into_organization_membership(self) -> OrganizationMembership {
        OrganizationMembership {
            organization: self.organization,
            role: self.membership.role,
        }
    }
}

/// The auth provider. Only the session store talks to it.
#[async_trait::async_trait]
pub trait AuthProvider: Send + Sync {
    /// The persisted provider session, if any.
    async fn current_session(&self) -> Result<Option<ProviderSession>, BackendError>;

    /// Register for sign-in/sign-out/token-refresh notifications.
    ///
    /// Dropping the returned subscription unsubscribes.
    fn subscribe(&self) -> AuthSubscription;

    /// On success the provider also emits a change notification; callers must
    /// not rely on the returned session for state.
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<ProviderSession, BackendError>;

    /// Returns a session when the provider signs the new identity in directly.
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: &SignUpMetadata,
    ) -> Result<Option<ProviderSession>, BackendError>;

    async fn sign_out(&self) -> Result<(), BackendError>;
}

/// Row storage used by the stores.
#[async_trait::async_trait]
pub trait DataStore: Send + Sync {
    async fn query_roles(&self, identity_id: &IdentityId) -> Result<Vec<RoleRow>, BackendError>;

    /// Active memberships of `identity_id`, joined with their organizations.
    async fn query_memberships(
        &self,
        identity_id: &IdentityId,
    ) -> Result<Vec<MembershipRow>, BackendError>;

    async fn insert_organization(
        &self,
        fields: &NewOrganization,
    ) -> Result<Organization, BackendError>;

    async fn insert_membership(&self, membership: &Membership) -> Result<Membership, BackendError>;

    async fn update_organization(
        &self,
        id: &OrganizationId,
        patch: &OrganizationPatch,
    ) -> Result<Organization, BackendError>;
}

/// Run a backend call, bounded by `deadline` when one is configured.
///
/// An elapsed deadline takes the same failure path as a backend error.
pub(crate) async fn with_deadline<T, F>(deadline: Option<Duration>, call: F) -> Result<T, ClientError>
where
    F: Future<Output = Result<T, BackendError>>,
{
    match deadline {
        None => call.await.map_err(ClientError::from),
        Some(limit) => match tokio::time::timeout(limit, call).await {
            Ok(result) => result.map_err(ClientError::from),
            Err(_) => Err(ClientError::Timeout(limit)),
        },
    }
}
