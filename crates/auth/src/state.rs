//! Read-only snapshots of session and tenant state.
//!
//! The stores own and mutate these; everything else (the route guard, UI)
//! receives clones.

use serde::{Deserialize, Serialize};

use ledgerline_core::{MembershipRole, OrganizationMembership};

use crate::{Identity, Role};

/// Who is signed in, and whether that is known yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub identity: Option<Identity>,
    /// True from process start until the first auth-state resolution.
    pub loading: bool,
    /// Development-only override that disables every authorization check.
    pub bypass: bool,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            identity: None,
            loading: true,
            bypass: false,
        }
    }
}

impl SessionState {
    /// Global role membership test. Never fails; false without an identity.
    pub fn has_role(&self, role: Role) -> bool {
        self.identity.as_ref().is_some_and(|i| i.has_role(role))
    }

    pub fn is_authenticated(&self) -> bool {
        self.identity.is_some()
    }

    /// The identity authorization should reason about: the real one, or the
    /// anonymous stand-in while bypassed.
    pub fn effective_identity(&self) -> Option<Identity> {
        match (&self.identity, self.bypass) {
            (Some(identity), _) => Some(identity.clone()),
            (None, true) => Some(Identity::anonymous()),
            (None, false) => None,
        }
    }
}

/// Which organization the identity is acting within.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantState {
    pub current: Option<OrganizationMembership>,
    pub organizations: Vec<OrganizationMembership>,
    pub loading: bool,
}

impl TenantState {
    /// Organizations exist but none is selected.
    pub fn needs_selection(&self) -> bool {
        !self.organizations.is_empty() && self.current.is_none()
    }

    /// The caller's per-organization role in the current organization.
    pub fn current_membership_role(&self) -> Option<&MembershipRole> {
        self.current.as_ref().map(|c| &c.role)
    }
}

#[cfg(test)]
mod tests {
    use ledgerline_core::IdentityId;

    use super::*;
    use crate::{Profile, RoleSet};

    fn signed_in() -> Identity {
        Identity {
            id: IdentityId::from("u1"),
            email: "u1@example.com".to_string(),
            profile: Profile::default(),
            roles: [Role::Warehouse].into_iter().collect::<RoleSet>(),
        }
    }

    #[test]
    fn bypass_without_identity_assumes_anonymous() {
        let state = SessionState {
            identity: None,
            loading: false,
            bypass: true,
        };

        let effective = state.effective_identity().unwrap();
        assert!(effective.is_anonymous());
        assert!(effective.roles.is_empty());
        assert!(!state.is_authenticated());
    }

    #[test]
    fn real_identity_wins_over_anonymous() {
        let state = SessionState {
            identity: Some(signed_in()),
            loading: false,
            bypass: true,
        };

        let effective = state.effective_identity().unwrap();
        assert!(!effective.is_anonymous());
        assert!(effective.has_role(Role::Warehouse));
    }

    #[test]
    fn no_identity_without_bypass() {
        let state = SessionState {
            loading: false,
            ..SessionState::default()
        };
        assert!(state.effective_identity().is_none());
        assert!(!state.has_role(Role::Admin));
    }
}
