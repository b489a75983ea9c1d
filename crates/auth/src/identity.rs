use serde::{Deserialize, Serialize};

use ledgerline_core::IdentityId;

use crate::{ProviderSession, Role, RoleSet};

/// Provider-issued display data. Read-only here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

/// The authenticated actor, with its separately fetched role set attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: IdentityId,
    pub email: String,
    pub profile: Profile,
    pub roles: RoleSet,
}

impl Identity {
    pub const ANONYMOUS_ID: &'static str = "anonymous";

    /// Build an identity from a provider session and a freshly fetched role set.
    pub fn from_session(session: &ProviderSession, roles: RoleSet) -> Self {
        Self {
            id: session.user.id.clone(),
            email: session.user.email.clone(),
            profile: Profile {
                first_name: session.user.first_name.clone(),
                last_name: session.user.last_name.clone(),
            },
            roles,
        }
    }

    /// Synthetic identity assumed while the authorization bypass is on.
    pub fn anonymous() -> Self {
        Self {
            id: IdentityId::from(Self::ANONYMOUS_ID),
            email: String::new(),
            profile: Profile::default(),
            roles: RoleSet::empty(),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.id.as_str() == Self::ANONYMOUS_ID
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(role)
    }

    /// "First Last", falling back to the email address.
    pub fn display_name(&self) -> String {
        let parts: Vec<&str> = [&self.profile.first_name, &self.profile.last_name]
            .into_iter()
            .filter_map(|p| p.as_deref())
            .filter(|p| !p.is_empty())
            .collect();
        if parts.is_empty() {
            self.email.clone()
        } else {
            parts.join(" ")
        }
    }
}
