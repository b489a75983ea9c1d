use std::time::Duration;

use thiserror::Error;

use ledgerline_core::{DomainError, OrganizationId};

use crate::backend::BackendError;
use crate::storage::StorageError;

/// Failure returned by every public store operation.
///
/// Backend failures are caught at the store boundary and surfaced here; they
/// never escape as panics.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Rejected at the call boundary; nothing was sent to the backend.
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("not signed in")]
    NotAuthenticated,

    /// The organization row exists but the caller's membership does not.
    #[error("organization {organization_id} was created but membership creation failed: {source}")]
    MembershipNotCreated {
        organization_id: OrganizationId,
        #[source]
        source: Box<ClientError>,
    },

    #[error("authorization bypass is disabled")]
    BypassDisabled,

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ClientError {
    pub fn is_validation(&self) -> bool {
        matches!(self, ClientError::Domain(DomainError::Validation(_)))
    }

    /// Short text suitable for a user-facing notification body.
    pub fn user_message(&self) -> String {
        match self {
            ClientError::Backend(err) => err.message.clone(),
            ClientError::Domain(DomainError::Validation(msg)) => msg.clone(),
            ClientError::MembershipNotCreated { source, .. } => source.user_message(),
            other => other.to_string(),
        }
    }
}
