use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use ledgerline_core::IdentityId;

/// User record as reported by the auth provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderUser {
    pub id: IdentityId,
    pub email: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

/// A provider-held session (transport-agnostic).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSession {
    pub user: ProviderUser,
    pub access_token: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl core::fmt::Debug for ProviderSession {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ProviderSession")
            .field("user", &self.user)
            .field("access_token", &"<redacted>")
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionWindowError {
    #[error("session has expired")]
    Expired,

    #[error("session not yet valid (issued_at is in the future)")]
    NotYetValid,

    #[error("invalid session time window (expires_at <= issued_at)")]
    InvalidTimeWindow,
}

impl ProviderSession {
    /// Deterministically validate the session's time window.
    ///
    /// Token verification is the provider's job; this only rejects sessions
    /// that are obviously unusable.
    pub fn validate_window(&self, now: DateTime<Utc>) -> Result<(), SessionWindowError> {
        if self.expires_at <= self.issued_at {
            return Err(SessionWindowError::InvalidTimeWindow);
        }
        if now < self.issued_at {
            return Err(SessionWindowError::NotYetValid);
        }
        if now >= self.expires_at {
            return Err(SessionWindowError::Expired);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn session(issued_at: DateTime<Utc>, expires_at: DateTime<Utc>) -> ProviderSession {
        ProviderSession {
            user: ProviderUser {
                id: IdentityId::from("u1"),
                email: "alice@example.com".to_string(),
                first_name: None,
                last_name: None,
            },
            access_token: "token-123".to_string(),
            issued_at,
            expires_at,
        }
    }

    #[test]
    fn window_checks() {
        let now = Utc::now();
        assert!(session(now, now + Duration::hours(1)).validate_window(now).is_ok());
        assert_eq!(
            session(now, now).validate_window(now),
            Err(SessionWindowError::InvalidTimeWindow)
        );
        assert_eq!(
            session(now + Duration::minutes(5), now + Duration::hours(1)).validate_window(now),
            Err(SessionWindowError::NotYetValid)
        );
        assert_eq!(
            session(now - Duration::hours(2), now - Duration::hours(1)).validate_window(now),
            Err(SessionWindowError::Expired)
        );
    }

    #[test]
    fn debug_hides_token() {
        let now = Utc::now();
        let rendered = format!("{:?}", session(now, now + Duration::hours(1)));
        assert!(!rendered.contains("token-123"));
    }
}
