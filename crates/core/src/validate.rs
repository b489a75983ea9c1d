//! Presence/shape checks applied at the call boundary, before anything is sent
//! to the backend.

use crate::error::{DomainError, DomainResult};

/// Require a non-blank value; returns it trimmed.
pub fn require_non_empty<'a>(field: &str, value: &'a str) -> DomainResult<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(DomainError::validation(format!("{field} is required")));
    }
    Ok(trimmed)
}

/// Require a value to be present without altering it (secrets are not trimmed).
pub fn require_present<'a>(field: &str, value: &'a str) -> DomainResult<&'a str> {
    if value.is_empty() {
        return Err(DomainError::validation(format!("{field} is required")));
    }
    Ok(value)
}

/// Basic email shape check; returns the normalized (trimmed, lower-cased) address.
pub fn require_email(value: &str) -> DomainResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(DomainError::validation("email is required"));
    }
    match trimmed.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => {
            Ok(trimmed.to_lowercase())
        }
        _ => Err(DomainError::validation("invalid email format")),
    }
}
