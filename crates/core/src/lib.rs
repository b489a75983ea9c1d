//! `ledgerline-core` — domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no IO, no async): identifiers,
//! the domain error model, tenant records and boundary validation.

pub mod error;
pub mod id;
pub mod organization;
pub mod validate;

pub use error::{DomainError, DomainResult};
pub use id::{IdentityId, OrganizationId};
pub use organization::{
    ExternalIntegration, Membership, MembershipRole, NewOrganization, Organization,
    OrganizationMembership, OrganizationPatch,
};
