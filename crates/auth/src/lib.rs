//! `ledgerline-auth` — pure authentication/authorization boundary.
//!
//! This crate is intentionally decoupled from the backend and from async: it
//! holds the role model, the identity, state snapshots and the route guard.

pub mod guard;
pub mod identity;
pub mod roles;
pub mod routes;
pub mod session;
pub mod state;

pub use guard::{GuardExplanation, GuardOutcome, evaluate, explain};
pub use identity::{Identity, Profile};
pub use roles::{Role, RoleSet, UnknownRole};
pub use routes::{RouteRule, RouteTable};
pub use session::{ProviderSession, ProviderUser, SessionWindowError};
pub use state::{SessionState, TenantState};
