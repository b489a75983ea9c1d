//! `ledgerline-client`
//!
//! **Responsibility:** session and tenant bootstrap for the ERP front-end.
//!
//! This crate provides:
//! - The backend collaborator contracts (auth provider + data store)
//! - `SessionStore`: who is signed in and which roles they hold
//! - `TenantStore`: which organization the identity is acting within
//! - `ClientContext`: wiring of both stores plus route guarding
//!
//! Every data operation is delegated to the hosted backend; nothing here
//! persists beyond two client-local keys.

pub mod backend;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod memory;
pub mod notify;
pub mod session;
pub mod storage;
pub mod tenant;

pub use backend::{AuthProvider, BackendError, DataStore, MembershipRow, RoleRow, SignUpMetadata};
pub use config::{ClientConfig, ConfigError};
pub use context::{ClientContext, Services};
pub use error::ClientError;
pub use events::{AuthBroadcaster, AuthEvent, AuthSubscription};
pub use memory::{InMemoryBackend, Operation};
pub use notify::{Notification, NotificationLevel, Notifier, RecordingNotifier, TracingNotifier};
pub use session::{SessionListener, SessionStore};
pub use storage::{FileStorage, LocalStorage, MemoryStorage, StorageError};
pub use tenant::{TenantFollower, TenantStore};
