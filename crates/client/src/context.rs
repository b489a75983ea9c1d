//! Application bootstrap: constructs the stores, starts their background
//! tasks, and evaluates the route guard against their current state.

use std::sync::Arc;

use anyhow::Context;

use tracing::info;

use ledgerline_auth::{GuardExplanation, GuardOutcome, RouteTable, explain, evaluate};

use crate::backend::{AuthProvider, DataStore};
use crate::config::ClientConfig;
use crate::memory::InMemoryBackend;
use crate::notify::{Notifier, TracingNotifier};
use crate::session::{SessionListener, SessionStore};
use crate::storage::{LocalStorage, MemoryStorage};
use crate::tenant::{TenantFollower, TenantStore};

/// External collaborators injected into the stores.
#[derive(Clone)]
pub struct Services {
    pub auth: Arc<dyn AuthProvider>,
    pub data: Arc<dyn DataStore>,
    pub storage: Arc<dyn LocalStorage>,
    pub notifier: Arc<dyn Notifier>,
}

impl Services {
    /// In-memory storage and log-only notifications.
    pub fn new(auth: Arc<dyn AuthProvider>, data: Arc<dyn DataStore>) -> Self {
        Self {
            auth,
            data,
            storage: Arc::new(MemoryStorage::new()),
            notifier: Arc::new(TracingNotifier),
        }
    }

    /// Storage chosen by `config`: file-backed when a path is set.
    pub fn from_config(
        auth: Arc<dyn AuthProvider>,
        data: Arc<dyn DataStore>,
        config: &ClientConfig,
    ) -> anyhow::Result<Self> {
        let storage = config
            .open_storage()
            .context("failed to open client local storage")?;
        Ok(Self::new(auth, data).with_storage(storage))
    }

    /// One in-memory backend serving as both provider and data store.
    pub fn in_memory(backend: Arc<InMemoryBackend>) -> Self {
        Self::new(backend.clone(), backend)
    }

    pub fn with_storage(mut self, storage: Arc<dyn LocalStorage>) -> Self {
        self.storage = storage;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }
}

/// Running session + tenant stores for one application instance.
///
/// Dropping the context (or calling `shutdown`) unsubscribes from the
/// provider and stops following identity changes.
pub struct ClientContext {
    session: SessionStore,
    tenant: TenantStore,
    routes: RouteTable,
    listener: SessionListener,
    follower: TenantFollower,
}

impl ClientContext {
    pub async fn start(services: Services, config: ClientConfig, routes: RouteTable) -> Self {
        let session = SessionStore::new(&services, &config);
        let listener = session.start().await;

        let tenant = TenantStore::new(&services, &config, session.identity_changes());
        let follower = tenant.spawn_identity_follower();

        info!(
            bypass = session.is_bypassed(),
            deadline = ?config.request_deadline,
            "client context started"
        );

        Self {
            session,
            tenant,
            routes,
            listener,
            follower,
        }
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    pub fn tenant(&self) -> &TenantStore {
        &self.tenant
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Guard a render of `path` against the current session and tenant state.
    pub fn guard(&self, path: &str) -> GuardOutcome {
        evaluate(
            &self.session.snapshot(),
            &self.tenant.snapshot(),
            self.routes.required_role(path),
        )
    }

    pub fn explain(&self, path: &str) -> GuardExplanation {
        explain(
            &self.session.snapshot(),
            &self.tenant.snapshot(),
            self.routes.required_role(path),
        )
    }

    /// Where a render of `path` should navigate instead, if anywhere.
    pub fn redirect_for(&self, path: &str) -> Option<String> {
        self.routes.destination(self.guard(path)).map(str::to_string)
    }

    /// Route prefixes visible in navigation for the current session.
    pub fn visible_paths(&self) -> Vec<String> {
        self.routes
            .visible_paths(&self.session.snapshot())
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    pub fn shutdown(self) {
        let Self {
            listener, follower, ..
        } = self;
        listener.stop();
        follower.stop();
        info!("client context stopped");
    }
}
