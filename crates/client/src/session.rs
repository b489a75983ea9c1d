//! Session store: the single source of truth for who is signed in and which
//! roles they hold. The only component that talks to the auth provider.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use ledgerline_auth::{Identity, ProviderSession, Role, RoleSet, SessionState};
use ledgerline_core::{IdentityId, validate};

use crate::backend::{AuthProvider, DataStore, SignUpMetadata, with_deadline};
use crate::config::ClientConfig;
use crate::context::Services;
use crate::error::ClientError;
use crate::events::AuthEvent;
use crate::notify::{Notification, Notifier};
use crate::storage::{self, BYPASS_AUTH_KEY, LocalStorage};

/// Handle to the session store. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<Inner>,
}

struct Inner {
    auth: Arc<dyn AuthProvider>,
    data: Arc<dyn DataStore>,
    storage: Arc<dyn LocalStorage>,
    notifier: Arc<dyn Notifier>,
    deadline: Option<Duration>,
    allow_bypass: bool,
    state: RwLock<SessionState>,
    /// Bumped by every resolution and sign-out; only the latest may write back.
    generation: AtomicU64,
    identity_tx: watch::Sender<Option<IdentityId>>,
}

impl Inner {
    fn read(&self) -> RwLockReadGuard<'_, SessionState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, SessionState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Replace the identity if `generation` is still the latest. Publishes the
    /// identity id under the same lock so observers see writes in order.
    fn install_identity(&self, generation: u64, identity: Option<Identity>) -> bool {
        let mut state = self.write();
        if self.generation.load(Ordering::SeqCst) != generation {
            return false;
        }
        let id = identity.as_ref().map(|i| i.id.clone());
        state.identity = identity;
        state.loading = false;
        self.publish_identity(id);
        true
    }

    fn publish_identity(&self, id: Option<IdentityId>) {
        self.identity_tx.send_if_modified(|current| {
            if *current == id {
                return false;
            }
            *current = id;
            true
        });
    }

    fn notify(&self, notification: Notification) {
        self.notifier.notify(notification);
    }

    fn fail<T>(&self, title: &str, err: ClientError) -> Result<T, ClientError> {
        self.notify(Notification::error(title, err.user_message()));
        Err(err)
    }
}

impl SessionStore {
    /// Construct the store. State is `loading` until `start` resolves the
    /// initial session.
    pub fn new(services: &Services, config: &ClientConfig) -> Self {
        let stored_bypass = storage::read_flag(services.storage.as_ref(), BYPASS_AUTH_KEY);
        let bypass = stored_bypass && config.allow_bypass;
        if stored_bypass && !config.allow_bypass {
            warn!("ignoring persisted authorization bypass; bypass is disabled");
        } else if bypass {
            warn!("authorization bypass is enabled");
        }

        let (identity_tx, _) = watch::channel(None);

        Self {
            inner: Arc::new(Inner {
                auth: services.auth.clone(),
                data: services.data.clone(),
                storage: services.storage.clone(),
                notifier: services.notifier.clone(),
                deadline: config.request_deadline,
                allow_bypass: config.allow_bypass,
                state: RwLock::new(SessionState {
                    bypass,
                    ..SessionState::default()
                }),
                generation: AtomicU64::new(0),
                identity_tx,
            }),
        }
    }

    /// Subscribe to provider changes, resolve the restored session, and keep
    /// listening in the background until the returned listener is dropped.
    pub async fn start(&self) -> SessionListener {
        let mut subscription = self.inner.auth.subscribe();

        let restored = match with_deadline(self.inner.deadline, self.inner.auth.current_session()).await {
            Ok(session) => session,
            Err(err) => {
                warn!(error = %err, "failed to restore session; starting signed out");
                None
            }
        };
        self.handle_auth_event(AuthEvent::InitialSession(restored)).await;

        let store = self.clone();
        let handle = tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                store.handle_auth_event(event).await;
            }
            debug!("auth subscription closed");
        });

        SessionListener { handle }
    }

    /// Re-derive identity and roles from scratch for a provider event.
    pub async fn handle_auth_event(&self, event: AuthEvent) {
        debug!(event = event.kind(), "auth state change");

        let session = event.into_session().filter(|session| {
            match session.validate_window(Utc::now()) {
                Ok(()) => true,
                Err(err) => {
                    warn!(identity_id = %session.user.id, error = %err, "ignoring unusable provider session");
                    false
                }
            }
        });

        self.resolve(session).await;
    }

    async fn resolve(&self, session: Option<ProviderSession>) {
        let generation = self.inner.next_generation();

        let identity = match session {
            Some(session) => {
                let roles = self.fetch_roles(&session.user.id).await;
                Some(Identity::from_session(&session, roles))
            }
            None => None,
        };

        let signed_in = identity.as_ref().map(|i| i.id.clone());
        if self.inner.install_identity(generation, identity) {
            match signed_in {
                Some(id) => info!(identity_id = %id, generation, "session resolved"),
                None => info!(generation, "session resolved: signed out"),
            }
        } else {
            debug!(generation, "discarding stale session resolution");
        }
    }

    async fn fetch_roles(&self, identity_id: &IdentityId) -> RoleSet {
        match with_deadline(self.inner.deadline, self.inner.data.query_roles(identity_id)).await {
            Ok(rows) => rows
                .iter()
                .filter(|row| &row.user_id == identity_id)
                .filter_map(|row| match row.parse() {
                    Ok(role) => Some(role),
                    Err(err) => {
                        warn!(identity_id = %identity_id, error = %err, "ignoring role row");
                        None
                    }
                })
                .collect(),
            Err(err) => {
                error!(identity_id = %identity_id, error = %err, "role fetch failed; continuing without roles");
                RoleSet::empty()
            }
        }
    }

    /// Password sign-in. State changes arrive through the provider's change
    /// notification, not from this call.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<(), ClientError> {
        const TITLE: &str = "Sign in failed";

        let email = match validate::require_email(email) {
            Ok(email) => email,
            Err(err) => return self.inner.fail(TITLE, err.into()),
        };
        if let Err(err) = validate::require_present("password", password) {
            return self.inner.fail(TITLE, err.into());
        }

        match with_deadline(
            self.inner.deadline,
            self.inner.auth.sign_in_with_password(&email, password),
        )
        .await
        {
            Ok(_) => {
                info!(email = %email, "sign-in accepted");
                self.inner.notify(Notification::success("Signed in", "Welcome back!"));
                Ok(())
            }
            Err(err) => {
                warn!(email = %email, error = %err, "sign-in rejected");
                self.inner.fail(TITLE, err)
            }
        }
    }

    /// Register a new identity. Creating its first organization is the
    /// caller's job.
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        first_name: &str,
        last_name: &str,
    ) -> Result<(), ClientError> {
        const TITLE: &str = "Sign up failed";

        let checked = validate::require_email(email).and_then(|email| {
            validate::require_present("password", password)?;
            let first_name = validate::require_non_empty("first name", first_name)?;
            let last_name = validate::require_non_empty("last name", last_name)?;
            Ok((
                email,
                SignUpMetadata {
                    first_name: first_name.to_string(),
                    last_name: last_name.to_string(),
                },
            ))
        });
        let (email, metadata) = match checked {
            Ok(checked) => checked,
            Err(err) => return self.inner.fail(TITLE, err.into()),
        };

        match with_deadline(
            self.inner.deadline,
            self.inner.auth.sign_up(&email, password, &metadata),
        )
        .await
        {
            Ok(_) => {
                info!(email = %email, "sign-up accepted");
                self.inner
                    .notify(Notification::success("Account created", "Your account is ready."));
                Ok(())
            }
            Err(err) => {
                warn!(email = %email, error = %err, "sign-up rejected");
                self.inner.fail(TITLE, err)
            }
        }
    }

    /// End the provider session and forget the identity. Never fails: local
    /// state is cleared even if the provider call does not succeed.
    pub async fn sign_out(&self) {
        // Invalidate any resolution still in flight.
        let generation = self.inner.next_generation();

        if let Err(err) = with_deadline(self.inner.deadline, self.inner.auth.sign_out()).await {
            warn!(error = %err, "provider sign-out failed; clearing local session anyway");
        }

        let previous = {
            let mut state = self.inner.write();
            let previous = state.identity.take();
            state.loading = false;
            self.inner.publish_identity(None);
            previous
        };

        match previous {
            Some(identity) => info!(identity_id = %identity.id, generation, "signed out"),
            None => debug!("sign-out requested without a session"),
        }
        self.inner
            .notify(Notification::success("Signed out", "You have been signed out."));
    }

    /// Global role membership test. False when nobody is signed in.
    pub fn has_role(&self, role: Role) -> bool {
        self.inner.read().has_role(role)
    }

    /// Re-fetch the current identity's roles and replace them in place.
    ///
    /// Any resolution or sign-out that starts meanwhile supersedes the refresh.
    pub async fn refresh_roles(&self) {
        let Some(identity_id) = self.current_identity_id() else {
            debug!("role refresh skipped: no identity");
            return;
        };
        let generation = self.inner.generation.load(Ordering::SeqCst);

        let roles = self.fetch_roles(&identity_id).await;

        let mut state = self.inner.write();
        if self.inner.generation.load(Ordering::SeqCst) != generation {
            debug!(identity_id = %identity_id, generation, "discarding stale role refresh");
            return;
        }
        match state.identity.as_mut().filter(|i| i.id == identity_id) {
            Some(identity) => identity.roles = roles,
            None => debug!(identity_id = %identity_id, "identity changed during role refresh; dropping result"),
        }
    }

    /// Toggle the development authorization bypass (persisted).
    pub fn set_bypass(&self, enabled: bool) -> Result<(), ClientError> {
        if enabled && !self.inner.allow_bypass {
            return Err(ClientError::BypassDisabled);
        }

        storage::write_flag(self.inner.storage.as_ref(), BYPASS_AUTH_KEY, enabled)?;
        self.inner.write().bypass = enabled;

        if enabled {
            warn!("authorization bypass enabled");
            self.inner.notify(Notification::info("Authorization bypass enabled"));
        } else {
            info!("authorization bypass disabled");
            self.inner.notify(Notification::info("Authorization bypass disabled"));
        }
        Ok(())
    }

    pub fn is_bypassed(&self) -> bool {
        self.inner.read().bypass
    }

    pub fn is_loading(&self) -> bool {
        self.inner.read().loading
    }

    pub fn snapshot(&self) -> SessionState {
        self.inner.read().clone()
    }

    pub fn current_identity(&self) -> Option<Identity> {
        self.inner.read().identity.clone()
    }

    /// The signed-in identity, or the anonymous stand-in while bypassed.
    pub fn effective_identity(&self) -> Option<Identity> {
        self.inner.read().effective_identity()
    }

    fn current_identity_id(&self) -> Option<IdentityId> {
        self.inner.read().identity.as_ref().map(|i| i.id.clone())
    }

    /// Observe the signed-in identity id. This is how the tenant store learns
    /// who is asking without reading session state.
    pub fn identity_changes(&self) -> watch::Receiver<Option<IdentityId>> {
        self.inner.identity_tx.subscribe()
    }
}

/// Background auth-change listener. Dropping it unsubscribes.
#[derive(Debug)]
pub struct SessionListener {
    handle: JoinHandle<()>,
}

impl SessionListener {
    pub fn stop(self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for SessionListener {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
