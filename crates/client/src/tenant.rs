//! Tenant store: resolves and persists which organization the signed-in
//! identity is acting within.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use ledgerline_auth::TenantState;
use ledgerline_core::{
    DomainError, IdentityId, Membership, MembershipRole, NewOrganization, Organization,
    OrganizationId, OrganizationMembership, OrganizationPatch,
};

use crate::backend::{DataStore, MembershipRow, with_deadline};
use crate::config::ClientConfig;
use crate::context::Services;
use crate::error::ClientError;
use crate::notify::{Notification, Notifier};
use crate::storage::{CURRENT_ORGANIZATION_KEY, LocalStorage};

/// Handle to the tenant store. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct TenantStore {
    inner: Arc<Inner>,
}

struct Inner {
    data: Arc<dyn DataStore>,
    storage: Arc<dyn LocalStorage>,
    notifier: Arc<dyn Notifier>,
    deadline: Option<Duration>,
    identity: watch::Receiver<Option<IdentityId>>,
    state: RwLock<TenantState>,
    /// Bumped by every fetch; only the latest may write back.
    generation: AtomicU64,
}

impl Inner {
    fn read(&self) -> RwLockReadGuard<'_, TenantState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, TenantState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn apply_if_current(&self, generation: u64, f: impl FnOnce(&mut TenantState)) -> bool {
        let mut state = self.write();
        if self.generation.load(Ordering::SeqCst) != generation {
            return false;
        }
        f(&mut state);
        true
    }

    fn identity(&self) -> Option<IdentityId> {
        self.identity.borrow().clone()
    }

    /// Pick the current organization for a freshly fetched list: the persisted
    /// one if it is still listed, else the first entry (persisted), else none.
    fn select_current(&self, organizations: &[OrganizationMembership]) -> Option<OrganizationMembership> {
        let stored = self.storage.get(CURRENT_ORGANIZATION_KEY);

        if let Some(found) = stored
            .as_deref()
            .and_then(|id| organizations.iter().find(|o| o.id().as_str() == id))
        {
            return Some(found.clone());
        }

        if let Some(stale) = &stored {
            debug!(organization_id = %stale, "stored organization is no longer available");
        }

        match organizations.first() {
            Some(first) => {
                self.persist_current(Some(first.id()));
                Some(first.clone())
            }
            None => {
                if stored.is_some() {
                    self.persist_current(None);
                }
                None
            }
        }
    }

    fn persist_current(&self, id: Option<&OrganizationId>) {
        let result = match id {
            Some(id) => self.storage.set(CURRENT_ORGANIZATION_KEY, id.as_str()),
            None => self.storage.remove(CURRENT_ORGANIZATION_KEY),
        };
        if let Err(err) = result {
            warn!(error = %err, "failed to persist current organization");
        }
    }

    fn notify(&self, notification: Notification) {
        self.notifier.notify(notification);
    }

    fn fail<T>(&self, title: &str, err: ClientError) -> Result<T, ClientError> {
        self.notify(Notification::error(title, err.user_message()));
        Err(err)
    }
}

impl TenantStore {
    /// `identity` tells the store who is asking; see
    /// `SessionStore::identity_changes`.
    pub fn new(
        services: &Services,
        config: &ClientConfig,
        identity: watch::Receiver<Option<IdentityId>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                data: services.data.clone(),
                storage: services.storage.clone(),
                notifier: services.notifier.clone(),
                deadline: config.request_deadline,
                identity,
                state: RwLock::new(TenantState::default()),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Load the identity's active organizations and resolve the current one.
    ///
    /// Without an identity the state is cleared. `loading` is reset on both
    /// success and failure.
    pub async fn fetch_organizations(&self) -> Result<Vec<OrganizationMembership>, ClientError> {
        let generation = self.inner.next_generation();
        self.inner.write().loading = true;

        let Some(identity_id) = self.inner.identity() else {
            self.inner.apply_if_current(generation, |state| {
                state.organizations.clear();
                state.current = None;
                state.loading = false;
            });
            debug!(generation, "no identity; organizations cleared");
            return Ok(Vec::new());
        };

        debug!(identity_id = %identity_id, generation, "fetching organizations");

        let rows = match with_deadline(
            self.inner.deadline,
            self.inner.data.query_memberships(&identity_id),
        )
        .await
        {
            Ok(rows) => rows,
            Err(err) => {
                error!(identity_id = %identity_id, error = %err, "organization fetch failed");
                self.inner.apply_if_current(generation, |state| state.loading = false);
                return self.inner.fail("Could not load organizations", err);
            }
        };

        let organizations: Vec<OrganizationMembership> = rows
            .into_iter()
            .filter(|row| row.is_visible_to(&identity_id))
            .map(MembershipRow::into_organization_membership)
            .collect();

        let applied = self.inner.apply_if_current(generation, |state| {
            state.current = self.inner.select_current(&organizations);
            state.organizations = organizations.clone();
            state.loading = false;
        });

        if applied {
            info!(
                identity_id = %identity_id,
                count = organizations.len(),
                current = ?self.current_organization().map(|o| o.organization.id),
                "organizations loaded"
            );
        } else {
            debug!(generation, "discarding stale organization fetch");
        }

        Ok(organizations)
    }

    /// Force a re-sync after an organization was changed elsewhere.
    pub async fn refresh_organizations(&self) -> Result<Vec<OrganizationMembership>, ClientError> {
        self.fetch_organizations().await
    }

    /// Select an organization from the loaded list and persist the choice.
    ///
    /// Unknown ids are ignored (no re-fetch); returns the selection otherwise.
    pub fn switch_organization(&self, id: &OrganizationId) -> Option<OrganizationMembership> {
        let selected = {
            let mut state = self.inner.write();
            let found = state.organizations.iter().find(|o| o.id() == id).cloned();
            if let Some(organization) = &found {
                state.current = Some(organization.clone());
                self.inner.persist_current(Some(id));
            }
            found
        };

        match &selected {
            Some(organization) => {
                info!(organization_id = %id, "switched organization");
                self.inner.notify(Notification::success(
                    "Organization switched",
                    format!("Now working in {}", organization.name()),
                ));
            }
            None => debug!(organization_id = %id, "ignoring switch to an organization that is not loaded"),
        }

        selected
    }

    /// Create an organization and make the caller its admin, then reload.
    ///
    /// If the membership insert fails the organization row is left behind and
    /// `ClientError::MembershipNotCreated` is returned; it is not usable by the
    /// caller until a membership exists.
    pub async fn create_new_organization(
        &self,
        name: &str,
        industry: Option<&str>,
    ) -> Result<Organization, ClientError> {
        const TITLE: &str = "Could not create organization";

        let fields = match NewOrganization::new(name, industry) {
            Ok(fields) => fields,
            Err(err) => return self.inner.fail(TITLE, err.into()),
        };
        let Some(identity_id) = self.inner.identity() else {
            return self.inner.fail(TITLE, ClientError::NotAuthenticated);
        };

        let organization = match with_deadline(
            self.inner.deadline,
            self.inner.data.insert_organization(&fields),
        )
        .await
        {
            Ok(organization) => organization,
            Err(err) => {
                error!(identity_id = %identity_id, error = %err, "organization insert failed");
                return self.inner.fail(TITLE, err);
            }
        };

        let membership = Membership::new(
            identity_id.clone(),
            organization.id.clone(),
            MembershipRole::admin(),
        );
        if let Err(err) = with_deadline(
            self.inner.deadline,
            self.inner.data.insert_membership(&membership),
        )
        .await
        {
            error!(
                organization_id = %organization.id,
                identity_id = %identity_id,
                error = %err,
                "membership insert failed after organization was created"
            );
            return self.inner.fail(
                TITLE,
                ClientError::MembershipNotCreated {
                    organization_id: organization.id.clone(),
                    source: Box::new(err),
                },
            );
        }

        info!(organization_id = %organization.id, identity_id = %identity_id, "organization created");
        self.inner.notify(Notification::success(
            "Organization created",
            format!("{} is ready", organization.name),
        ));

        if let Err(err) = self.fetch_organizations().await {
            warn!(organization_id = %organization.id, error = %err, "reload after create failed");
        }

        Ok(organization)
    }

    /// Update a loaded organization. Requires an elevated membership role in it.
    pub async fn update_organization(
        &self,
        id: &OrganizationId,
        patch: OrganizationPatch,
    ) -> Result<Organization, ClientError> {
        const TITLE: &str = "Could not update organization";

        if let Err(err) = patch.validate() {
            return self.inner.fail(TITLE, err.into());
        }

        let role = self
            .inner
            .read()
            .organizations
            .iter()
            .find(|o| o.id() == id)
            .map(|o| o.role.clone());
        let Some(role) = role else {
            return self.inner.fail(TITLE, DomainError::not_found(format!("organization {id}")).into());
        };
        if !role.is_elevated() {
            let err = DomainError::forbidden(format!("membership role '{role}' cannot update the organization"));
            return self.inner.fail(TITLE, err.into());
        }

        let updated = match with_deadline(
            self.inner.deadline,
            self.inner.data.update_organization(id, &patch),
        )
        .await
        {
            Ok(updated) => updated,
            Err(err) => {
                error!(organization_id = %id, error = %err, "organization update failed");
                return self.inner.fail(TITLE, err);
            }
        };

        info!(organization_id = %id, "organization updated");
        self.inner
            .notify(Notification::success("Organization updated", updated.name.clone()));

        if let Err(err) = self.refresh_organizations().await {
            warn!(organization_id = %id, error = %err, "reload after update failed");
        }

        Ok(updated)
    }

    pub fn snapshot(&self) -> TenantState {
        self.inner.read().clone()
    }

    pub fn current_organization(&self) -> Option<OrganizationMembership> {
        self.inner.read().current.clone()
    }

    pub fn organizations(&self) -> Vec<OrganizationMembership> {
        self.inner.read().organizations.clone()
    }

    /// The caller's per-organization role in the current organization. This
    /// is not the global role set consulted by route guarding.
    pub fn current_membership_role(&self) -> Option<MembershipRole> {
        self.inner.read().current_membership_role().cloned()
    }

    pub fn is_loading(&self) -> bool {
        self.inner.read().loading
    }

    /// Fetch now, then again every time the signed-in identity changes.
    pub fn spawn_identity_follower(&self) -> TenantFollower {
        let store = self.clone();
        let mut changes = self.inner.identity.clone();

        let handle = tokio::spawn(async move {
            let _ = changes.borrow_and_update();
            loop {
                if let Err(err) = store.fetch_organizations().await {
                    debug!(error = %err, "organization fetch after identity change failed");
                }
                if changes.changed().await.is_err() {
                    break;
                }
            }
            debug!("identity channel closed; tenant follower stopped");
        });

        TenantFollower { handle }
    }
}

/// Background task keeping the tenant store in step with the session.
#[derive(Debug)]
pub struct TenantFollower {
    handle: JoinHandle<()>,
}

impl TenantFollower {
    pub fn stop(self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for TenantFollower {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
