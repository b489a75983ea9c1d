//! In-memory auth provider + data store for tests/dev.
//!
//! - No IO
//! - Failures can be injected per operation
//! - Role and membership queries can be slowed down to exercise races

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use ledgerline_auth::{ProviderSession, ProviderUser};
use ledgerline_core::{
    IdentityId, Membership, MembershipRole, NewOrganization, Organization, OrganizationId,
    OrganizationPatch,
};

use crate::backend::{AuthProvider, BackendError, DataStore, MembershipRow, RoleRow, SignUpMetadata};
use crate::events::{AuthBroadcaster, AuthEvent, AuthSubscription};

/// Backend operations, for failure injection and call counting.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Operation {
    CurrentSession,
    SignIn,
    SignUp,
    SignOut,
    QueryRoles,
    QueryMemberships,
    InsertOrganization,
    InsertMembership,
    UpdateOrganization,
}

#[derive(Debug)]
struct MemoryUser {
    user: ProviderUser,
    password: String,
}

#[derive(Debug, Default)]
struct MemoryState {
    users: Vec<MemoryUser>,
    session: Option<ProviderSession>,
    roles: Vec<RoleRow>,
    organizations: Vec<Organization>,
    memberships: Vec<Membership>,
    failures: HashMap<Operation, String>,
    calls: HashMap<Operation, usize>,
    role_delays: HashMap<IdentityId, Duration>,
    membership_delay: Option<Duration>,
}

#[derive(Debug)]
pub struct InMemoryBackend {
    state: Mutex<MemoryState>,
    events: AuthBroadcaster,
    session_ttl: chrono::Duration,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            events: AuthBroadcaster::new(),
            session_ttl: chrono::Duration::hours(1),
        }
    }
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Count the call and fail it if a failure is armed.
    fn begin(&self, op: Operation) -> Result<(), BackendError> {
        let mut state = self.lock();
        *state.calls.entry(op).or_default() += 1;
        match state.failures.get(&op) {
            Some(message) => Err(BackendError::new(message.clone()).with_code("injected")),
            None => Ok(()),
        }
    }

    fn mint_session(&self, user: &ProviderUser) -> ProviderSession {
        let now = Utc::now();
        ProviderSession {
            user: user.clone(),
            access_token: Uuid::now_v7().to_string(),
            issued_at: now,
            expires_at: now + self.session_ttl,
        }
    }

    // ── seeding ─────────────────────────────────────────────────────────────

    /// Register a user directly (no events).
    pub fn with_user(&self, email: &str, password: &str, first_name: &str, last_name: &str) -> IdentityId {
        let id = IdentityId::new();
        self.lock().users.push(MemoryUser {
            user: ProviderUser {
                id: id.clone(),
                email: email.trim().to_lowercase(),
                first_name: Some(first_name.to_string()),
                last_name: Some(last_name.to_string()),
            },
            password: password.to_string(),
        });
        id
    }

    /// Attach a raw role string (unknown values are allowed, as in real rows).
    pub fn grant_role(&self, identity_id: &IdentityId, role: &str) {
        self.lock().roles.push(RoleRow {
            user_id: identity_id.clone(),
            role: role.to_string(),
        });
    }

    pub fn revoke_roles(&self, identity_id: &IdentityId) {
        self.lock().roles.retain(|r| &r.user_id != identity_id);
    }

    pub fn add_organization(&self, id: &str, name: &str) -> Organization {
        let organization = Organization {
            id: OrganizationId::from(id),
            name: name.to_string(),
            industry: None,
            plan: None,
            timezone: None,
            is_active: true,
            created_at: Utc::now(),
            integration: None,
        };
        self.lock().organizations.push(organization.clone());
        organization
    }

    pub fn add_membership(&self, identity_id: &IdentityId, organization_id: &OrganizationId, role: &str, is_active: bool) {
        self.lock().memberships.push(Membership {
            identity_id: identity_id.clone(),
            organization_id: organization_id.clone(),
            role: MembershipRole::new(role.to_string()),
            is_active,
        });
    }

    /// Make a stored session available to `current_session` (a restored login).
    pub fn restore_session(&self, identity_id: &IdentityId) -> Option<ProviderSession> {
        let mut state = self.lock();
        let user = state.users.iter().find(|u| &u.user.id == identity_id)?.user.clone();
        let session = self.mint_session(&user);
        state.session = Some(session.clone());
        Some(session)
    }

    /// Mint a session without touching provider state (for hand-made events).
    pub fn session_for(&self, identity_id: &IdentityId) -> Option<ProviderSession> {
        let state = self.lock();
        let user = state.users.iter().find(|u| &u.user.id == identity_id)?;
        Some(self.mint_session(&user.user))
    }

    // ── test controls ───────────────────────────────────────────────────────

    pub fn fail(&self, op: Operation, message: &str) {
        self.lock().failures.insert(op, message.to_string());
    }

    pub fn recover(&self, op: Operation) {
        self.lock().failures.remove(&op);
    }

    pub fn calls(&self, op: Operation) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    pub fn set_role_delay(&self, identity_id: &IdentityId, delay: Duration) {
        self.lock().role_delays.insert(identity_id.clone(), delay);
    }

    pub fn set_membership_delay(&self, delay: Option<Duration>) {
        self.lock().membership_delay = delay;
    }

    /// Publish an arbitrary provider event.
    pub fn emit(&self, event: AuthEvent) {
        self.events.publish(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.events.subscriber_count()
    }

    pub fn organizations(&self) -> Vec<Organization> {
        self.lock().organizations.clone()
    }

    pub fn memberships(&self) -> Vec<Membership> {
        self.lock().memberships.clone()
    }
}

#[async_trait::async_trait]
impl AuthProvider for InMemoryBackend {
    async fn current_session(&self) -> Result<Option<ProviderSession>, BackendError> {
        self.begin(Operation::CurrentSession)?;
        Ok(self.lock().session.clone())
    }

    fn subscribe(&self) -> AuthSubscription {
        self.events.subscribe()
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<ProviderSession, BackendError> {
        self.begin(Operation::SignIn)?;

        let session = {
            let mut state = self.lock();
            let email = email.trim().to_lowercase();
            let user = state
                .users
                .iter()
                .find(|u| u.user.email == email && u.password == password)
                .map(|u| u.user.clone())
                .ok_or_else(|| BackendError::new("Invalid login credentials").with_code("invalid_credentials"))?;
            let session = self.mint_session(&user);
            state.session = Some(session.clone());
            session
        };

        self.events.publish(AuthEvent::SignedIn(session.clone()));
        Ok(session)
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: &SignUpMetadata,
    ) -> Result<Option<ProviderSession>, BackendError> {
        self.begin(Operation::SignUp)?;

        let session = {
            let mut state = self.lock();
            let email = email.trim().to_lowercase();
            if state.users.iter().any(|u| u.user.email == email) {
                return Err(BackendError::new("User already registered").with_code("user_exists"));
            }
            let user = ProviderUser {
                id: IdentityId::new(),
                email,
                first_name: Some(metadata.first_name.clone()),
                last_name: Some(metadata.last_name.clone()),
            };
            state.users.push(MemoryUser {
                user: user.clone(),
                password: password.to_string(),
            });
            let session = self.mint_session(&user);
            state.session = Some(session.clone());
            session
        };

        self.events.publish(AuthEvent::SignedIn(session.clone()));
        Ok(Some(session))
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        self.begin(Operation::SignOut)?;
        let had_session = self.lock().session.take().is_some();
        if had_session {
            self.events.publish(AuthEvent::SignedOut);
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl DataStore for InMemoryBackend {
    async fn query_roles(&self, identity_id: &IdentityId) -> Result<Vec<RoleRow>, BackendError> {
        self.begin(Operation::QueryRoles)?;

        // Rows are read at call time; the delay holds back the response.
        let (rows, delay) = {
            let state = self.lock();
            let rows: Vec<RoleRow> = state
                .roles
                .iter()
                .filter(|r| &r.user_id == identity_id)
                .cloned()
                .collect();
            (rows, state.role_delays.get(identity_id).copied())
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        Ok(rows)
    }

    async fn query_memberships(&self, identity_id: &IdentityId) -> Result<Vec<MembershipRow>, BackendError> {
        self.begin(Operation::QueryMemberships)?;

        let delay = self.lock().membership_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let state = self.lock();
        Ok(state
            .memberships
            .iter()
            .filter(|m| &m.identity_id == identity_id && m.is_active)
            .filter_map(|m| {
                let organization = state.organizations.iter().find(|o| o.id == m.organization_id)?;
                Some(MembershipRow {
                    membership: m.clone(),
                    organization: organization.clone(),
                })
            })
            .collect())
    }

    async fn insert_organization(&self, fields: &NewOrganization) -> Result<Organization, BackendError> {
        self.begin(Operation::InsertOrganization)?;

        let organization = Organization {
            id: OrganizationId::new(),
            name: fields.name.clone(),
            industry: fields.industry.clone(),
            plan: fields.plan.clone(),
            timezone: fields.timezone.clone(),
            is_active: true,
            created_at: Utc::now(),
            integration: None,
        };
        self.lock().organizations.push(organization.clone());
        Ok(organization)
    }

    async fn insert_membership(&self, membership: &Membership) -> Result<Membership, BackendError> {
        self.begin(Operation::InsertMembership)?;

        let mut state = self.lock();
        if !state.organizations.iter().any(|o| o.id == membership.organization_id) {
            return Err(BackendError::new("organization does not exist").with_code("foreign_key_violation"));
        }
        state.memberships.push(membership.clone());
        Ok(membership.clone())
    }

    async fn update_organization(
        &self,
        id: &OrganizationId,
        patch: &OrganizationPatch,
    ) -> Result<Organization, BackendError> {
        self.begin(Operation::UpdateOrganization)?;

        let mut state = self.lock();
        let organization = state
            .organizations
            .iter_mut()
            .find(|o| &o.id == id)
            .ok_or_else(|| BackendError::new("organization not found").with_code("not_found"))?;
        patch.apply_to(organization);
        Ok(organization.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sign_in_publishes_event() {
        let backend = InMemoryBackend::new();
        let id = backend.with_user("alice@example.com", "pw", "Alice", "Smith");
        let mut subscription = backend.subscribe();

        let session = backend.sign_in_with_password("Alice@Example.com", "pw").await.unwrap();
        assert_eq!(session.user.id, id);
        assert!(matches!(subscription.try_recv(), Some(AuthEvent::SignedIn(s)) if s.user.id == id));

        assert!(backend.sign_in_with_password("alice@example.com", "wrong").await.is_err());
    }

    #[tokio::test]
    async fn memberships_join_organizations_in_insertion_order() {
        let backend = InMemoryBackend::new();
        let id = backend.with_user("a@b.c", "pw", "A", "B");
        let b = backend.add_organization("b", "Beta");
        let a = backend.add_organization("a", "Alpha");
        backend.add_membership(&id, &b.id, "member", true);
        backend.add_membership(&id, &a.id, "admin", true);
        backend.add_membership(&id, &OrganizationId::from("ghost"), "admin", true);

        let rows = backend.query_memberships(&id).await.unwrap();
        let names: Vec<_> = rows.iter().map(|r| r.organization.name.as_str()).collect();
        assert_eq!(names, vec!["Beta", "Alpha"]);
    }

    #[tokio::test]
    async fn injected_failures_are_counted() {
        let backend = InMemoryBackend::new();
        backend.fail(Operation::QueryRoles, "db down");

        let err = backend.query_roles(&IdentityId::from("u1")).await.unwrap_err();
        assert_eq!(err.message, "db down");
        assert_eq!(backend.calls(Operation::QueryRoles), 1);

        backend.recover(Operation::QueryRoles);
        assert!(backend.query_roles(&IdentityId::from("u1")).await.is_ok());
    }
}
