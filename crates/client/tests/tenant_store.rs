use std::sync::Arc;
use std::time::Duration;

use ledgerline_auth::Role;
use ledgerline_client::storage::CURRENT_ORGANIZATION_KEY;
use ledgerline_client::{
    ClientConfig, ClientError, InMemoryBackend, LocalStorage, MemoryStorage, Operation,
    RecordingNotifier, Services, SessionListener, SessionStore, TenantStore,
};
use ledgerline_core::{DomainError, IdentityId, MembershipRole, OrganizationId, OrganizationPatch};

struct Harness {
    backend: Arc<InMemoryBackend>,
    storage: Arc<MemoryStorage>,
    notifier: Arc<RecordingNotifier>,
    session: SessionStore,
    tenant: TenantStore,
    _listener: SessionListener,
}

impl Harness {
    /// Start a session for `signed_in` (if any) and a tenant store following it.
    /// Seeding happens in `seed` before the session resolves.
    async fn start(seed: impl FnOnce(&InMemoryBackend) -> Option<IdentityId>) -> Self {
        Self::start_with(ClientConfig::default(), MemoryStorage::new(), seed).await
    }

    async fn start_with(
        config: ClientConfig,
        storage: MemoryStorage,
        seed: impl FnOnce(&InMemoryBackend) -> Option<IdentityId>,
    ) -> Self {
        let backend = Arc::new(InMemoryBackend::new());
        if let Some(id) = seed(&backend) {
            backend.restore_session(&id);
        }

        let storage = Arc::new(storage);
        let notifier = Arc::new(RecordingNotifier::new());
        let services = Services::in_memory(backend.clone())
            .with_storage(storage.clone())
            .with_notifier(notifier.clone());

        let session = SessionStore::new(&services, &config);
        let listener = session.start().await;
        let tenant = TenantStore::new(&services, &config, session.identity_changes());

        Self {
            backend,
            storage,
            notifier,
            session,
            tenant,
            _listener: listener,
        }
    }

    fn current_id(&self) -> Option<String> {
        self.tenant
            .current_organization()
            .map(|o| o.id().as_str().to_string())
    }

    fn names(&self) -> Vec<String> {
        self.tenant
            .organizations()
            .into_iter()
            .map(|o| o.name().to_string())
            .collect()
    }
}

fn member_of_a_and_b(backend: &InMemoryBackend) -> Option<IdentityId> {
    let u1 = backend.with_user("u1@example.com", "pw", "User", "One");
    let a = backend.add_organization("org-a", "Alpha Foods");
    let b = backend.add_organization("org-b", "Beta Retail");
    backend.add_membership(&u1, &a.id, "admin", true);
    backend.add_membership(&u1, &b.id, "member", true);
    Some(u1)
}

async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("{what} did not happen within timeout");
}

#[tokio::test]
async fn signed_out_fetch_clears_state() {
    let h = Harness::start(|_| None).await;

    let organizations = h.tenant.fetch_organizations().await.unwrap();

    assert!(organizations.is_empty());
    assert!(h.tenant.current_organization().is_none());
    assert!(!h.tenant.is_loading());
    assert_eq!(h.backend.calls(Operation::QueryMemberships), 0);
}

#[tokio::test]
async fn first_listed_organization_becomes_current_and_is_persisted() {
    let h = Harness::start(member_of_a_and_b).await;

    h.tenant.fetch_organizations().await.unwrap();

    assert_eq!(h.names(), vec!["Alpha Foods", "Beta Retail"]);
    assert_eq!(h.current_id().as_deref(), Some("org-a"));
    assert_eq!(h.storage.get(CURRENT_ORGANIZATION_KEY).as_deref(), Some("org-a"));
    assert!(!h.tenant.is_loading());
}

#[tokio::test]
async fn persisted_selection_is_restored() {
    let storage = MemoryStorage::new();
    storage.set(CURRENT_ORGANIZATION_KEY, "org-b").unwrap();
    let h = Harness::start_with(ClientConfig::default(), storage, member_of_a_and_b).await;

    h.tenant.fetch_organizations().await.unwrap();

    assert_eq!(h.current_id().as_deref(), Some("org-b"));
    assert_eq!(
        h.tenant.current_membership_role(),
        Some(MembershipRole::new("member"))
    );
}

#[tokio::test]
async fn stale_persisted_selection_heals_to_the_first_organization() {
    let storage = MemoryStorage::new();
    storage.set(CURRENT_ORGANIZATION_KEY, "org-gone").unwrap();
    let h = Harness::start_with(ClientConfig::default(), storage, member_of_a_and_b).await;

    h.tenant.fetch_organizations().await.unwrap();

    assert_eq!(h.current_id().as_deref(), Some("org-a"));
    assert_eq!(h.storage.get(CURRENT_ORGANIZATION_KEY).as_deref(), Some("org-a"));
}

#[tokio::test]
async fn no_memberships_removes_the_persisted_selection() {
    let storage = MemoryStorage::new();
    storage.set(CURRENT_ORGANIZATION_KEY, "org-gone").unwrap();
    let h = Harness::start_with(ClientConfig::default(), storage, |backend| {
        Some(backend.with_user("lonely@example.com", "pw", "Lonely", "User"))
    })
    .await;

    h.tenant.fetch_organizations().await.unwrap();

    assert!(h.tenant.organizations().is_empty());
    assert!(h.tenant.current_organization().is_none());
    assert_eq!(h.storage.get(CURRENT_ORGANIZATION_KEY), None);
}

#[tokio::test]
async fn inactive_memberships_are_not_listed() {
    let h = Harness::start(|backend| {
        let u1 = backend.with_user("u1@example.com", "pw", "User", "One");
        let a = backend.add_organization("org-a", "Alpha Foods");
        let b = backend.add_organization("org-b", "Beta Retail");
        backend.add_membership(&u1, &a.id, "member", false);
        backend.add_membership(&u1, &b.id, "member", true);
        Some(u1)
    })
    .await;

    h.tenant.fetch_organizations().await.unwrap();

    assert_eq!(h.names(), vec!["Beta Retail"]);
    assert_eq!(h.current_id().as_deref(), Some("org-b"));
}

#[tokio::test]
async fn switching_round_trips_through_storage() {
    let h = Harness::start(member_of_a_and_b).await;
    h.tenant.fetch_organizations().await.unwrap();

    let selected = h.tenant.switch_organization(&OrganizationId::from("org-b"));

    assert_eq!(selected.map(|o| o.name().to_string()).as_deref(), Some("Beta Retail"));
    assert_eq!(h.current_id().as_deref(), Some("org-b"));
    assert_eq!(h.storage.get(CURRENT_ORGANIZATION_KEY).as_deref(), Some("org-b"));
    assert_eq!(h.notifier.titles(), vec!["Organization switched"]);

    // A later fetch keeps the switched selection.
    h.tenant.refresh_organizations().await.unwrap();
    assert_eq!(h.current_id().as_deref(), Some("org-b"));
}

#[tokio::test]
async fn switching_to_an_unloaded_organization_is_ignored() {
    let h = Harness::start(member_of_a_and_b).await;
    h.tenant.fetch_organizations().await.unwrap();
    let fetches = h.backend.calls(Operation::QueryMemberships);

    let selected = h.tenant.switch_organization(&OrganizationId::from("org-elsewhere"));

    assert!(selected.is_none());
    assert_eq!(h.current_id().as_deref(), Some("org-a"));
    assert_eq!(h.storage.get(CURRENT_ORGANIZATION_KEY).as_deref(), Some("org-a"));
    assert_eq!(h.backend.calls(Operation::QueryMemberships), fetches);
    assert!(h.notifier.all().is_empty());
}

#[tokio::test]
async fn fetch_failure_resets_loading_and_notifies() {
    let h = Harness::start(member_of_a_and_b).await;
    h.backend.fail(Operation::QueryMemberships, "relation does not exist");

    let err = h.tenant.fetch_organizations().await.unwrap_err();

    assert!(matches!(err, ClientError::Backend(_)));
    assert!(!h.tenant.is_loading());
    let notes = h.notifier.all();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].title, "Could not load organizations");
    assert_eq!(notes[0].message.as_deref(), Some("relation does not exist"));
}

#[tokio::test]
async fn slow_membership_query_times_out() {
    let h = Harness::start_with(
        ClientConfig::default().with_request_deadline(Duration::from_millis(20)),
        MemoryStorage::new(),
        member_of_a_and_b,
    )
    .await;
    h.backend.set_membership_delay(Some(Duration::from_millis(500)));

    let err = h.tenant.fetch_organizations().await.unwrap_err();

    assert!(matches!(err, ClientError::Timeout(_)));
    assert!(!h.tenant.is_loading());
}

#[tokio::test]
async fn create_organization_makes_the_creator_its_admin() {
    let h = Harness::start(|backend| Some(backend.with_user("founder@example.com", "pw", "Fay", "Founder"))).await;
    let creator = h.session.current_identity().unwrap().id;

    let organization = h
        .tenant
        .create_new_organization("Acme", Some("Manufacturing"))
        .await
        .unwrap();

    assert_eq!(organization.name, "Acme");
    assert_eq!(organization.industry.as_deref(), Some("Manufacturing"));

    let memberships = h.backend.memberships();
    assert_eq!(memberships.len(), 1);
    assert_eq!(memberships[0].identity_id, creator);
    assert_eq!(memberships[0].organization_id, organization.id);
    assert_eq!(memberships[0].role, MembershipRole::admin());
    assert!(memberships[0].is_active);

    assert_eq!(h.names(), vec!["Acme"]);
    assert_eq!(h.current_id().as_deref(), Some(organization.id.as_str()));
    assert_eq!(h.notifier.titles(), vec!["Organization created"]);
}

#[tokio::test]
async fn create_organization_rejects_a_blank_name() {
    let h = Harness::start(|backend| Some(backend.with_user("founder@example.com", "pw", "Fay", "Founder"))).await;

    let err = h.tenant.create_new_organization("   ", None).await.unwrap_err();

    assert!(err.is_validation());
    assert_eq!(h.backend.calls(Operation::InsertOrganization), 0);
    assert!(h.backend.organizations().is_empty());
    assert_eq!(h.notifier.titles(), vec!["Could not create organization"]);
}

#[tokio::test]
async fn create_organization_requires_a_signed_in_identity() {
    let h = Harness::start(|_| None).await;

    let err = h.tenant.create_new_organization("Acme", None).await.unwrap_err();

    assert!(matches!(err, ClientError::NotAuthenticated));
    assert_eq!(h.backend.calls(Operation::InsertOrganization), 0);
}

#[tokio::test]
async fn membership_failure_after_create_is_reported_distinctly() {
    let h = Harness::start(|backend| Some(backend.with_user("founder@example.com", "pw", "Fay", "Founder"))).await;
    h.backend.fail(Operation::InsertMembership, "row-level security violation");

    let err = h.tenant.create_new_organization("Acme", None).await.unwrap_err();

    let ClientError::MembershipNotCreated { organization_id, .. } = &err else {
        panic!("expected MembershipNotCreated, got {err:?}");
    };
    let orphans = h.backend.organizations();
    assert_eq!(orphans.len(), 1);
    assert_eq!(&orphans[0].id, organization_id);
    assert!(h.tenant.organizations().is_empty());

    let notes = h.notifier.all();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].title, "Could not create organization");
    assert_eq!(notes[0].message.as_deref(), Some("row-level security violation"));
}

#[tokio::test]
async fn admins_can_update_their_organization() {
    let h = Harness::start(member_of_a_and_b).await;
    h.tenant.fetch_organizations().await.unwrap();

    let patch = OrganizationPatch {
        name: Some("Alpha Foods Ltd".to_string()),
        timezone: Some("Europe/London".to_string()),
        ..OrganizationPatch::default()
    };
    let updated = h
        .tenant
        .update_organization(&OrganizationId::from("org-a"), patch)
        .await
        .unwrap();

    assert_eq!(updated.name, "Alpha Foods Ltd");
    assert_eq!(updated.timezone.as_deref(), Some("Europe/London"));
    assert_eq!(h.names(), vec!["Alpha Foods Ltd", "Beta Retail"]);
    assert_eq!(h.notifier.titles(), vec!["Organization updated"]);
}

#[tokio::test]
async fn members_cannot_update_the_organization() {
    let h = Harness::start(member_of_a_and_b).await;
    h.tenant.fetch_organizations().await.unwrap();

    let patch = OrganizationPatch {
        name: Some("Hijacked".to_string()),
        ..OrganizationPatch::default()
    };
    let err = h
        .tenant
        .update_organization(&OrganizationId::from("org-b"), patch)
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::Domain(DomainError::Forbidden(_))));
    assert_eq!(h.backend.calls(Operation::UpdateOrganization), 0);
    assert_eq!(h.notifier.titles(), vec!["Could not update organization"]);
}

#[tokio::test]
async fn updating_an_unloaded_organization_is_not_found() {
    let h = Harness::start(member_of_a_and_b).await;
    h.tenant.fetch_organizations().await.unwrap();

    let patch = OrganizationPatch {
        plan: Some("pro".to_string()),
        ..OrganizationPatch::default()
    };
    let err = h
        .tenant
        .update_organization(&OrganizationId::from("org-elsewhere"), patch)
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::Domain(DomainError::NotFound(_))));
}

#[tokio::test]
async fn membership_roles_are_separate_from_global_roles() {
    let h = Harness::start(member_of_a_and_b).await;
    h.tenant.fetch_organizations().await.unwrap();

    assert_eq!(h.tenant.current_membership_role(), Some(MembershipRole::admin()));
    assert!(!h.session.has_role(Role::Admin));
}

#[tokio::test]
async fn follower_tracks_sign_in_and_sign_out() {
    let h = Harness::start(|backend| {
        let u1 = backend.with_user("u1@example.com", "pw", "User", "One");
        let a = backend.add_organization("org-a", "Alpha Foods");
        backend.add_membership(&u1, &a.id, "admin", true);
        None
    })
    .await;
    let _follower = h.tenant.spawn_identity_follower();

    h.session.sign_in("u1@example.com", "pw").await.unwrap();
    eventually("organizations loaded", || h.current_id().as_deref() == Some("org-a")).await;

    h.session.sign_out().await;
    eventually("organizations cleared", || h.tenant.organizations().is_empty()).await;
    assert!(h.tenant.current_organization().is_none());
}

#[tokio::test]
async fn stale_fetch_does_not_overwrite_a_newer_one() {
    let h = Harness::start(member_of_a_and_b).await;
    h.backend.set_membership_delay(Some(Duration::from_millis(80)));

    let slow = {
        let tenant = h.tenant.clone();
        tokio::spawn(async move { tenant.fetch_organizations().await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    // Sign-out clears identity; the follow-up fetch must win.
    h.backend.set_membership_delay(None);
    h.session.sign_out().await;
    h.tenant.fetch_organizations().await.unwrap();

    slow.await.unwrap().unwrap();
    assert!(h.tenant.organizations().is_empty());
    assert!(h.tenant.current_organization().is_none());
}
