//! Client session lifecycle
//!
//! Boot paths, redirect consumption, interactive sign-in with provisioning,
//! subscriber replacement and sign-out. Most tests script the provider; the
//! last one runs the whole stack against a mock tenant.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{MockTenant, approving_authorizer, state_of};
use parking_lot::Mutex;
use rivalsdb_auth::session::{
    Location, MemoryLocation, SessionManager, SignInOutcome, TokenStore, UserProvisioner,
};
use rivalsdb_auth::test_utils::{LoginBehavior, MockProvider};
use rivalsdb_auth::provider::OidcProvider;
use rivalsdb_auth::{CacheLocation, IdentityClaims};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

type Deliveries = Arc<Mutex<Vec<IdentityClaims>>>;

fn profile() -> serde_json::Value {
    json!({"sub": "u1", "email": "a@b.com"})
}

fn recorder() -> (Deliveries, impl Fn(IdentityClaims) + Send + Sync + 'static) {
    let deliveries = Deliveries::default();
    let sink = deliveries.clone();
    (deliveries, move |claims| sink.lock().push(claims))
}

fn store(provider: &MockProvider) -> TokenStore {
    TokenStore::from_provider(Arc::new(provider.clone()))
}

fn home() -> MemoryLocation {
    MemoryLocation::parse("https://rivalsdb.app/").unwrap()
}

async fn mount_users(server: &MockServer, status: u16, times: u64) {
    Mock::given(method("POST"))
        .and(path("/api/v2/users"))
        .and(header("authorization", "Bearer t1"))
        .and(body_json(json!({"email": "a@b.com"})))
        .respond_with(ResponseTemplate::new(status))
        .expect(times)
        .mount(server)
        .await;
}

async fn wait_for_requests(server: &MockServer, count: usize) {
    for _ in 0..200 {
        if server.received_requests().await.unwrap_or_default().len() >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("expected {count} requests to arrive");
}

#[tokio::test]
async fn test_boot_restores_signed_in_session() {
    let provider = MockProvider::signed_in("t1", profile());
    let (deliveries, callback) = recorder();

    let boot = SessionManager::builder(store(&provider))
        .on_identity(callback)
        .start(&mut home())
        .await;

    let identity = boot.identity.unwrap();
    assert_eq!(identity.token, "t1");
    assert_eq!(identity.user_id, "u1");
    assert_eq!(*deliveries.lock(), vec![identity]);
    assert_eq!(provider.calls().redirect, 0);
    boot.manager.shutdown().await;
}

#[tokio::test]
async fn test_boot_signed_out_without_redirect() {
    let provider = MockProvider::signed_out("t1", profile());
    let mut location = home();

    let boot = SessionManager::builder(store(&provider))
        .start(&mut location)
        .await;

    assert!(boot.identity.is_none());
    assert_eq!(location.replacements(), 0);
    assert_eq!(provider.calls().get_token, 0);
    boot.manager.shutdown().await;
}

#[tokio::test]
async fn test_boot_completes_redirect_once() {
    let provider = MockProvider::signed_out("t1", profile()).with_expected_state("s1");
    let mut location = MemoryLocation::parse("https://rivalsdb.app/?code=c1&state=s1").unwrap();

    let boot = SessionManager::builder(store(&provider))
        .start(&mut location)
        .await;

    assert_eq!(boot.identity.unwrap().email, "a@b.com");
    assert_eq!(location.current().as_str(), "https://rivalsdb.app/");
    assert_eq!(provider.redirects(), vec![("c1".to_string(), "s1".to_string())]);
    boot.manager.shutdown().await;

    // A reload lands on the stripped location and does not replay the code
    provider.set_authenticated(false);
    let boot = SessionManager::builder(store(&provider))
        .start(&mut location)
        .await;
    assert!(boot.identity.is_none());
    assert_eq!(provider.calls().redirect, 1);
    boot.manager.shutdown().await;
}

#[tokio::test]
async fn test_boot_survives_failed_redirect() {
    let provider = MockProvider::signed_out("t1", profile()).with_expected_state("s1");
    let mut location =
        MemoryLocation::parse("https://rivalsdb.app/decks?code=c1&state=forged").unwrap();

    let boot = SessionManager::builder(store(&provider))
        .start(&mut location)
        .await;

    assert!(boot.identity.is_none());
    assert!(!boot.manager.is_authenticated().await);
    assert_eq!(location.current().as_str(), "https://rivalsdb.app/decks");
    boot.manager.shutdown().await;
}

#[tokio::test]
async fn test_sign_in_notifies_and_provisions() {
    let api = MockServer::start().await;
    mount_users(&api, 201, 1).await;
    let provider = MockProvider::signed_out("t1", profile());
    let (deliveries, callback) = recorder();

    let boot = SessionManager::builder(store(&provider))
        .provisioner(UserProvisioner::new(&api.uri()).unwrap())
        .on_identity(callback)
        .start(&mut home())
        .await;

    let outcome = boot.manager.sign_in().await.unwrap();

    let expected = IdentityClaims {
        token: "t1".into(),
        user_id: "u1".into(),
        email: "a@b.com".into(),
    };
    assert_eq!(outcome, SignInOutcome::SignedIn(expected.clone()));
    assert_eq!(*deliveries.lock(), vec![expected]);
    wait_for_requests(&api, 1).await;
    boot.manager.shutdown().await;
}

#[tokio::test]
async fn test_provisioning_failure_does_not_fail_sign_in() {
    let api = MockServer::start().await;
    mount_users(&api, 500, 1).await;
    let provider = MockProvider::signed_out("t1", profile());
    let (deliveries, callback) = recorder();

    let boot = SessionManager::builder(store(&provider))
        .provisioner(UserProvisioner::new(&api.uri()).unwrap())
        .on_identity(callback)
        .start(&mut home())
        .await;

    let outcome = boot.manager.sign_in().await.unwrap();

    assert!(matches!(outcome, SignInOutcome::SignedIn(_)));
    assert_eq!(deliveries.lock().len(), 1);
    wait_for_requests(&api, 1).await;
    boot.manager.shutdown().await;
}

#[tokio::test]
async fn test_cancelled_sign_in_changes_nothing() {
    let api = MockServer::start().await;
    mount_users(&api, 201, 0).await;
    let provider = MockProvider::signed_out("t1", profile()).with_login(LoginBehavior::Cancel);
    let (deliveries, callback) = recorder();

    let boot = SessionManager::builder(store(&provider))
        .provisioner(UserProvisioner::new(&api.uri()).unwrap())
        .on_identity(callback)
        .start(&mut home())
        .await;

    let outcome = boot.manager.sign_in().await.unwrap();

    assert_eq!(outcome, SignInOutcome::Cancelled);
    assert!(deliveries.lock().is_empty());
    assert!(!boot.manager.is_authenticated().await);
    boot.manager.shutdown().await;
}

#[tokio::test]
async fn test_failed_sign_in_is_reported() {
    let provider = MockProvider::signed_out("t1", profile()).with_login(LoginBehavior::Fail);
    let boot = SessionManager::builder(store(&provider))
        .start(&mut home())
        .await;

    assert!(boot.manager.sign_in().await.is_err());
    boot.manager.shutdown().await;
}

#[tokio::test]
async fn test_sign_in_with_incomplete_profile() {
    let provider = MockProvider::signed_out("t1", json!({"sub": "u1"}));
    let (deliveries, callback) = recorder();

    let boot = SessionManager::builder(store(&provider))
        .on_identity(callback)
        .start(&mut home())
        .await;

    assert_eq!(boot.manager.sign_in().await.unwrap(), SignInOutcome::NoIdentity);
    assert!(deliveries.lock().is_empty());
    boot.manager.shutdown().await;
}

#[tokio::test]
async fn test_latest_callback_replaces_previous() {
    let provider = MockProvider::signed_out("t1", profile());
    let (first, first_callback) = recorder();
    let (second, second_callback) = recorder();

    let boot = SessionManager::builder(store(&provider))
        .on_identity(first_callback)
        .start(&mut home())
        .await;
    boot.manager.set_identity_callback(second_callback);

    boot.manager.sign_in().await.unwrap();

    assert!(first.lock().is_empty());
    assert_eq!(second.lock().len(), 1);
    boot.manager.shutdown().await;
}

#[tokio::test]
async fn test_sign_out_is_local_only() {
    let provider = MockProvider::signed_in("t1", profile());
    let boot = SessionManager::builder(store(&provider))
        .start(&mut home())
        .await;

    boot.manager.sign_out().await.unwrap();

    assert_eq!(provider.logouts(), vec![true]);
    assert!(!boot.manager.is_authenticated().await);
    assert!(boot.manager.fetch_identity().await.is_none());
    boot.manager.shutdown().await;
}

#[tokio::test]
async fn test_sign_out_everywhere_revokes() {
    let provider = MockProvider::signed_in("t1", profile());
    let boot = SessionManager::builder(store(&provider))
        .start(&mut home())
        .await;

    boot.manager.sign_out_everywhere().await.unwrap();

    assert_eq!(provider.logouts(), vec![false]);
    boot.manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_refresh_delivers_after_boot() {
    let provider = MockProvider::signed_in("t1", profile());
    let (deliveries, callback) = recorder();

    let boot = SessionManager::builder(store(&provider))
        .refresh_interval(Duration::from_secs(60))
        .on_identity(callback)
        .start(&mut home())
        .await;
    assert_eq!(deliveries.lock().len(), 1);

    provider.set_token("t2");
    tokio::time::advance(Duration::from_secs(61)).await;
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }

    let delivered = deliveries.lock().clone();
    assert_eq!(delivered.len(), 2);
    assert_eq!(delivered[1].token, "t2");
    boot.manager.shutdown().await;
}

#[tokio::test]
async fn test_full_stack_sign_in_against_tenant() {
    let tenant = MockTenant::start().await;
    tenant.mount_code_exchange("t1", Some("r1"), 3600).await;
    tenant.mount_userinfo(profile()).await;
    mount_users(&tenant.server, 201, 1).await;
    let (deliveries, callback) = recorder();

    let config = tenant.client_config().with_api_base_url(tenant.domain());
    let boot = SessionManager::create_with(config, approving_authorizer("c1"), &mut home())
        .await
        .unwrap();
    assert!(boot.identity.is_none());
    boot.manager.set_identity_callback(callback);

    let outcome = boot.manager.sign_in().await.unwrap();

    assert!(matches!(outcome, SignInOutcome::SignedIn(ref claims) if claims.token == "t1"));
    assert_eq!(deliveries.lock().len(), 1);

    // discovery, token, userinfo, then the registration POST
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let requests = tenant.server.received_requests().await.unwrap_or_default();
        if requests.iter().any(|r| r.url.path() == "/api/v2/users") {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "registration never sent");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    boot.manager.shutdown().await;
}

#[tokio::test]
async fn test_redirect_sign_in_survives_reload() {
    let tenant = MockTenant::start().await;
    tenant.mount_code_exchange("t1", Some("r1"), 3600).await;
    tenant.mount_userinfo(profile()).await;
    let dir = tempfile::tempdir().unwrap();
    let config = tenant.client_config().with_cache_location(CacheLocation::LocalStorage {
        path: dir.path().join("session.json"),
    });

    // Before the reload: send the user off to the provider
    let before = OidcProvider::connect(config.clone(), approving_authorizer("c1"))
        .await
        .unwrap();
    let state = state_of(&before.begin_redirect().await.unwrap());
    drop(before);

    // After: the app boots again on the redirect URL
    let mut location =
        MemoryLocation::parse(&format!("https://rivalsdb.app/?code=c1&state={state}")).unwrap();
    let boot = SessionManager::create_with(config, approving_authorizer("c1"), &mut location)
        .await
        .unwrap();

    let identity = boot.identity.clone().unwrap();
    assert_eq!(identity.token, "t1");
    assert_eq!(identity.email, "a@b.com");
    assert!(boot.manager.is_authenticated().await);
    assert_eq!(location.current().as_str(), "https://rivalsdb.app/");
    boot.manager.shutdown().await;
}
