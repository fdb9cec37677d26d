use async_trait::async_trait;
use jam_core::clock::ManualClock;
use jam_core::storage::keys;
use jam_core::{
    AuthError, AuthState, Browser, JamRecorder, KeyValueStore, MemoryStore, RspotifyApi,
    SpotifyConfig,
};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CALLBACK: &str = "http://127.0.0.1:8888/callback";

struct AddressBar {
    url: Mutex<Option<String>>,
}

impl AddressBar {
    fn at(url: &str) -> Self {
        Self {
            url: Mutex::new(Some(url.to_string())),
        }
    }
}

#[async_trait]
impl Browser for AddressBar {
    async fn navigate(&self, url: &str) -> Result<(), AuthError> {
        *self.url.lock() = Some(url.to_string());
        Ok(())
    }

    fn current_url(&self) -> Option<String> {
        self.url.lock().clone()
    }

    fn replace_url(&self, url: &str) {
        *self.url.lock() = Some(url.to_string());
    }
}

fn recorder(
    server: &MockServer,
    storage: Arc<MemoryStore>,
    clock: Arc<ManualClock>,
) -> JamRecorder {
    let config = SpotifyConfig::new("client-id", CALLBACK)
        .with_token_endpoint(format!("{}/api/token", server.uri()));
    JamRecorder::with_parts(
        config,
        storage,
        clock,
        Arc::new(RspotifyApi::new("client-id")),
    )
}

#[tokio::test]
async fn test_callback_with_code_signs_in() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/token"))
        .and(body_string_contains("code=abc123"))
        .and(body_string_contains("code_verifier=v1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "access_token": "tok", "expires_in": 3600 })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let storage = Arc::new(MemoryStore::new());
    storage.set(keys::CODE_VERIFIER, "v1");
    let app = recorder(&server, storage.clone(), Arc::new(ManualClock::new(0)));

    let browser = AddressBar::at(&format!("{}?code=abc123", CALLBACK));
    assert!(app.handle_callback(&browser).await);

    assert_eq!(storage.get(keys::ACCESS_TOKEN).as_deref(), Some("tok"));
    assert!(storage.get(keys::CODE_VERIFIER).is_none());
    assert_eq!(browser.current_url().as_deref(), Some(CALLBACK));
    assert_eq!(app.get_access_token().as_deref(), Some("tok"));
    assert_eq!(app.auth_state(), AuthState::Authenticated);

    // Reloading the stripped URL does not exchange the code again.
    assert!(app.handle_callback(&browser).await);
}

#[tokio::test]
async fn test_callback_with_error_stays_signed_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/token"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let storage = Arc::new(MemoryStore::new());
    storage.set(keys::CODE_VERIFIER, "v1");
    let app = recorder(&server, storage.clone(), Arc::new(ManualClock::new(0)));

    let browser = AddressBar::at(&format!("{}?error=access_denied", CALLBACK));
    assert!(!app.handle_callback(&browser).await);

    assert!(storage.get(keys::ACCESS_TOKEN).is_none());
    assert!(storage.get(keys::REFRESH_TOKEN).is_none());
    assert!(storage.get(keys::CODE_VERIFIER).is_none());
    assert_eq!(browser.current_url().as_deref(), Some(CALLBACK));
    assert!(!app.is_authenticated());
}

#[tokio::test]
async fn test_token_expires_after_its_lifetime() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "access_token": "tok", "expires_in": 3600 })),
        )
        .mount(&server)
        .await;

    let storage = Arc::new(MemoryStore::new());
    storage.set(keys::CODE_VERIFIER, "v1");
    let clock = Arc::new(ManualClock::new(0));
    let app = recorder(&server, storage.clone(), clock.clone());

    let browser = AddressBar::at(&format!("{}?code=abc123", CALLBACK));
    assert!(app.handle_callback(&browser).await);

    clock.set(3_600_001);
    assert!(app.get_access_token().is_none());
    assert!(storage.is_empty());
    assert_eq!(app.auth_state(), AuthState::LoggedOut);
}

#[tokio::test]
async fn test_login_survives_restart_with_shared_storage() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(
            json!({ "access_token": "tok", "expires_in": 3600, "refresh_token": "r1" }),
        ))
        .expect(1)
        .mount(&server)
        .await;

    let storage = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(0));
    let first = recorder(&server, storage.clone(), clock.clone());

    let browser = AddressBar::at(CALLBACK);
    first.authorize(&browser).await.unwrap();
    assert!(storage.get(keys::CODE_VERIFIER).is_some());
    browser.replace_url(&format!("{}?code=abc123", CALLBACK));
    assert!(first.handle_callback(&browser).await);
    drop(first);

    clock.set(60_000);
    let second = recorder(&server, storage.clone(), clock);
    assert_eq!(second.get_access_token().as_deref(), Some("tok"));
    assert_eq!(storage.get(keys::REFRESH_TOKEN).as_deref(), Some("r1"));
}
