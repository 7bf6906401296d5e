//! Refresh sweep behavior: proactive refresh of expiring tokens, and the
//! guarantee that per-record failures never abort a pass.

use std::collections::BTreeMap;

use chrono::Utc;
use sqlx::sqlite::SqlitePoolOptions;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tokenrelay::crypto::Cipher;
use tokenrelay::jobs::refresh::run_sweep;
use tokenrelay::lifecycle::TokenManager;
use tokenrelay::registry::{self, ProviderRegistry, RawProvider, RawRegistry};
use tokenrelay::store::TokenStore;

const TEST_KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

async fn test_store() -> TokenStore {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let store = TokenStore::new(pool, Cipher::from_hex(TEST_KEY).unwrap());
    store.init().await.unwrap();
    store
}

fn provider_entry(mock_uri: &str, token_path: &str) -> RawProvider {
    RawProvider {
        display_name: None,
        base_url: mock_uri.to_string(),
        auth_url: format!("{}/oauth/authorize", mock_uri),
        token_url: format!("{}{}", mock_uri, token_path),
        client_id: "cid".to_string(),
        client_secret: "csecret".to_string(),
        scopes: vec![],
        extra_params: BTreeMap::new(),
    }
}

fn build_registry(entries: Vec<(&str, RawProvider)>) -> ProviderRegistry {
    let raw = RawRegistry {
        providers: entries
            .into_iter()
            .map(|(slug, e)| (slug.to_string(), e))
            .collect(),
    };
    registry::build(raw, &Default::default()).registry
}

#[tokio::test]
async fn sweep_refreshes_expiring_tokens_and_skips_unknown_providers() {
    let mock = MockServer::start().await;
    let store = test_store().await;
    let registry = build_registry(vec![("oura", provider_entry(&mock.uri(), "/oauth/token"))]);
    let manager = TokenManager::new(store.clone(), reqwest::Client::new());

    let now = Utc::now().timestamp();
    // Within the 600s proactive window.
    store
        .store_token("oura", "daniel", "r1", Some("a1"), Some(now + 100), None)
        .await
        .unwrap();
    // Comfortably fresh: must be left alone.
    store
        .store_token("oura", "fresh", "r2", Some("a2"), Some(now + 7200), None)
        .await
        .unwrap();
    // Provider no longer in the registry: skipped, record kept.
    store
        .store_token("ghost", "default", "r3", Some("a3"), Some(now - 100), None)
        .await
        .unwrap();

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("refresh_token=r1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "a1-new",
            "expires_in": 3600,
        })))
        .expect(1)
        .mount(&mock)
        .await;

    run_sweep(&store, &registry, &manager).await.unwrap();

    let refreshed = store.get_token("oura", "daniel").await.unwrap().unwrap();
    assert_eq!(refreshed.access_token.as_deref(), Some("a1-new"));
    assert!(refreshed.expires_at.unwrap() > now + 3000);

    let untouched = store.get_token("oura", "fresh").await.unwrap().unwrap();
    assert_eq!(untouched.access_token.as_deref(), Some("a2"));

    // The unknown-provider record survives untouched for later reconfiguration.
    let ghost = store.get_token("ghost", "default").await.unwrap().unwrap();
    assert_eq!(ghost.access_token.as_deref(), Some("a3"));
}

#[tokio::test]
async fn one_failing_record_does_not_abort_the_sweep() {
    let mock = MockServer::start().await;
    let store = test_store().await;
    // Two providers with distinct token endpoints on the same mock server.
    let registry = build_registry(vec![
        ("broken", provider_entry(&mock.uri(), "/broken/token")),
        ("working", provider_entry(&mock.uri(), "/working/token")),
    ]);
    let manager = TokenManager::new(store.clone(), reqwest::Client::new());

    let now = Utc::now().timestamp();
    store
        .store_token("broken", "default", "rb", Some("ab"), Some(now - 50), None)
        .await
        .unwrap();
    store
        .store_token("working", "default", "rw", Some("aw"), Some(now - 50), None)
        .await
        .unwrap();

    Mock::given(method("POST"))
        .and(path("/broken/token"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&mock)
        .await;
    Mock::given(method("POST"))
        .and(path("/working/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "aw-new",
            "expires_in": 3600,
        })))
        .expect(1)
        .mount(&mock)
        .await;

    run_sweep(&store, &registry, &manager).await.unwrap();

    // The failing record is unchanged; the healthy one was refreshed.
    let broken = store.get_token("broken", "default").await.unwrap().unwrap();
    assert_eq!(broken.access_token.as_deref(), Some("ab"));
    let working = store.get_token("working", "default").await.unwrap().unwrap();
    assert_eq!(working.access_token.as_deref(), Some("aw-new"));
}

#[tokio::test]
async fn sweep_prunes_expired_oauth_states() {
    let mock = MockServer::start().await;
    let store = test_store().await;
    let registry = build_registry(vec![("oura", provider_entry(&mock.uri(), "/oauth/token"))]);
    let manager = TokenManager::new(store.clone(), reqwest::Client::new());

    store.save_oauth_state("old", "oura", "a").await.unwrap();
    sqlx::query("UPDATE oauth_states SET created_at = ?1 WHERE state = 'old'")
        .bind(Utc::now().timestamp() - 700)
        .execute(store.pool())
        .await
        .unwrap();
    store.save_oauth_state("new", "oura", "b").await.unwrap();

    run_sweep(&store, &registry, &manager).await.unwrap();

    assert!(store.consume_oauth_state("old").await.unwrap().is_none());
    assert!(store.consume_oauth_state("new").await.unwrap().is_some());
}

#[tokio::test]
async fn rotated_refresh_token_is_persisted_by_the_sweep() {
    let mock = MockServer::start().await;
    let store = test_store().await;
    let registry = build_registry(vec![("oura", provider_entry(&mock.uri(), "/oauth/token"))]);
    let manager = TokenManager::new(store.clone(), reqwest::Client::new());

    let now = Utc::now().timestamp();
    store
        .store_token("oura", "daniel", "r1", Some("a1"), Some(now - 100), None)
        .await
        .unwrap();
    let before = store.get_token("oura", "daniel").await.unwrap().unwrap();

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "a2",
            "refresh_token": "r2-rotated",
            "expires_in": 3600,
        })))
        .expect(1)
        .mount(&mock)
        .await;

    run_sweep(&store, &registry, &manager).await.unwrap();

    let after = store.get_token("oura", "daniel").await.unwrap().unwrap();
    assert_eq!(after.refresh_token, "r2-rotated");
    assert_eq!(after.access_token.as_deref(), Some("a2"));
    assert_eq!(after.created_at, before.created_at);
}
