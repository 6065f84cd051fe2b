// Integration tests for `SessionManager` against a wiremock token endpoint.
#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use basis_api::{
    AuthError, AuthState, CredentialStore, MemoryCredentialStore, OAuthSettings, SessionManager,
    TokenSet, TransportConfig,
};

// ── Helpers ─────────────────────────────────────────────────────────

fn settings(server: &MockServer) -> OAuthSettings {
    OAuthSettings {
        token_url: format!("{}/oauth/token", server.uri()).parse().unwrap(),
        client_id: "basis-test".into(),
        client_secret: Some(SecretString::from("shh".to_owned())),
    }
}

fn expiring_tokens() -> TokenSet {
    TokenSet::new("old-access", "old-refresh", Utc::now() + chrono::Duration::seconds(30))
}

fn session_with(
    server: &MockServer,
    tokens: Option<&TokenSet>,
) -> (Arc<SessionManager>, Arc<MemoryCredentialStore>) {
    let store = Arc::new(MemoryCredentialStore::new(tokens));
    let session = SessionManager::new(
        settings(server),
        store.clone(),
        &TransportConfig::default(),
        Duration::from_secs(60),
    )
    .unwrap();
    (Arc::new(session), store)
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn fresh_token_is_returned_without_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let tokens = TokenSet::new("live", "r", Utc::now() + chrono::Duration::hours(1));
    let (session, _) = session_with(&server, Some(&tokens));

    let token = session.valid_token().await.unwrap();
    assert_eq!(token.expose_secret(), "live");
}

#[tokio::test]
async fn concurrent_callers_share_a_single_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=old-refresh"))
        .and(body_string_contains("client_id=basis-test"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_millis(100))
                .set_body_json(json!({
                    "access_token": "new-access",
                    "refresh_token": "new-refresh",
                    "expires_in": 3600,
                })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (session, store) = session_with(&server, Some(&expiring_tokens()));

    let callers: Vec<_> = (0..8)
        .map(|_| {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.valid_token().await })
        })
        .collect();

    for caller in callers {
        let token = caller.await.unwrap().unwrap();
        assert_eq!(token.expose_secret(), "new-access");
    }

    let persisted = store.load().unwrap().unwrap();
    assert_eq!(persisted.access_token.expose_secret(), "new-access");
    assert_eq!(persisted.refresh_token.expose_secret(), "new-refresh");
    assert_eq!(session.auth_state(), AuthState::Authenticated);
}

#[tokio::test]
async fn refresh_without_rotation_keeps_refresh_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "new-access",
            "expires_in": 600,
        })))
        .mount(&server)
        .await;

    let (session, store) = session_with(&server, Some(&expiring_tokens()));
    session.valid_token().await.unwrap();

    let persisted = store.load().unwrap().unwrap();
    assert_eq!(persisted.refresh_token.expose_secret(), "old-refresh");
    assert!(persisted.expires_at > Utc::now() + chrono::Duration::seconds(500));
}

#[tokio::test]
async fn absurd_token_lifetime_is_clamped() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "new",
            "expires_in": i64::MAX,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let (session, store) = session_with(&server, Some(&expiring_tokens()));

    let token = session.valid_token().await.unwrap();
    assert_eq!(token.expose_secret(), "new");
    assert_eq!(session.auth_state(), AuthState::Authenticated);

    let persisted = store.load().unwrap().unwrap();
    assert!(persisted.expires_at <= Utc::now() + chrono::Duration::days(31));
}

#[tokio::test]
async fn invalid_grant_clears_credentials() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "refresh token revoked",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let (session, store) = session_with(&server, Some(&expiring_tokens()));

    let err = session.valid_token().await.unwrap_err();
    assert_eq!(err, AuthError::ReauthRequired);
    assert!(store.load().unwrap().is_none());
    assert!(!session.has_credentials());
    assert_eq!(session.auth_state(), AuthState::ReauthRequired);

    // No second refresh attempt once the credentials are gone.
    let err = session.valid_token().await.unwrap_err();
    assert_eq!(err, AuthError::ReauthRequired);
}

#[tokio::test]
async fn transient_refresh_failure_keeps_credentials() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let (session, store) = session_with(&server, Some(&expiring_tokens()));

    let err = session.valid_token().await.unwrap_err();
    assert!(matches!(err, AuthError::Transient { .. }));

    let kept = store.load().unwrap().unwrap();
    assert_eq!(kept.refresh_token.expose_secret(), "old-refresh");
    assert!(session.has_credentials());
    assert_eq!(session.auth_state(), AuthState::Authenticated);
}

#[tokio::test]
async fn invalidate_forces_refresh_on_next_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "rotated",
            "expires_in": 3600,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let tokens = TokenSet::new("live", "r", Utc::now() + chrono::Duration::hours(1));
    let (session, _) = session_with(&server, Some(&tokens));

    let first = session.valid_token().await.unwrap();
    session.invalidate(&first);
    // A stale rejection for a token we no longer hold is ignored.
    session.invalidate(&SecretString::from("something-else".to_owned()));

    let second = session.valid_token().await.unwrap();
    assert_eq!(second.expose_secret(), "rotated");
}

#[tokio::test]
async fn replace_restores_a_cleared_session() {
    let server = MockServer::start().await;
    let (session, store) = session_with(&server, None);
    assert_eq!(session.auth_state(), AuthState::ReauthRequired);

    let tokens = TokenSet::new("granted", "r2", Utc::now() + chrono::Duration::hours(1));
    session.replace(tokens).await.unwrap();

    assert_eq!(session.auth_state(), AuthState::Authenticated);
    assert_eq!(session.valid_token().await.unwrap().expose_secret(), "granted");
    assert!(store.load().unwrap().is_some());

    tokio::time::timeout(Duration::from_secs(1), session.wait_for_credentials())
        .await
        .unwrap();
}
