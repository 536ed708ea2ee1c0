//! Refresh-path integration tests against a mock token endpoint.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tunekey_core::{
    AuthConfig, AuthError, Credentials, MemoryCache, RefreshErrorKind, RetryPolicy, ScopeSet,
    Secret, TokenManager,
};

fn test_config(server: &MockServer) -> AuthConfig {
    AuthConfig::new(
        "test-client-id",
        "test-client-secret",
        "http://127.0.0.1:8888/callback",
    )
    .with_endpoints(
        format!("{}/authorize", server.uri()),
        format!("{}/api/token", server.uri()),
    )
    .with_retry(RetryPolicy {
        max_attempts: 3,
        base_delay: StdDuration::from_millis(10),
        max_delay: StdDuration::from_millis(40),
    })
}

fn credentials(expires_at: chrono::DateTime<Utc>) -> Credentials {
    Credentials {
        access_token: Secret::new("old-access-token"),
        refresh_token: Secret::new("old-refresh-token"),
        expires_at,
        scopes: ScopeSet::parse("playlist-modify-private"),
    }
}

fn token_response(access_token: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(serde_json::json!({
        "access_token": access_token,
        "token_type": "Bearer",
        "expires_in": 3600,
        "refresh_token": "new-refresh-token",
        "scope": "playlist-modify-private",
    }))
}

async fn manager_with(
    server: &MockServer,
    expires_at: chrono::DateTime<Utc>,
) -> TokenManager<MemoryCache> {
    TokenManager::restore(
        test_config(server),
        MemoryCache::with_credentials(credentials(expires_at)),
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn test_fresh_token_is_returned_without_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/token"))
        .respond_with(token_response("unexpected"))
        .expect(0)
        .mount(&server)
        .await;

    let manager = manager_with(&server, Utc::now() + Duration::seconds(3600)).await;

    let token = manager.valid_token().await.unwrap();
    assert_eq!(token.expose(), "old-access-token");
}

#[tokio::test]
async fn test_expiring_token_is_refreshed_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=old-refresh-token"))
        .respond_with(token_response("new-access-token"))
        .expect(1)
        .mount(&server)
        .await;

    // 30 s of validity left, inside the 60 s safety margin.
    let manager = manager_with(&server, Utc::now() + Duration::seconds(30)).await;

    let token = manager.valid_token().await.unwrap();
    assert_eq!(token.expose(), "new-access-token");

    let status = manager.status().await;
    assert!(status.authenticated);
    assert!(status.active);
    assert!(status.expires_at.unwrap() > Utc::now() + Duration::seconds(3500));
}

#[tokio::test]
async fn test_repeated_calls_do_not_refresh_again() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/token"))
        .respond_with(token_response("new-access-token"))
        .expect(1)
        .mount(&server)
        .await;

    let manager = manager_with(&server, Utc::now() + Duration::seconds(30)).await;

    let first = manager.valid_token().await.unwrap();
    for _ in 0..5 {
        let again = manager.valid_token().await.unwrap();
        assert_eq!(again.expose(), first.expose());
    }
}

#[tokio::test]
async fn test_concurrent_callers_share_one_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/token"))
        .respond_with(token_response("new-access-token").set_delay(StdDuration::from_millis(100)))
        .expect(1)
        .mount(&server)
        .await;

    let manager = Arc::new(manager_with(&server, Utc::now() + Duration::seconds(30)).await);

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let manager = Arc::clone(&manager);
        tasks.push(tokio::spawn(async move {
            manager.valid_token().await.unwrap()
        }));
    }

    for task in tasks {
        let token = task.await.unwrap();
        assert_eq!(token.expose(), "new-access-token");
    }
}

#[tokio::test]
async fn test_abandoned_caller_does_not_kill_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/token"))
        .respond_with(token_response("new-access-token").set_delay(StdDuration::from_millis(300)))
        .expect(1)
        .mount(&server)
        .await;

    let manager = Arc::new(manager_with(&server, Utc::now() + Duration::seconds(30)).await);

    // First caller triggers the refresh, then abandons its wait mid-flight.
    let initiator = tokio::spawn({
        let manager = Arc::clone(&manager);
        async move { manager.valid_token().await }
    });
    tokio::time::sleep(StdDuration::from_millis(100)).await;
    initiator.abort();
    assert!(initiator.await.unwrap_err().is_cancelled());

    // The refresh keeps running and its rotated tokens are committed; the
    // next caller joins it instead of issuing a second endpoint call.
    let token = manager.valid_token().await.unwrap();
    assert_eq!(token.expose(), "new-access-token");

    let status = manager.status().await;
    assert!(status.authenticated);
    assert!(status.active);
}

#[tokio::test]
async fn test_revoked_refresh_token_forces_reauthorization() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": "invalid_grant",
            "error_description": "Refresh token revoked",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let manager = manager_with(&server, Utc::now() + Duration::seconds(30)).await;

    // The rejection is not retried and drops the manager back to
    // unauthenticated.
    let err = manager.valid_token().await.unwrap_err();
    assert!(err.is_refresh_failure(RefreshErrorKind::Revoked));

    let status = manager.status().await;
    assert!(!status.authenticated);

    // Subsequent calls fail locally without hitting the endpoint again.
    let err = manager.valid_token().await.unwrap_err();
    assert!(err.is_refresh_failure(RefreshErrorKind::Revoked));
}

#[tokio::test]
async fn test_transient_failure_is_retried_then_surfaced() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/token"))
        .respond_with(ResponseTemplate::new(503).set_body_json(serde_json::json!({
            "error": "temporarily_unavailable",
        })))
        .expect(3)
        .mount(&server)
        .await;

    let manager = manager_with(&server, Utc::now() + Duration::seconds(30)).await;
    let backoff_bound = manager.config().retry.total_delay_bound();

    let started = std::time::Instant::now();
    let err = manager.valid_token().await.unwrap_err();
    let elapsed = started.elapsed();

    assert!(err.is_refresh_failure(RefreshErrorKind::Transient));

    // All backoff delays were honored, and the total stayed within the
    // configured schedule plus local round-trip overhead.
    assert!(elapsed >= backoff_bound, "gave up too early: {:?}", elapsed);
    assert!(
        elapsed < backoff_bound + StdDuration::from_secs(1),
        "backoff overran its schedule: {:?}",
        elapsed
    );

    // The stale record stays in place so a later call can retry.
    let status = manager.status().await;
    assert!(status.authenticated);
    assert!(!status.active);
}

#[tokio::test]
async fn test_transient_failure_then_recovery() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/token"))
        .respond_with(ResponseTemplate::new(503).set_body_json(serde_json::json!({
            "error": "temporarily_unavailable",
        })))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/token"))
        .respond_with(token_response("recovered-access-token"))
        .expect(1)
        .mount(&server)
        .await;

    let manager = manager_with(&server, Utc::now() + Duration::seconds(30)).await;

    let token = manager.valid_token().await.unwrap();
    assert_eq!(token.expose(), "recovered-access-token");
}

#[tokio::test]
async fn test_scope_check_fails_without_network() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/token"))
        .respond_with(token_response("unexpected"))
        .expect(0)
        .mount(&server)
        .await;

    // Expiring token, but the scope check comes first.
    let manager = manager_with(&server, Utc::now() + Duration::seconds(30)).await;

    match manager
        .token_for_scopes(&["playlist-modify-private", "user-library-read"])
        .await
    {
        Err(AuthError::ScopeNotGranted { missing }) => {
            assert_eq!(missing, vec!["user-library-read"]);
        }
        other => panic!("expected ScopeNotGranted, got {:?}", other.err()),
    }
}

#[tokio::test]
async fn test_refreshed_credentials_are_persisted() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/token"))
        .respond_with(token_response("new-access-token"))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let cache_path = dir.path().join("credentials.json");
    let cache = tunekey_core::FileCache::new(&cache_path);

    {
        use tunekey_core::TokenCache;
        cache
            .store(&credentials(Utc::now() + Duration::seconds(30)))
            .await
            .unwrap();
    }

    let manager = TokenManager::restore(test_config(&server), cache)
        .await
        .unwrap();
    manager.valid_token().await.unwrap();

    // A new manager restored from the same path sees the refreshed record.
    let manager = TokenManager::restore(
        test_config(&server),
        tunekey_core::FileCache::new(&cache_path),
    )
    .await
    .unwrap();
    let token = manager.valid_token().await.unwrap();
    assert_eq!(token.expose(), "new-access-token");
}
