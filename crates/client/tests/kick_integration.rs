//! Integration tests for the composite kick operation
//!
//! Exercises the block → verify → unblock → verify state machine against a
//! mock server, including the compensating-cleanup paths and the circuit
//! breaker behavior of the orchestrated sub-calls.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use palisade_client::{ClientConfig, ClientError, PlatformClient, Session};
use palisade_common::resilience::{CircuitBreakerConfig, RetryConfig, TokenBucketConfig};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

fn kick_config(server: &MockServer) -> ClientConfig {
    let mut config = ClientConfig::default();
    config.api_base = server.uri();
    config.csrf.probe_urls = vec![format!("{}/csrf-probe", server.uri())];
    config.timeout = Duration::from_secs(5);
    config.operation_timeout = Duration::from_secs(30);
    config.retry = RetryConfig::builder()
        .max_attempts(2)
        .fixed_backoff(Duration::from_millis(1))
        .no_jitter()
        .build()
        .expect("retry config");
    config.rate_limit = TokenBucketConfig {
        capacity: 1000,
        refill_amount: 1000,
        refill_interval: Duration::from_millis(10),
    };
    config.circuit_breaker = CircuitBreakerConfig::builder()
        .failure_threshold(100)
        .build()
        .expect("breaker config");
    config.poll.max_attempts = 3;
    config.poll.interval = Duration::from_millis(10);
    config
}

async fn mount_probe(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/csrf-probe"))
        .respond_with(ResponseTemplate::new(200).insert_header("x-csrf-token", "TOK"))
        .mount(server)
        .await;
}

/// Block succeeds, block-verification never confirms within its budget,
/// unblock succeeds, and unblock-verification confirms on the 3rd attempt:
/// the kick returns success and no cleanup unblock is issued.
#[tokio::test]
async fn kick_succeeds_despite_unconfirmed_block_verification() {
    let server = MockServer::start().await;
    mount_probe(&server).await;

    Mock::given(method("POST"))
        .and(path("/v1/users/42/block"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    // Block-verify sees false 3 times (budget exhausted); unblock-verify then
    // sees true, true, false and confirms on its 3rd attempt
    let checks = Arc::new(AtomicUsize::new(0));
    let checks_ref = Arc::clone(&checks);
    Mock::given(method("GET"))
        .and(path("/v1/users/42/is-blocked"))
        .respond_with(move |_req: &Request| -> ResponseTemplate {
            let body = match checks_ref.fetch_add(1, Ordering::SeqCst) {
                0..=2 => "false",
                3 | 4 => "true",
                _ => "false",
            };
            ResponseTemplate::new(200).set_body_string(body)
        })
        .mount(&server)
        .await;

    // Exactly one unblock proves cleanup never ran
    Mock::given(method("POST"))
        .and(path("/v1/users/42/unblock"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = PlatformClient::new(kick_config(&server)).expect("client");
    let session = Session::new("secret");

    client.moderation().kick(&session, 42, None).await.expect("kick");
    assert_eq!(checks.load(Ordering::SeqCst), 6);
}

/// Unblock keeps failing but the compensating cleanup lands: the call still
/// fails with the original error so cleanup cannot mask it.
#[tokio::test]
async fn successful_cleanup_does_not_mask_the_original_error() {
    let server = MockServer::start().await;
    mount_probe(&server).await;

    Mock::given(method("POST"))
        .and(path("/v1/users/7/block"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/users/7/is-blocked"))
        .respond_with(ResponseTemplate::new(200).set_body_string("true"))
        .mount(&server)
        .await;

    // Two orchestrated attempts fail, the first cleanup attempt succeeds
    let unblocks = Arc::new(AtomicUsize::new(0));
    let unblocks_ref = Arc::clone(&unblocks);
    Mock::given(method("POST"))
        .and(path("/v1/users/7/unblock"))
        .respond_with(move |_req: &Request| -> ResponseTemplate {
            if unblocks_ref.fetch_add(1, Ordering::SeqCst) < 2 {
                ResponseTemplate::new(500).set_body_string("shard down")
            } else {
                ResponseTemplate::new(200)
            }
        })
        .mount(&server)
        .await;

    let client = PlatformClient::new(kick_config(&server)).expect("client");
    let result = client.moderation().kick(&Session::new("secret"), 7, None).await;

    assert!(matches!(result, Err(ClientError::Server { status: 500, .. })));
    assert_eq!(unblocks.load(Ordering::SeqCst), 3);
    assert!(client.metrics().retries >= 1);
}

/// Unblock and cleanup both fail: the compound error names both failures.
#[tokio::test]
async fn failed_cleanup_surfaces_both_errors() {
    let server = MockServer::start().await;
    mount_probe(&server).await;

    Mock::given(method("POST"))
        .and(path("/v1/users/7/block"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/users/7/is-blocked"))
        .respond_with(ResponseTemplate::new(200).set_body_string("true"))
        .mount(&server)
        .await;

    let unblocks = Arc::new(AtomicUsize::new(0));
    let unblocks_ref = Arc::clone(&unblocks);
    Mock::given(method("POST"))
        .and(path("/v1/users/7/unblock"))
        .respond_with(move |_req: &Request| -> ResponseTemplate {
            unblocks_ref.fetch_add(1, Ordering::SeqCst);
            ResponseTemplate::new(500).set_body_string("still down")
        })
        .mount(&server)
        .await;

    let client = PlatformClient::new(kick_config(&server)).expect("client");
    let result = client.moderation().kick(&Session::new("secret"), 7, None).await;

    match result {
        Err(err @ ClientError::CleanupFailed { .. }) => {
            let message = err.to_string();
            assert!(message.contains("still down"));
            assert!(message.contains("blocked state"));
        }
        other => panic!("expected CleanupFailed, got {other:?}"),
    }
    // 2 orchestrated attempts + 3 bounded cleanup attempts
    assert_eq!(unblocks.load(Ordering::SeqCst), 5);
}

/// A block failure is terminal: nothing happened yet, so nothing is undone.
#[tokio::test]
async fn block_failure_is_terminal_without_cleanup() {
    let server = MockServer::start().await;
    mount_probe(&server).await;

    Mock::given(method("POST"))
        .and(path("/v1/users/13/block"))
        .respond_with(ResponseTemplate::new(400).set_body_string(
            r#"{"errors":[{"code":3,"message":"Target user is invalid."}]}"#,
        ))
        .mount(&server)
        .await;

    let client = PlatformClient::new(kick_config(&server)).expect("client");
    let result = client.moderation().kick(&Session::new("secret"), 13, None).await;

    assert!(matches!(result, Err(ClientError::Client { status: 400, .. })));
    let requests = server.received_requests().await.unwrap_or_default();
    assert!(
        !requests.iter().any(|r| r.url.path().ends_with("/unblock")
            || r.url.path().ends_with("/is-blocked")),
        "a failed block must not trigger verification or cleanup"
    );
}

/// An auth-classified failure mid-kick skips cleanup and propagates: one
/// forced token refresh, one re-issue, then the failure surfaces.
#[tokio::test]
async fn auth_failure_skips_cleanup_and_propagates() {
    let server = MockServer::start().await;
    mount_probe(&server).await;

    Mock::given(method("POST"))
        .and(path("/v1/users/5/block"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/users/5/is-blocked"))
        .respond_with(ResponseTemplate::new(200).set_body_string("true"))
        .mount(&server)
        .await;

    let unblocks = Arc::new(AtomicUsize::new(0));
    let unblocks_ref = Arc::clone(&unblocks);
    Mock::given(method("POST"))
        .and(path("/v1/users/5/unblock"))
        .respond_with(move |_req: &Request| -> ResponseTemplate {
            unblocks_ref.fetch_add(1, Ordering::SeqCst);
            ResponseTemplate::new(401).set_body_string("session revoked")
        })
        .mount(&server)
        .await;

    let client = PlatformClient::new(kick_config(&server)).expect("client");
    let result = client.moderation().kick(&Session::new("secret"), 5, None).await;

    assert!(matches!(result, Err(ClientError::Auth { status: 401, .. })));
    // One attempt, one refresh-and-reissue; no bounded cleanup retries
    assert_eq!(unblocks.load(Ordering::SeqCst), 2);
}

/// Repeated service failures open the circuit and the next orchestrated call
/// fails immediately with no network attempt.
#[tokio::test]
async fn open_circuit_fails_fast_across_operations() {
    let server = MockServer::start().await;
    mount_probe(&server).await;

    Mock::given(method("GET"))
        .and(path("/v1/users/3/is-blocked"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let mut config = kick_config(&server);
    config.circuit_breaker = CircuitBreakerConfig::builder()
        .failure_threshold(5)
        .cooldown(Duration::from_secs(60))
        .build()
        .expect("breaker config");
    config.retry = RetryConfig::builder()
        .max_attempts(6)
        .fixed_backoff(Duration::from_millis(1))
        .no_jitter()
        .build()
        .expect("retry config");

    let client = PlatformClient::new(config).expect("client");
    let session = Session::new("secret");

    let result = client.moderation().is_blocked(&session, 3).await;
    assert!(matches!(result, Err(ClientError::CircuitOpen { .. })));
    let after_first = server.received_requests().await.unwrap_or_default().len();
    assert_eq!(after_first, 5, "the breaker opens at the 5th failure");

    let result = client.moderation().is_blocked(&session, 3).await;
    assert!(matches!(result, Err(ClientError::CircuitOpen { .. })));
    let after_second = server.received_requests().await.unwrap_or_default().len();
    assert_eq!(after_second, after_first, "an open circuit makes no network attempt");

    assert!(client.metrics().circuit_trips >= 1);
}
