//! Integration tests for HTTP delivery
//!
//! Tests cover:
//! - Accepted responses and request headers
//! - Fatal statuses (no retry) versus transient ones (bounded retry)
//! - Transport failures
//! - End-to-end delivery from `TelemetryEngine::end`

use paytrace_core::{
    ActionOutcome, ActionStatus, Attributes, AuthScheme, DeliveryClient, EngineMetrics,
    NoDeviceMetadata, TelemetryConfig, TelemetryEngine, TelemetryError,
};
use paytrace_span::{EventPayload, CLOUDEVENTS_CONTENT_TYPE};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(server: &MockServer) -> TelemetryConfig {
    TelemetryConfig::builder()
        .endpoint(format!("{}/api/v2/events/ingest", server.uri()))
        .auth(AuthScheme::ApiToken, "dt0c01.secret")
        .retry(3, 10)
        .build()
}

fn sample_payload() -> EventPayload {
    EventPayload {
        event_id: "evt-1".to_string(),
        body: r#"{"data":{"action.name":"charge"},"id":"evt-1","specversion":"1.0"}"#.to_string(),
    }
}

#[tokio::test]
async fn test_accepted_response_sends_headers_and_exact_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v2/events/ingest"))
        .and(header("Authorization", "Api-Token dt0c01.secret"))
        .and(header("Content-Type", CLOUDEVENTS_CONTENT_TYPE))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&server)
        .await;

    let client = DeliveryClient::new(&config_for(&server)).unwrap();
    client.deliver(&sample_payload()).await.unwrap();

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].body, sample_payload().body.into_bytes());
}

#[tokio::test]
async fn test_bearer_scheme() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header("Authorization", "Bearer oauth-token"))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = config_for(&server);
    config.auth_scheme = AuthScheme::Bearer;
    config.token = "oauth-token".to_string();
    DeliveryClient::new(&config)
        .unwrap()
        .deliver(&sample_payload())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_unauthorized_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid token"))
        .expect(1)
        .mount(&server)
        .await;

    let metrics = Arc::new(EngineMetrics::new().unwrap());
    let client = DeliveryClient::new(&config_for(&server))
        .unwrap()
        .with_metrics(Arc::clone(&metrics));
    let err = client.deliver(&sample_payload()).await.unwrap_err();

    assert!(matches!(
        err,
        TelemetryError::BadResponse { status: 401, ref body } if body == "invalid token"
    ));
    assert_eq!(metrics.retries(), 0);
}

#[tokio::test]
async fn test_server_error_retries_up_to_max_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let metrics = Arc::new(EngineMetrics::new().unwrap());
    let client = DeliveryClient::new(&config_for(&server))
        .unwrap()
        .with_metrics(Arc::clone(&metrics));
    let err = client.deliver(&sample_payload()).await.unwrap_err();

    assert!(matches!(err, TelemetryError::BadResponse { status: 503, .. }));
    assert!(err.is_retryable());
    assert_eq!(metrics.retries(), 2);
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_rate_limited_then_accepted() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(202))
        .mount(&server)
        .await;

    let client = DeliveryClient::new(&config_for(&server)).unwrap();
    client.deliver(&sample_payload()).await.unwrap();
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_other_2xx_is_accepted() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = DeliveryClient::new(&config_for(&server)).unwrap();
    assert!(client.deliver(&sample_payload()).await.is_ok());
}

#[tokio::test]
async fn test_network_error_is_retried_then_surfaced() {
    let config = TelemetryConfig::builder()
        .endpoint("http://127.0.0.1:9/ingest")
        .auth(AuthScheme::ApiToken, "tok")
        .retry(3, 5)
        .request_timeout_ms(500)
        .build();
    let metrics = Arc::new(EngineMetrics::new().unwrap());
    let client = DeliveryClient::new(&config)
        .unwrap()
        .with_metrics(Arc::clone(&metrics));

    let err = client.deliver(&sample_payload()).await.unwrap_err();
    assert!(matches!(err, TelemetryError::Network(_)));
    assert_eq!(metrics.retries(), 2);
}

#[test]
fn test_default_backoff_schedule() {
    let config = TelemetryConfig::builder()
        .auth(AuthScheme::ApiToken, "tok")
        .build();
    let client = DeliveryClient::new(&config).unwrap();
    assert_eq!(
        client.backoff().schedule(),
        vec![Duration::from_secs(1), Duration::from_secs(2)]
    );
}

#[tokio::test]
async fn test_engine_end_delivers_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v2/events/ingest"))
        .respond_with(ResponseTemplate::new(202))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut config = config_for(&server);
    config.backlog_path = dir.path().join("backlog.json");

    let engine = TelemetryEngine::new(NoDeviceMetadata).unwrap();
    engine.configure(config).unwrap();

    let id = engine.begin("charge", Attributes::new(), None).unwrap();
    engine
        .end(id, ActionOutcome::success().with_attribute("amount", 1999))
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    let charge = requests
        .iter()
        .filter_map(|r| serde_json::from_slice::<paytrace_span::EventEnvelope>(&r.body).ok())
        .find(|e| e.action_id() == Some(id))
        .expect("charge event delivered");
    assert_eq!(charge.status(), Some(ActionStatus::Success));
    assert_eq!(charge.data["amount"], serde_json::json!(1999));
    assert!(engine.metrics().deliveries(true) >= 1);
}
