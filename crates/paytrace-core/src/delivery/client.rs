//! HTTP delivery client for the ingestion endpoint
//!
//! Features:
//! - One POST per event, body sent exactly as encoded
//! - Retry with exponential backoff on 429, 5xx and transport failures
//! - Immediate failure on any other non-accepted status

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use std::future::Future;
use std::sync::Arc;
use tokio::time::sleep;

use super::backoff::BackoffPolicy;
use super::EventSink;
use crate::config::TelemetryConfig;
use crate::error::{Result, TelemetryError};
use crate::metrics::EngineMetrics;
use paytrace_span::EventPayload;

/// Client for delivering events to the ingestion endpoint
#[derive(Clone)]
pub struct DeliveryClient {
    client: Client,
    endpoint: String,
    authorization: String,
    content_type: String,
    accepted_status: u16,
    backoff: BackoffPolicy,
    metrics: Option<Arc<EngineMetrics>>,
}

impl DeliveryClient {
    /// Create a client from a validated configuration
    pub fn new(config: &TelemetryConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .pool_max_idle_per_host(4)
            .build()
            .map_err(|e| TelemetryError::Config(format!("cannot build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            authorization: config.authorization(),
            content_type: config.content_type.clone(),
            accepted_status: config.accepted_status,
            backoff: BackoffPolicy::new(config.backoff_base(), config.max_attempts),
            metrics: None,
        })
    }

    /// Count retried attempts in `metrics`
    pub fn with_metrics(mut self, metrics: Arc<EngineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn backoff(&self) -> BackoffPolicy {
        self.backoff
    }

    /// Deliver one payload, retrying transient failures.
    pub async fn deliver(&self, payload: &EventPayload) -> Result<()> {
        self.with_retry(payload, || self.post(payload)).await
    }

    /// Run `send_once` until it succeeds, fails with a non-retryable
    /// error, or the backoff policy runs out of attempts.
    async fn with_retry<F, Fut>(&self, payload: &EventPayload, mut send_once: F) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let mut attempt = 0;
        loop {
            match send_once().await {
                Ok(()) => {
                    tracing::debug!(
                        event_id = %payload.event_id,
                        attempt = attempt,
                        "Event accepted"
                    );
                    return Ok(());
                }
                Err(e) => {
                    let delay = if e.is_retryable() {
                        self.backoff.delay_after(attempt)
                    } else {
                        None
                    };

                    let Some(delay) = delay else {
                        tracing::warn!(
                            event_id = %payload.event_id,
                            attempt = attempt,
                            error = %e,
                            "Event delivery failed"
                        );
                        return Err(e);
                    };

                    tracing::debug!(
                        event_id = %payload.event_id,
                        attempt = attempt,
                        backoff_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying event delivery"
                    );
                    if let Some(metrics) = &self.metrics {
                        metrics.record_retry();
                    }
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn post(&self, payload: &EventPayload) -> Result<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .header(AUTHORIZATION, &self.authorization)
            .header(CONTENT_TYPE, &self.content_type)
            .body(payload.body.clone())
            .send()
            .await
            .map_err(|e| TelemetryError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        let body = if response.status().is_success() {
            String::new()
        } else {
            response.text().await.unwrap_or_default()
        };
        classify_status(status, self.accepted_status, body)
    }
}

#[async_trait]
impl EventSink for DeliveryClient {
    async fn send(&self, payload: &EventPayload) -> Result<()> {
        self.deliver(payload).await
    }
}

impl std::fmt::Debug for DeliveryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryClient")
            .field("endpoint", &self.endpoint)
            .field("accepted_status", &self.accepted_status)
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

/// Map an HTTP status to a delivery result.
///
/// The accepted status and any other 2xx count as delivered.
pub(crate) fn classify_status(status: u16, accepted: u16, body: String) -> Result<()> {
    if status == accepted {
        return Ok(());
    }
    if (200..=299).contains(&status) {
        tracing::debug!(status, accepted, "Endpoint accepted event with unexpected 2xx status");
        return Ok(());
    }
    Err(TelemetryError::BadResponse { status, body })
}
