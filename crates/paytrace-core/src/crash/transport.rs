//! Blocking transport for the crash path
//!
//! This is the one place in the engine where blocking is acceptable. The
//! crash handler may run while the async runtime is being torn down, so
//! requests go out on a dedicated OS thread with a `reqwest::blocking`
//! client, and the caller waits on a channel with a fixed wall-clock
//! budget. When the budget runs out the caller stops waiting; the worker
//! thread is left to die with the process.

use reqwest::blocking::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use crate::config::TelemetryConfig;
use crate::delivery::client::classify_status;
use crate::error::{Result, TelemetryError};
use paytrace_span::EventPayload;

/// What a bounded send managed to do
#[derive(Debug)]
pub struct SendReport {
    /// Leading events confirmed by the endpoint
    pub delivered: usize,
    /// Why the remaining events were not confirmed
    pub error: Option<TelemetryError>,
}

impl SendReport {
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }
}

/// Single-attempt, bounded-wait HTTP sender
#[derive(Clone)]
pub struct CrashTransport {
    endpoint: String,
    authorization: String,
    content_type: String,
    accepted_status: u16,
    budget: Duration,
}

impl CrashTransport {
    pub fn new(config: &TelemetryConfig) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            authorization: config.authorization(),
            content_type: config.content_type.clone(),
            accepted_status: config.accepted_status,
            budget: config.crash_send_timeout(),
        }
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Post `events` in order, blocking the caller for at most the budget.
    ///
    /// Stops at the first event that is not accepted.
    pub fn send_all(&self, events: &[EventPayload]) -> SendReport {
        if events.is_empty() {
            return SendReport {
                delivered: 0,
                error: None,
            };
        }

        let (tx, rx) = mpsc::sync_channel::<Result<()>>(events.len());
        let worker = self.clone();
        let bodies: Vec<String> = events.iter().map(|e| e.body.clone()).collect();

        let spawned = thread::Builder::new()
            .name("paytrace-crash-send".to_string())
            .spawn(move || worker.run(bodies, tx));
        if let Err(e) = spawned {
            return SendReport {
                delivered: 0,
                error: Some(TelemetryError::Network(format!(
                    "cannot start crash sender: {}",
                    e
                ))),
            };
        }

        let deadline = Instant::now() + self.budget;
        let mut delivered = 0;
        while delivered < events.len() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    return SendReport {
                        delivered,
                        error: Some(e),
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    return SendReport {
                        delivered,
                        error: Some(TelemetryError::Network(format!(
                            "crash delivery exceeded {}ms budget",
                            self.budget.as_millis()
                        ))),
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return SendReport {
                        delivered,
                        error: Some(TelemetryError::Network(
                            "crash sender exited unexpectedly".to_string(),
                        )),
                    }
                }
            }
        }

        SendReport {
            delivered,
            error: None,
        }
    }

    fn run(self, bodies: Vec<String>, tx: mpsc::SyncSender<Result<()>>) {
        let client = match Client::builder().timeout(self.budget).build() {
            Ok(client) => client,
            Err(e) => {
                let _ = tx.send(Err(TelemetryError::Network(e.to_string())));
                return;
            }
        };

        for body in bodies {
            let result = self.post(&client, body);
            let failed = result.is_err();
            if tx.send(result).is_err() || failed {
                return;
            }
        }
    }

    fn post(&self, client: &Client, body: String) -> Result<()> {
        let response = client
            .post(&self.endpoint)
            .header(AUTHORIZATION, &self.authorization)
            .header(CONTENT_TYPE, &self.content_type)
            .body(body)
            .send()
            .map_err(|e| TelemetryError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        let text = if response.status().is_success() {
            String::new()
        } else {
            response.text().unwrap_or_default()
        };
        classify_status(status, self.accepted_status, text)
    }
}

impl std::fmt::Debug for CrashTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrashTransport")
            .field("endpoint", &self.endpoint)
            .field("budget", &self.budget)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthScheme;

    fn transport(endpoint: &str, budget_ms: u64) -> CrashTransport {
        let config = TelemetryConfig::builder()
            .endpoint(endpoint)
            .auth(AuthScheme::ApiToken, "tok")
            .crash_send_timeout_ms(budget_ms)
            .build();
        CrashTransport::new(&config)
    }

    #[test]
    fn test_empty_send_is_complete() {
        let report = transport("http://127.0.0.1:9", 100).send_all(&[]);
        assert!(report.is_complete());
        assert_eq!(report.delivered, 0);
    }

    #[test]
    fn test_unreachable_endpoint_reports_error() {
        // Port 9 (discard) is closed on test hosts: the connect fails fast.
        let payload = EventPayload {
            event_id: "e1".to_string(),
            body: "{}".to_string(),
        };
        let started = Instant::now();
        let report = transport("http://127.0.0.1:9/ingest", 500).send_all(&[payload]);

        assert!(!report.is_complete());
        assert_eq!(report.delivered, 0);
        assert!(matches!(report.error, Some(TelemetryError::Network(_))));
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
