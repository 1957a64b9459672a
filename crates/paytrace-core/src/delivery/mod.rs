//! Event delivery
//!
//! - `client` - HTTP delivery with bounded retry and exponential backoff
//! - `backoff` - the retry delay schedule
//!
//! The engine only sees the [`EventSink`] seam, so the transport can be
//! swapped (in-memory capture, a host-provided uploader, ...).

pub mod backoff;
pub mod client;

pub use backoff::BackoffPolicy;
pub use client::DeliveryClient;

use async_trait::async_trait;
use paytrace_span::{EventEnvelope, EventPayload};
use std::sync::{Mutex, PoisonError};
use tokio::sync::Notify;

use crate::error::{Result, TelemetryError};

/// Destination for encoded events
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Deliver one payload, retrying as the sink sees fit.
    ///
    /// `Ok` means the backend confirmed acceptance.
    async fn send(&self, payload: &EventPayload) -> Result<()>;
}

/// In-memory fake sink
///
/// Accepts every payload without any I/O and keeps it for inspection. It
/// stands in for the HTTP client in tests and in hosts that collect events
/// themselves. It is not a transport: nothing it holds survives the
/// process, and failures only happen when scripted with
/// [`fail_next`](Self::fail_next).
#[derive(Debug, Default)]
pub struct MemorySink {
    payloads: Mutex<Vec<EventPayload>>,
    scripted_failures: Mutex<Vec<TelemetryError>>,
    notify: Notify,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `send` fail with `error` (queued in call order).
    ///
    /// Fault injection for exercising the engine's error paths.
    pub fn fail_next(&self, error: TelemetryError) {
        self.scripted_failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(error);
    }

    /// Payloads accepted so far.
    pub fn payloads(&self) -> Vec<EventPayload> {
        self.payloads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Accepted payloads decoded back into envelopes.
    pub fn envelopes(&self) -> Vec<EventEnvelope> {
        self.payloads()
            .iter()
            .filter_map(|payload| payload.decode().ok())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.payloads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait until at least `count` payloads were accepted.
    pub async fn wait_for(&self, count: usize) {
        loop {
            let notified = self.notify.notified();
            if self.len() >= count {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl EventSink for MemorySink {
    async fn send(&self, payload: &EventPayload) -> Result<()> {
        let scripted = {
            let mut failures = self
                .scripted_failures
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if failures.is_empty() {
                None
            } else {
                Some(failures.remove(0))
            }
        };
        if let Some(error) = scripted {
            return Err(error);
        }

        self.payloads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(payload.clone());
        self.notify.notify_waiters();
        Ok(())
    }
}
