//! Crash-safe delivery
//!
//! On a fatal error the engine finalizes the open action as `CRASH`, builds
//! a crash event and hands both to [`CrashDeliveryPath::deliver`]:
//!
//! 1. The encoded bodies are appended to the [`CrashBacklog`] first.
//! 2. One bounded, blocking send is attempted through [`CrashTransport`].
//! 3. Only the events the endpoint confirmed are removed from the backlog.
//!
//! On the next start [`CrashDeliveryPath::replay`] resubmits the stored
//! bodies verbatim and deletes the file once all of them are confirmed.
//!
//! Nothing here returns an error to the crash handler. Failures are logged
//! and reported through [`CrashOutcome`].

pub mod backlog;
pub mod hook;
pub mod transport;

pub use backlog::{CrashBacklog, CrashPayload, BACKLOG_VERSION};
pub use hook::install_panic_hook;
pub use transport::{CrashTransport, SendReport};

use std::fmt;

use crate::config::TelemetryConfig;
use crate::delivery::EventSink;
use crate::error::Result;
use paytrace_span::EventPayload;

/// Result of one crash report
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrashOutcome {
    /// Endpoint confirmed every event; backlog cleared
    Delivered,
    /// Not confirmed; the backlog holds the events for the next start
    Persisted { reason: String },
    /// Neither confirmed nor persisted
    Lost { reason: String },
}

impl CrashOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CrashOutcome::Delivered => "delivered",
            CrashOutcome::Persisted { .. } => "persisted",
            CrashOutcome::Lost { .. } => "lost",
        }
    }
}

impl fmt::Display for CrashOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CrashOutcome::Delivered => f.write_str("delivered"),
            CrashOutcome::Persisted { reason } => write!(f, "persisted ({})", reason),
            CrashOutcome::Lost { reason } => write!(f, "lost ({})", reason),
        }
    }
}

/// Result of a backlog replay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayOutcome {
    /// Events confirmed during this replay
    pub replayed: usize,
    /// Events still waiting in the backlog afterwards
    pub remaining: usize,
}

/// Persist-then-send pipeline used from crash context
#[derive(Debug, Clone)]
pub struct CrashDeliveryPath {
    backlog: CrashBacklog,
    transport: CrashTransport,
}

impl CrashDeliveryPath {
    pub fn new(config: &TelemetryConfig) -> Self {
        Self {
            backlog: CrashBacklog::new(config.backlog_path.clone()),
            transport: CrashTransport::new(config),
        }
    }

    pub fn backlog(&self) -> &CrashBacklog {
        &self.backlog
    }

    /// Persist `events`, then try to deliver them within the crash budget.
    ///
    /// Events already waiting in the backlog stay there for the next
    /// replay; only the confirmed events of this report are removed.
    /// Blocks the calling thread. Never panics.
    pub fn deliver(&self, events: Vec<EventPayload>) -> CrashOutcome {
        let persisted = match self.backlog.append(&events) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(
                    path = %self.backlog.path().display(),
                    error = %e,
                    "Failed to persist crash backlog"
                );
                false
            }
        };

        let report = self.transport.send_all(&events);
        if persisted && report.delivered > 0 {
            let confirmed: Vec<String> = events[..report.delivered]
                .iter()
                .map(|event| event.event_id.clone())
                .collect();
            if let Err(e) = self.backlog.remove_delivered(&confirmed) {
                tracing::error!(error = %e, "Crash events delivered but backlog not trimmed");
            }
        }

        let Some(error) = report.error else {
            tracing::info!(events = events.len(), "Crash events delivered");
            return CrashOutcome::Delivered;
        };

        let reason = error.to_string();
        if !persisted {
            tracing::error!(error = %reason, "Crash events lost");
            return CrashOutcome::Lost { reason };
        }

        tracing::error!(
            delivered = report.delivered,
            pending = events.len() - report.delivered,
            error = %reason,
            "Crash delivery incomplete, events kept for next start"
        );
        CrashOutcome::Persisted { reason }
    }

    /// Resubmit the persisted crash events through `sink`.
    ///
    /// Bodies go out byte-for-byte as stored. Confirmed events are dropped
    /// from the file, which is deleted once nothing is left. Events written
    /// by a crash while the replay was running are kept.
    pub async fn replay(&self, sink: &dyn EventSink) -> Result<ReplayOutcome> {
        let Some(payload) = self.backlog.load()? else {
            return Ok(ReplayOutcome::default());
        };

        let mut confirmed = Vec::with_capacity(payload.len());
        for event in &payload.events {
            match sink.send(event).await {
                Ok(()) => confirmed.push(event.event_id.clone()),
                Err(e) => tracing::warn!(
                    event_id = %event.event_id,
                    error = %e,
                    "Crash backlog replay failed for event"
                ),
            }
        }

        let remaining = self.backlog.remove_delivered(&confirmed)?;
        let outcome = ReplayOutcome {
            replayed: confirmed.len(),
            remaining,
        };

        if remaining == 0 {
            tracing::info!(replayed = outcome.replayed, "Crash backlog replayed");
        } else {
            tracing::warn!(
                replayed = outcome.replayed,
                remaining = outcome.remaining,
                "Crash backlog not fully replayed"
            );
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthScheme;
    use crate::delivery::MemorySink;
    use crate::error::TelemetryError;
    use async_trait::async_trait;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio::sync::Notify;

    /// Holds every send until released
    #[derive(Default)]
    struct GatedSink {
        entered: Notify,
        release: Notify,
        inner: MemorySink,
    }

    #[async_trait]
    impl EventSink for GatedSink {
        async fn send(&self, payload: &EventPayload) -> Result<()> {
            self.entered.notify_one();
            self.release.notified().await;
            self.inner.send(payload).await
        }
    }

    fn payload(id: &str) -> EventPayload {
        EventPayload {
            event_id: id.to_string(),
            body: format!(r#"{{"id":"{}"}}"#, id),
        }
    }

    fn path_for(dir: &TempDir) -> CrashDeliveryPath {
        let config = TelemetryConfig::builder()
            .endpoint("http://127.0.0.1:9/ingest")
            .auth(AuthScheme::ApiToken, "tok")
            .crash_send_timeout_ms(300)
            .backlog_path(dir.path().join("backlog.json"))
            .build();
        CrashDeliveryPath::new(&config)
    }

    #[test]
    fn test_unreachable_endpoint_keeps_backlog() {
        let dir = TempDir::new().unwrap();
        let path = path_for(&dir);

        let outcome = path.deliver(vec![payload("a"), payload("b")]);
        assert_eq!(outcome.as_str(), "persisted");

        let stored = path.backlog().load().unwrap().unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored.events[0].body, payload("a").body);
    }

    #[test]
    fn test_deliver_keeps_older_backlog() {
        let dir = TempDir::new().unwrap();
        let path = path_for(&dir);
        path.backlog()
            .persist(&CrashPayload::new(vec![payload("earlier")]))
            .unwrap();

        let outcome = path.deliver(vec![payload("a")]);
        assert_eq!(outcome.as_str(), "persisted");

        let stored = path.backlog().load().unwrap().unwrap();
        assert_eq!(stored.events, vec![payload("earlier"), payload("a")]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_crash_during_replay_is_not_deleted() {
        let dir = TempDir::new().unwrap();
        let path = path_for(&dir);
        path.backlog()
            .persist(&CrashPayload::new(vec![payload("old-crash")]))
            .unwrap();

        let sink = Arc::new(GatedSink::default());
        let replay = {
            let path = path.clone();
            let sink = Arc::clone(&sink);
            tokio::spawn(async move { path.replay(sink.as_ref()).await })
        };
        sink.entered.notified().await;

        // a new crash lands while the old payload is in flight
        let crash_path = path.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            crash_path.deliver(vec![payload("new-crash")])
        })
        .await
        .unwrap();
        assert_eq!(outcome.as_str(), "persisted");

        sink.release.notify_one();
        let replayed = replay.await.unwrap().unwrap();
        assert_eq!(replayed, ReplayOutcome { replayed: 1, remaining: 1 });
        assert_eq!(sink.inner.payloads(), vec![payload("old-crash")]);

        let stored = path.backlog().load().unwrap().unwrap();
        assert_eq!(stored.events, vec![payload("new-crash")]);
    }

    #[tokio::test]
    async fn test_replay_clears_after_full_success() {
        let dir = TempDir::new().unwrap();
        let path = path_for(&dir);
        path.backlog()
            .persist(&CrashPayload::new(vec![payload("a"), payload("b")]))
            .unwrap();

        let sink = MemorySink::new();
        let outcome = path.replay(&sink).await.unwrap();

        assert_eq!(outcome, ReplayOutcome { replayed: 2, remaining: 0 });
        assert!(!path.backlog().exists());
        assert_eq!(sink.payloads(), vec![payload("a"), payload("b")]);
    }

    #[tokio::test]
    async fn test_partial_replay_rewrites_remaining() {
        let dir = TempDir::new().unwrap();
        let path = path_for(&dir);
        path.backlog()
            .persist(&CrashPayload::new(vec![payload("a"), payload("b")]))
            .unwrap();

        let sink = MemorySink::new();
        sink.fail_next(TelemetryError::Network("offline".to_string()));
        let outcome = path.replay(&sink).await.unwrap();

        assert_eq!(outcome, ReplayOutcome { replayed: 1, remaining: 1 });
        let stored = path.backlog().load().unwrap().unwrap();
        assert_eq!(stored.events, vec![payload("a")]);
    }

    #[tokio::test]
    async fn test_replay_without_backlog_is_noop() {
        let dir = TempDir::new().unwrap();
        let sink = MemorySink::new();
        let outcome = path_for(&dir).replay(&sink).await.unwrap();
        assert_eq!(outcome, ReplayOutcome::default());
        assert!(sink.is_empty());
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(CrashOutcome::Delivered.to_string(), "delivered");
        assert_eq!(
            CrashOutcome::Lost { reason: "disk full".to_string() }.to_string(),
            "lost (disk full)"
        );
    }
}
