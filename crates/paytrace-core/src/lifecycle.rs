//! Action lifecycle management
//!
//! [`TelemetryEngine`] is the entry point used by payment code. It opens
//! actions with [`begin`](TelemetryEngine::begin), closes them with
//! [`end`](TelemetryEngine::end), and wraps async bodies with
//! [`with_action`](TelemetryEngine::with_action).
//!
//! Every begun action is finalized exactly once, by whichever of `end`, its
//! timeout, a crash report or `shutdown` removes it from the store first.
//! The losers observe `UnknownAction`.

use chrono::Utc;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::config::TelemetryConfig;
use crate::correlation;
use crate::crash::{CrashDeliveryPath, CrashOutcome, ReplayOutcome};
use crate::delivery::{DeliveryClient, EventSink};
use crate::error::{Result, TelemetryError};
use crate::metadata::DeviceMetadataFacade;
use crate::metrics::EngineMetrics;
use crate::session::SessionRoot;
use crate::store::{ActionContext, ActionStore};
use crate::timeout::TimeoutSupervisor;
use paytrace_span::{
    ActionId, ActionOutcome, ActionRecord, ActionStatus, Attributes, CrashDetails, EventEnvelope,
    EventSerializer, SessionId,
};

/// Everything that only exists after `configure`
struct Configured {
    config: TelemetryConfig,
    serializer: EventSerializer,
    sink: Arc<dyn EventSink>,
    timeouts: TimeoutSupervisor,
    crash: CrashDeliveryPath,
    runtime: Handle,
}

struct EngineInner {
    metadata: Arc<dyn DeviceMetadataFacade>,
    store: ActionStore,
    session: SessionRoot,
    metrics: Arc<EngineMetrics>,
    configured: OnceLock<Configured>,
    /// Deliveries running in the background, awaited by `flush`
    background: Mutex<Vec<JoinHandle<()>>>,
}

/// Handle to one telemetry engine
///
/// Cheap to clone; clones share the same store, session and configuration.
#[derive(Clone)]
pub struct TelemetryEngine {
    inner: Arc<EngineInner>,
}

impl TelemetryEngine {
    /// Create an unconfigured engine.
    pub fn new(metadata: impl DeviceMetadataFacade + 'static) -> Result<Self> {
        Ok(Self {
            inner: Arc::new(EngineInner {
                metadata: Arc::new(metadata),
                store: ActionStore::new(),
                session: SessionRoot::new(),
                metrics: Arc::new(EngineMetrics::new()?),
                configured: OnceLock::new(),
                background: Mutex::new(Vec::new()),
            }),
        })
    }

    /// Configure HTTP delivery and start the session.
    ///
    /// Must be called from within a tokio runtime. Only the first
    /// successful call has any effect.
    pub fn configure(&self, config: TelemetryConfig) -> Result<()> {
        if self.is_configured() {
            tracing::debug!("Telemetry engine already configured, ignoring");
            return Ok(());
        }
        config.validate()?;
        let client = DeliveryClient::new(&config)?.with_metrics(Arc::clone(&self.inner.metrics));
        self.configure_with_sink(config, Arc::new(client))
    }

    /// Configure with a custom event sink and start the session.
    pub fn configure_with_sink(&self, config: TelemetryConfig, sink: Arc<dyn EventSink>) -> Result<()> {
        if self.is_configured() {
            tracing::debug!("Telemetry engine already configured, ignoring");
            return Ok(());
        }
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| {
            TelemetryError::Config("configure must be called from within a tokio runtime".to_string())
        })?;

        let configured = Configured {
            serializer: EventSerializer::new(
                config.source.clone(),
                config.event_type.clone(),
                self.inner.session.session_id(),
            ),
            timeouts: TimeoutSupervisor::new(runtime.clone(), config.action_timeout()),
            crash: CrashDeliveryPath::new(&config),
            sink,
            runtime,
            config,
        };

        if self.inner.configured.set(configured).is_err() {
            tracing::debug!("Telemetry engine configured concurrently, ignoring");
            return Ok(());
        }
        let cfg = self.configured()?;

        tracing::info!(
            endpoint = %cfg.config.endpoint,
            session_id = %self.inner.session.session_id(),
            action_timeout_ms = cfg.config.action_timeout_ms,
            "Telemetry engine configured"
        );

        self.start_session(cfg);

        if cfg.config.replay_backlog_on_configure && cfg.crash.backlog().exists() {
            let engine = self.clone();
            self.track(cfg.runtime.spawn(async move {
                if let Err(e) = engine.replay_crash_backlog().await {
                    tracing::warn!(error = %e, "Crash backlog replay failed");
                }
            }));
        }

        Ok(())
    }

    pub fn is_configured(&self) -> bool {
        self.inner.configured.get().is_some()
    }

    /// Active configuration, once configured.
    pub fn config(&self) -> Option<&TelemetryConfig> {
        self.inner.configured.get().map(|cfg| &cfg.config)
    }

    pub fn session_id(&self) -> SessionId {
        self.inner.session.session_id()
    }

    /// Id of the session root action, once configured.
    pub fn session_root(&self) -> Option<ActionId> {
        self.inner.session.root_id()
    }

    /// The action open in the caller's call chain, if any.
    pub fn current_action(&self) -> Option<ActionId> {
        correlation::current()
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.inner.metrics
    }

    /// Number of actions currently open.
    pub fn open_actions(&self) -> usize {
        self.inner.store.len()
    }

    /// Open an action.
    ///
    /// The parent is `parent` if given, else the caller's current action,
    /// else the session root. Never suspends.
    pub fn begin(
        &self,
        name: impl Into<String>,
        attributes: Attributes,
        parent: Option<ActionId>,
    ) -> Result<ActionId> {
        let cfg = self.configured()?;

        let parent = parent
            .or_else(correlation::current)
            .or_else(|| self.inner.session.root_id());
        let record = ActionRecord::new(name, parent, attributes, self.inner.metadata.collect());
        let id = record.id;

        tracing::debug!(action_id = %id, name = %record.name, parent_id = ?parent, "Action begun");

        self.inner.store.insert(ActionContext::new(record))?;
        self.inner.metrics.record_started();

        let engine = Arc::downgrade(&self.inner);
        let handle = cfg.timeouts.schedule(id, move |id| async move {
            if let Some(inner) = engine.upgrade() {
                TelemetryEngine { inner }.expire(id);
            }
        });
        self.inner.store.arm(&id, handle);

        Ok(id)
    }

    /// Like [`begin`](Self::begin), but never fails.
    ///
    /// When the engine cannot track the action a random id is returned and
    /// no event will ever be produced for it.
    pub fn begin_or_detached(
        &self,
        name: impl Into<String>,
        attributes: Attributes,
        parent: Option<ActionId>,
    ) -> ActionId {
        let name = name.into();
        match self.begin(name.clone(), attributes, parent) {
            Ok(id) => id,
            Err(e) => {
                let id = ActionId::new();
                tracing::error!(
                    action_id = %id,
                    name = %name,
                    error = %e,
                    "Action is not tracked, no event will be produced for it"
                );
                id
            }
        }
    }

    /// Set an attribute on an open action.
    pub fn set_attribute(
        &self,
        id: ActionId,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Result<()> {
        self.configured()?;
        let (key, value) = (key.into(), value.into());
        self.inner
            .store
            .update(&id, move |record| record.set_attribute(key, value))
    }

    /// Remove an action and build its envelope without delivering it.
    ///
    /// Fails with `UnknownAction` if the action was already finalized.
    pub fn finalize(&self, id: ActionId, outcome: ActionOutcome) -> Result<EventEnvelope> {
        let cfg = self.configured()?;
        let record = self
            .inner
            .store
            .remove(&id)
            .ok_or(TelemetryError::UnknownAction(id))?
            .into_record();

        let envelope = self.serialize(cfg, &record, &outcome);
        self.inner.metrics.record_finalized(outcome.status);
        tracing::debug!(
            action_id = %id,
            name = %record.name,
            status = %outcome.status,
            "Action finalized"
        );
        Ok(envelope)
    }

    /// Finalize an action and deliver its event.
    ///
    /// Delivery errors left after retries are returned to the caller.
    pub async fn end(&self, id: ActionId, outcome: ActionOutcome) -> Result<()> {
        let envelope = self.finalize(id, outcome)?;
        self.dispatch(&envelope).await
    }

    /// Run `body` inside a new action.
    ///
    /// The action is the current action for the duration of `body`, and is
    /// ended with `SUCCESS` or `FAILURE` depending on the body's result,
    /// which is returned unchanged. Telemetry failures are logged and never
    /// replace that result.
    pub async fn with_action<F, Fut, T, E>(
        &self,
        name: impl Into<String>,
        attributes: Attributes,
        parent: Option<ActionId>,
        body: F,
    ) -> std::result::Result<T, E>
    where
        F: FnOnce(ActionId) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: fmt::Display,
    {
        let name = name.into();
        let id = match self.begin(name.clone(), attributes, parent) {
            Ok(id) => id,
            Err(e) => {
                tracing::error!(
                    name = %name,
                    error = %e,
                    "Running action body without telemetry"
                );
                return body(ActionId::new()).await;
            }
        };

        let result = correlation::scope(id, body(id)).await;

        let outcome = match &result {
            Ok(_) => ActionOutcome::success(),
            Err(e) => ActionOutcome::failure(e.to_string()),
        };
        if let Err(e) = self.end(id, outcome).await {
            self.log_end_failure(id, &name, &e);
        }

        result
    }

    /// Finalize every open action as `FAILURE` and deliver the events.
    ///
    /// Returns how many actions were closed.
    pub async fn shutdown(&self) -> usize {
        let Ok(cfg) = self.configured() else {
            return 0;
        };

        let open = self.inner.store.drain(ActionStatus::Failure);
        let count = open.len();
        for ctx in open {
            let record = ctx.into_record();
            let outcome = ActionOutcome::failure("engine shutdown");
            let envelope = self.serialize(cfg, &record, &outcome);
            self.inner.metrics.record_finalized(outcome.status);
            // dispatch logs failures
            let _ = self.dispatch(&envelope).await;
        }
        self.flush().await;

        tracing::info!(closed = count, "Telemetry engine shut down");
        count
    }

    /// Wait for deliveries the engine started in the background (session
    /// root, timeouts, backlog replay) to finish.
    pub async fn flush(&self) {
        let pending = std::mem::take(
            &mut *self
                .inner
                .background
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for handle in pending {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Background delivery task failed");
            }
        }
    }

    /// Report a fatal error.
    ///
    /// Finalizes the caller's current action (if still open) as `CRASH`,
    /// builds the crash event, then persists and sends both through the
    /// crash path. Blocks the calling
    /// thread for at most the configured crash budget. Never panics.
    pub fn report_crash(&self, details: CrashDetails) -> CrashOutcome {
        let Some(cfg) = self.inner.configured.get() else {
            tracing::error!(error = %details.error, "Crash reported before configure, dropped");
            self.inner.metrics.record_crash_report("lost");
            return CrashOutcome::Lost {
                reason: TelemetryError::NotConfigured.to_string(),
            };
        };

        let mut events = Vec::new();

        // Only the crashing call chain's own action is finalized; actions
        // open in other chains keep running.
        let crashed = correlation::current()
            .and_then(|id| self.inner.store.retire(&id, ActionStatus::Crash));

        let parent = match &crashed {
            Some(ctx) => Some(ctx.id()),
            None => self.inner.session.root_id(),
        };

        if let Some(ctx) = crashed {
            let record = ctx.into_record();
            let envelope = cfg.serializer.finalize(
                &record,
                Utc::now(),
                &ActionOutcome::crash(details.error.clone()),
                &Attributes::new(),
            );
            self.inner.metrics.record_finalized(ActionStatus::Crash);
            tracing::warn!(action_id = %record.id, name = %record.name, "Action finalized by crash");
            match envelope.encode() {
                Ok(payload) => events.push(payload),
                Err(e) => tracing::error!(error = %e, "Failed to encode crashed action"),
            }
        }

        let mut details = details;
        if let Some(version) = &cfg.config.app_version {
            details.symbols.entry("appVersion".to_string()).or_insert_with(|| version.clone());
        }
        if let Some(build) = &cfg.config.build_id {
            details.symbols.entry("buildId".to_string()).or_insert_with(|| build.clone());
        }

        let crash = cfg.serializer.crash(&details, parent, Utc::now());
        match crash.encode() {
            Ok(payload) => events.push(payload),
            Err(e) => tracing::error!(error = %e, "Failed to encode crash event"),
        }

        let outcome = cfg.crash.deliver(events);
        self.inner.metrics.record_crash_report(outcome.as_str());
        outcome
    }

    /// Resubmit a crash payload persisted by an earlier process.
    pub async fn replay_crash_backlog(&self) -> Result<ReplayOutcome> {
        let cfg = self.configured()?;
        match cfg.crash.replay(cfg.sink.as_ref()).await {
            Ok(outcome) => {
                if outcome.remaining > 0 {
                    self.inner.metrics.record_backlog_replay("partial");
                } else if outcome.replayed > 0 {
                    self.inner.metrics.record_backlog_replay("delivered");
                }
                Ok(outcome)
            }
            Err(e) => {
                self.inner.metrics.record_backlog_replay("failed");
                Err(e)
            }
        }
    }

    fn configured(&self) -> Result<&Configured> {
        self.inner.configured.get().ok_or(TelemetryError::NotConfigured)
    }

    fn start_session(&self, cfg: &Configured) {
        let record = ActionRecord::new(
            cfg.config.session_action_name.clone(),
            None,
            Attributes::new(),
            self.inner.metadata.collect(),
        );
        if !self.inner.session.set_root(record.id) {
            return;
        }
        self.inner.metrics.record_started();

        let outcome = ActionOutcome::success();
        let envelope = cfg
            .serializer
            .finalize(&record, Utc::now(), &outcome, &Attributes::new());
        self.inner.metrics.record_finalized(outcome.status);
        tracing::debug!(action_id = %record.id, "Session root created");

        let engine = self.clone();
        self.track(cfg.runtime.spawn(async move {
            let _ = engine.dispatch(&envelope).await;
        }));
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut background = self
            .inner
            .background
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        background.retain(|task| !task.is_finished());
        background.push(handle);
    }

    fn expire(&self, id: ActionId) {
        let Ok(cfg) = self.configured() else {
            return;
        };
        let Some(ctx) = self.inner.store.retire(&id, ActionStatus::Timeout) else {
            tracing::debug!(action_id = %id, "Timeout fired for an action already finalized");
            return;
        };

        let record = ctx.into_record();
        tracing::warn!(
            action_id = %id,
            name = %record.name,
            timeout_ms = cfg.config.action_timeout_ms,
            "Action exceeded timeout"
        );

        let outcome = ActionOutcome::timeout();
        let envelope = self.serialize(cfg, &record, &outcome);
        self.inner.metrics.record_finalized(outcome.status);

        let engine = self.clone();
        self.track(cfg.runtime.spawn(async move {
            let _ = engine.dispatch(&envelope).await;
        }));
    }

    fn serialize(&self, cfg: &Configured, record: &ActionRecord, outcome: &ActionOutcome) -> EventEnvelope {
        let finished_at = Utc::now();
        let end_metadata = self.inner.metadata.collect();
        cfg.serializer.finalize(record, finished_at, outcome, &end_metadata)
    }

    async fn dispatch(&self, envelope: &EventEnvelope) -> Result<()> {
        let cfg = self.configured()?;
        let payload = envelope.encode()?;

        match cfg.sink.send(&payload).await {
            Ok(()) => {
                self.inner.metrics.record_delivery(true);
                tracing::debug!(event_id = %payload.event_id, "Event delivered");
                Ok(())
            }
            Err(e) => {
                self.inner.metrics.record_delivery(false);
                tracing::warn!(
                    event_id = %payload.event_id,
                    action_id = ?envelope.action_id(),
                    error = %e,
                    "Event delivery failed"
                );
                Err(e)
            }
        }
    }

    fn log_end_failure(&self, id: ActionId, name: &str, error: &TelemetryError) {
        if !error.is_unknown_action() {
            tracing::warn!(action_id = %id, name = %name, error = %error, "Failed to end action");
            return;
        }
        match self.inner.store.retired_as(&id) {
            Some(status) => tracing::debug!(
                action_id = %id,
                name = %name,
                status = %status,
                "Action was already finalized by the engine"
            ),
            None => tracing::error!(
                action_id = %id,
                name = %name,
                "Action was finalized outside its with_action scope"
            ),
        }
    }
}

impl fmt::Debug for TelemetryEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelemetryEngine")
            .field("session_id", &self.inner.session.session_id())
            .field("configured", &self.is_configured())
            .field("open_actions", &self.inner.store.len())
            .finish_non_exhaustive()
    }
}
