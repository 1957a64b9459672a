//! Prometheus metrics for the telemetry engine
//!
//! - `paytrace_actions_started_total` (counter) - Actions begun
//! - `paytrace_actions_finalized_total` (counter) - Actions finalized, by status
//! - `paytrace_open_actions` (gauge) - Actions currently in the store
//! - `paytrace_deliveries_total` (counter) - Delivery outcomes, by result
//! - `paytrace_delivery_retries_total` (counter) - Retried delivery attempts
//! - `paytrace_crash_reports_total` (counter) - Crash path outcomes
//! - `paytrace_backlog_replays_total` (counter) - Backlog replay outcomes

use prometheus::{Counter, CounterVec, Encoder, IntGauge, Opts, Registry, TextEncoder};

use crate::error::{Result, TelemetryError};
use paytrace_span::ActionStatus;

const NAMESPACE: &str = "paytrace";

/// Engine metrics registered in a private registry
pub struct EngineMetrics {
    registry: Registry,
    actions_started_total: Counter,
    actions_finalized_total: CounterVec,
    open_actions: IntGauge,
    deliveries_total: CounterVec,
    delivery_retries_total: Counter,
    crash_reports_total: CounterVec,
    backlog_replays_total: CounterVec,
}

impl EngineMetrics {
    /// Create and register all engine metrics
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let actions_started_total = Counter::with_opts(
            Opts::new("actions_started_total", "Total number of actions begun").namespace(NAMESPACE),
        )?;

        let actions_finalized_total = CounterVec::new(
            Opts::new(
                "actions_finalized_total",
                "Total number of actions finalized by terminal status",
            )
            .namespace(NAMESPACE),
            &["status"],
        )?;

        let open_actions = IntGauge::with_opts(
            Opts::new("open_actions", "Number of actions currently open").namespace(NAMESPACE),
        )?;

        let deliveries_total = CounterVec::new(
            Opts::new("deliveries_total", "Total number of event deliveries by result")
                .namespace(NAMESPACE),
            &["result"],
        )?;

        let delivery_retries_total = Counter::with_opts(
            Opts::new("delivery_retries_total", "Total number of retried delivery attempts")
                .namespace(NAMESPACE),
        )?;

        let crash_reports_total = CounterVec::new(
            Opts::new("crash_reports_total", "Total number of crash reports by outcome")
                .namespace(NAMESPACE),
            &["outcome"],
        )?;

        let backlog_replays_total = CounterVec::new(
            Opts::new("backlog_replays_total", "Total number of crash backlog replays by result")
                .namespace(NAMESPACE),
            &["result"],
        )?;

        registry.register(Box::new(actions_started_total.clone()))?;
        registry.register(Box::new(actions_finalized_total.clone()))?;
        registry.register(Box::new(open_actions.clone()))?;
        registry.register(Box::new(deliveries_total.clone()))?;
        registry.register(Box::new(delivery_retries_total.clone()))?;
        registry.register(Box::new(crash_reports_total.clone()))?;
        registry.register(Box::new(backlog_replays_total.clone()))?;

        Ok(Self {
            registry,
            actions_started_total,
            actions_finalized_total,
            open_actions,
            deliveries_total,
            delivery_retries_total,
            crash_reports_total,
            backlog_replays_total,
        })
    }

    pub fn record_started(&self) {
        self.actions_started_total.inc();
        self.open_actions.inc();
    }

    pub fn record_finalized(&self, status: ActionStatus) {
        self.actions_finalized_total
            .with_label_values(&[status.as_str()])
            .inc();
        self.open_actions.dec();
    }

    pub fn record_delivery(&self, delivered: bool) {
        let result = if delivered { "delivered" } else { "failed" };
        self.deliveries_total.with_label_values(&[result]).inc();
    }

    pub fn record_retry(&self) {
        self.delivery_retries_total.inc();
    }

    pub fn record_crash_report(&self, outcome: &str) {
        self.crash_reports_total.with_label_values(&[outcome]).inc();
    }

    pub fn record_backlog_replay(&self, result: &str) {
        self.backlog_replays_total.with_label_values(&[result]).inc();
    }

    pub fn open_actions(&self) -> i64 {
        self.open_actions.get()
    }

    pub fn finalized(&self, status: ActionStatus) -> u64 {
        self.actions_finalized_total
            .with_label_values(&[status.as_str()])
            .get() as u64
    }

    pub fn deliveries(&self, delivered: bool) -> u64 {
        let result = if delivered { "delivered" } else { "failed" };
        self.deliveries_total.with_label_values(&[result]).get() as u64
    }

    pub fn retries(&self) -> u64 {
        self.delivery_retries_total.get() as u64
    }

    /// Encode all metrics in the Prometheus text format
    pub fn encode_text(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| TelemetryError::Config(format!("metrics are not valid UTF-8: {}", e)))
    }
}

impl std::fmt::Debug for EngineMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineMetrics")
            .field("open_actions", &self.open_actions.get())
            .finish_non_exhaustive()
    }
}
