//! Error types for the telemetry engine

use paytrace_span::ActionId;
use thiserror::Error;

/// Errors surfaced by the telemetry engine
#[derive(Error, Debug)]
pub enum TelemetryError {
    /// Engine used before `configure`
    #[error("Telemetry engine is not configured")]
    NotConfigured,

    /// Action id not in the store (already finalized, or never begun)
    #[error("Unknown action: {0}")]
    UnknownAction(ActionId),

    /// Action id already present in the store
    #[error("Duplicate action: {0}")]
    DuplicateAction(ActionId),

    /// Ingestion endpoint rejected the event
    #[error("Ingestion endpoint returned status {status}: {body}")]
    BadResponse { status: u16, body: String },

    /// Transport-level failure
    #[error("Network error: {0}")]
    Network(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Envelope encoding or backlog decoding failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Crash backlog file I/O failure
    #[error("Crash backlog error: {0}")]
    Backlog(#[from] std::io::Error),

    /// Metric registration failure
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl TelemetryError {
    /// Whether a delivery attempt that failed with this error may be retried.
    ///
    /// 429 and 5xx responses and transport failures are transient; every
    /// other failure is final.
    pub fn is_retryable(&self) -> bool {
        match self {
            TelemetryError::BadResponse { status, .. } => {
                *status == 429 || (500..=599).contains(status)
            }
            TelemetryError::Network(_) => true,
            _ => false,
        }
    }

    pub fn is_unknown_action(&self) -> bool {
        matches!(self, TelemetryError::UnknownAction(_))
    }
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, TelemetryError>;
