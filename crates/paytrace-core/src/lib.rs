//! Paytrace telemetry engine
//!
//! Tracks nested actions inside a payment library, correlates them into a
//! tree, and delivers each finished action as a CloudEvents envelope to an
//! ingestion endpoint, including across process crashes.
//!
//! ## Features
//!
//! - **Lifecycle**: `begin` / `end` / `with_action` with exactly-once finalization
//! - **Correlation**: task-scoped current action for implicit parent resolution
//! - **Timeouts**: every action is force-finalized as `TIMEOUT` after its budget
//! - **Delivery**: HTTP POST with exponential backoff on transient failures
//! - **Crash Safety**: persist-then-send crash path with replay on next start
//! - **Telemetry**: Prometheus metrics and `tracing` logs for the engine itself
//!
//! ## Architecture
//!
//! 1. **Store** (`store`): the only shared mutable state; removal and timer
//!    cancellation happen in one critical section.
//!
//! 2. **Correlation** (`correlation`): task-local current action.
//!
//! 3. **Timeouts** (`timeout`): one-shot timers owned by store entries.
//!
//! 4. **Delivery** (`delivery`): the `EventSink` seam and the HTTP client.
//!
//! 5. **Crash** (`crash`): durable backlog, blocking transport, panic hook.
//!
//! 6. **Lifecycle** (`lifecycle`): `TelemetryEngine`, tying it all together.
//!
//! ## Example
//!
//! ```rust,no_run
//! use paytrace_core::{TelemetryConfig, TelemetryEngine, AuthScheme, StaticDeviceMetadata};
//! use paytrace_span::Attributes;
//!
//! #[tokio::main]
//! async fn main() -> paytrace_core::Result<()> {
//!     let engine = TelemetryEngine::new(StaticDeviceMetadata::host())?;
//!     engine.configure(
//!         TelemetryConfig::builder()
//!             .endpoint("https://ingest.example.com/api/v2/events/ingest")
//!             .auth(AuthScheme::ApiToken, "dt0c01.token")
//!             .build(),
//!     )?;
//!
//!     let charged: Result<u64, String> = engine
//!         .with_action("charge_card", Attributes::new(), None, |_id| async {
//!             // nested actions opened here get `charge_card` as parent
//!             Ok(1999)
//!         })
//!         .await;
//!
//!     println!("charged: {:?}", charged);
//!     engine.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod correlation;
pub mod crash;
pub mod delivery;
pub mod error;
pub mod lifecycle;
pub mod metadata;
pub mod metrics;
pub mod session;
pub mod store;
pub mod timeout;

pub use config::{AuthScheme, TelemetryConfig, TelemetryConfigBuilder};
pub use crash::{
    install_panic_hook, CrashBacklog, CrashDeliveryPath, CrashOutcome, CrashPayload,
    ReplayOutcome,
};
pub use delivery::{BackoffPolicy, DeliveryClient, EventSink, MemorySink};
pub use error::{Result, TelemetryError};
pub use lifecycle::TelemetryEngine;
pub use metadata::{DeviceMetadataFacade, NoDeviceMetadata, StaticDeviceMetadata};
pub use metrics::EngineMetrics;
pub use paytrace_span::{ActionId, ActionOutcome, ActionStatus, Attributes, CrashDetails};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
