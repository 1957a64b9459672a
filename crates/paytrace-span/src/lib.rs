//! Action and envelope types for paytrace payment telemetry.
//!
//! This crate provides the data model shared by the telemetry engine and
//! the operator tooling: tracked actions, their terminal outcomes, and the
//! CloudEvents envelopes they are delivered as.
//!
//! # Action Hierarchy
//!
//! ```text
//! session_started (session root, no parent)
//!   └─ checkout
//!       ├─ tokenize_card
//!       └─ authorize_payment
//! ```
//!
//! Parent links are plain id references. The tree is never held in memory
//! while actions run; [`CorrelationTree`] rebuilds it from delivered envelopes.
//!
//! # Usage
//!
//! 1. Capture an [`ActionRecord`] when work begins.
//! 2. Finish it with an [`ActionOutcome`] through [`EventSerializer::finalize`].
//! 3. Encode the resulting [`EventEnvelope`] into an [`EventPayload`] for the wire.

pub mod action;
pub mod envelope;
pub mod ids;
pub mod serializer;
pub mod tree;

pub use action::{ActionOutcome, ActionRecord, ActionStatus, Attributes};
pub use envelope::{EventEnvelope, EventPayload, CLOUDEVENTS_CONTENT_TYPE, SPEC_VERSION};
pub use ids::{ActionId, SessionId};
pub use serializer::{keys, CrashDetails, EventSerializer};
pub use tree::{CorrelationTree, TreeNode};
