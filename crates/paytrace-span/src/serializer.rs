//! Envelope construction for finalized actions and crashes.
//!
//! Attribute precedence, lowest to highest:
//!
//! 1. device metadata snapshot taken at begin
//! 2. device metadata snapshot taken at end
//! 3. caller attributes given at begin (and set while open)
//! 4. caller attributes given at end
//! 5. reserved fields (`action.*`, `session.id`)

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::action::{ActionOutcome, ActionRecord, ActionStatus, Attributes};
use crate::envelope::{EventEnvelope, SPEC_VERSION};
use crate::ids::{ActionId, SessionId};

/// Reserved `data` keys.
pub mod keys {
    pub const ACTION_ID: &str = "action.id";
    pub const ACTION_PARENT_ID: &str = "action.parentId";
    pub const ACTION_NAME: &str = "action.name";
    pub const ACTION_STATUS: &str = "action.status";
    pub const ACTION_ERROR: &str = "action.error";
    pub const ACTION_DURATION_MS: &str = "action.durationMs";
    pub const ACTION_START_TIME: &str = "action.startTime";
    pub const ACTION_START_TIME_MS: &str = "action.startTimeMs";
    pub const ACTION_END_TIME: &str = "action.endTime";
    pub const ACTION_END_TIME_MS: &str = "action.endTimeMs";
    pub const SESSION_ID: &str = "session.id";
    pub const CRASH_ERROR: &str = "crash.error";

    /// Prefix for opaque crash symbol/version identifiers.
    pub const CRASH_PREFIX: &str = "crash.";

    pub const RESERVED: &[&str] = &[
        ACTION_ID,
        ACTION_PARENT_ID,
        ACTION_NAME,
        ACTION_STATUS,
        ACTION_ERROR,
        ACTION_DURATION_MS,
        ACTION_START_TIME,
        ACTION_START_TIME_MS,
        ACTION_END_TIME,
        ACTION_END_TIME_MS,
        SESSION_ID,
    ];
}

/// Name of the action synthesized for a crash event.
pub const CRASH_ACTION_NAME: &str = "app_crash";

/// Fatal error details captured by the crash handler.
///
/// Symbol and version identifiers are opaque strings supplied by the
/// platform (image UUID, architecture, app version, ...).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CrashDetails {
    pub error: String,
    pub symbols: BTreeMap<String, String>,
}

impl CrashDetails {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            symbols: BTreeMap::new(),
        }
    }

    pub fn with_symbol(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.symbols.insert(key.into(), value.into());
        self
    }
}

/// Builds envelopes for one engine configuration.
///
/// `source` and `event_type` are fixed per configuration so backend-side
/// schemas stay stable.
#[derive(Debug, Clone)]
pub struct EventSerializer {
    source: String,
    event_type: String,
    session_id: SessionId,
}

impl EventSerializer {
    pub fn new(source: impl Into<String>, event_type: impl Into<String>, session_id: SessionId) -> Self {
        Self {
            source: source.into(),
            event_type: event_type.into(),
            session_id,
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Build the envelope for a finalized action.
    pub fn finalize(
        &self,
        record: &ActionRecord,
        finished_at: DateTime<Utc>,
        outcome: &ActionOutcome,
        end_metadata: &Attributes,
    ) -> EventEnvelope {
        let mut data = BTreeMap::new();
        merge_layer(&mut data, &record.metadata);
        merge_layer(&mut data, end_metadata);
        merge_layer(&mut data, &record.attributes);
        merge_layer(&mut data, &outcome.attributes);

        self.insert_reserved(
            &mut data,
            ReservedFields {
                id: record.id,
                parent_id: record.parent_id,
                name: &record.name,
                status: outcome.status,
                error: outcome.error.as_deref(),
                started_at: record.started_at,
                finished_at,
                duration_ms: record.duration_ms(finished_at),
            },
        );

        self.envelope(finished_at, data)
    }

    /// Build the crash event.
    ///
    /// `parent_id` is the action open at crash time, or the session root
    /// when nothing was open.
    pub fn crash(
        &self,
        details: &CrashDetails,
        parent_id: Option<ActionId>,
        at: DateTime<Utc>,
    ) -> EventEnvelope {
        let mut data = BTreeMap::new();
        for (key, value) in &details.symbols {
            let key = if key.starts_with(keys::CRASH_PREFIX) {
                key.clone()
            } else {
                format!("{}{}", keys::CRASH_PREFIX, key)
            };
            data.insert(key, Value::String(value.clone()));
        }
        data.insert(keys::CRASH_ERROR.to_string(), Value::String(details.error.clone()));

        self.insert_reserved(
            &mut data,
            ReservedFields {
                id: ActionId::new(),
                parent_id,
                name: CRASH_ACTION_NAME,
                status: ActionStatus::Crash,
                error: Some(&details.error),
                started_at: at,
                finished_at: at,
                duration_ms: 0,
            },
        );

        self.envelope(at, data)
    }

    fn insert_reserved(&self, data: &mut BTreeMap<String, Value>, fields: ReservedFields<'_>) {
        for key in keys::RESERVED {
            data.remove(*key);
        }

        data.insert(keys::ACTION_ID.to_string(), json!(fields.id.to_string()));
        if let Some(parent) = fields.parent_id {
            data.insert(keys::ACTION_PARENT_ID.to_string(), json!(parent.to_string()));
        }
        data.insert(keys::ACTION_NAME.to_string(), json!(fields.name));
        data.insert(keys::ACTION_STATUS.to_string(), json!(fields.status.as_str()));
        if let Some(error) = fields.error {
            data.insert(keys::ACTION_ERROR.to_string(), json!(error));
        }
        data.insert(keys::ACTION_DURATION_MS.to_string(), json!(fields.duration_ms));
        data.insert(keys::ACTION_START_TIME.to_string(), json!(rfc3339(fields.started_at)));
        data.insert(
            keys::ACTION_START_TIME_MS.to_string(),
            json!(fields.started_at.timestamp_millis()),
        );
        data.insert(keys::ACTION_END_TIME.to_string(), json!(rfc3339(fields.finished_at)));
        data.insert(
            keys::ACTION_END_TIME_MS.to_string(),
            json!(fields.finished_at.timestamp_millis()),
        );
        data.insert(keys::SESSION_ID.to_string(), json!(self.session_id.to_string()));
    }

    fn envelope(&self, time: DateTime<Utc>, data: BTreeMap<String, Value>) -> EventEnvelope {
        EventEnvelope {
            specversion: SPEC_VERSION.to_string(),
            id: Uuid::new_v4().to_string(),
            source: self.source.clone(),
            event_type: self.event_type.clone(),
            time: rfc3339(time),
            data,
        }
    }
}

struct ReservedFields<'a> {
    id: ActionId,
    parent_id: Option<ActionId>,
    name: &'a str,
    status: ActionStatus,
    error: Option<&'a str>,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    duration_ms: u64,
}

/// Overlay one attribute layer; non-scalar values are flattened to JSON text.
fn merge_layer(data: &mut BTreeMap<String, Value>, layer: &Attributes) {
    for (key, value) in layer {
        let value = match value {
            Value::Array(_) | Value::Object(_) => Value::String(value.to_string()),
            scalar => scalar.clone(),
        };
        data.insert(key.clone(), value);
    }
}

fn rfc3339(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}
