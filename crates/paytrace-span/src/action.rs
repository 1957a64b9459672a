//! Tracked action types.
//!
//! Defines `ActionRecord`, `ActionStatus`, and `ActionOutcome` used to
//! describe a unit of application work from `begin` to its single
//! terminal status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::ids::ActionId;

/// Flat attribute map attached to actions and envelopes.
///
/// Values are expected to be scalars (string, number, bool, null).
pub type Attributes = BTreeMap<String, serde_json::Value>;

/// Terminal status of an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionStatus {
    Success,
    Failure,
    Timeout,
    Crash,
}

impl ActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionStatus::Success => "SUCCESS",
            ActionStatus::Failure => "FAILURE",
            ActionStatus::Timeout => "TIMEOUT",
            ActionStatus::Crash => "CRASH",
        }
    }

    /// Parse the wire form (`"SUCCESS"`, `"TIMEOUT"`, ...).
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "SUCCESS" => Some(ActionStatus::Success),
            "FAILURE" => Some(ActionStatus::Failure),
            "TIMEOUT" => Some(ActionStatus::Timeout),
            "CRASH" => Some(ActionStatus::Crash),
            _ => None,
        }
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single tracked unit of work, as captured at `begin`.
///
/// The effective parent is resolved before the record is created and is
/// immutable afterwards. Attributes may change until the record is
/// finalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub id: ActionId,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<ActionId>,
    pub started_at: DateTime<Utc>,
    /// Caller-supplied attributes.
    pub attributes: Attributes,
    /// Device metadata snapshot taken at begin.
    pub metadata: Attributes,
}

impl ActionRecord {
    /// Create a record with a fresh id, started now.
    pub fn new(
        name: impl Into<String>,
        parent_id: Option<ActionId>,
        attributes: Attributes,
        metadata: Attributes,
    ) -> Self {
        Self {
            id: ActionId::new(),
            name: name.into(),
            parent_id,
            started_at: Utc::now(),
            attributes,
            metadata,
        }
    }

    /// Set a caller attribute.
    pub fn set_attribute(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.attributes.insert(key.into(), value);
    }

    /// Milliseconds between start and `finished_at`, clamped at zero.
    pub fn duration_ms(&self, finished_at: DateTime<Utc>) -> u64 {
        (finished_at - self.started_at).num_milliseconds().max(0) as u64
    }
}

/// How an action ended: status, optional error text, and attributes
/// supplied at end time.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionOutcome {
    pub status: ActionStatus,
    pub error: Option<String>,
    pub attributes: Attributes,
}

impl ActionOutcome {
    pub fn success() -> Self {
        Self::with_status(ActionStatus::Success, None)
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self::with_status(ActionStatus::Failure, Some(error.into()))
    }

    pub fn timeout() -> Self {
        Self::with_status(ActionStatus::Timeout, Some("exceeded timeout".to_string()))
    }

    pub fn crash(error: impl Into<String>) -> Self {
        Self::with_status(ActionStatus::Crash, Some(error.into()))
    }

    fn with_status(status: ActionStatus, error: Option<String>) -> Self {
        Self {
            status,
            error,
            attributes: Attributes::new(),
        }
    }

    /// Attach an end-time attribute.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Attach several end-time attributes.
    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes.extend(attributes);
        self
    }
}

impl Default for ActionOutcome {
    fn default() -> Self {
        Self::success()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_new_record() {
        let parent = ActionId::new();
        let mut attrs = Attributes::new();
        attrs.insert("merchant".to_string(), serde_json::json!("m-42"));
        let record = ActionRecord::new("checkout", Some(parent), attrs, Attributes::new());

        assert_eq!(record.name, "checkout");
        assert_eq!(record.parent_id, Some(parent));
        assert_eq!(record.attributes.get("merchant"), Some(&serde_json::json!("m-42")));
        assert!(record.metadata.is_empty());
    }

    #[test]
    fn test_duration_never_negative() {
        let record = ActionRecord::new("x", None, Attributes::new(), Attributes::new());
        let before = record.started_at - Duration::milliseconds(500);
        assert_eq!(record.duration_ms(before), 0);

        let after = record.started_at + Duration::milliseconds(1500);
        assert_eq!(record.duration_ms(after), 1500);
    }

    #[test]
    fn test_status_wire_form() {
        for status in [
            ActionStatus::Success,
            ActionStatus::Failure,
            ActionStatus::Timeout,
            ActionStatus::Crash,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
            assert_eq!(ActionStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ActionStatus::parse("success"), None);
    }

    #[test]
    fn test_outcome_constructors() {
        assert_eq!(ActionOutcome::default().status, ActionStatus::Success);
        assert!(ActionOutcome::success().error.is_none());

        let failed = ActionOutcome::failure("declined").with_attribute("code", 51);
        assert_eq!(failed.status, ActionStatus::Failure);
        assert_eq!(failed.error.as_deref(), Some("declined"));
        assert_eq!(failed.attributes.get("code"), Some(&serde_json::json!(51)));

        let timed_out = ActionOutcome::timeout();
        assert_eq!(timed_out.status, ActionStatus::Timeout);
        assert_eq!(timed_out.error.as_deref(), Some("exceeded timeout"));
    }
}
