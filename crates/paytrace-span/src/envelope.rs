//! CloudEvents envelope delivered to the ingestion endpoint.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::action::ActionStatus;
use crate::ids::ActionId;
use crate::serializer::keys;

/// CloudEvents specification version emitted in `specversion`.
pub const SPEC_VERSION: &str = "1.0";

/// Media type of a structured-mode CloudEvents JSON body.
pub const CLOUDEVENTS_CONTENT_TYPE: &str = "application/cloudevents+json; charset=utf-8";

/// Delivery payload for one finalized action.
///
/// Created once at finalization and never mutated afterwards. `data` is a
/// sorted map so that encoding is deterministic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub specversion: String,
    pub id: String,
    pub source: String,
    #[serde(rename = "type")]
    pub event_type: String,
    /// RFC3339 timestamp of finalization.
    pub time: String,
    pub data: BTreeMap<String, serde_json::Value>,
}

impl EventEnvelope {
    /// `action.id` carried in `data`.
    pub fn action_id(&self) -> Option<ActionId> {
        self.data_str(keys::ACTION_ID).and_then(|s| s.parse().ok())
    }

    /// `action.parentId` carried in `data`, if any.
    pub fn parent_id(&self) -> Option<ActionId> {
        self.data_str(keys::ACTION_PARENT_ID).and_then(|s| s.parse().ok())
    }

    pub fn action_name(&self) -> Option<&str> {
        self.data_str(keys::ACTION_NAME)
    }

    pub fn status(&self) -> Option<ActionStatus> {
        self.data_str(keys::ACTION_STATUS).and_then(ActionStatus::parse)
    }

    pub fn duration_ms(&self) -> Option<u64> {
        self.data.get(keys::ACTION_DURATION_MS).and_then(|v| v.as_u64())
    }

    fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(|v| v.as_str())
    }

    /// Encode into the exact body that goes on the wire.
    pub fn encode(&self) -> serde_json::Result<EventPayload> {
        Ok(EventPayload {
            event_id: self.id.clone(),
            body: serde_json::to_string(self)?,
        })
    }
}

/// An envelope encoded for delivery.
///
/// `body` is posted verbatim, both on first delivery and on crash-backlog
/// replay, so the backend always sees identical bytes for one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventPayload {
    pub event_id: String,
    pub body: String,
}

impl EventPayload {
    /// Decode the body back into an envelope.
    pub fn decode(&self) -> serde_json::Result<EventEnvelope> {
        serde_json::from_str(&self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> EventEnvelope {
        let id = ActionId::new();
        let mut data = BTreeMap::new();
        data.insert(keys::ACTION_ID.to_string(), json!(id.to_string()));
        data.insert(keys::ACTION_NAME.to_string(), json!("checkout"));
        data.insert(keys::ACTION_STATUS.to_string(), json!("SUCCESS"));
        data.insert(keys::ACTION_DURATION_MS.to_string(), json!(12));
        EventEnvelope {
            specversion: SPEC_VERSION.to_string(),
            id: "evt-1".to_string(),
            source: "payment-library".to_string(),
            event_type: "com.paytrace.action".to_string(),
            time: "2024-01-01T00:00:00.000Z".to_string(),
            data,
        }
    }

    #[test]
    fn test_wire_field_names() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["specversion"], "1.0");
        assert_eq!(json["type"], "com.paytrace.action");
        assert!(json.get("event_type").is_none());
        assert_eq!(json["data"]["action.name"], "checkout");
    }

    #[test]
    fn test_accessors() {
        let envelope = sample();
        assert!(envelope.action_id().is_some());
        assert!(envelope.parent_id().is_none());
        assert_eq!(envelope.action_name(), Some("checkout"));
        assert_eq!(envelope.status(), Some(ActionStatus::Success));
        assert_eq!(envelope.duration_ms(), Some(12));
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let envelope = sample();
        let first = envelope.encode().unwrap();
        let second = envelope.encode().unwrap();
        assert_eq!(first, second);
        assert_eq!(first.event_id, "evt-1");
        assert_eq!(first.decode().unwrap(), envelope);
    }
}
