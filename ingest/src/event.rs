use grouping::{compute_grouping, GroupingReason, NormalizedEvent};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::payload::DecodeError;

/// An event ready for the event store: its payload plus the hashes deciding
/// which issue(s) it belongs to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupedEvent {
    pub event_id: String,
    pub project_id: i64,
    pub platform: String,
    pub hashes: Vec<String>,
    pub grouping_reason: GroupingReason,
    pub data: String,
    pub received_at: String,
}

impl GroupedEvent {
    pub fn key(&self) -> String {
        format!("{}:{}", self.project_id, self.event_id)
    }

    /// Normalize and fingerprint a decoded payload.
    pub fn from_payload(
        project_id: i64,
        payload: Map<String, Value>,
        received_at: String,
    ) -> Result<Self, DecodeError> {
        let event_id = event_id_from(&payload);
        let payload = Value::Object(payload);
        let data = payload.to_string();

        let normalized = NormalizedEvent::from_value(payload).map_err(DecodeError::bad_data)?;
        let grouping = compute_grouping(&normalized);

        Ok(GroupedEvent {
            event_id,
            project_id,
            platform: normalized.platform,
            hashes: grouping.hashes,
            grouping_reason: grouping.reason,
            data,
            received_at,
        })
    }
}

/// The client supplied `event_id` when it is a valid UUID, a fresh one otherwise.
/// Always rendered as 32 lowercase hex chars.
pub fn event_id_from(payload: &Map<String, Value>) -> String {
    payload
        .get("event_id")
        .and_then(Value::as_str)
        .and_then(|id| Uuid::try_parse(id).ok())
        .unwrap_or_else(Uuid::new_v4)
        .simple()
        .to_string()
}
