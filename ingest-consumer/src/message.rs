use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// One raw event as produced onto the ingest topic by the edge: a MessagePack
/// map carrying the still-encoded client payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawIngestMessage {
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
    #[serde(with = "start_time")]
    pub start_time: f64,
    pub event_id: String,
    pub project_id: i64,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub auth: HashMap<String, Value>,
}

impl RawIngestMessage {
    pub fn unpack(bytes: &[u8]) -> Result<Self, rmp_serde::decode::Error> {
        rmp_serde::from_slice(bytes)
    }

    pub fn pack(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec_named(self)
    }

    pub fn dedup_key(&self) -> String {
        dedup_key(self.project_id, &self.event_id)
    }

    pub fn staged_key(&self) -> String {
        staged_key(self.project_id, &self.event_id)
    }
}

pub fn dedup_key(project_id: i64, event_id: &str) -> String {
    format!("ev:{project_id}:{event_id}")
}

pub fn staged_key(project_id: i64, event_id: &str) -> String {
    format!("ingest:staged:{project_id}:{event_id}")
}

// The edge writes start_time as the string form of a float; numbers are
// accepted too.
mod start_time {
    use super::*;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        let value = match Raw::deserialize(deserializer)? {
            Raw::Number(n) => n,
            Raw::Text(s) => s.trim().parse().map_err(serde::de::Error::custom)?,
        };
        if value.is_finite() {
            Ok(value)
        } else {
            Err(serde::de::Error::custom("start_time is not finite"))
        }
    }
}
