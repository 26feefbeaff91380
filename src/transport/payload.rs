// src/transport/payload.rs
//! Collector wire payloads
//!
//! The collector accepts batches of the form
//! `{"api_key": ..., "batch": [{event, distinct_id, timestamp, properties}]}`
//! on `/capture/` and decide requests on `/decide/`. Timestamps are
//! string-encoded epoch milliseconds.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One event record as it travels to the collector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventPayload {
    /// Event name, e.g. `"$screen"` or a custom name
    pub event: String,

    /// Stable per-installation identity
    pub distinct_id: String,

    /// Epoch milliseconds, string-encoded on the wire
    pub timestamp: String,

    /// Arbitrary property document
    pub properties: Value,
}

impl EventPayload {
    pub fn new(event: impl Into<String>, distinct_id: impl Into<String>, timestamp_ms: i64) -> Self {
        Self {
            event: event.into(),
            distinct_id: distinct_id.into(),
            timestamp: timestamp_ms.to_string(),
            properties: Value::Object(serde_json::Map::new()),
        }
    }

    pub fn with_properties(mut self, properties: Value) -> Self {
        self.properties = properties;
        self
    }
}

/// Batch envelope for `/capture/`
#[derive(Debug, Serialize)]
pub struct CaptureBatch<'a> {
    pub api_key: &'a str,
    pub batch: &'a [Value],
}

/// Request envelope for `/decide/`
#[derive(Debug, Serialize)]
pub struct DecideRequest<'a> {
    pub api_key: &'a str,
    pub distinct_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<&'a Value>,
}

/// The slice of the decide response the client consumes
#[derive(Debug, Deserialize)]
pub struct DecideResponse {
    #[serde(rename = "featureFlags", default)]
    pub feature_flags: serde_json::Map<String, Value>,
}
