//! Wire types for the sensor telemetry feed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::serde_helpers::deserialize_with_warnings;

/// Top-level telemetry message wrapper.
///
/// Every frame received from the telemetry socket is a self-describing JSON
/// object carrying a `type` discriminator; all remaining fields form the
/// payload. `{"type": "telemetry", "value": 42}` decodes with kind
/// `"telemetry"` and payload `{"value": 42}`.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TelemetryMessage {
    /// The message type/event (e.g., `telemetry`, `grid_status`, `log`)
    #[serde(rename = "type")]
    pub kind: String,
    /// Event-specific data fields
    #[serde(flatten)]
    pub payload: Value,
}

impl TelemetryMessage {
    /// Try to extract the payload as a sensor reading.
    #[must_use]
    pub fn as_sensor_reading(&self) -> Option<SensorReading> {
        if self.kind == "telemetry" {
            serde_json::from_value(self.payload.clone()).ok()
        } else {
            None
        }
    }

    /// Try to extract the payload as a grid status update.
    #[must_use]
    pub fn as_grid_status(&self) -> Option<GridStatus> {
        if self.kind == "grid_status" {
            serde_json::from_value(self.payload.clone()).ok()
        } else {
            None
        }
    }

    /// Try to extract the payload as a log entry.
    #[must_use]
    pub fn as_log_entry(&self) -> Option<LogEntry> {
        if self.kind == "log" {
            serde_json::from_value(self.payload.clone()).ok()
        } else {
            None
        }
    }
}

/// One measurement pushed by a sensor.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SensorReading {
    /// Identifier of the sensor that produced the reading
    #[serde(default)]
    pub sensor_id: Option<String>,
    /// Measured value
    pub value: f64,
    /// Unit of measure (e.g., `A`, `kW`)
    #[serde(default)]
    pub unit: Option<String>,
    /// When the measurement was taken
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Aggregate state of the monitored grid.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct GridStatus {
    /// Battery state of charge, 0.0 to 1.0
    #[serde(default)]
    pub battery_soc: Option<f64>,
    /// Current solar production in kW
    #[serde(default)]
    pub solar_kw: Option<f64>,
    /// Current load in kW
    #[serde(default)]
    pub load_kw: Option<f64>,
}

/// Human-readable event emitted by the telemetry source.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LogEntry {
    /// Severity label (e.g., `info`, `warning`)
    #[serde(default = "default_level")]
    pub level: String,
    /// Log text
    pub message: String,
    /// When the event was recorded
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

fn default_level() -> String {
    "info".to_owned()
}

/// Outbound requests to the telemetry source.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    /// Start receiving a named feed
    Subscribe {
        /// Feed identifier (e.g., `sensors`, `grid`)
        feed: String,
    },
    /// Stop receiving a named feed
    Unsubscribe {
        /// Feed identifier
        feed: String,
    },
}

/// Decode raw frame bytes into telemetry messages.
///
/// Handles single objects and arrays of messages. Empty or whitespace-only
/// frames (server keepalives) decode to nothing.
pub fn parse_messages(bytes: &[u8]) -> crate::Result<Vec<TelemetryMessage>> {
    let trimmed = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .map_or(&[][..], |start| &bytes[start..]);

    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    let value: Value = serde_json::from_slice(trimmed)?;
    match value {
        Value::Array(items) => items.into_iter().map(deserialize_with_warnings).collect(),
        object => Ok(vec![deserialize_with_warnings(object)?]),
    }
}
