//! Typed client for the live sensor telemetry feed.
//!
//! Builds on the generic [`crate::ws`] infrastructure: a [`Client`] owns a
//! connection manager specialized to [`types::TelemetryMessage`] and exposes
//! streams of decoded readings to the consumer.

pub mod client;
pub mod types;

pub use client::{Client, DEFAULT_ENDPOINT, JsonDecoder};
pub use types::{ClientCommand, GridStatus, LogEntry, SensorReading, TelemetryMessage};
