//! Core WebSocket infrastructure.
//!
//! This module provides generic connection management that can be
//! specialized for different telemetry services using traits and the
//! strategy pattern.
//!
//! # Architecture
//!
//! - [`ConnectionManager`]: Generic connection handler with automatic,
//!   attempt-bounded reconnection
//! - [`LinearBackoff`]: Deterministic linear-capped retry policy
//! - [`FrameDecoder`]: Trait for decoding inbound frames
//! - [`Subscriber`]: Callback-style consumer of lifecycle and message events
//!
//! # Example
//!
//! ```ignore
//! // Define your message type
//! #[derive(Clone, Debug, Deserialize)]
//! struct MyMessage { /* ... */ }
//!
//! let connection = ConnectionManager::new(endpoint, config, MyDecoder)?;
//! connection.connect();
//! ```

pub mod backoff;
pub mod config;
pub mod connection;
pub(crate) mod dispatch;
pub mod error;
pub mod traits;
pub(crate) mod transport;

pub use backoff::LinearBackoff;
pub use connection::{ConnectionManager, ConnectionState};
#[expect(
    clippy::module_name_repetitions,
    reason = "WsError includes module name for clarity when used outside this module"
)]
pub use error::WsError;
pub use traits::*;
