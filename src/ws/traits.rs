//! Core traits for generic WebSocket infrastructure.

use std::error::Error as StdError;
use std::fmt::Debug;

use serde::de::DeserializeOwned;

/// Frame decoder trait for converting raw frame bytes into typed messages.
///
/// Abstracts the wire format away from the connection machinery. A decoder
/// may filter: returning an empty vec drops the frame without error.
///
/// # Example
///
/// ```ignore
/// struct JsonDecoder;
///
/// impl FrameDecoder<MyMessage> for JsonDecoder {
///     fn decode(&self, bytes: &[u8]) -> crate::Result<Vec<MyMessage>> {
///         let msg: MyMessage = serde_json::from_slice(bytes)?;
///         Ok(vec![msg])
///     }
/// }
/// ```
pub trait FrameDecoder<M: DeserializeOwned>: Send + Sync + 'static {
    /// Decode one inbound frame into zero or more messages.
    ///
    /// Handles both single objects and arrays of messages. Errors are
    /// reported by the dispatcher and never terminate the connection.
    fn decode(&self, bytes: &[u8]) -> crate::Result<Vec<M>>;
}

/// Callback-style consumer of connection lifecycle and message events.
///
/// All methods default to no-ops so implementors register only the hooks
/// they care about. Callbacks run on the connection driver task, in
/// attachment order; a returned error is reported for that subscriber alone
/// and does not stop delivery to the others.
pub trait Subscriber<M: Debug>: Send + 'static {
    /// Invoked once each time a connection is established.
    fn on_open(&mut self) -> Result<(), Box<dyn StdError + Send + Sync>> {
        Ok(())
    }

    /// Invoked for every successfully decoded inbound message.
    fn on_message(&mut self, message: &M) -> Result<(), Box<dyn StdError + Send + Sync>> {
        let _ = message;
        Ok(())
    }

    /// Invoked once each time the connection closes, expectedly or not.
    fn on_close(&mut self) -> Result<(), Box<dyn StdError + Send + Sync>> {
        Ok(())
    }

    /// Invoked when the connection reports a failure condition.
    fn on_error(&mut self, error: &super::WsError) -> Result<(), Box<dyn StdError + Send + Sync>> {
        let _ = error;
        Ok(())
    }
}
