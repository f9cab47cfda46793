use async_stream::try_stream;
use futures::Stream;
use futures::StreamExt as _;
use tokio::sync::broadcast::error::RecvError;

use super::types::{ClientCommand, SensorReading, TelemetryMessage, parse_messages};
use crate::Result;
use crate::ws::config::Config;
use crate::ws::connection::ConnectionState;
use crate::ws::traits::Subscriber;
use crate::ws::{ConnectionManager, FrameDecoder, WsError};

/// Endpoint of a locally running telemetry backend.
pub const DEFAULT_ENDPOINT: &str = "ws://localhost:8000/ws/sensors/";

/// Plain JSON decoder for telemetry frames, no filtering.
#[derive(Debug, Clone)]
pub struct JsonDecoder;

impl FrameDecoder<TelemetryMessage> for JsonDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<Vec<TelemetryMessage>> {
        parse_messages(bytes)
    }
}

/// Telemetry client for streaming live sensor data.
///
/// Wraps a [`ConnectionManager`] with the telemetry wire types and a
/// stream-oriented consumption surface. Cloning is cheap; all clones share
/// one connection.
///
/// # Examples
///
/// ```rust, no_run
/// use twinlink::telemetry::Client;
/// use futures::StreamExt;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let client = Client::default();
///     client.connect();
///
///     let stream = client.readings();
///     let mut stream = Box::pin(stream);
///
///     while let Some(reading) = stream.next().await {
///         println!("Reading: {:?}", reading?);
///     }
///
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct Client {
    connection: ConnectionManager<TelemetryMessage, JsonDecoder>,
}

impl Default for Client {
    fn default() -> Self {
        Self::new(DEFAULT_ENDPOINT, Config::default())
            .expect("telemetry client with default endpoint should succeed")
    }
}

impl Client {
    /// Create a new telemetry client with the specified endpoint and configuration.
    ///
    /// The client starts idle; call [`connect`](Self::connect) to open the
    /// connection.
    pub fn new(endpoint: &str, config: Config) -> Result<Self> {
        let connection = ConnectionManager::new(endpoint.to_owned(), config, JsonDecoder)?;
        Ok(Self { connection })
    }

    /// Open the connection. No-op if already connecting or connected.
    pub fn connect(&self) {
        self.connection.connect();
    }

    /// Close the connection and suppress automatic reconnection.
    pub fn disconnect(&self) {
        self.connection.disconnect();
    }

    /// Reset the retry budget and connect immediately.
    pub fn reconnect(&self) {
        self.connection.reconnect();
    }

    /// Whether the connection is currently open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Get the current connection state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// The most recently received telemetry message, if any.
    ///
    /// Useful for consumers that attach after the stream started, like a
    /// dashboard panel mounting mid-session.
    #[must_use]
    pub fn last_message(&self) -> Option<TelemetryMessage> {
        self.connection.last_message()
    }

    /// Send a command to the telemetry source.
    ///
    /// Reports [`WsError::NotConnected`] while the connection is not open;
    /// commands are never queued.
    pub fn send_command(&self, command: &ClientCommand) -> Result<()> {
        self.connection.send(command)
    }

    /// Attach a callback subscriber for lifecycle and message events.
    pub fn attach<S: Subscriber<TelemetryMessage>>(&self, subscriber: S) {
        self.connection.attach(subscriber);
    }

    /// Stream every telemetry message as it arrives.
    ///
    /// Each call returns an independent stream. A slow consumer that falls
    /// more than the channel capacity behind yields a
    /// [`WsError::Lagged`] error and then continues with live messages.
    pub fn messages(&self) -> impl Stream<Item = Result<TelemetryMessage>> + use<> {
        let mut rx = self.connection.subscribe();

        try_stream! {
            loop {
                match rx.recv().await {
                    Ok(msg) => yield msg,
                    Err(RecvError::Lagged(count)) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!("telemetry stream lagged, missed {count} messages");
                        Err(WsError::Lagged { count })?;
                    }
                    Err(RecvError::Closed) => {
                        break;
                    }
                }
            }
        }
    }

    /// Stream only sensor readings, skipping other message kinds.
    pub fn readings(&self) -> impl Stream<Item = Result<SensorReading>> + use<> {
        self.messages().filter_map(|msg_result| async move {
            match msg_result {
                Ok(msg) => msg.as_sensor_reading().map(Ok),
                Err(e) => Some(Err(e)),
            }
        })
    }
}
