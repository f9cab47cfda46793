//! Ownership wrapper for one physical WebSocket connection.
//!
//! A [`Transport`] wraps exactly one underlying stream for its whole life.
//! Native tungstenite events are translated into the small event vocabulary
//! the connection state machine consumes, and construction failure surfaces
//! through the same open error path as a mid-session drop, so the state
//! machine has a single incoming-failure signal.

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt as _, StreamExt as _};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message, Utf8Bytes};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::error::WsError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Lifecycle events raised by a live transport.
///
/// `Closed` and `Failed` are terminal: once either is returned, this
/// transport instance emits nothing further.
#[derive(Debug)]
pub(crate) enum TransportEvent {
    /// One textual frame received from the peer
    Frame(Utf8Bytes),
    /// The peer closed the connection or the stream ended
    Closed,
    /// The connection failed mid-session
    Failed(tungstenite::Error),
}

pub(crate) struct Transport {
    write: SplitSink<WsStream, Message>,
    read: SplitStream<WsStream>,
    /// Set once a terminal event has been returned; suppresses further reads
    finished: bool,
}

impl Transport {
    /// Open a new physical connection to `endpoint`.
    pub(crate) async fn open(endpoint: &str) -> Result<Self, tungstenite::Error> {
        let (ws_stream, _) = connect_async(endpoint).await?;
        let (write, read) = ws_stream.split();
        Ok(Self {
            write,
            read,
            finished: false,
        })
    }

    /// Wait for the next lifecycle event.
    ///
    /// Binary frames and ping/pong control frames are skipped; the wire
    /// contract is textual frames only.
    pub(crate) async fn next_event(&mut self) -> TransportEvent {
        if self.finished {
            return TransportEvent::Closed;
        }

        loop {
            match self.read.next().await {
                Some(Ok(Message::Text(text))) => return TransportEvent::Frame(text),
                Some(Ok(Message::Close(_))) | None => {
                    self.finished = true;
                    return TransportEvent::Closed;
                }
                Some(Ok(_)) => {
                    // Ignore binary frames and unsolicited control frames.
                }
                Some(Err(e)) => {
                    self.finished = true;
                    return TransportEvent::Failed(e);
                }
            }
        }
    }

    /// Send one textual frame to the peer.
    pub(crate) async fn send_text(&mut self, text: String) -> Result<(), WsError> {
        if self.finished {
            return Err(WsError::NotConnected);
        }
        self.write
            .send(Message::Text(text.into()))
            .await
            .map_err(WsError::Connection)
    }

    /// Close the connection, sending a close frame on a best-effort basis.
    /// No further events are emitted afterwards.
    pub(crate) async fn close(&mut self) {
        self.finished = true;
        _ = self.write.close().await;
    }
}
