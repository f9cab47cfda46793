#![expect(
    clippy::module_name_repetitions,
    reason = "Connection types expose their domain in the name for clarity"
)]

use std::fmt::Debug;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use backoff::backoff::Backoff as _;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::sleep;
use url::Url;

use super::backoff::LinearBackoff;
use super::config::Config;
use super::dispatch::MessageDispatcher;
use super::error::WsError;
use super::traits::{FrameDecoder, Subscriber};
use super::transport::{Transport, TransportEvent};
use crate::{Result, error::Error};

/// Broadcast channel capacity for incoming messages.
const BROADCAST_CAPACITY: usize = 1024;

/// Connection state tracking.
///
/// Exactly one state is live per manager at a time; all transitions are
/// serialized on the driver task.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Created but never asked to connect
    Idle,
    /// Attempting to connect (initial dial or scheduled retry)
    Connecting,
    /// Successfully connected
    Open {
        /// When the connection was established
        since: Instant,
    },
    /// Shutdown requested, transport closing
    Closing,
    /// Not connected; either between retries, terminal, or manually closed
    Closed,
}

impl ConnectionState {
    /// Check if the connection is currently active.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Open { .. })
    }
}

/// Manages WebSocket connection lifecycle, reconnection, and dispatch.
///
/// This generic connection manager handles all connection concerns:
/// - Establishing connections on demand, with idempotent `connect()`
/// - Automatic reconnection with linear-capped, attempt-bounded backoff
/// - Decoding inbound frames and fanning them out to subscribers
/// - Retaining the last decoded message for late observers
///
/// The handle is cheap to clone; all clones drive the same connection. The
/// underlying transport lives on a spawned driver task and is released when
/// the last handle is dropped.
///
/// # Type Parameters
///
/// - `M`: Message type that implements [`DeserializeOwned`] among other "helper" types
/// - `P`: Decoder type that implements [`FrameDecoder<M>`]
///
/// # Example
///
/// ```ignore
/// let connection = ConnectionManager::new(
///     "wss://example.com/ws/sensors/".to_owned(),
///     Config::default(),
///     JsonDecoder,
/// )?;
/// connection.connect();
///
/// let mut rx = connection.subscribe();
/// while let Ok(msg) = rx.recv().await {
///     println!("Received: {:?}", msg);
/// }
/// ```
#[derive(Debug, Clone)]
pub struct ConnectionManager<M, P>
where
    M: DeserializeOwned + Debug + Clone + Send + Sync + 'static,
    P: FrameDecoder<M>,
{
    /// Command channel into the driver task
    command_tx: mpsc::UnboundedSender<Command<M>>,
    /// Watch channel receiver for state changes
    state_rx: watch::Receiver<ConnectionState>,
    /// Most recently decoded message, kept for consumers that attach late
    last_message_rx: watch::Receiver<Option<M>>,
    /// Broadcast sender for incoming messages
    broadcast_tx: broadcast::Sender<M>,
    /// Mirrors the driver's retry gate so `disconnect()` suppresses
    /// scheduled retries before the command is even dequeued
    should_reconnect: Arc<AtomicBool>,
    /// Set while a disconnect is pending; the driver re-checks it between
    /// a completed dial and the open notification
    disconnect_requested: Arc<AtomicBool>,
    /// Phantom data for unused type parameters
    _phantom: PhantomData<P>,
}

enum Command<M> {
    Connect,
    Reconnect,
    Disconnect,
    Send(String),
    Attach(Box<dyn Subscriber<M>>),
}

impl<M, P> ConnectionManager<M, P>
where
    M: DeserializeOwned + Debug + Clone + Send + Sync + 'static,
    P: FrameDecoder<M>,
{
    /// Create a new connection manager and spawn its driver task.
    ///
    /// Construction validates the endpoint but does not connect; call
    /// [`connect`](Self::connect) to open the connection.
    pub fn new(endpoint: String, config: Config, decoder: P) -> Result<Self> {
        let url = Url::parse(&endpoint)?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(Error::validation(format!(
                "unsupported scheme `{}`: endpoint must use ws or wss",
                url.scheme()
            )));
        }

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let (last_message_tx, last_message_rx) = watch::channel(None);
        let (broadcast_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        let should_reconnect = Arc::new(AtomicBool::new(config.auto_reconnect));
        let disconnect_requested = Arc::new(AtomicBool::new(false));

        let driver = Driver {
            endpoint,
            backoff: config.reconnect.into(),
            command_rx,
            state_tx,
            dispatcher: MessageDispatcher::new(decoder, broadcast_tx.clone(), last_message_tx),
            should_reconnect: Arc::clone(&should_reconnect),
            disconnect_requested: Arc::clone(&disconnect_requested),
        };

        tokio::spawn(driver.run());

        Ok(Self {
            command_tx,
            state_rx,
            last_message_rx,
            broadcast_tx,
            should_reconnect,
            disconnect_requested,
            _phantom: PhantomData,
        })
    }

    /// Open the connection.
    ///
    /// A no-op while the state is already `Connecting` or `Open`, so calling
    /// this repeatedly never creates a second transport to the same endpoint.
    pub fn connect(&self) {
        self.disconnect_requested.store(false, Ordering::SeqCst);
        _ = self.command_tx.send(Command::Connect);
    }

    /// Close the connection and permanently suppress automatic retries.
    ///
    /// Safe to call from any state and idempotent. Any scheduled reconnect
    /// is cancelled and can no longer fire once this call returns, and no
    /// subscriber callback fires afterwards; both gates are flipped
    /// synchronously, ahead of the driver seeing the command.
    pub fn disconnect(&self) {
        self.disconnect_requested.store(true, Ordering::SeqCst);
        self.should_reconnect.store(false, Ordering::SeqCst);
        _ = self.command_tx.send(Command::Disconnect);
    }

    /// Re-enable automatic reconnection, reset the attempt counter, and
    /// connect immediately, bypassing any backoff delay.
    ///
    /// This is the manual escape hatch after retries were exhausted or after
    /// [`disconnect`](Self::disconnect).
    pub fn reconnect(&self) {
        self.disconnect_requested.store(false, Ordering::SeqCst);
        self.should_reconnect.store(true, Ordering::SeqCst);
        _ = self.command_tx.send(Command::Reconnect);
    }

    /// Serialize `request` and send it as one textual frame.
    ///
    /// Reports [`WsError::NotConnected`] when the connection is not open.
    /// Messages are never queued for later delivery; callers re-send once
    /// the connection is restored.
    pub fn send<R: Serialize>(&self, request: &R) -> Result<()> {
        if !self.state_rx.borrow().is_connected() {
            return Err(WsError::NotConnected.into());
        }
        let json = serde_json::to_string(request)?;
        self.command_tx
            .send(Command::Send(json))
            .map_err(|_e| WsError::ConnectionClosed)?;
        Ok(())
    }

    /// Whether the connection is currently open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state_rx.borrow().is_connected()
    }

    /// Get the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// The most recently decoded inbound message, if any.
    ///
    /// Retained across connection drops so a consumer that attaches after
    /// the last frame arrived still sees it.
    #[must_use]
    pub fn last_message(&self) -> Option<M> {
        self.last_message_rx.borrow().clone()
    }

    /// Subscribe to incoming messages.
    ///
    /// Each call returns a new independent receiver. Multiple subscribers can
    /// receive messages concurrently without blocking each other.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<M> {
        self.broadcast_tx.subscribe()
    }

    /// Subscribe to connection state changes.
    ///
    /// Returns a receiver that notifies when the connection state changes.
    /// This is useful for detecting reconnections and re-establishing
    /// server-side subscriptions.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Attach a callback subscriber.
    ///
    /// Subscribers run on the driver task in attachment order and stay
    /// registered for the life of the manager.
    pub fn attach<S: Subscriber<M>>(&self, subscriber: S) {
        _ = self.command_tx.send(Command::Attach(Box::new(subscriber)));
    }
}

/// Owns every piece of mutable connection state; runs on a spawned task.
///
/// All transitions execute to completion on the event that triggered them
/// before the next command or transport event is processed, which is what
/// makes external locking unnecessary.
struct Driver<M, P> {
    endpoint: String,
    backoff: LinearBackoff,
    command_rx: mpsc::UnboundedReceiver<Command<M>>,
    state_tx: watch::Sender<ConnectionState>,
    dispatcher: MessageDispatcher<M, P>,
    should_reconnect: Arc<AtomicBool>,
    disconnect_requested: Arc<AtomicBool>,
}

/// Why a connect/retry cycle ended.
enum SessionExit {
    /// Manual disconnect, or the retry gate was closed
    Stopped,
    /// The attempt budget ran out
    Exhausted,
    /// Every handle was dropped
    HandleDropped,
}

impl<M, P> Driver<M, P>
where
    M: DeserializeOwned + Debug + Clone + Send + Sync + 'static,
    P: FrameDecoder<M>,
{
    async fn run(mut self) {
        // Idle / Closed: nothing happens until a command arrives.
        while let Some(command) = self.command_rx.recv().await {
            match command {
                Command::Connect => {
                    if let SessionExit::HandleDropped = self.run_session().await {
                        return;
                    }
                }
                Command::Reconnect => {
                    self.backoff.reset();
                    if let SessionExit::HandleDropped = self.run_session().await {
                        return;
                    }
                }
                Command::Disconnect => {
                    // Already closed; idempotent.
                    self.backoff.reset();
                    _ = self.state_tx.send(ConnectionState::Closed);
                }
                Command::Attach(subscriber) => self.dispatcher.attach(subscriber),
                Command::Send(_) => {
                    // Not open; the handle already reported NotConnected.
                }
            }
        }
    }

    /// One connect/retry cycle: dial, pump the open connection, and retry
    /// with backoff until stopped, exhausted, or abandoned.
    async fn run_session(&mut self) -> SessionExit {
        loop {
            _ = self.state_tx.send(ConnectionState::Connecting);

            let transport = match self.dial().await {
                Ok(t) => t,
                Err(exit) => return exit,
            };

            if let Some(mut transport) = transport {
                self.backoff.reset();
                _ = self.state_tx.send(ConnectionState::Open {
                    since: Instant::now(),
                });
                #[cfg(feature = "tracing")]
                tracing::info!(endpoint = %self.endpoint, "WebSocket connected");
                self.dispatcher.notify_open();

                match self.pump(&mut transport).await {
                    Ok(drop_error) => {
                        // Clean close and dirty drop funnel into the same
                        // Closed state; the retry decision below is the one
                        // place that distinguishes nothing.
                        _ = self.state_tx.send(ConnectionState::Closed);
                        if !self.disconnect_requested.load(Ordering::SeqCst) {
                            if let Some(e) = drop_error {
                                #[cfg(feature = "tracing")]
                                tracing::warn!(error = %e, "WebSocket connection dropped");
                                self.dispatcher.notify_error(&e);
                            }
                            self.dispatcher.notify_close();
                        }
                    }
                    Err(exit) => return exit,
                }
            }

            // Single reconnect decision point for every path into Closed.
            if !self.should_reconnect.load(Ordering::SeqCst) {
                return SessionExit::Stopped;
            }

            let Some(delay) = self.backoff.next_backoff() else {
                let attempts = self.backoff.attempt();
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    attempts,
                    "max reconnection attempts reached; waiting for manual reconnect"
                );
                self.dispatcher
                    .notify_error(&WsError::RetriesExhausted { attempts });
                return SessionExit::Exhausted;
            };

            #[cfg(feature = "tracing")]
            tracing::info!(
                attempt = self.backoff.attempt(),
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "scheduling reconnect"
            );

            if let Err(exit) = self.wait_for_retry(delay).await {
                return exit;
            }

            // The gate may have been closed while we slept.
            if !self.should_reconnect.load(Ordering::SeqCst) {
                return SessionExit::Stopped;
            }
        }
    }

    /// Attempt one physical connection, processing commands while dialing.
    ///
    /// Returns `Ok(None)` when the dial failed and the failure has been
    /// reported; the caller falls through to the shared retry decision.
    async fn dial(&mut self) -> std::result::Result<Option<Transport>, SessionExit> {
        let endpoint = self.endpoint.clone();
        let connect_fut = Transport::open(&endpoint);
        tokio::pin!(connect_fut);

        loop {
            tokio::select! {
                result = &mut connect_fut => {
                    // A disconnect may have been requested while both the
                    // dial and the command were ready in the same round;
                    // the gate decides, not select ordering.
                    if self.disconnect_requested.load(Ordering::SeqCst) {
                        if let Ok(mut transport) = result {
                            transport.close().await;
                        }
                        self.finish_disconnect();
                        return Err(SessionExit::Stopped);
                    }
                    return match result {
                        Ok(transport) => Ok(Some(transport)),
                        Err(e) => {
                            #[cfg(feature = "tracing")]
                            tracing::warn!(error = %e, "unable to connect");
                            // Construction failure and mid-session drop share
                            // one failure signal into the state machine.
                            self.dispatcher.notify_error(&WsError::Connection(e));
                            _ = self.state_tx.send(ConnectionState::Closed);
                            self.dispatcher.notify_close();
                            Ok(None)
                        }
                    };
                }
                command = self.command_rx.recv() => {
                    match command {
                        None => return Err(SessionExit::HandleDropped),
                        Some(Command::Disconnect) => {
                            self.finish_disconnect();
                            return Err(SessionExit::Stopped);
                        }
                        // Already connecting: connect() is a no-op, and
                        // reconnect() only resets the attempt counter.
                        Some(Command::Connect) => {}
                        Some(Command::Reconnect) => self.backoff.reset(),
                        Some(Command::Attach(subscriber)) => self.dispatcher.attach(subscriber),
                        Some(Command::Send(_)) => {}
                    }
                }
            }
        }
    }

    /// Pump one open connection until it drops or is shut down.
    ///
    /// `Ok(drop_error)` means the transport ended on its own (with the error
    /// that killed it, if any); `Err` means the session itself is over.
    async fn pump(
        &mut self,
        transport: &mut Transport,
    ) -> std::result::Result<Option<WsError>, SessionExit> {
        loop {
            tokio::select! {
                event = transport.next_event() => {
                    if self.disconnect_requested.load(Ordering::SeqCst) {
                        _ = self.state_tx.send(ConnectionState::Closing);
                        transport.close().await;
                        self.backoff.reset();
                        _ = self.state_tx.send(ConnectionState::Closed);
                        return Err(SessionExit::Stopped);
                    }
                    match event {
                        TransportEvent::Frame(text) => {
                            #[cfg(feature = "tracing")]
                            tracing::trace!(%text, "received WebSocket text message");
                            self.dispatcher.dispatch(text.as_bytes());
                        }
                        TransportEvent::Closed => return Ok(None),
                        TransportEvent::Failed(e) => return Ok(Some(WsError::Connection(e))),
                    }
                }
                command = self.command_rx.recv() => {
                    match command {
                        None => {
                            transport.close().await;
                            return Err(SessionExit::HandleDropped);
                        }
                        Some(Command::Disconnect) => {
                            _ = self.state_tx.send(ConnectionState::Closing);
                            transport.close().await;
                            self.backoff.reset();
                            _ = self.state_tx.send(ConnectionState::Closed);
                            return Err(SessionExit::Stopped);
                        }
                        // connect() while open is a no-op; reconnect() while
                        // open only resets the attempt counter.
                        Some(Command::Connect) => {}
                        Some(Command::Reconnect) => self.backoff.reset(),
                        Some(Command::Attach(subscriber)) => self.dispatcher.attach(subscriber),
                        Some(Command::Send(text)) => {
                            if let Err(e) = transport.send_text(text).await {
                                return Ok(Some(e));
                            }
                        }
                    }
                }
            }
        }
    }

    /// Sleep out a retry delay, processing commands in the meantime.
    ///
    /// `Ok(())` proceeds to the next dial (possibly early, when a manual
    /// connect/reconnect arrives); `Err` ends the session.
    async fn wait_for_retry(&mut self, delay: std::time::Duration) -> std::result::Result<(), SessionExit> {
        let retry_timer = sleep(delay);
        tokio::pin!(retry_timer);

        loop {
            tokio::select! {
                () = &mut retry_timer => return Ok(()),
                command = self.command_rx.recv() => {
                    match command {
                        None => return Err(SessionExit::HandleDropped),
                        Some(Command::Disconnect) => {
                            self.finish_disconnect();
                            return Err(SessionExit::Stopped);
                        }
                        Some(Command::Reconnect) => {
                            self.backoff.reset();
                            return Ok(());
                        }
                        // A manual connect bypasses the remaining wait.
                        Some(Command::Connect) => return Ok(()),
                        Some(Command::Attach(subscriber)) => self.dispatcher.attach(subscriber),
                        Some(Command::Send(_)) => {}
                    }
                }
            }
        }
    }

    /// Manual shutdown with no live transport: reset the attempt counter
    /// and settle in Closed without firing callbacks.
    fn finish_disconnect(&mut self) {
        _ = self.state_tx.send(ConnectionState::Closing);
        self.backoff.reset();
        _ = self.state_tx.send(ConnectionState::Closed);
    }
}
