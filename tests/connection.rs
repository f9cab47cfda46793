#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests"
)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt as _, StreamExt as _};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message;
use twinlink::telemetry::{Client, JsonDecoder, TelemetryMessage};
use twinlink::ws::config::Config;
use twinlink::ws::{ConnectionManager, Subscriber, WsError};

/// Mock WebSocket server.
struct MockWsServer {
    addr: SocketAddr,
    /// Broadcast messages to ALL connected clients
    message_tx: broadcast::Sender<String>,
    /// Number of connections accepted so far
    accepted: Arc<AtomicUsize>,
}

impl MockWsServer {
    /// Start a mock WebSocket server on a random port.
    ///
    /// With `drop_clients` set, every accepted connection is closed right
    /// after the handshake, which exercises the reconnect path.
    async fn start(drop_clients: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (message_tx, _) = broadcast::channel::<String>(100);
        let accepted = Arc::new(AtomicUsize::new(0));

        let broadcast_tx = message_tx.clone();
        let accepted_counter = Arc::clone(&accepted);

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };

                let Ok(ws_stream) = tokio_tungstenite::accept_async(stream).await else {
                    continue;
                };

                accepted_counter.fetch_add(1, Ordering::SeqCst);

                let (mut write, mut read) = ws_stream.split();

                if drop_clients {
                    drop(write.close().await);
                    continue;
                }

                let mut msg_rx = broadcast_tx.subscribe();

                tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            msg = read.next() => {
                                match msg {
                                    Some(Ok(_)) => {}
                                    _ => break,
                                }
                            }
                            msg = msg_rx.recv() => {
                                match msg {
                                    Ok(text) => {
                                        if write.send(Message::Text(text.into())).await.is_err() {
                                            break;
                                        }
                                    }
                                    Err(_) => break,
                                }
                            }
                        }
                    }
                });
            }
        });

        Self {
            addr,
            message_tx,
            accepted,
        }
    }

    fn ws_url(&self) -> String {
        format!("ws://{}/ws/sensors/", self.addr)
    }

    /// Send a message to all connected clients.
    fn send(&self, message: &str) {
        drop(self.message_tx.send(message.to_owned()));
    }

    fn accepted_count(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

/// Shared record of subscriber callback invocations.
#[derive(Clone, Default)]
struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    fn push(&self, entry: String) {
        self.0.lock().unwrap().push(entry);
    }

    fn snapshot(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    fn count_of(&self, prefix: &str) -> usize {
        self.snapshot()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }
}

struct Recorder {
    log: EventLog,
}

impl Subscriber<TelemetryMessage> for Recorder {
    fn on_open(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.log.push("open".to_owned());
        Ok(())
    }

    fn on_message(
        &mut self,
        message: &TelemetryMessage,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.log.push(format!("msg:{}", message.payload["value"]));
        Ok(())
    }

    fn on_close(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.log.push("close".to_owned());
        Ok(())
    }

    fn on_error(&mut self, error: &WsError) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        match error {
            WsError::RetriesExhausted { attempts } => {
                self.log.push(format!("exhausted:{attempts}"));
            }
            _ => self.log.push("error".to_owned()),
        }
        Ok(())
    }
}

fn fast_config(max_attempts: u32) -> Config {
    let mut config = Config::default();
    config.reconnect.base_interval = Duration::from_millis(50);
    config.reconnect.max_attempts = max_attempts;
    config
}

/// Poll until `cond` holds or the timeout elapses.
async fn wait_until<F: Fn() -> bool>(cond: F, limit: Duration) -> bool {
    timeout(limit, async {
        while !cond() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .is_ok()
}

#[tokio::test]
async fn connects_and_dispatches_messages() {
    let server = MockWsServer::start(false).await;
    let client = Client::new(&server.ws_url(), fast_config(10)).unwrap();

    let log = EventLog::default();
    client.attach(Recorder { log: log.clone() });

    let messages = client.messages();
    let mut messages = Box::pin(messages);

    client.connect();
    assert!(
        wait_until(|| client.is_connected(), Duration::from_secs(2)).await,
        "client should connect to mock server"
    );

    server.send(r#"{"type": "telemetry", "value": 42}"#);

    let msg = timeout(Duration::from_secs(2), messages.next())
        .await
        .expect("message within deadline")
        .expect("stream open")
        .expect("decode succeeds");
    assert_eq!(msg.kind, "telemetry");
    assert_eq!(msg.payload["value"], 42);

    // Retained for late observers
    assert!(
        wait_until(
            || client.last_message().is_some_and(|m| m.payload["value"] == 42),
            Duration::from_secs(1)
        )
        .await,
        "last_message should hold the decoded frame"
    );

    assert_eq!(log.count_of("open"), 1);
    assert_eq!(log.count_of("msg:42"), 1);
}

#[tokio::test]
async fn connect_is_idempotent() {
    let server = MockWsServer::start(false).await;
    let client = Client::new(&server.ws_url(), fast_config(10)).unwrap();

    client.connect();
    client.connect();
    client.connect();

    assert!(wait_until(|| client.is_connected(), Duration::from_secs(2)).await);
    // Give any (incorrect) duplicate dials time to land
    sleep(Duration::from_millis(200)).await;

    assert_eq!(
        server.accepted_count(),
        1,
        "repeated connect() must not open a second transport"
    );
}

#[tokio::test]
async fn send_while_closed_reports_not_connected() {
    let server = MockWsServer::start(false).await;
    let client = Client::new(&server.ws_url(), fast_config(10)).unwrap();

    let command = twinlink::telemetry::ClientCommand::Subscribe {
        feed: "sensors".to_owned(),
    };
    let err = client.send_command(&command).expect_err("not connected");
    assert!(
        matches!(err.downcast_ref::<WsError>(), Some(WsError::NotConnected)),
        "expected NotConnected, got {err}"
    );
}

#[tokio::test]
async fn malformed_frame_is_nonfatal() {
    let server = MockWsServer::start(false).await;
    let client = Client::new(&server.ws_url(), fast_config(10)).unwrap();

    let messages = client.messages();
    let mut messages = Box::pin(messages);

    client.connect();
    assert!(wait_until(|| client.is_connected(), Duration::from_secs(2)).await);

    server.send("{ this is not json");
    server.send(r#"{"type": "telemetry", "value": 7}"#);

    let msg = timeout(Duration::from_secs(2), messages.next())
        .await
        .expect("well-formed frame still arrives")
        .unwrap()
        .unwrap();
    assert_eq!(msg.payload["value"], 7);

    assert!(client.is_connected(), "decode failure must not drop the connection");
    assert_eq!(
        client.last_message().unwrap().payload["value"],
        7,
        "malformed frame must not have touched last_message"
    );
}

#[tokio::test]
async fn disconnect_cancels_reconnection_and_callbacks() {
    let server = MockWsServer::start(true).await;
    let client = Client::new(&server.ws_url(), fast_config(10)).unwrap();

    let log = EventLog::default();
    client.attach(Recorder { log: log.clone() });

    client.connect();
    assert!(
        wait_until(|| server.accepted_count() >= 1, Duration::from_secs(2)).await,
        "first connection should be accepted"
    );

    client.disconnect();
    // Let the disconnect settle, then observe a quiet period longer than
    // several retry intervals.
    sleep(Duration::from_millis(100)).await;
    let accepted_after = server.accepted_count();
    let events_after = log.snapshot().len();

    sleep(Duration::from_millis(400)).await;

    assert_eq!(
        server.accepted_count(),
        accepted_after,
        "no reconnect may fire after disconnect()"
    );
    assert_eq!(
        log.snapshot().len(),
        events_after,
        "no callback may fire after disconnect()"
    );
    assert!(!client.is_connected());
}

#[tokio::test]
async fn disconnect_immediately_after_connect_fires_no_callbacks() {
    let server = MockWsServer::start(false).await;
    let client = Client::new(&server.ws_url(), fast_config(10)).unwrap();

    let log = EventLog::default();
    client.attach(Recorder { log: log.clone() });

    // The dial may already be in flight, or even complete, when the
    // disconnect lands; either way the subscriber must stay silent.
    client.connect();
    client.disconnect();

    sleep(Duration::from_millis(300)).await;

    assert_eq!(
        log.snapshot(),
        Vec::<String>::new(),
        "no callback may fire once disconnect() has returned"
    );
    assert!(!client.is_connected());
}

#[tokio::test]
async fn reconnects_after_server_drops() {
    let server = MockWsServer::start(true).await;
    // Budget of 2: without the attempt counter resetting on every
    // successful open, the client could reach at most 3 accepts
    // (the initial dial plus two retries) before giving up.
    let client = Client::new(&server.ws_url(), fast_config(2)).unwrap();

    let log = EventLog::default();
    client.attach(Recorder { log: log.clone() });

    client.connect();

    assert!(
        wait_until(|| server.accepted_count() >= 5, Duration::from_secs(5)).await,
        "each successful open must reset the attempt counter, keeping the budget fresh across drops"
    );
    assert!(log.count_of("open") >= 3, "each accept opens once");
    assert!(log.count_of("close") >= 2, "each drop closes once");
    assert_eq!(log.count_of("exhausted"), 0, "the budget must never run out while opens succeed");

    client.disconnect();
}

#[tokio::test]
async fn retries_stop_after_budget_and_resume_on_reconnect() {
    // Bind and immediately drop to get an address nothing listens on.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let endpoint = format!("ws://{addr}/ws/sensors/");
    let client = Client::new(&endpoint, fast_config(2)).unwrap();

    let log = EventLog::default();
    client.attach(Recorder { log: log.clone() });

    client.connect();

    assert!(
        wait_until(|| log.count_of("exhausted") == 1, Duration::from_secs(5)).await,
        "retry budget of 2 should exhaust and be reported once"
    );
    assert!(!client.is_connected());

    // Budget spent: 1 initial dial + 2 retries
    let dial_errors = log.count_of("error");
    assert_eq!(dial_errors, 3, "expected exactly initial dial plus two retries");

    // Quiet period: no further automatic dials
    sleep(Duration::from_millis(400)).await;
    assert_eq!(log.count_of("error"), dial_errors, "terminal state must stay quiet");
    assert_eq!(log.count_of("exhausted"), 1, "exhaustion is reported once");

    // Manual reconnect starts a fresh cycle with a reset counter: a full
    // second budget of dials, not a leftover of the spent one.
    client.reconnect();
    assert!(
        wait_until(|| log.count_of("exhausted") == 2, Duration::from_secs(5)).await,
        "the revived cycle must run its own budget to exhaustion"
    );
    assert_eq!(
        log.count_of("error"),
        dial_errors * 2,
        "reconnect() must grant a fresh budget: another initial dial plus two retries"
    );

    client.disconnect();
}

#[tokio::test]
async fn invalid_endpoint_is_rejected_at_construction() {
    let err = Client::new("https://example.com", Config::default())
        .expect_err("http scheme is not a telemetry endpoint");
    assert_eq!(err.kind(), twinlink::error::Kind::Validation);

    let err = Client::new("not a url", Config::default()).expect_err("unparseable");
    assert_eq!(err.kind(), twinlink::error::Kind::Validation);
}

#[tokio::test]
async fn generic_manager_works_with_custom_decoder() {
    let server = MockWsServer::start(false).await;

    let connection = ConnectionManager::new(server.ws_url(), fast_config(10), JsonDecoder).unwrap();
    let mut rx = connection.subscribe();

    connection.connect();
    assert!(
        wait_until(|| connection.is_connected(), Duration::from_secs(2)).await,
        "generic manager should connect"
    );

    server.send(r#"{"type": "grid_status", "battery_soc": 0.5}"#);

    let msg: TelemetryMessage = timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("message within deadline")
        .expect("broadcast open");
    assert_eq!(msg.as_grid_status().unwrap().battery_soc, Some(0.5));

    connection.disconnect();
}
