//! Manual connection lifecycle walkthrough.
//!
//! Demonstrates the explicit lifecycle surface: idempotent `connect()`,
//! state observation, `disconnect()` cancelling retries, and `reconnect()`
//! reviving an exhausted manager.
//!
//! ```sh
//! RUST_LOG=info cargo run --example lifecycle
//! ```

use std::time::Duration;

use tokio::time::sleep;
use tracing::info;
use twinlink::telemetry::{Client, DEFAULT_ENDPOINT};
use twinlink::ws::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let endpoint = std::env::var("TWINLINK_WS_URL").unwrap_or_else(|_| DEFAULT_ENDPOINT.to_owned());

    // Small retry budget so exhaustion is quick to observe against a
    // backend that is not running.
    let mut config = Config::default();
    config.reconnect.base_interval = Duration::from_millis(500);
    config.reconnect.max_attempts = 3;

    let client = Client::new(&endpoint, config)?;

    info!(state = ?client.connection_state(), "freshly constructed");

    client.connect();
    client.connect(); // no-op: already connecting
    sleep(Duration::from_secs(1)).await;
    info!(connected = client.is_connected(), state = ?client.connection_state());

    if client.is_connected() {
        info!(last = ?client.last_message(), "connected; latest message");

        client.disconnect();
        sleep(Duration::from_millis(200)).await;
        info!(state = ?client.connection_state(), "after disconnect");

        client.reconnect();
        sleep(Duration::from_secs(1)).await;
        info!(connected = client.is_connected(), "after manual reconnect");
    } else {
        // Watch the bounded retry cycle run out, then revive it.
        sleep(Duration::from_secs(4)).await;
        info!(state = ?client.connection_state(), "after retry budget spent");

        client.reconnect();
        sleep(Duration::from_secs(1)).await;
        info!(connected = client.is_connected(), "after manual reconnect");
    }

    client.disconnect();
    Ok(())
}
