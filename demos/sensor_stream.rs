//! Live sensor telemetry stream consumer.
//!
//! Connects to a telemetry backend and prints decoded sensor readings as
//! they arrive, alongside the raw message stream.
//!
//! Run with tracing enabled:
//! ```sh
//! RUST_LOG=info cargo run --example sensor_stream
//! ```

use std::time::Duration;

use futures::StreamExt as _;
use tokio::time::timeout;
use tracing::{debug, info};
use twinlink::telemetry::{Client, ClientCommand, DEFAULT_ENDPOINT};
use twinlink::ws::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let endpoint = std::env::var("TWINLINK_WS_URL").unwrap_or_else(|_| DEFAULT_ENDPOINT.to_owned());
    let client = Client::new(&endpoint, Config::default())?;

    info!(%endpoint, state = ?client.connection_state(), "starting");
    client.connect();

    // Ask for the sensor feed once connected; re-sent manually on demand
    let subscribe = ClientCommand::Subscribe {
        feed: "sensors".to_owned(),
    };
    if let Err(e) = client.send_command(&subscribe) {
        debug!(error = %e, "subscribe will be retried once connected");
    }

    let readings = client.readings();
    let mut readings = Box::pin(readings);

    let mut count = 0;
    while let Ok(Some(result)) = timeout(Duration::from_secs(10), readings.next()).await {
        match result {
            Ok(reading) => {
                info!(
                    sensor = reading.sensor_id.as_deref().unwrap_or("unknown"),
                    value = reading.value,
                    unit = reading.unit.as_deref().unwrap_or(""),
                );
                count += 1;
                if count >= 20 {
                    break;
                }
            }
            Err(e) => debug!(error = %e),
        }
    }
    info!(received = count);

    client.disconnect();
    Ok(())
}
