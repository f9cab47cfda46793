#![expect(
    clippy::module_name_repetitions,
    reason = "Configuration types intentionally mirror the module name for clarity"
)]

use std::time::Duration;

use super::backoff::LinearBackoff;

const DEFAULT_BASE_INTERVAL_DURATION: Duration = Duration::from_millis(3000);
const DEFAULT_CAP_MULTIPLIER: u32 = 5;
const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Configuration for WebSocket client behavior.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether the connection automatically reconnects after a drop
    pub auto_reconnect: bool,
    /// Reconnection strategy configuration
    pub reconnect: ReconnectConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Configuration for automatic reconnection behavior.
///
/// The retry delay ramps linearly with the attempt number and is capped:
/// `base_interval * min(attempt, cap_multiplier)`. This mirrors the timing
/// contract of the telemetry sources this client was built against, not
/// classic exponential backoff.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Delay unit for the first retry; subsequent retries are multiples of it
    pub base_interval: Duration,
    /// Attempt number at which the retry delay stops growing
    pub cap_multiplier: u32,
    /// Maximum number of consecutive failed attempts before giving up
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_interval: DEFAULT_BASE_INTERVAL_DURATION,
            cap_multiplier: DEFAULT_CAP_MULTIPLIER,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl From<ReconnectConfig> for LinearBackoff {
    fn from(config: ReconnectConfig) -> Self {
        Self::new(
            config.base_interval,
            config.cap_multiplier,
            config.max_attempts,
        )
    }
}
