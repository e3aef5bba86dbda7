//! Pool configuration.

use std::time::Duration;

/// Default idle TTL before a runtime is swept (20 minutes).
const DEFAULT_IDLE_TTL: Duration = Duration::from_secs(20 * 60);

/// Sweep interval bounds: the timer never fires more often than once a
/// second and never less often than once a minute, regardless of TTL.
const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);
const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Configuration for the agent pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// How long a runtime may sit unused before it is disposed.
    pub idle_ttl: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            idle_ttl: DEFAULT_IDLE_TTL,
        }
    }
}

impl PoolConfig {
    /// Creates a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the idle TTL.
    pub fn with_idle_ttl(mut self, idle_ttl: Duration) -> Self {
        self.idle_ttl = idle_ttl;
        self
    }

    /// Returns the sweep timer interval: the idle TTL clamped to
    /// [1s, 60s].
    pub fn sweep_interval(&self) -> Duration {
        self.idle_ttl.clamp(MIN_SWEEP_INTERVAL, MAX_SWEEP_INTERVAL)
    }
}
