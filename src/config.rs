//! Engine configuration and constants.
//!
//! This module defines the tunable parameters of the transfer driver:
//! tick cadence, stall detection, and the default identity header.

use std::time::Duration;

/// Cadence of the driver thread's pump/sweep loop.
///
/// Each tick drains new submissions, reaps completed transfers, and sweeps
/// the in-flight set for cancellation and stall conditions. 10 ms keeps
/// cancellation latency low without burning a core on an idle engine.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(10);

/// How long a transfer may go without a single header or body byte before
/// the driver force-terminates it.
///
/// Measured from the last observed byte of activity, not from submission.
/// Connection establishment is governed separately by the per-request
/// timeout.
pub const DEFAULT_STALL_TIMEOUT: Duration = Duration::from_secs(60);

/// Default User-Agent sent with every request unless the caller overrides
/// it via `Request::header`.
pub const DEFAULT_USER_AGENT: &str = concat!("courier/", env!("CARGO_PKG_VERSION"));

/// Chunk size used when pulling bytes from a caller-supplied upload stream.
pub const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// Driver configuration.
///
/// `EngineConfig::default()` matches the documented constants; individual
/// fields can be adjusted before constructing an [`Engine`](crate::Engine).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Driver loop cadence. See [`DEFAULT_TICK_INTERVAL`].
    pub tick_interval: Duration,
    /// Driver-global stall timeout. See [`DEFAULT_STALL_TIMEOUT`].
    ///
    /// This is a liveness guard for the engine as a whole, not a
    /// request-level knob; per-request configuration is intentionally
    /// limited to the connection-phase timeout.
    pub stall_timeout: Duration,
    /// User-Agent header applied to every transfer.
    pub user_agent: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            tick_interval: DEFAULT_TICK_INTERVAL,
            stall_timeout: DEFAULT_STALL_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_constants() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.tick_interval, DEFAULT_TICK_INTERVAL);
        assert_eq!(cfg.stall_timeout, DEFAULT_STALL_TIMEOUT);
        assert_eq!(cfg.user_agent, DEFAULT_USER_AGENT);
    }
}
