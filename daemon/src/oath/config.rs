//! Tunable configuration for the OATH device subsystem (SPEC_FULL §10.3, §6).

use crate::constants::{
    DEFAULT_CREDENTIAL_UPDATE_WAIT_MS_ON_DESTROY, DEFAULT_DEVICE_CONNECT_TIMEOUT_MS,
    DEFAULT_DEVICE_RECONNECT_INITIAL_DELAY_MS, DEFAULT_PCSC_RATE_LIMIT_MS,
    DEFAULT_READER_POLL_INTERVAL_MS, DEFAULT_WORKER_POOL_MAX_THREADS, MAX_WORKER_POOL_THREADS,
    MIN_WORKER_POOL_THREADS,
};
use crate::prelude::*;

/// The six configuration options the core recognizes (§6).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct OathConfig {
    /// Minimum spacing in ms between APDUs on a single session. `0` disables
    /// rate limiting.
    pub pcsc_rate_limit_ms: u64,
    /// Worker-pool thread count, clamped into `[1, 16]`.
    pub worker_pool_max_threads: usize,
    /// Reader-monitor poll interval in ms.
    pub reader_poll_interval_ms: u64,
    /// Platform-connect deadline in ms.
    pub device_connect_timeout_ms: u64,
    /// Reconnect coordinator's initial delay before its single attempt, in ms.
    pub device_reconnect_initial_delay_ms: u64,
    /// How long device destruction waits for an in-flight credential-cache
    /// refresh to finish, in ms.
    pub credential_update_wait_ms_on_destroy: u64,
}

impl Default for OathConfig {
    fn default() -> Self {
        Self {
            pcsc_rate_limit_ms: DEFAULT_PCSC_RATE_LIMIT_MS,
            worker_pool_max_threads: DEFAULT_WORKER_POOL_MAX_THREADS,
            reader_poll_interval_ms: DEFAULT_READER_POLL_INTERVAL_MS,
            device_connect_timeout_ms: DEFAULT_DEVICE_CONNECT_TIMEOUT_MS,
            device_reconnect_initial_delay_ms: DEFAULT_DEVICE_RECONNECT_INITIAL_DELAY_MS,
            credential_update_wait_ms_on_destroy: DEFAULT_CREDENTIAL_UPDATE_WAIT_MS_ON_DESTROY,
        }
    }
}

impl OathConfig {
    /// Clamps `worker_pool_max_threads` into `[1, 16]`, warning rather than
    /// panicking when a caller-supplied value falls outside that range.
    pub fn normalized(mut self) -> Self {
        let clamped = self.worker_pool_max_threads.clamp(MIN_WORKER_POOL_THREADS, MAX_WORKER_POOL_THREADS);
        if clamped != self.worker_pool_max_threads {
            warn!(
                requested = self.worker_pool_max_threads,
                clamped, "worker_pool_max_threads out of range, clamping"
            );
            self.worker_pool_max_threads = clamped;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_documented_defaults() {
        let config = OathConfig::default();
        assert_eq!(config.pcsc_rate_limit_ms, 0);
        assert_eq!(config.worker_pool_max_threads, 4);
        assert_eq!(config.reader_poll_interval_ms, 500);
        assert_eq!(config.device_connect_timeout_ms, 2000);
        assert_eq!(config.device_reconnect_initial_delay_ms, 10);
        assert_eq!(config.credential_update_wait_ms_on_destroy, 5000);
    }

    #[test]
    fn normalized_clamps_out_of_range_thread_count() {
        let config = OathConfig { worker_pool_max_threads: 64, ..OathConfig::default() }.normalized();
        assert_eq!(config.worker_pool_max_threads, 16);
        let config = OathConfig { worker_pool_max_threads: 0, ..OathConfig::default() }.normalized();
        assert_eq!(config.worker_pool_max_threads, 1);
    }
}
