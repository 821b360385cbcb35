use crate::history::DEFAULT_HISTORY_CAPACITY;
use std::time::Duration;

/// Tunables for the network manager and server roster
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkConfig {
    /// Upper bound on how long a worker waits before re-checking whether it
    /// should stop
    pub poll_interval_ms: u64,
    /// Samples kept per server in the latency history
    pub latency_history_capacity: usize,
    /// Pending probes older than this are dropped at the next probe round
    pub probe_timeout_ms: u64,
}

impl NetworkConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            latency_history_capacity: DEFAULT_HISTORY_CAPACITY,
            probe_timeout_ms: 10_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = NetworkConfig::default();
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.probe_timeout(), Duration::from_secs(10));
        assert_eq!(config.latency_history_capacity, 100);
    }

    #[test]
    fn test_zero_poll_interval_is_clamped() {
        let config = NetworkConfig {
            poll_interval_ms: 0,
            ..NetworkConfig::default()
        };
        assert_eq!(config.poll_interval(), Duration::from_millis(1));
    }
}
