use std::time::Duration;

/// Tunables for the reference game server
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub max_clients: usize,
    /// Clients silent for longer than this are dropped
    pub client_timeout_ms: u64,
    /// How often the timeout sweep runs
    pub sweep_interval_ms: u64,
    /// Reported in ping responses instead of the real client count
    pub fixed_player_count: Option<u32>,
    /// Artificial delay before answering a ping
    pub fake_ping_ms: u64,
}

impl ServerConfig {
    pub fn client_timeout(&self) -> Duration {
        Duration::from_millis(self.client_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }

    pub fn fake_ping(&self) -> Duration {
        Duration::from_millis(self.fake_ping_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_clients: 32,
            client_timeout_ms: 5000,
            sweep_interval_ms: 1000,
            fixed_player_count: None,
            fake_ping_ms: 0,
        }
    }
}
