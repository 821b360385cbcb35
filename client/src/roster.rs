//! Server roster and probe bookkeeping
//!
//! Holds every known game server together with the probes currently in
//! flight to it and the latency/player-count data resolved from their
//! responses. The network workers write to it; the UI reads snapshots.

use crate::error::{NetworkError, NetworkResult};
use crate::history::{LatencyHistory, LatencyStats, DEFAULT_HISTORY_CAPACITY};
use log::debug;
use rand::Rng;
use shared::ServerAddress;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

pub type ServerId = String;

/// Point-in-time view of one server for the server list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameServerView {
    /// Most recent round trip; `None` until a probe has been answered
    pub latency: Option<Duration>,
    pub player_count: u32,
}

#[derive(Debug)]
struct GameServerInfo {
    address: ServerAddress,
    pending_probes: HashMap<u32, Instant>,
    latency: Option<Duration>,
    player_count: u32,
    latency_history: LatencyHistory,
}

impl GameServerInfo {
    fn new(address: ServerAddress, history_capacity: usize) -> Self {
        Self {
            address,
            pending_probes: HashMap::new(),
            latency: None,
            player_count: 0,
            latency_history: LatencyHistory::new(history_capacity),
        }
    }
}

pub struct ServerRoster {
    servers: RwLock<HashMap<ServerId, GameServerInfo>>,
    history_capacity: usize,
}

impl ServerRoster {
    pub fn new(history_capacity: usize) -> Self {
        Self {
            servers: RwLock::new(HashMap::new()),
            history_capacity,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<ServerId, GameServerInfo>> {
        self.servers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<ServerId, GameServerInfo>> {
        self.servers.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replaces the whole roster with a freshly loaded server list. All
    /// probe state and measurements of the previous list are discarded.
    pub fn load<I>(&self, servers: I)
    where
        I: IntoIterator<Item = (ServerId, ServerAddress)>,
    {
        let loaded: HashMap<ServerId, GameServerInfo> = servers
            .into_iter()
            .map(|(id, address)| (id, GameServerInfo::new(address, self.history_capacity)))
            .collect();

        debug!("Loaded {} game servers", loaded.len());
        *self.write() = loaded;
    }

    /// Adds a server if its id is not known yet. An existing entry keeps its
    /// address; changing addresses requires a full [`ServerRoster::load`].
    pub fn add_server(&self, id: impl Into<ServerId>, address: ServerAddress) -> bool {
        let id = id.into();
        let mut servers = self.write();

        if servers.contains_key(&id) {
            return false;
        }

        servers.insert(id, GameServerInfo::new(address, self.history_capacity));
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Records a new probe for `server_id` and returns its id. The id is
    /// unique among every probe still pending in the roster.
    pub fn add_pending_probe(&self, server_id: &str) -> NetworkResult<u32> {
        self.add_pending_probe_at(server_id, Instant::now())
    }

    pub(crate) fn add_pending_probe_at(
        &self,
        server_id: &str,
        issued_at: Instant,
    ) -> NetworkResult<u32> {
        let mut servers = self.write();

        if !servers.contains_key(server_id) {
            return Err(NetworkError::UnknownServer(server_id.to_string()));
        }

        let mut rng = rand::thread_rng();
        let probe_id = loop {
            let candidate: u32 = rng.gen();
            let taken = servers
                .values()
                .any(|server| server.pending_probes.contains_key(&candidate));
            if !taken {
                break candidate;
            }
        };

        if let Some(server) = servers.get_mut(server_id) {
            server.pending_probes.insert(probe_id, issued_at);
        }

        Ok(probe_id)
    }

    /// Forgets a pending probe without resolving it, e.g. when it could not
    /// be sent.
    pub fn cancel_probe(&self, probe_id: u32) -> bool {
        self.write()
            .values_mut()
            .any(|server| server.pending_probes.remove(&probe_id).is_some())
    }

    /// Resolves the pending probe `probe_id`. Returns `false`, leaving the
    /// roster untouched, when no server is waiting for it.
    pub fn record_probe_response(&self, probe_id: u32, player_count: u32) -> bool {
        self.record_probe_response_at(probe_id, player_count, Instant::now())
    }

    pub(crate) fn record_probe_response_at(
        &self,
        probe_id: u32,
        player_count: u32,
        received_at: Instant,
    ) -> bool {
        let mut servers = self.write();

        for server in servers.values_mut() {
            if let Some(issued_at) = server.pending_probes.remove(&probe_id) {
                let latency = received_at.saturating_duration_since(issued_at);
                server.latency = Some(latency);
                server.player_count = player_count;
                server.latency_history.push(latency);
                return true;
            }
        }

        false
    }

    /// Drops probes that have been pending for longer than `max_age`.
    /// Returns how many were dropped.
    pub fn expire_stale_probes(&self, max_age: Duration) -> usize {
        self.expire_stale_probes_at(max_age, Instant::now())
    }

    pub(crate) fn expire_stale_probes_at(&self, max_age: Duration, now: Instant) -> usize {
        let mut expired = 0;

        for server in self.write().values_mut() {
            let before = server.pending_probes.len();
            server
                .pending_probes
                .retain(|_, issued_at| now.saturating_duration_since(*issued_at) <= max_age);
            expired += before - server.pending_probes.len();
        }

        expired
    }

    pub fn get_view(&self, server_id: &str) -> NetworkResult<GameServerView> {
        let servers = self.read();
        let server = servers
            .get(server_id)
            .ok_or_else(|| NetworkError::UnknownServer(server_id.to_string()))?;

        Ok(GameServerView {
            latency: server.latency,
            player_count: server.player_count,
        })
    }

    /// Resolved round trips of `server_id`, oldest first.
    pub fn get_latency_history(&self, server_id: &str) -> NetworkResult<Vec<Duration>> {
        let servers = self.read();
        servers
            .get(server_id)
            .map(|server| server.latency_history.snapshot())
            .ok_or_else(|| NetworkError::UnknownServer(server_id.to_string()))
    }

    pub fn get_latency_stats(&self, server_id: &str) -> NetworkResult<LatencyStats> {
        let servers = self.read();
        servers
            .get(server_id)
            .map(|server| server.latency_history.stats())
            .ok_or_else(|| NetworkError::UnknownServer(server_id.to_string()))
    }

    pub fn get_all_addresses(&self) -> HashMap<ServerId, ServerAddress> {
        self.read()
            .iter()
            .map(|(id, server)| (id.clone(), server.address.clone()))
            .collect()
    }

    pub fn pending_probe_ids(&self, server_id: &str) -> NetworkResult<Vec<u32>> {
        let servers = self.read();
        servers
            .get(server_id)
            .map(|server| server.pending_probes.keys().copied().collect())
            .ok_or_else(|| NetworkError::UnknownServer(server_id.to_string()))
    }
}

impl Default for ServerRoster {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use std::collections::HashSet;

    fn two_server_roster() -> ServerRoster {
        let roster = ServerRoster::new(4);
        roster.load(vec![
            ("A".to_string(), ServerAddress::new("host1", 1000)),
            ("B".to_string(), ServerAddress::new("host2", 2000)),
        ]);
        roster
    }

    #[test]
    fn test_fresh_entry_defaults() {
        let roster = two_server_roster();

        let view = roster.get_view("A").unwrap();
        assert_eq!(view.latency, None);
        assert_eq!(view.player_count, 0);
        assert!(roster.get_latency_history("A").unwrap().is_empty());
        assert!(roster.pending_probe_ids("A").unwrap().is_empty());
    }

    #[test]
    fn test_unknown_server_lookups_fail() {
        let roster = two_server_roster();

        assert!(matches!(
            roster.add_pending_probe("C"),
            Err(NetworkError::UnknownServer(id)) if id == "C"
        ));
        assert!(matches!(
            roster.get_view("C"),
            Err(NetworkError::UnknownServer(_))
        ));
        assert!(matches!(
            roster.get_latency_history("C"),
            Err(NetworkError::UnknownServer(_))
        ));
    }

    #[test]
    fn test_probe_resolution_updates_entry() {
        let roster = two_server_roster();
        let issued = Instant::now();

        let probe_id = roster.add_pending_probe_at("A", issued).unwrap();
        assert_eq!(roster.pending_probe_ids("A").unwrap(), vec![probe_id]);

        assert!(roster.record_probe_response_at(probe_id, 5, issued + Duration::from_millis(40)));

        let view = roster.get_view("A").unwrap();
        assert_eq!(view.latency, Some(Duration::from_millis(40)));
        assert_eq!(view.player_count, 5);
        assert_eq!(
            roster.get_latency_history("A").unwrap(),
            vec![Duration::from_millis(40)]
        );
        assert!(roster.pending_probe_ids("A").unwrap().is_empty());
    }

    #[test]
    fn test_unknown_probe_response_changes_nothing() {
        let roster = two_server_roster();
        let probe_id = roster.add_pending_probe("B").unwrap();

        assert!(!roster.record_probe_response(probe_id.wrapping_add(1), 9));

        for id in ["A", "B"] {
            let view = roster.get_view(id).unwrap();
            assert_eq!(view.latency, None);
            assert_eq!(view.player_count, 0);
            assert!(roster.get_latency_history(id).unwrap().is_empty());
        }
        assert_eq!(roster.pending_probe_ids("B").unwrap(), vec![probe_id]);
    }

    #[test]
    fn test_duplicate_response_is_ignored() {
        let roster = two_server_roster();
        let probe_id = roster.add_pending_probe("A").unwrap();

        assert!(roster.record_probe_response(probe_id, 3));
        assert!(!roster.record_probe_response(probe_id, 8));

        assert_eq!(roster.get_view("A").unwrap().player_count, 3);
        assert_eq!(roster.get_latency_history("A").unwrap().len(), 1);
    }

    #[test]
    fn test_history_is_bounded_per_server() {
        let roster = two_server_roster();
        let start = Instant::now();

        for i in 0..7u64 {
            let probe_id = roster.add_pending_probe_at("A", start).unwrap();
            roster.record_probe_response_at(probe_id, 1, start + Duration::from_millis(10 + i));
        }

        let history = roster.get_latency_history("A").unwrap();
        let expected: Vec<Duration> = (3..7u64).map(|i| Duration::from_millis(10 + i)).collect();
        assert_eq!(history, expected);
    }

    #[test]
    fn test_pending_probe_ids_are_unique() {
        let roster = two_server_roster();
        let mut seen = HashSet::new();

        for i in 0..5000 {
            let server = if i % 2 == 0 { "A" } else { "B" };
            let probe_id = roster.add_pending_probe(server).unwrap();
            assert!(seen.insert(probe_id), "duplicate probe id {}", probe_id);
        }

        let pending =
            roster.pending_probe_ids("A").unwrap().len() + roster.pending_probe_ids("B").unwrap().len();
        assert_eq!(pending, 5000);
    }

    #[test]
    fn test_stale_probes_expire() {
        let roster = two_server_roster();
        let start = Instant::now();

        let old = roster.add_pending_probe_at("A", start).unwrap();
        let fresh = roster
            .add_pending_probe_at("B", start + Duration::from_secs(9))
            .unwrap();

        let expired = roster.expire_stale_probes_at(Duration::from_secs(5), start + Duration::from_secs(10));

        assert_eq!(expired, 1);
        assert!(roster.pending_probe_ids("A").unwrap().is_empty());
        assert_eq!(roster.pending_probe_ids("B").unwrap(), vec![fresh]);
        assert!(!roster.record_probe_response(old, 2));
    }

    #[test]
    fn test_cancel_probe() {
        let roster = two_server_roster();
        let probe_id = roster.add_pending_probe("B").unwrap();

        assert!(roster.cancel_probe(probe_id));
        assert!(!roster.cancel_probe(probe_id));
        assert!(roster.pending_probe_ids("B").unwrap().is_empty());
    }

    #[test]
    fn test_add_server_keeps_existing_address() {
        let roster = two_server_roster();

        assert!(!roster.add_server("A", ServerAddress::new("elsewhere", 1)));
        assert!(roster.add_server("C", ServerAddress::new("host3", 3000)));

        let addresses = roster.get_all_addresses();
        assert_eq!(addresses.len(), 3);
        assert_eq!(addresses["A"], ServerAddress::new("host1", 1000));
        assert_eq!(addresses["C"], ServerAddress::new("host3", 3000));
    }

    #[test]
    fn test_load_replaces_roster() {
        let roster = two_server_roster();
        roster.add_pending_probe("A").unwrap();

        roster.load(vec![("Z".to_string(), ServerAddress::new("host9", 9000))]);

        assert_eq!(roster.len(), 1);
        assert!(!roster.contains("A"));
        assert!(roster.contains("Z"));
    }

    #[test]
    fn test_stats_follow_history() {
        let roster = two_server_roster();
        let start = Instant::now();

        for latency in [20u64, 40] {
            let probe_id = roster.add_pending_probe_at("B", start).unwrap();
            roster.record_probe_response_at(probe_id, 0, start + Duration::from_millis(latency));
        }

        let stats = roster.get_latency_stats("B").unwrap();
        let average_ms = stats.average.unwrap().as_secs_f64() * 1000.0;
        assert_approx_eq!(average_ms, 30.0, 0.001);
        assert_eq!(stats.jitter, Some(Duration::from_millis(20)));
    }
}
