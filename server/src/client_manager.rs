//! Session tracking for the clients connected to the reference server
//!
//! This module handles the server-side bookkeeping of connected clients:
//! - Session lifecycle (handshake, disconnect, timeout)
//! - Capacity enforcement
//! - Activity tracking for keepalives and timeout sweeps
//!
//! A client only counts towards the player count once its handshake has been
//! accepted.

use log::info;
use shared::SessionKey;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// A client whose handshake has been accepted
#[derive(Debug)]
pub struct Client {
    /// Unique client identifier assigned by the server
    pub id: u32,
    /// Address every response is sent to
    pub addr: SocketAddr,
    /// Last time any packet arrived from this client
    pub last_seen: Instant,
    /// Public key the client presented during the handshake
    pub key: SessionKey,
}

impl Client {
    pub fn new(id: u32, addr: SocketAddr, key: SessionKey) -> Self {
        Self {
            id,
            addr,
            last_seen: Instant::now(),
            key,
        }
    }

    /// Returns true if nothing has arrived from this client within `timeout`
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// Manages every established client session
///
/// Enforces the server's capacity limit and drops clients that stopped
/// talking. Clients are keyed by id; lookups by address go through
/// [`ClientManager::find_client_by_addr`].
pub struct ClientManager {
    clients: HashMap<u32, Client>,
    next_client_id: u32,
    max_clients: usize,
    timeout: Duration,
}

impl ClientManager {
    /// Creates an empty manager. Client ids start at 1.
    pub fn new(max_clients: usize, timeout: Duration) -> Self {
        Self {
            clients: HashMap::new(),
            next_client_id: 1,
            max_clients,
            timeout,
        }
    }

    /// Registers a client after a successful handshake
    ///
    /// A client reconnecting from an address that already has a session
    /// replaces it. Returns `None` if the server is full.
    pub fn add_client(&mut self, addr: SocketAddr, key: SessionKey) -> Option<u32> {
        if let Some(existing) = self.find_client_by_addr(addr) {
            info!("Replacing session {} from {}", existing, addr);
            self.remove_client(&existing);
        }

        if self.is_full() {
            return None;
        }

        let client_id = self.next_client_id;
        self.next_client_id += 1;

        info!("Client {} connected from {}", client_id, addr);
        self.clients.insert(client_id, Client::new(client_id, addr, key));

        Some(client_id)
    }

    /// Removes a client. Returns false if it was already gone.
    pub fn remove_client(&mut self, client_id: &u32) -> bool {
        if let Some(client) = self.clients.remove(client_id) {
            info!("Client {} disconnected", client.id);
            true
        } else {
            false
        }
    }

    pub fn remove_client_by_addr(&mut self, addr: SocketAddr) -> Option<u32> {
        let client_id = self.find_client_by_addr(addr)?;
        self.remove_client(&client_id);
        Some(client_id)
    }

    pub fn find_client_by_addr(&self, addr: SocketAddr) -> Option<u32> {
        self.clients
            .iter()
            .find(|(_, client)| client.addr == addr)
            .map(|(id, _)| *id)
    }

    /// Marks the client at `addr` as active. Returns false for unknown
    /// addresses.
    pub fn touch(&mut self, addr: SocketAddr) -> bool {
        match self.clients.values_mut().find(|client| client.addr == addr) {
            Some(client) => {
                client.last_seen = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Removes every client that has been silent for longer than the
    /// configured timeout and returns their addresses.
    pub fn check_timeouts(&mut self) -> Vec<(u32, SocketAddr)> {
        let timed_out: Vec<(u32, SocketAddr)> = self
            .clients
            .values()
            .filter(|client| client.is_timed_out(self.timeout))
            .map(|client| (client.id, client.addr))
            .collect();

        for (client_id, _) in &timed_out {
            self.remove_client(client_id);
        }

        timed_out
    }

    pub fn get_client_addrs(&self) -> Vec<(u32, SocketAddr)> {
        self.clients
            .iter()
            .map(|(id, client)| (*id, client.addr))
            .collect()
    }

    pub fn get_client(&self, client_id: u32) -> Option<&Client> {
        self.clients.get(&client_id)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.clients.len() >= self.max_clients
    }
}
