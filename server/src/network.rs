//! Server network layer: one UDP socket answering probes and hosting client
//! sessions

use crate::client_manager::ClientManager;
use crate::config::ServerConfig;
use log::{debug, error, info, warn};
use rand::RngCore;
use shared::{
    decode_packet, encode_packet, Packet, SessionKey, KEY_SIZE, MAX_PACKET_SIZE,
    PROTOCOL_VERSION,
};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::RwLock;
use tokio::time::{interval, MissedTickBehavior};

type SendResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Reference game server
///
/// Answers pings from server browsers, accepts handshakes, acknowledges
/// keepalives and echoes custom packets back to the client that sent them.
pub struct GameServer {
    socket: Arc<UdpSocket>,
    clients: Arc<RwLock<ClientManager>>,
    config: ServerConfig,
    server_key: SessionKey,
}

impl GameServer {
    pub async fn bind(addr: &str, config: ServerConfig) -> io::Result<Self> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Server listening on {}", socket.local_addr()?);

        let mut server_key = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut server_key);

        Ok(GameServer {
            socket,
            clients: Arc::new(RwLock::new(ClientManager::new(
                config.max_clients,
                config.client_timeout(),
            ))),
            config,
            server_key,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Player count reported to clients: the configured override if any,
    /// otherwise the number of established sessions.
    pub async fn player_count(&self) -> u32 {
        match self.config.fixed_player_count {
            Some(count) => count,
            None => self.clients.read().await.len() as u32,
        }
    }

    pub async fn client_addrs(&self) -> Vec<SocketAddr> {
        self.clients
            .read()
            .await
            .get_client_addrs()
            .into_iter()
            .map(|(_, addr)| addr)
            .collect()
    }

    /// Ends the session at `addr`, telling the client why. Returns false if
    /// no client is connected from there.
    pub async fn kick(&self, addr: SocketAddr, reason: &str) -> bool {
        let removed = self.clients.write().await.remove_client_by_addr(addr);
        if removed.is_none() {
            return false;
        }

        info!("Kicking {}: {}", addr, reason);
        self.send_packet(
            &Packet::ServerDisconnect {
                message: reason.to_string(),
            },
            addr,
        )
        .await;
        true
    }

    /// Receive loop. Runs until the task is dropped.
    pub async fn run(&self) {
        let mut sweep = interval(self.config.sweep_interval());
        sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut buffer = vec![0u8; MAX_PACKET_SIZE];

        info!("Server started successfully");

        loop {
            tokio::select! {
                received = self.socket.recv_from(&mut buffer) => {
                    match received {
                        Ok((len, addr)) => match decode_packet(&buffer[..len]) {
                            Ok(packet) => self.handle_packet(packet, addr).await,
                            Err(e) => warn!("Failed to decode packet from {}: {}", addr, e),
                        },
                        Err(e) => {
                            error!("Error receiving packet: {}", e);
                            tokio::time::sleep(Duration::from_millis(10)).await;
                        }
                    }
                }

                _ = sweep.tick() => self.drop_timed_out_clients().await,
            }
        }
    }

    async fn handle_packet(&self, packet: Packet, addr: SocketAddr) {
        match packet {
            Packet::Ping { id } => self.answer_ping(id, addr).await,

            Packet::CryptoHandshakeStart { protocol, key } => {
                if protocol != PROTOCOL_VERSION {
                    warn!("Client {} speaks protocol {}, rejecting", addr, protocol);
                    let response = Packet::ServerDisconnect {
                        message: format!(
                            "Unsupported protocol version {} (server speaks {})",
                            protocol, PROTOCOL_VERSION
                        ),
                    };
                    self.send_packet(&response, addr).await;
                    return;
                }

                let client_id = self.clients.write().await.add_client(addr, key);

                let response = match client_id {
                    Some(_) => Packet::CryptoHandshakeResponse {
                        key: self.server_key,
                    },
                    None => Packet::ServerDisconnect {
                        message: "Server full".to_string(),
                    },
                };
                self.send_packet(&response, addr).await;
            }

            Packet::KeepAlive => {
                let known = self.clients.write().await.touch(addr);
                if !known {
                    debug!("Keepalive from unknown client {}", addr);
                    return;
                }

                let player_count = self.player_count().await;
                self.send_packet(&Packet::KeepAliveResponse { player_count }, addr)
                    .await;
            }

            Packet::Disconnect => {
                let removed = self.clients.write().await.remove_client_by_addr(addr);
                if removed.is_none() {
                    debug!("Disconnect from unknown client {}", addr);
                }
            }

            Packet::Custom { id, payload } => {
                let known = self.clients.write().await.touch(addr);
                if !known {
                    warn!("Packet {} from {} without a session", id, addr);
                    return;
                }

                self.send_packet(&Packet::Custom { id, payload }, addr).await;
            }

            other => {
                warn!("Unexpected packet {} from {}", other.id(), addr);
            }
        }
    }

    async fn answer_ping(&self, id: u32, addr: SocketAddr) {
        let response = Packet::PingResponse {
            id,
            player_count: self.player_count().await,
        };

        let delay = self.config.fake_ping();
        if delay.is_zero() {
            self.send_packet(&response, addr).await;
            return;
        }

        let socket = Arc::clone(&self.socket);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = Self::send_packet_impl(&socket, &response, addr).await {
                error!("Failed to send ping response to {}: {}", addr, e);
            }
        });
    }

    async fn drop_timed_out_clients(&self) {
        let timed_out = self.clients.write().await.check_timeouts();

        for (client_id, addr) in timed_out {
            info!("Client {} timed out", client_id);
            let notice = Packet::ServerDisconnect {
                message: "Timed out".to_string(),
            };
            self.send_packet(&notice, addr).await;
        }
    }

    async fn send_packet_impl(socket: &UdpSocket, packet: &Packet, addr: SocketAddr) -> SendResult {
        let data = encode_packet(packet)?;
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    async fn send_packet(&self, packet: &Packet, addr: SocketAddr) {
        if let Err(e) = Self::send_packet_impl(&self.socket, packet, addr).await {
            error!("Failed to send packet {} to {}: {}", packet.id(), addr, e);
        }
    }
}
