//! Network manager: the session with the active game server and the
//! background probing of the server roster
//!
//! Four workers run for the lifetime of the manager:
//! - the sender drains the outbound packet queue into the transport,
//! - the receiver reads the transport, handles connection packets itself and
//!   defers everything else to the listeners on the main thread,
//! - the task worker executes queued [`NetworkTask`]s (probing the roster),
//! - the probe receiver resolves probe responses into the roster.
//!
//! They share a single `running` flag and never wait longer than the
//! configured poll interval before checking it again.

use crate::config::NetworkConfig;
use crate::diagnostics::DiagnosticSink;
use crate::error::{NetworkError, NetworkResult};
use crate::listeners::ListenerRegistry;
use crate::main_thread::MainThreadHandle;
use crate::queue::MessageQueue;
use crate::roster::ServerRoster;
use crate::transport::TransportSession;
use log::{debug, error, info, warn};
use shared::{
    decode_packet, encode_packet, is_reserved_id, CodecError, Packet, PacketId, ServerAddress,
    MAX_PACKET_SIZE, PROTOCOL_VERSION,
};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::{lookup_host, UdpSocket};
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// Unconnected sockets used for pinging roster servers, one per address
/// family. The IPv6 socket is optional: hosts without IPv6 only lose the
/// ability to ping IPv6 servers.
struct ProbeSockets {
    v4: UdpSocket,
    v6: Option<UdpSocket>,
}

impl ProbeSockets {
    async fn bind() -> NetworkResult<Self> {
        let v4 = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(NetworkError::ProbeSocket)?;
        debug!(
            "Probe socket bound to {}",
            v4.local_addr().map_err(NetworkError::ProbeSocket)?
        );

        let v6 = match UdpSocket::bind("[::]:0").await {
            Ok(socket) => Some(socket),
            Err(e) => {
                warn!("IPv6 servers cannot be pinged: {}", e);
                None
            }
        };

        Ok(ProbeSockets { v4, v6 })
    }

    fn for_target(&self, target: &SocketAddr) -> Option<&UdpSocket> {
        if target.is_ipv4() {
            Some(&self.v4)
        } else {
            self.v6.as_ref()
        }
    }

    /// Receives the next datagram from whichever socket has one first.
    async fn recv_from(&self, buffer: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        let Some(v6) = &self.v6 else {
            return self.v4.recv_from(buffer).await;
        };

        loop {
            let socket = tokio::select! {
                ready = self.v4.readable() => { ready?; &self.v4 }
                ready = v6.readable() => { ready?; v6 }
            };

            match socket.try_recv_from(buffer) {
                Ok(received) => return Ok(received),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

/// Work handed to the task worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkTask {
    ProbeServers,
}

struct Shared {
    config: NetworkConfig,
    running: AtomicBool,
    transport: TransportSession,
    listeners: Arc<ListenerRegistry>,
    roster: Arc<ServerRoster>,
    packet_queue: MessageQueue<Packet>,
    task_queue: MessageQueue<NetworkTask>,
    probe_sockets: ProbeSockets,
    diagnostics: Arc<dyn DiagnosticSink>,
    main_thread: MainThreadHandle,
}

pub struct NetworkManager {
    shared: Arc<Shared>,
    sender: Option<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
}

impl NetworkManager {
    /// Binds the probe sockets and spawns the four workers. Failing to create
    /// the IPv4 probe socket aborts startup.
    pub async fn start(
        config: NetworkConfig,
        roster: Arc<ServerRoster>,
        diagnostics: Arc<dyn DiagnosticSink>,
        main_thread: MainThreadHandle,
    ) -> NetworkResult<Self> {
        let probe_sockets = ProbeSockets::bind().await?;

        let shared = Arc::new(Shared {
            config,
            running: AtomicBool::new(true),
            transport: TransportSession::new(),
            listeners: Arc::new(ListenerRegistry::new()),
            roster,
            packet_queue: MessageQueue::new(),
            task_queue: MessageQueue::new(),
            probe_sockets,
            diagnostics,
            main_thread,
        });

        let sender = tokio::spawn(Arc::clone(&shared).run_sender());
        let workers = vec![
            tokio::spawn(Arc::clone(&shared).run_receiver()),
            tokio::spawn(Arc::clone(&shared).run_tasks()),
            tokio::spawn(Arc::clone(&shared).run_probe_receiver()),
        ];

        info!("Network manager started");

        Ok(NetworkManager {
            shared,
            sender: Some(sender),
            workers,
        })
    }

    /// Connects to a game server and queues the handshake. The session is
    /// only established once the server answers it.
    pub async fn connect(&self, address: &str, port: u16) -> NetworkResult<()> {
        self.shared.transport.connect(address, port).await?;

        let key = self
            .shared
            .transport
            .local_public_key()
            .ok_or(NetworkError::NotConnected)?;
        self.shared.packet_queue.push(Packet::CryptoHandshakeStart {
            protocol: PROTOCOL_VERSION,
            key,
        });

        Ok(())
    }

    /// Leaves the active server, telling it so on a best-effort basis.
    pub fn disconnect(&self) {
        if !self.shared.transport.connected() {
            return;
        }

        if let Err(e) = self.shared.transport.try_send(&Packet::Disconnect) {
            debug!("Could not notify server about disconnect: {}", e);
        }

        self.shared.transport.disconnect();
        info!("Disconnected from the server");
    }

    /// Queues a packet for the sender worker.
    pub fn send(&self, packet: Packet) -> NetworkResult<()> {
        if !self.shared.transport.connected() {
            error!("Tried to send packet {} while disconnected", packet.id());
            return Err(NetworkError::NotConnected);
        }

        if let Packet::Custom { id, .. } = &packet {
            if is_reserved_id(*id) {
                return Err(CodecError::ReservedId(*id).into());
            }
        }

        self.shared.packet_queue.push(packet);
        Ok(())
    }

    pub fn send_keepalive(&self) -> NetworkResult<()> {
        self.send(Packet::KeepAlive)
    }

    /// Registers `callback` for packets with `id`. Callbacks run on the
    /// main-thread queue, never on a network worker.
    pub fn add_listener<F>(&self, id: PacketId, callback: F)
    where
        F: Fn(Packet) + Send + Sync + 'static,
    {
        self.shared.listeners.add_listener(id, callback);
    }

    pub fn remove_listener(&self, id: PacketId) {
        self.shared.listeners.remove_listener(id);
    }

    pub fn remove_all_listeners(&self) {
        self.shared.listeners.remove_all();
    }

    pub fn request_probe_all_servers(&self) {
        self.shared.task_queue.push(NetworkTask::ProbeServers);
    }

    pub fn connected(&self) -> bool {
        self.shared.transport.connected()
    }

    pub fn established(&self) -> bool {
        self.shared.transport.established()
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// Packets queued but not yet picked up by the sender.
    pub fn pending_packets(&self) -> usize {
        self.shared.packet_queue.len()
    }

    pub fn roster(&self) -> &Arc<ServerRoster> {
        &self.shared.roster
    }

    pub fn diagnostics(&self) -> &Arc<dyn DiagnosticSink> {
        &self.shared.diagnostics
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.shared.config
    }

    pub fn server_addr(&self) -> Option<SocketAddr> {
        self.shared.transport.peer_addr()
    }

    /// Stops every worker. The sender is joined first so nothing is sent
    /// while the transport goes down; packets still queued are discarded.
    pub async fn shutdown(mut self) {
        self.shared.running.store(false, Ordering::SeqCst);
        debug!("Waiting for network workers to stop..");

        if let Some(sender) = self.sender.take() {
            if let Err(e) = sender.await {
                error!("Sender worker failed: {}", e);
            }
        }

        let discarded = self.shared.packet_queue.pop_all().len();
        if discarded > 0 {
            debug!("Discarded {} unsent packets", discarded);
        }

        self.disconnect();

        for worker in self.workers.drain(..) {
            if let Err(e) = worker.await {
                error!("Network worker failed: {}", e);
            }
        }

        info!("Network manager stopped");
    }
}

impl Drop for NetworkManager {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::SeqCst);
    }
}

impl Shared {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn run_sender(self: Arc<Self>) {
        let poll_interval = self.config.poll_interval();

        while self.is_running() {
            if !self.packet_queue.wait_for_messages(poll_interval).await {
                continue;
            }

            for packet in self.packet_queue.pop_all() {
                if let Err(e) = self.transport.send(&packet).await {
                    self.diagnostics
                        .error(format!("Failed to send packet {}: {}", packet.id(), e));
                }
            }
        }

        debug!("Sender worker stopped");
    }

    async fn run_receiver(self: Arc<Self>) {
        let poll_interval = self.config.poll_interval();
        let mut buffer = vec![0u8; MAX_PACKET_SIZE];

        while self.is_running() {
            if !self.transport.poll(poll_interval).await {
                continue;
            }

            match self.transport.receive(&mut buffer) {
                Ok(Some(packet)) => self.handle_packet(packet),
                Ok(None) => {}
                Err(e) => self
                    .diagnostics
                    .warn(format!("Failed to receive a packet: {}", e)),
            }
        }

        debug!("Receiver worker stopped");
    }

    fn handle_packet(&self, packet: Packet) {
        match packet {
            Packet::CryptoHandshakeResponse { key } => {
                if self.transport.install_peer_key(key) {
                    info!("Handshake complete, connection established");
                }
            }

            Packet::KeepAliveResponse { player_count } => {
                debug!("Keepalive acknowledged ({} players online)", player_count);
            }

            Packet::ServerDisconnect { message } => {
                self.diagnostics.error(format!(
                    "You have been disconnected from the active server.\n\nReason: {}",
                    message
                ));
                self.transport.disconnect();
            }

            packet => self.defer_to_listeners(packet),
        }
    }

    fn defer_to_listeners(&self, packet: Packet) {
        let id = packet.id();
        let listeners = Arc::clone(&self.listeners);
        let diagnostics = Arc::clone(&self.diagnostics);

        let queued = self.main_thread.queue_in_main_thread(move || {
            if !listeners.dispatch(packet) {
                diagnostics.warn(format!("Unhandled packet: {}", id));
            }
        });

        if !queued {
            debug!("Main thread queue is gone, dropping packet {}", id);
        }
    }

    async fn run_tasks(self: Arc<Self>) {
        let poll_interval = self.config.poll_interval();

        while self.is_running() {
            if !self.task_queue.wait_for_messages(poll_interval).await {
                continue;
            }

            for task in self.task_queue.pop_all() {
                match task {
                    NetworkTask::ProbeServers => self.probe_all_servers().await,
                }
            }
        }

        debug!("Task worker stopped");
    }

    async fn probe_all_servers(&self) {
        let expired = self.roster.expire_stale_probes(self.config.probe_timeout());
        if expired > 0 {
            debug!("Dropped {} unanswered probes", expired);
        }

        for (server_id, address) in self.roster.get_all_addresses() {
            if let Err(e) = self.probe_server(&server_id, &address).await {
                self.diagnostics.warn(format!(
                    "Failed to ping server {} ({}): {}",
                    server_id, address, e
                ));
            }
        }
    }

    async fn probe_server(&self, server_id: &str, address: &ServerAddress) -> NetworkResult<()> {
        let (target, socket) = lookup_host((address.ip.as_str(), address.port))
            .await?
            .find_map(|target| {
                self.probe_sockets
                    .for_target(&target)
                    .map(|socket| (target, socket))
            })
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, "no reachable address for this host")
            })?;

        let probe_id = self.roster.add_pending_probe(server_id)?;

        let sent = match encode_packet(&Packet::Ping { id: probe_id }) {
            Ok(frame) => socket
                .send_to(&frame, target)
                .await
                .map(|_| ())
                .map_err(NetworkError::from),
            Err(e) => Err(e.into()),
        };

        if sent.is_err() {
            self.roster.cancel_probe(probe_id);
        }
        sent
    }

    async fn run_probe_receiver(self: Arc<Self>) {
        let poll_interval = self.config.poll_interval();
        let mut buffer = vec![0u8; MAX_PACKET_SIZE];

        while self.is_running() {
            let (len, from) =
                match timeout(poll_interval, self.probe_sockets.recv_from(&mut buffer)).await {
                    Err(_) => continue,
                    Ok(Err(e)) => {
                        self.diagnostics
                            .warn(format!("Error pinging a server: {}", e));
                        continue;
                    }
                    Ok(Ok(received)) => received,
                };

            match decode_packet(&buffer[..len]) {
                Ok(Packet::PingResponse { id, player_count }) => {
                    if !self.roster.record_probe_response(id, player_count) {
                        self.diagnostics.warn(format!(
                            "Dropped ping response {} from {}: no server is waiting for it",
                            id, from
                        ));
                    }
                }
                Ok(other) => self.diagnostics.warn(format!(
                    "Unexpected packet {} from {} on the ping socket",
                    other.id(),
                    from
                )),
                Err(e) => self
                    .diagnostics
                    .warn(format!("Error pinging a server: {}", e)),
            }
        }

        debug!("Probe receiver stopped");
    }
}
