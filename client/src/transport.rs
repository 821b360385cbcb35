//! Transport session: the UDP connection to the active game server

use crate::error::{NetworkError, NetworkResult};
use log::{debug, info};
use rand::RngCore;
use shared::{decode_packet, encode_packet, Packet, SessionKey, KEY_SIZE};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::net::{lookup_host, UdpSocket};
use tokio::sync::Notify;
use tokio::time::{sleep, timeout};

/// Per-connection key material. The key exchange itself is opaque to this
/// layer: the box only holds our key and, once the handshake completes, the
/// server's.
pub struct SessionBox {
    local_key: SessionKey,
    peer_key: Option<SessionKey>,
}

impl SessionBox {
    pub fn new() -> Self {
        let mut local_key = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut local_key);

        Self {
            local_key,
            peer_key: None,
        }
    }

    pub fn public_key(&self) -> SessionKey {
        self.local_key
    }

    pub fn set_peer_key(&mut self, key: SessionKey) {
        self.peer_key = Some(key);
    }

    pub fn peer_key(&self) -> Option<SessionKey> {
        self.peer_key
    }
}

impl Default for SessionBox {
    fn default() -> Self {
        Self::new()
    }
}

struct Connection {
    socket: UdpSocket,
    peer: SocketAddr,
    session_box: Mutex<SessionBox>,
}

impl Connection {
    fn session_box(&self) -> std::sync::MutexGuard<'_, SessionBox> {
        self.session_box
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Owns the socket to the game server plus the `connected` and `established`
/// flags.
///
/// The sender worker only writes and the receiver worker only reads, so both
/// can use the same socket concurrently. The lock around the connection slot
/// is only held long enough to clone the `Arc`.
pub struct TransportSession {
    connection: RwLock<Option<Arc<Connection>>>,
    connected: AtomicBool,
    established: AtomicBool,
    /// Wakes a pending `poll` whenever the connection is replaced or dropped
    changed: Notify,
}

impl TransportSession {
    pub fn new() -> Self {
        Self {
            connection: RwLock::new(None),
            connected: AtomicBool::new(false),
            established: AtomicBool::new(false),
            changed: Notify::new(),
        }
    }

    fn current(&self) -> Option<Arc<Connection>> {
        self.connection
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Opens a socket to `address:port`. Only marks the transport as
    /// connected; the session becomes established once the server answers
    /// the handshake.
    pub async fn connect(&self, address: &str, port: u16) -> NetworkResult<()> {
        let target = format!("{}:{}", address, port);
        let transport_error = |source: io::Error| NetworkError::Transport {
            address: target.clone(),
            source,
        };

        let peer = lookup_host((address, port))
            .await
            .map_err(transport_error)?
            .next()
            .ok_or_else(|| {
                transport_error(io::Error::new(
                    io::ErrorKind::NotFound,
                    "address did not resolve to any host",
                ))
            })?;

        let bind_addr = if peer.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(bind_addr).await.map_err(transport_error)?;
        socket.connect(peer).await.map_err(transport_error)?;

        if self.disconnect() {
            info!("Dropped previous connection before connecting to {}", peer);
        }

        let connection = Connection {
            socket,
            peer,
            session_box: Mutex::new(SessionBox::new()),
        };

        *self
            .connection
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(connection));
        self.established.store(false, Ordering::SeqCst);
        self.connected.store(true, Ordering::SeqCst);
        self.changed.notify_waiters();

        info!("Connected to {}", peer);
        Ok(())
    }

    /// Tears the connection down. Returns whether there was one.
    pub fn disconnect(&self) -> bool {
        let previous = self
            .connection
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        self.established.store(false, Ordering::SeqCst);
        let was_connected = self.connected.swap(false, Ordering::SeqCst);
        self.changed.notify_waiters();

        if let Some(connection) = &previous {
            debug!("Closed connection to {}", connection.peer);
        }

        was_connected || previous.is_some()
    }

    pub async fn send(&self, packet: &Packet) -> NetworkResult<()> {
        let connection = self.current().ok_or(NetworkError::NotConnected)?;
        let frame = encode_packet(packet)?;
        connection.socket.send(&frame).await?;
        Ok(())
    }

    /// Sends without suspending. Used where the caller cannot await, such as
    /// the farewell packet on a user-initiated disconnect.
    pub fn try_send(&self, packet: &Packet) -> NetworkResult<()> {
        let connection = self.current().ok_or(NetworkError::NotConnected)?;
        let frame = encode_packet(packet)?;
        connection.socket.try_send(&frame)?;
        Ok(())
    }

    /// Waits up to `wait` for the socket to become readable. Returns `false`
    /// on timeout, when there is no connection, or as soon as the connection
    /// is replaced or dropped so the caller can poll the new one.
    pub async fn poll(&self, wait: Duration) -> bool {
        let changed = self.changed.notified();
        tokio::pin!(changed);
        changed.as_mut().enable();

        let Some(connection) = self.current() else {
            tokio::select! {
                _ = sleep(wait) => {}
                _ = &mut changed => {}
            }
            return false;
        };

        tokio::select! {
            ready = timeout(wait, connection.socket.readable()) => match ready {
                Ok(Ok(())) => true,
                Ok(Err(e)) => {
                    debug!("Readiness check failed: {}", e);
                    false
                }
                Err(_) => false,
            },
            _ = &mut changed => false,
        }
    }

    /// Reads one datagram into `buffer` and decodes it. `Ok(None)` means the
    /// readiness reported by `poll` was spurious or the connection went away.
    pub fn receive(&self, buffer: &mut [u8]) -> NetworkResult<Option<Packet>> {
        let Some(connection) = self.current() else {
            return Ok(None);
        };

        match connection.socket.try_recv(buffer) {
            Ok(len) => Ok(Some(decode_packet(&buffer[..len])?)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Completes the handshake. Returns `false` if there is no connection to
    /// install the key on.
    pub fn install_peer_key(&self, key: SessionKey) -> bool {
        let Some(connection) = self.current() else {
            return false;
        };

        connection.session_box().set_peer_key(key);
        if self.connected.load(Ordering::SeqCst) {
            self.established.store(true, Ordering::SeqCst);
        }
        true
    }

    pub fn local_public_key(&self) -> Option<SessionKey> {
        let connection = self.current()?;
        let key = connection.session_box().public_key();
        Some(key)
    }

    pub fn peer_key(&self) -> Option<SessionKey> {
        let connection = self.current()?;
        let key = connection.session_box().peer_key();
        key
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.current().map(|connection| connection.peer)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.current()
            .and_then(|connection| connection.socket.local_addr().ok())
    }

    pub fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn established(&self) -> bool {
        self.connected() && self.established.load(Ordering::SeqCst)
    }
}

impl Default for TransportSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::MAX_PACKET_SIZE;

    async fn bind_peer() -> (UdpSocket, SocketAddr) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        (socket, addr)
    }

    #[tokio::test]
    async fn test_send_without_connection_fails() {
        let transport = TransportSession::new();

        assert!(!transport.connected());
        assert!(!transport.established());
        assert!(matches!(
            transport.send(&Packet::KeepAlive).await,
            Err(NetworkError::NotConnected)
        ));
        assert!(matches!(
            transport.try_send(&Packet::KeepAlive),
            Err(NetworkError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_poll_without_connection_waits_and_returns_false() {
        let transport = TransportSession::new();

        let start = std::time::Instant::now();
        assert!(!transport.poll(Duration::from_millis(30)).await);
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn test_connect_sets_connected_but_not_established() {
        let (_peer, addr) = bind_peer().await;
        let transport = TransportSession::new();

        transport.connect("127.0.0.1", addr.port()).await.unwrap();

        assert!(transport.connected());
        assert!(!transport.established());
        assert_eq!(transport.peer_addr(), Some(addr));
        assert!(transport.local_public_key().is_some());
        assert!(transport.peer_key().is_none());
    }

    #[tokio::test]
    async fn test_handshake_key_establishes_session() {
        let (_peer, addr) = bind_peer().await;
        let transport = TransportSession::new();
        transport.connect("127.0.0.1", addr.port()).await.unwrap();

        let key = [7u8; KEY_SIZE];
        assert!(transport.install_peer_key(key));
        assert!(transport.established());
        assert_eq!(transport.peer_key(), Some(key));
    }

    #[tokio::test]
    async fn test_peer_key_without_connection_is_ignored() {
        let transport = TransportSession::new();
        assert!(!transport.install_peer_key([1u8; KEY_SIZE]));
        assert!(!transport.established());
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent_and_resets_flags() {
        let (_peer, addr) = bind_peer().await;
        let transport = TransportSession::new();
        transport.connect("127.0.0.1", addr.port()).await.unwrap();
        transport.install_peer_key([3u8; KEY_SIZE]);

        assert!(transport.disconnect());
        assert!(!transport.connected());
        assert!(!transport.established());
        assert!(transport.peer_addr().is_none());

        assert!(!transport.disconnect());
    }

    #[tokio::test]
    async fn test_send_reaches_peer_framed() {
        let (peer, addr) = bind_peer().await;
        let transport = TransportSession::new();
        transport.connect("127.0.0.1", addr.port()).await.unwrap();

        transport.send(&Packet::Ping { id: 77 }).await.unwrap();

        let mut buffer = [0u8; 2048];
        let (len, _) = peer.recv_from(&mut buffer).await.unwrap();
        assert_eq!(
            decode_packet(&buffer[..len]).unwrap(),
            Packet::Ping { id: 77 }
        );
    }

    #[tokio::test]
    async fn test_poll_and_receive_from_peer() {
        let (peer, addr) = bind_peer().await;
        let transport = TransportSession::new();
        transport.connect("127.0.0.1", addr.port()).await.unwrap();
        let local = transport.local_addr().unwrap();

        let frame = encode_packet(&Packet::KeepAliveResponse { player_count: 3 }).unwrap();
        peer.send_to(&frame, local).await.unwrap();

        assert!(transport.poll(Duration::from_secs(2)).await);
        let mut buffer = vec![0u8; MAX_PACKET_SIZE];
        let packet = transport.receive(&mut buffer).unwrap();
        assert_eq!(packet, Some(Packet::KeepAliveResponse { player_count: 3 }));
    }

    #[tokio::test]
    async fn test_receive_reports_garbage_as_decode_error() {
        let (peer, addr) = bind_peer().await;
        let transport = TransportSession::new();
        transport.connect("127.0.0.1", addr.port()).await.unwrap();
        let local = transport.local_addr().unwrap();

        peer.send_to(&[0xFF], local).await.unwrap();

        assert!(transport.poll(Duration::from_secs(2)).await);
        let mut buffer = vec![0u8; MAX_PACKET_SIZE];
        assert!(matches!(
            transport.receive(&mut buffer),
            Err(NetworkError::Codec(_))
        ));
    }

    #[tokio::test]
    async fn test_reconnect_replaces_session_box() {
        let (_peer, addr) = bind_peer().await;
        let transport = TransportSession::new();

        transport.connect("127.0.0.1", addr.port()).await.unwrap();
        transport.install_peer_key([9u8; KEY_SIZE]);

        transport.connect("127.0.0.1", addr.port()).await.unwrap();
        assert!(transport.connected());
        assert!(!transport.established());
        assert!(transport.peer_key().is_none());
    }

    #[tokio::test]
    async fn test_reconnect_wakes_pending_poll() {
        let (_old_peer, old_addr) = bind_peer().await;
        let (_new_peer, new_addr) = bind_peer().await;
        let transport = Arc::new(TransportSession::new());
        transport.connect("127.0.0.1", old_addr.port()).await.unwrap();

        let poller = Arc::clone(&transport);
        let waiting = tokio::spawn(async move {
            let start = std::time::Instant::now();
            let ready = poller.poll(Duration::from_secs(5)).await;
            (ready, start.elapsed())
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        transport.connect("127.0.0.1", new_addr.port()).await.unwrap();

        let (ready, elapsed) = timeout(Duration::from_secs(2), waiting)
            .await
            .unwrap()
            .unwrap();
        assert!(!ready);
        assert!(elapsed < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_connect_wakes_idle_poll() {
        let (_peer, addr) = bind_peer().await;
        let transport = Arc::new(TransportSession::new());

        let poller = Arc::clone(&transport);
        let waiting = tokio::spawn(async move {
            let start = std::time::Instant::now();
            poller.poll(Duration::from_secs(5)).await;
            start.elapsed()
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        transport.connect("127.0.0.1", addr.port()).await.unwrap();

        let elapsed = timeout(Duration::from_secs(2), waiting)
            .await
            .unwrap()
            .unwrap();
        assert!(elapsed < Duration::from_secs(1));
    }
}
