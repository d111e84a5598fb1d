//! TCP server that accepts connections, forwards inbound frames to the
//! application and exposes non-blocking send-to-one / broadcast-to-all.
//!
//! Each connection gets a reader task that pushes [`TransportEvent`]s onto
//! the application channel and a writer task that drains an unbounded
//! outbound queue. Sending never awaits the socket.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::sync::{RwLock, mpsc, watch};

use crate::framing::{FrameLimits, FrameError, read_frame, write_frame};

/// Identifies one accepted socket for the lifetime of the process. The room
/// uses it as the participant key.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Hands out connection ids in accept order, starting at 1.
pub struct IdGenerator {
    next: AtomicU64,
}

impl IdGenerator {
    /// A generator whose first id is 1.
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Takes the next id; safe to call from any task.
    pub fn next_id(&self) -> ConnectionId {
        ConnectionId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// The server already holds `max_connections` sockets.
#[derive(Debug)]
pub struct ConnectionLimitReached;

/// What the transport reports to the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A connection was accepted.
    Connected(ConnectionId, SocketAddr),
    /// A complete frame arrived.
    Frame(ConnectionId, Vec<u8>),
    /// The connection is gone; no further frames will arrive for it.
    Disconnected(ConnectionId),
}

/// Outbound queues of all live connections, keyed by [`ConnectionId`].
pub struct ConnectionMap {
    inner: RwLock<HashMap<ConnectionId, mpsc::UnboundedSender<Vec<u8>>>>,
    max_connections: usize,
}

impl ConnectionMap {
    /// An empty map that admits at most `max_connections` entries.
    pub fn new(max_connections: usize) -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            max_connections,
        }
    }

    /// Register a connection's outbound queue. Fails at capacity.
    pub async fn insert(
        &self,
        id: ConnectionId,
        outbound: mpsc::UnboundedSender<Vec<u8>>,
    ) -> Result<(), ConnectionLimitReached> {
        let mut map = self.inner.write().await;
        if map.len() >= self.max_connections {
            return Err(ConnectionLimitReached);
        }
        map.insert(id, outbound);
        Ok(())
    }

    /// Remove a connection. Dropping its queue ends the writer task.
    pub async fn remove(&self, id: &ConnectionId) -> bool {
        self.inner.write().await.remove(id).is_some()
    }

    /// Queue a payload for one connection. Returns `false` if it is gone.
    pub async fn send_to(&self, id: ConnectionId, payload: Vec<u8>) -> bool {
        match self.inner.read().await.get(&id) {
            Some(tx) => tx.send(payload).is_ok(),
            None => false,
        }
    }

    /// Queue a payload for every connection. Returns how many accepted it.
    pub async fn broadcast(&self, payload: &[u8]) -> usize {
        self.inner
            .read()
            .await
            .values()
            .filter(|tx| tx.send(payload.to_vec()).is_ok())
            .count()
    }

    /// Live connections right now.
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Whether no connection is registered.
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

/// Configuration for [`TransportServer`].
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Frame limits applied to both directions.
    pub frame: FrameLimits,
}

impl TransportConfig {
    /// Config bound to `bind_addr` with default limits.
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            max_connections: 256,
            frame: FrameLimits::default(),
        }
    }
}

/// TCP server feeding a single application channel.
pub struct TransportServer {
    config: TransportConfig,
    connections: Arc<ConnectionMap>,
    id_gen: Arc<IdGenerator>,
    events: mpsc::Sender<TransportEvent>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl TransportServer {
    /// Create a server that reports to `events`.
    pub fn new(config: TransportConfig, events: mpsc::Sender<TransportEvent>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            connections: Arc::new(ConnectionMap::new(config.max_connections)),
            id_gen: Arc::new(IdGenerator::new()),
            config,
            events,
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Shared handle to the outbound queues, for send-to-one / broadcast.
    pub fn connections(&self) -> Arc<ConnectionMap> {
        Arc::clone(&self.connections)
    }

    /// Bind to the configured address and run the accept loop.
    pub async fn run(&self) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!("Transport listening on {}", self.config.bind_addr);
        self.run_with_listener(listener).await
    }

    /// Run the accept loop with a pre-bound listener (useful for tests).
    pub async fn run_with_listener(&self, listener: TcpListener) -> std::io::Result<()> {
        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    let (stream, peer_addr) = result?;
                    stream.set_nodelay(true)?;

                    let id = self.id_gen.next_id();
                    let (reader, writer) = stream.into_split();
                    let (out_tx, out_rx) = mpsc::unbounded_channel();

                    if self.connections.insert(id, out_tx).await.is_err() {
                        tracing::warn!("Connection limit reached, rejecting {peer_addr}");
                        continue;
                    }
                    tracing::info!("Accepted {id} from {peer_addr}");

                    if self.events.send(TransportEvent::Connected(id, peer_addr)).await.is_err() {
                        tracing::warn!("Application channel closed, stopping accept loop");
                        break;
                    }

                    tokio::spawn(Self::write_loop(id, writer, out_rx, self.config.frame.clone()));

                    let connections = Arc::clone(&self.connections);
                    let events = self.events.clone();
                    let frame = self.config.frame.clone();
                    let mut task_shutdown = self.shutdown_rx.clone();
                    tokio::spawn(async move {
                        Self::read_loop(id, reader, &events, &frame, &mut task_shutdown).await;
                        connections.remove(&id).await;
                        let _ = events.send(TransportEvent::Disconnected(id)).await;
                        tracing::info!("{id} closed");
                    });
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::info!("Transport shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    /// Signal the server and all connection tasks to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    async fn read_loop(
        id: ConnectionId,
        mut reader: OwnedReadHalf,
        events: &mpsc::Sender<TransportEvent>,
        frame: &FrameLimits,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                result = read_frame(&mut reader, frame) => {
                    match result {
                        Ok(payload) => {
                            tracing::trace!("{id} sent {} bytes", payload.len());
                            if events.send(TransportEvent::Frame(id, payload)).await.is_err() {
                                break;
                            }
                        }
                        Err(FrameError::ConnectionClosed) => break,
                        Err(e) => {
                            tracing::debug!("{id} read failed: {e}");
                            break;
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
    }

    async fn write_loop(
        id: ConnectionId,
        mut writer: OwnedWriteHalf,
        mut outbound: mpsc::UnboundedReceiver<Vec<u8>>,
        frame: FrameLimits,
    ) {
        while let Some(payload) = outbound.recv().await {
            if let Err(e) = write_frame(&mut writer, &payload, &frame).await {
                tracing::debug!("{id} write failed: {e}");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpStream;

    async fn listening(
        max_connections: usize,
    ) -> (SocketAddr, Arc<TransportServer>, mpsc::Receiver<TransportEvent>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mut config = TransportConfig::new(addr);
        config.max_connections = max_connections;

        let (tx, rx) = mpsc::channel(64);
        let server = Arc::new(TransportServer::new(config, tx));
        let srv = Arc::clone(&server);
        tokio::spawn(async move {
            srv.run_with_listener(listener).await.unwrap();
        });
        (addr, server, rx)
    }

    async fn next_event(rx: &mut mpsc::Receiver<TransportEvent>) -> TransportEvent {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("event within timeout")
            .expect("channel open")
    }

    #[tokio::test]
    async fn test_connect_and_frame_reach_application() {
        let (addr, _server, mut events) = listening(16).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        let id = match next_event(&mut events).await {
            TransportEvent::Connected(id, _) => id,
            other => panic!("expected Connected, got {other:?}"),
        };

        write_frame(&mut stream, b"join", &FrameLimits::default())
            .await
            .unwrap();
        assert_eq!(
            next_event(&mut events).await,
            TransportEvent::Frame(id, b"join".to_vec())
        );
    }

    #[tokio::test]
    async fn test_send_to_and_broadcast_deliver_frames() {
        let (addr, server, mut events) = listening(16).await;
        let mut a = TcpStream::connect(addr).await.unwrap();
        let TransportEvent::Connected(id_a, _) = next_event(&mut events).await else {
            panic!("expected Connected");
        };
        let mut b = TcpStream::connect(addr).await.unwrap();
        let _ = next_event(&mut events).await;

        let connections = server.connections();
        assert!(connections.send_to(id_a, b"only-a".to_vec()).await);
        assert_eq!(connections.broadcast(b"everyone").await, 2);

        let limits = FrameLimits::default();
        assert_eq!(read_frame(&mut a, &limits).await.unwrap(), b"only-a");
        assert_eq!(read_frame(&mut a, &limits).await.unwrap(), b"everyone");
        assert_eq!(read_frame(&mut b, &limits).await.unwrap(), b"everyone");
    }

    #[tokio::test]
    async fn test_disconnect_reported_and_removed() {
        let (addr, server, mut events) = listening(16).await;
        let stream = TcpStream::connect(addr).await.unwrap();
        let TransportEvent::Connected(id, _) = next_event(&mut events).await else {
            panic!("expected Connected");
        };

        drop(stream);
        assert_eq!(
            next_event(&mut events).await,
            TransportEvent::Disconnected(id)
        );
        assert!(server.connections().is_empty().await);
        assert!(!server.connections().send_to(id, vec![1]).await);
    }

    #[tokio::test]
    async fn test_max_connections_enforced() {
        let (addr, server, mut events) = listening(2).await;

        let _c1 = TcpStream::connect(addr).await.unwrap();
        let _c2 = TcpStream::connect(addr).await.unwrap();
        let _ = next_event(&mut events).await;
        let _ = next_event(&mut events).await;

        let _c3 = TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(server.connections().len().await, 2);
    }

    #[tokio::test]
    async fn test_graceful_shutdown_closes_connections() {
        let (addr, server, mut events) = listening(16).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let _ = next_event(&mut events).await;

        server.shutdown();

        let mut buf = [0u8; 64];
        let n = tokio::time::timeout(Duration::from_secs(2), stream.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 0, "client should see EOF after shutdown");
    }

    #[test]
    fn test_ids_follow_accept_order() {
        let ids = IdGenerator::new();
        let id1 = ids.next_id();
        let id2 = ids.next_id();
        assert_ne!(id1, id2);
        assert_eq!(id1.0 + 1, id2.0);
        assert_eq!(id1.to_string(), "conn-1");
    }
}
