//! Default TCP relay data path.
//!
//! # Responsibilities
//! - Accept client connections on a pool's listener
//! - Pick a backend per connection (round-robin over the pool's servers)
//! - Copy bytes in both directions until either side closes
//!
//! # Design Decisions
//! - Protocol-agnostic: bytes are relayed, never parsed
//! - Each relayed connection holds a tracker guard so draining can wait for it

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use crate::config::PoolConfig;
use crate::net::connection::ConnectionGuard;

/// A pool's listener registered with a worker's event loop.
#[derive(Debug)]
pub struct PoolRelay {
    name: String,
    listener: TcpListener,
    backends: Vec<SocketAddr>,
    counter: AtomicUsize,
    connect_timeout: Duration,
}

impl PoolRelay {
    pub fn new(config: &PoolConfig, listener: TcpListener) -> Self {
        let backends = config
            .servers
            .iter()
            .filter_map(|s| match s.parse() {
                Ok(addr) => Some(addr),
                Err(_) => {
                    tracing::warn!(pool = %config.name, server = %s, "Invalid backend address");
                    None
                }
            })
            .collect();

        Self {
            name: config.name.clone(),
            listener,
            backends,
            counter: AtomicUsize::new(0),
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        self.listener.accept().await
    }

    /// Rotate through the configured backends.
    pub fn next_backend(&self) -> Option<SocketAddr> {
        if self.backends.is_empty() {
            return None;
        }
        let index = self.counter.fetch_add(1, Ordering::Relaxed) % self.backends.len();
        Some(self.backends[index])
    }

    /// Relay one accepted client to the next backend on a background task.
    pub fn spawn_relay(&self, client: TcpStream, peer: SocketAddr, guard: ConnectionGuard) -> JoinHandle<()> {
        let backend = self.next_backend();
        let timeout = self.connect_timeout;
        let pool = self.name.clone();

        tokio::spawn(async move {
            let Some(backend) = backend else {
                tracing::debug!(pool = %pool, peer = %peer, "Pool has no servers, closing client");
                return;
            };
            match relay(client, backend, timeout).await {
                Ok((up, down)) => tracing::debug!(
                    connection_id = %guard.id(),
                    pool = %pool,
                    backend = %backend,
                    bytes_up = up,
                    bytes_down = down,
                    "Relay finished"
                ),
                Err(e) => tracing::warn!(
                    connection_id = %guard.id(),
                    pool = %pool,
                    backend = %backend,
                    error = %e,
                    "Relay failed"
                ),
            }
        })
    }
}

async fn relay(mut client: TcpStream, backend: SocketAddr, timeout: Duration) -> io::Result<(u64, u64)> {
    let mut upstream = tokio::time::timeout(timeout, TcpStream::connect(backend))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "backend connect timed out"))??;
    tokio::io::copy_bidirectional(&mut client, &mut upstream).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::connection::ConnectionTracker;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn start_echo_backend() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let (mut r, mut w) = socket.split();
                    let _ = tokio::io::copy(&mut r, &mut w).await;
                });
            }
        });
        addr
    }

    #[tokio::test]
    async fn round_robin_over_servers() {
        let mut config = PoolConfig::new("cache", "127.0.0.1:0");
        config.servers = vec!["127.0.0.1:7001".into(), "127.0.0.1:7002".into()];
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let relay = PoolRelay::new(&config, listener);

        let first = relay.next_backend().unwrap();
        let second = relay.next_backend().unwrap();
        let third = relay.next_backend().unwrap();
        assert_eq!(first.port(), 7001);
        assert_eq!(second.port(), 7002);
        assert_eq!(third, first);
    }

    #[tokio::test]
    async fn relays_bytes_to_backend() {
        let backend = start_echo_backend().await;
        let mut config = PoolConfig::new("echo", "127.0.0.1:0");
        config.servers = vec![backend.to_string()];

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let relay = PoolRelay::new(&config, listener);
        let front = relay.local_addr().unwrap();
        let tracker = ConnectionTracker::new();

        let accept_tracker = tracker.clone();
        let server = tokio::spawn(async move {
            let (client, peer) = relay.accept().await.unwrap();
            relay.spawn_relay(client, peer, accept_tracker.track()).await.unwrap();
        });

        let mut client = TcpStream::connect(front).await.unwrap();
        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        drop(client);
        server.await.unwrap();
        assert_eq!(tracker.active_count(), 0);
    }

    #[tokio::test]
    async fn pool_without_servers_closes_client() {
        let config = PoolConfig::new("empty", "127.0.0.1:0");
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let relay = PoolRelay::new(&config, listener);
        let front = relay.local_addr().unwrap();
        let tracker = ConnectionTracker::new();

        let mut client = TcpStream::connect(front).await.unwrap();
        let (accepted, peer) = relay.accept().await.unwrap();
        relay.spawn_relay(accepted, peer, tracker.track()).await.unwrap();

        let mut buf = [0u8; 1];
        assert_eq!(client.read(&mut buf).await.unwrap(), 0);
    }
}
