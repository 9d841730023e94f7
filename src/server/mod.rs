//! Server Module
//!
//! Binds one TCP endpoint per protocol surface, accepts connections, and
//! spawns a session task per accepted connection. Owns the process-scoped
//! pieces and wires them together:
//!
//! ```text
//!  memcached endpoint ──> MemcachedSession ──> KeyValueStore
//!                                                   │ KeyEvent channel
//!                                                   ▼
//!  resp endpoint ──> RespSession ──> SubscriptionRegistry <── NotificationPublisher
//! ```
//!
//! The shutdown future stops both accept loops; dropping the store closes
//! the event channel, which winds the notification bridge down.

pub mod memcached;
pub mod resp;

pub use memcached::{handle_memcached_connection, MemcachedSession};
pub use resp::handle_resp_connection;

use crate::pubsub::{NotificationPublisher, SubscriptionRegistry};
use crate::storage::{event_channel, KeyValueStore};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::io;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Bind addresses for the two protocol surfaces.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// memcached text protocol endpoint, e.g. `127.0.0.1:11211`
    pub memcached_addr: String,
    /// RESP endpoint, e.g. `127.0.0.1:11311`
    pub resp_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            memcached_addr: format!("127.0.0.1:{}", crate::DEFAULT_MEMCACHED_PORT),
            resp_addr: format!("127.0.0.1:{}", crate::DEFAULT_RESP_PORT),
        }
    }
}

/// Binds both endpoints and serves until `shutdown` completes.
pub async fn run(
    config: ServerConfig,
    shutdown: impl Future<Output = ()> + Send,
) -> io::Result<()> {
    let memcached_listener = TcpListener::bind(&config.memcached_addr).await?;
    let resp_listener = TcpListener::bind(&config.resp_addr).await?;

    info!(addr = %config.memcached_addr, "memcached endpoint listening");
    info!(addr = %config.resp_addr, "resp endpoint listening");

    serve(memcached_listener, resp_listener, shutdown).await
}

/// Serves already-bound listeners until `shutdown` completes. Split out of
/// [`run`] so tests can bind port 0 themselves.
pub async fn serve(
    memcached_listener: TcpListener,
    resp_listener: TcpListener,
    shutdown: impl Future<Output = ()> + Send,
) -> io::Result<()> {
    let registry = Arc::new(SubscriptionRegistry::new());
    let (events_tx, events_rx) = event_channel();
    let _bridge = NotificationPublisher::spawn(Arc::clone(&registry), events_rx);
    let store = Arc::new(KeyValueStore::with_events(events_tx));
    let started = Instant::now();

    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            res = memcached_listener.accept() => {
                match res {
                    Ok((stream, addr)) => {
                        let store = Arc::clone(&store);
                        tokio::spawn(handle_memcached_connection(stream, addr, store));
                    }
                    Err(e) => error!(error = %e, "failed to accept memcached connection"),
                }
            }
            res = resp_listener.accept() => {
                match res {
                    Ok((stream, addr)) => {
                        let registry = Arc::clone(&registry);
                        tokio::spawn(handle_resp_connection(stream, addr, registry, started));
                    }
                    Err(e) => error!(error = %e, "failed to accept resp connection"),
                }
            }
            _ = &mut shutdown => {
                info!("shutdown signal received, stopping listeners");
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::sync::oneshot;
    use tokio::time::{sleep, Duration};

    async fn start_server() -> (SocketAddr, SocketAddr, oneshot::Sender<()>) {
        let memcached_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let resp_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let memcached_addr = memcached_listener.local_addr().unwrap();
        let resp_addr = resp_listener.local_addr().unwrap();

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        tokio::spawn(async move {
            serve(memcached_listener, resp_listener, async {
                let _ = shutdown_rx.await;
            })
            .await
            .unwrap();
        });

        (memcached_addr, resp_addr, shutdown_tx)
    }

    async fn expect(client: &mut TcpStream, expected: &[u8]) {
        let mut buf = vec![0u8; expected.len()];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, expected, "got {:?}", String::from_utf8_lossy(&buf));
    }

    #[tokio::test]
    async fn test_store_mutations_reach_subscribers() {
        let (memcached_addr, resp_addr, _shutdown) = start_server().await;

        // Subscribe on the RESP side.
        let mut subscriber = TcpStream::connect(resp_addr).await.unwrap();
        subscriber
            .write_all(
                b"*3\r\n$10\r\nPSUBSCRIBE\r\n$16\r\n__keyspace@0__:*\r\n$16\r\n__keyevent@0__:*\r\n",
            )
            .await
            .unwrap();
        expect(
            &mut subscriber,
            b"*3\r\n$10\r\npsubscribe\r\n$16\r\n__keyspace@0__:*\r\n:1\r\n\
              *3\r\n$10\r\npsubscribe\r\n$16\r\n__keyevent@0__:*\r\n:2\r\n",
        )
        .await;

        // Mutate through the memcached surface with a binary value.
        let mut cache = TcpStream::connect(memcached_addr).await.unwrap();
        cache
            .write_all(b"set testkey 0 0 3\r\n\x01\x02\x03\r\n")
            .await
            .unwrap();
        expect(&mut cache, b"STORED\r\n").await;

        // Exactly two message frames arrive: keyevent then keyspace.
        expect(
            &mut subscriber,
            b"*4\r\n$7\r\nmessage\r\n$18\r\n__keyevent@0__:set\r\n$7\r\ntestkey\r\n$3\r\n\x01\x02\x03\r\n",
        )
        .await;
        expect(
            &mut subscriber,
            b"*4\r\n$7\r\nmessage\r\n$22\r\n__keyspace@0__:testkey\r\n$3\r\nset\r\n$3\r\n\x01\x02\x03\r\n",
        )
        .await;

        // A delete fans out the same way with three-element frames.
        cache.write_all(b"delete testkey\r\n").await.unwrap();
        expect(&mut cache, b"DELETED\r\n").await;
        expect(
            &mut subscriber,
            b"*3\r\n$7\r\nmessage\r\n$18\r\n__keyevent@0__:del\r\n$7\r\ntestkey\r\n",
        )
        .await;
        expect(
            &mut subscriber,
            b"*3\r\n$7\r\nmessage\r\n$22\r\n__keyspace@0__:testkey\r\n$3\r\ndel\r\n",
        )
        .await;
    }

    #[tokio::test]
    async fn test_non_matching_subscriber_hears_nothing() {
        let (memcached_addr, resp_addr, _shutdown) = start_server().await;

        let mut subscriber = TcpStream::connect(resp_addr).await.unwrap();
        subscriber
            .write_all(b"*2\r\n$10\r\nPSUBSCRIBE\r\n$21\r\n__keyspace@0__:user:*\r\n")
            .await
            .unwrap();
        expect(
            &mut subscriber,
            b"*3\r\n$10\r\npsubscribe\r\n$21\r\n__keyspace@0__:user:*\r\n:1\r\n",
        )
        .await;

        // Second subscriber with a matching pattern, used to detect when the
        // fan-out for the mutation below has completed.
        let mut subscriber2 = TcpStream::connect(resp_addr).await.unwrap();
        subscriber2
            .write_all(b"*2\r\n$10\r\nPSUBSCRIBE\r\n$16\r\n__keyevent@0__:*\r\n")
            .await
            .unwrap();
        expect(
            &mut subscriber2,
            b"*3\r\n$10\r\npsubscribe\r\n$16\r\n__keyevent@0__:*\r\n:1\r\n",
        )
        .await;

        let mut cache = TcpStream::connect(memcached_addr).await.unwrap();
        cache.write_all(b"set order:1 0 0 1\r\nx\r\n").await.unwrap();
        expect(&mut cache, b"STORED\r\n").await;

        // subscriber2 receives the keyevent frame; subscriber receives
        // nothing at all for a key outside its pattern.
        expect(
            &mut subscriber2,
            b"*4\r\n$7\r\nmessage\r\n$18\r\n__keyevent@0__:set\r\n$7\r\norder:1\r\n$1\r\nx\r\n",
        )
        .await;

        let mut probe = [0u8; 1];
        let res =
            tokio::time::timeout(Duration::from_millis(100), subscriber.read(&mut probe)).await;
        assert!(res.is_err(), "expected no delivery for non-matching pattern");
    }

    #[tokio::test]
    async fn test_lazy_expiry_notifies_expired() {
        let (memcached_addr, resp_addr, _shutdown) = start_server().await;

        let mut subscriber = TcpStream::connect(resp_addr).await.unwrap();
        subscriber
            .write_all(b"*2\r\n$10\r\nPSUBSCRIBE\r\n$22\r\n__keyevent@0__:expired\r\n")
            .await
            .unwrap();
        expect(
            &mut subscriber,
            b"*3\r\n$10\r\npsubscribe\r\n$22\r\n__keyevent@0__:expired\r\n:1\r\n",
        )
        .await;

        let mut cache = TcpStream::connect(memcached_addr).await.unwrap();
        cache.write_all(b"set gone 0 1 1\r\nv\r\n").await.unwrap();
        expect(&mut cache, b"STORED\r\n").await;

        // After the TTL elapses, the read observes the expiration and the
        // expired event fans out.
        sleep(Duration::from_millis(1100)).await;
        cache.write_all(b"get gone\r\n").await.unwrap();
        expect(&mut cache, b"END\r\n").await;

        expect(
            &mut subscriber,
            b"*3\r\n$7\r\nmessage\r\n$22\r\n__keyevent@0__:expired\r\n$4\r\ngone\r\n",
        )
        .await;
    }

    #[tokio::test]
    async fn test_shutdown_stops_accepting() {
        let (memcached_addr, _resp_addr, shutdown) = start_server().await;

        // Server is up.
        let mut client = TcpStream::connect(memcached_addr).await.unwrap();
        client.write_all(b"stats\r\n").await.unwrap();
        let mut first = [0u8; 5];
        client.read_exact(&mut first).await.unwrap();
        assert_eq!(&first, b"STAT ");

        shutdown.send(()).unwrap();
        sleep(Duration::from_millis(50)).await;

        // New connections are refused once the listener is gone.
        assert!(TcpStream::connect(memcached_addr).await.is_err());
    }
}
