//! RESP Session
//!
//! Per-connection state machine for the RESP surface. A connection starts
//! in `Ready`, answering PING / INFO / CLIENT LIST, and moves permanently
//! into `Subscribed` after its first successful PSUBSCRIBE. From then on
//! the session only drains and discards incoming bytes, as a pub/sub
//! connection is expected to stop issuing ordinary commands. Messages are
//! pushed to it by the [`NotificationPublisher`] instead.
//!
//! The connection is registered in the [`SubscriptionRegistry`] on accept
//! and unregistered on every exit path, so a dead subscriber never lingers
//! in the broadcast set.
//!
//! [`NotificationPublisher`]: crate::pubsub::NotificationPublisher

use crate::protocol::{read_command, RespValue};
use crate::pubsub::registry::{ClientConnection, SubscriptionRegistry};
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{self, AsyncReadExt, BufReader};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// A parsed command from the RESP subset this server speaks.
#[derive(Debug, Clone, PartialEq, Eq)]
enum RespCommand {
    Ping,
    Info,
    ClientList,
    Psubscribe { patterns: Vec<String> },
}

impl RespCommand {
    /// Dispatch is on the uppercased first argument; everything outside the
    /// subset maps to an error reply.
    fn parse(args: &[String]) -> Result<Self, RespValue> {
        match args[0].to_uppercase().as_str() {
            "PING" => Ok(RespCommand::Ping),
            "INFO" => Ok(RespCommand::Info),
            "CLIENT" if args.len() >= 2 && args[1].eq_ignore_ascii_case("LIST") => {
                Ok(RespCommand::ClientList)
            }
            "PSUBSCRIBE" => {
                if args.len() < 2 {
                    Err(RespValue::error(
                        "ERR wrong number of arguments for 'psubscribe' command",
                    ))
                } else {
                    Ok(RespCommand::Psubscribe {
                        patterns: args[1..].to_vec(),
                    })
                }
            }
            _ => Err(RespValue::error("ERR unknown command")),
        }
    }
}

/// One RESP connection's state.
struct RespSession {
    reader: BufReader<OwnedReadHalf>,
    conn: Arc<ClientConnection>,
    registry: Arc<SubscriptionRegistry>,
    started: Instant,
    subscribed: bool,
}

impl RespSession {
    async fn reply(&self, value: &RespValue) -> io::Result<()> {
        self.conn.write_all(&value.serialize()).await
    }

    async fn run(mut self) -> io::Result<()> {
        loop {
            if self.subscribed {
                // Subscription mode: wait for data and ignore it. Only the
                // publisher writes to this socket now.
                let mut sink = [0u8; 1024];
                let n = self.reader.read(&mut sink).await?;
                if n == 0 {
                    return Ok(());
                }
                debug!(
                    client = self.conn.id(),
                    bytes = n,
                    "ignored data in subscription mode"
                );
                continue;
            }

            let Some(args) = read_command(&mut self.reader).await? else {
                return Ok(());
            };
            if args.is_empty() {
                return Ok(());
            }
            debug!(client = self.conn.id(), command = ?args, "command");

            match RespCommand::parse(&args) {
                Ok(cmd) => self.execute(cmd).await?,
                Err(error) => self.reply(&error).await?,
            }
        }
    }

    async fn execute(&mut self, cmd: RespCommand) -> io::Result<()> {
        match cmd {
            RespCommand::Ping => self.reply(&RespValue::pong()).await,
            RespCommand::Info => {
                let info = self.info_text();
                self.reply(&RespValue::bulk_string(Bytes::from(info))).await
            }
            RespCommand::ClientList => {
                let list = self.client_list_text();
                self.reply(&RespValue::bulk_string(Bytes::from(list))).await
            }
            RespCommand::Psubscribe { patterns } => {
                // One confirmation per pattern; the count runs within this
                // command only, starting at 1 (it does not accumulate
                // across commands; quirk kept for compatibility).
                for (i, pattern) in patterns.iter().enumerate() {
                    self.registry.subscribe(self.conn.id(), pattern.clone());
                    let confirmation = RespValue::array(vec![
                        RespValue::bulk_string(Bytes::from_static(b"psubscribe")),
                        RespValue::bulk_string(Bytes::from(pattern.clone())),
                        RespValue::integer((i + 1) as i64),
                    ]);
                    self.reply(&confirmation).await?;
                    info!(
                        client = self.conn.id(),
                        pattern = %pattern,
                        "subscribed to pattern"
                    );
                }
                self.subscribed = true;
                Ok(())
            }
        }
    }

    fn info_text(&self) -> String {
        format!(
            "# Server\r\n\
             redis_version:1.0\r\n\
             cachebus_version:{}\r\n\
             process_id:{}\r\n\
             uptime_in_seconds:{}\r\n\
             # Clients\r\n\
             connected_clients:{}\r\n\
             # Memory\r\n\
             used_memory:10240\r\n\
             used_memory_human:10K\r\n\
             maxmemory:0\r\n",
            crate::VERSION,
            std::process::id(),
            self.started.elapsed().as_secs(),
            self.registry.len(),
        )
    }

    fn client_list_text(&self) -> String {
        let mut out = String::new();
        for info in self.registry.list() {
            let subs = info.patterns.join(",");
            out.push_str(&format!(
                "id={} addr={} fd=5 name= age=0 idle=0 flags=N db=0 sub=0 psub={} \
                 multi=-1 qbuf=0 qbuf-free=32768 obl=0 oll=0 omem=0 events=r cmd=client \
                 subscriptions=[{}]\r\n",
                info.id,
                info.addr,
                info.patterns.len(),
                subs,
            ));
        }
        out
    }
}

/// RAII guard that removes a connection from the registry when the handler
/// scope exits, however it exits. Keeps the broadcast set free of dead
/// sockets even if the session loop unwinds.
struct RegistryGuard {
    registry: Arc<SubscriptionRegistry>,
    id: u64,
}

impl Drop for RegistryGuard {
    fn drop(&mut self) {
        self.registry.unregister(self.id);
        debug!(id = self.id, "removed client from registry");
    }
}

/// Accept-side wrapper: registers the connection, runs the session, and
/// unregisters on every exit path.
pub async fn handle_resp_connection(
    stream: TcpStream,
    addr: SocketAddr,
    registry: Arc<SubscriptionRegistry>,
    started: Instant,
) {
    let (read_half, write_half) = stream.into_split();
    let conn = registry.register(addr, write_half);
    let id = conn.id();
    info!(client = %addr, id, "resp client connected");

    let _guard = RegistryGuard {
        registry: Arc::clone(&registry),
        id,
    };

    let session = RespSession {
        reader: BufReader::new(read_half),
        conn,
        registry,
        started,
        subscribed: false,
    };

    match session.run().await {
        Ok(()) => info!(client = %addr, id, "resp client disconnected"),
        Err(e) => warn!(client = %addr, id, error = %e, "resp session ended with error"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pubsub::NotificationPublisher;
    use crate::storage::KeyEvent;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;
    use tokio::time::{sleep, Duration};

    async fn create_test_server() -> (SocketAddr, Arc<SubscriptionRegistry>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let registry = Arc::new(SubscriptionRegistry::new());
        let started = Instant::now();

        let registry_clone = Arc::clone(&registry);
        tokio::spawn(async move {
            while let Ok((stream, client_addr)) = listener.accept().await {
                let registry = Arc::clone(&registry_clone);
                tokio::spawn(handle_resp_connection(stream, client_addr, registry, started));
            }
        });

        (addr, registry)
    }

    async fn expect(client: &mut TcpStream, expected: &[u8]) {
        let mut buf = vec![0u8; expected.len()];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, expected, "got {:?}", String::from_utf8_lossy(&buf));
    }

    /// Single read into a large buffer; enough for the small text replies.
    async fn read_chunk(client: &mut TcpStream) -> String {
        let mut buf = vec![0u8; 8192];
        let n = client.read(&mut buf).await.unwrap();
        String::from_utf8_lossy(&buf[..n]).into_owned()
    }

    #[tokio::test]
    async fn test_ping() {
        let (addr, _) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
        expect(&mut client, b"+PONG\r\n").await;

        // Inline framing works too.
        client.write_all(b"ping\r\n").await.unwrap();
        expect(&mut client, b"+PONG\r\n").await;
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let (addr, _) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"*1\r\n$4\r\nQUUX\r\n").await.unwrap();
        expect(&mut client, b"-ERR unknown command\r\n").await;
    }

    #[tokio::test]
    async fn test_info_sections() {
        let (addr, _) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();
        sleep(Duration::from_millis(50)).await;

        client.write_all(b"*1\r\n$4\r\nINFO\r\n").await.unwrap();
        let reply = read_chunk(&mut client).await;

        assert!(reply.starts_with('$'));
        assert!(reply.contains("# Server"));
        assert!(reply.contains(&format!("process_id:{}", std::process::id())));
        assert!(reply.contains("connected_clients:1"));
        assert!(reply.contains("# Memory"));
    }

    #[tokio::test]
    async fn test_psubscribe_wrong_arity() {
        let (addr, _) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client
            .write_all(b"*1\r\n$10\r\nPSUBSCRIBE\r\n")
            .await
            .unwrap();
        expect(
            &mut client,
            b"-ERR wrong number of arguments for 'psubscribe' command\r\n",
        )
        .await;
    }

    #[tokio::test]
    async fn test_psubscribe_confirmation_counts() {
        let (addr, registry) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client
            .write_all(b"*3\r\n$10\r\nPSUBSCRIBE\r\n$2\r\na*\r\n$2\r\nb*\r\n")
            .await
            .unwrap();

        // One confirmation per pattern, counting from 1 within the command.
        expect(
            &mut client,
            b"*3\r\n$10\r\npsubscribe\r\n$2\r\na*\r\n:1\r\n*3\r\n$10\r\npsubscribe\r\n$2\r\nb*\r\n:2\r\n",
        )
        .await;

        sleep(Duration::from_millis(50)).await;
        let infos = registry.list();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].patterns, vec!["a*".to_string(), "b*".to_string()]);
    }

    #[tokio::test]
    async fn test_subscribed_session_ignores_commands() {
        let (addr, registry) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client
            .write_all(b"*2\r\n$10\r\nPSUBSCRIBE\r\n$16\r\n__keyevent@0__:*\r\n")
            .await
            .unwrap();
        expect(
            &mut client,
            b"*3\r\n$10\r\npsubscribe\r\n$16\r\n__keyevent@0__:*\r\n:1\r\n",
        )
        .await;

        // A PING after subscribing is swallowed; the next bytes on the wire
        // must be the pushed notification, not +PONG.
        client.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
        sleep(Duration::from_millis(50)).await;

        let publisher = NotificationPublisher::new(Arc::clone(&registry));
        publisher.notify(&KeyEvent::del("k")).await;

        expect(
            &mut client,
            b"*3\r\n$7\r\nmessage\r\n$18\r\n__keyevent@0__:del\r\n$1\r\nk\r\n",
        )
        .await;
    }

    #[tokio::test]
    async fn test_client_list_reports_three_connections() {
        let (addr, _) = create_test_server().await;
        let mut c1 = TcpStream::connect(addr).await.unwrap();
        let _c2 = TcpStream::connect(addr).await.unwrap();
        let _c3 = TcpStream::connect(addr).await.unwrap();

        // Give the accept loop time to register all three.
        sleep(Duration::from_millis(50)).await;

        c1.write_all(b"*2\r\n$6\r\nCLIENT\r\n$4\r\nLIST\r\n")
            .await
            .unwrap();
        let reply = read_chunk(&mut c1).await;

        let lines: Vec<&str> = reply
            .lines()
            .filter(|l| l.starts_with("id="))
            .collect();
        assert_eq!(lines.len(), 3, "client list: {}", reply);

        let mut ids: Vec<&str> = lines
            .iter()
            .map(|l| l.split_whitespace().next().unwrap())
            .collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 3, "ids must be distinct");
    }

    #[tokio::test]
    async fn test_disconnect_unregisters() {
        let (addr, registry) = create_test_server().await;

        let client = TcpStream::connect(addr).await.unwrap();
        sleep(Duration::from_millis(50)).await;
        assert_eq!(registry.len(), 1);

        drop(client);
        sleep(Duration::from_millis(50)).await;
        assert_eq!(registry.len(), 0);
    }
}
