//! Memcached Session
//!
//! Per-connection state machine for the memcached text protocol. The loop
//! alternates between two states: awaiting a command line, and (for `set`)
//! reading the fixed-size data block that follows it. Exactly
//! `length + 2` bytes are consumed per data block (the payload plus its
//! CRLF terminator), so a block can never bleed into the next command.
//!
//! Protocol errors are answered on the wire (`ERROR` / `CLIENT_ERROR`) and
//! leave the connection open; transport errors end the session.

use crate::protocol::{TextCommand, TextError};
use crate::storage::KeyValueStore;
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{self, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// One memcached connection's state.
pub struct MemcachedSession {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    addr: SocketAddr,
    store: Arc<KeyValueStore>,
}

impl MemcachedSession {
    pub fn new(stream: TcpStream, addr: SocketAddr, store: Arc<KeyValueStore>) -> Self {
        let (read_half, write_half) = stream.into_split();
        Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            addr,
            store,
        }
    }

    /// Runs the command loop until the peer disconnects or the transport
    /// fails.
    pub async fn run(mut self) -> io::Result<()> {
        loop {
            let mut line = String::new();
            if self.reader.read_line(&mut line).await? == 0 {
                return Ok(());
            }
            let line = line.trim_end_matches(['\r', '\n']);
            debug!(client = %self.addr, line = %line, "command line");

            match TextCommand::parse(line) {
                Ok(cmd) => self.execute(cmd).await?,
                Err(TextError::BadNumber(_)) => {
                    self.writer
                        .write_all(b"CLIENT_ERROR bad command line format\r\n")
                        .await?;
                }
                Err(TextError::Malformed) => {
                    self.writer.write_all(b"ERROR\r\n").await?;
                }
            }
        }
    }

    async fn execute(&mut self, cmd: TextCommand) -> io::Result<()> {
        match cmd {
            TextCommand::Set {
                key,
                expiry,
                length,
                noreply,
            } => self.execute_set(key, expiry, length, noreply).await,
            TextCommand::Get { keys } => self.execute_get(&keys).await,
            TextCommand::Delete { key, noreply } => {
                let existed = self.store.delete(&key);
                if noreply {
                    return Ok(());
                }
                let reply: &[u8] = if existed {
                    b"DELETED\r\n"
                } else {
                    b"NOT_FOUND\r\n"
                };
                self.writer.write_all(reply).await
            }
            TextCommand::FlushAll { noreply } => {
                self.store.flush();
                if noreply {
                    return Ok(());
                }
                self.writer.write_all(b"OK\r\n").await
            }
            TextCommand::Stats => {
                let mut reply = Vec::new();
                for (name, value) in self.store.stats().entries() {
                    reply.extend_from_slice(format!("STAT {} {}\r\n", name, value).as_bytes());
                }
                reply.extend_from_slice(b"END\r\n");
                self.writer.write_all(&reply).await
            }
        }
    }

    /// Reads the data block for a `set` and stores it. The block is the
    /// declared payload plus a trailing CRLF; a peer that closes the stream
    /// mid-block gets `CLIENT_ERROR bad data chunk` and the loop resumes
    /// (the next read will observe the EOF).
    async fn execute_set(
        &mut self,
        key: String,
        expiry: i64,
        length: usize,
        noreply: bool,
    ) -> io::Result<()> {
        let mut block = vec![0u8; length + 2];
        match self.reader.read_exact(&mut block).await {
            Ok(_) => {
                block.truncate(length); // strip the CRLF terminator
                self.store.set(key, Bytes::from(block), expiry);
                if noreply {
                    return Ok(());
                }
                self.writer.write_all(b"STORED\r\n").await
            }
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                if noreply {
                    return Ok(());
                }
                self.writer
                    .write_all(b"CLIENT_ERROR bad data chunk\r\n")
                    .await
            }
            Err(e) => Err(e),
        }
    }

    /// Writes one `VALUE` block per present key, in request order, then the
    /// `END` terminator. Absent keys contribute nothing.
    async fn execute_get(&mut self, keys: &[String]) -> io::Result<()> {
        let mut reply = Vec::new();
        for key in keys {
            if let Some(value) = self.store.get(key) {
                reply.extend_from_slice(format!("VALUE {} 0 {}\r\n", key, value.len()).as_bytes());
                reply.extend_from_slice(&value);
                reply.extend_from_slice(b"\r\n");
            }
        }
        reply.extend_from_slice(b"END\r\n");
        self.writer.write_all(&reply).await
    }
}

/// Accept-side wrapper: runs a session to completion and logs how it ended.
/// Errors never propagate past here; one bad connection cannot take the
/// listener down.
pub async fn handle_memcached_connection(
    stream: TcpStream,
    addr: SocketAddr,
    store: Arc<KeyValueStore>,
) {
    info!(client = %addr, "memcached client connected");
    let session = MemcachedSession::new(stream, addr, store);
    match session.run().await {
        Ok(()) => info!(client = %addr, "memcached client disconnected"),
        Err(e) => warn!(client = %addr, error = %e, "memcached session ended with error"),
    }
}
