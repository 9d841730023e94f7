//! # Cachebus - A Memcached-Compatible Cache With a Notification Bus
//!
//! Cachebus is a lightweight in-memory key-value service that speaks two
//! wire protocols over one shared store:
//!
//! - a **memcached text protocol** endpoint for storage operations
//!   (`set` / `get` / `delete` / `flush_all` / `stats`), and
//! - a minimal **RESP** endpoint (`PING`, `INFO`, `CLIENT LIST`,
//!   `PSUBSCRIBE`) that delivers Redis-style keyspace/keyevent
//!   notifications for every store mutation.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                            Cachebus                              │
//! │                                                                  │
//! │  memcached :11211 ──> MemcachedSession ──> KeyValueStore         │
//! │                                                 │                │
//! │                                            KeyEvent channel      │
//! │                                                 ▼                │
//! │  resp :11311 ──────>  RespSession         NotificationPublisher  │
//! │                            │                    │                │
//! │                            ▼                    │  glob match    │
//! │                    SubscriptionRegistry <───────┘                │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every accepted connection runs in its own Tokio task. The store and the
//! registry are the only shared mutable state; both live behind their own
//! locks and are handed to sessions as `Arc`s at startup.
//!
//! ## Quick Start
//!
//! ```ignore
//! use cachebus::server::{run, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let shutdown = async {
//!         tokio::signal::ctrl_c().await.expect("Failed to install Ctrl+C handler");
//!     };
//!     run(ServerConfig::default(), shutdown).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Notifications
//!
//! A subscriber issues `PSUBSCRIBE __keyevent@0__:*` (or any glob pattern)
//! and from then on receives one RESP `message` frame per matching channel
//! per mutation: `set`, `del`, `expire` (a TTL was assigned), and
//! `expired` (a TTL elapsed and the key was lazily dropped on read).
//!
//! ## Module Overview
//!
//! - [`storage`]: the expiring key-value store and its mutation events
//! - [`protocol`]: wire parsing and serialization for both surfaces
//! - [`pubsub`]: subscription registry, glob matching, notification fan-out
//! - [`server`]: listeners and the per-connection session loops

pub mod protocol;
pub mod pubsub;
pub mod server;
pub mod storage;

// Re-export commonly used types for convenience
pub use protocol::{RespValue, TextCommand};
pub use pubsub::{NotificationPublisher, SubscriptionRegistry};
pub use server::ServerConfig;
pub use storage::{KeyEvent, KeyValueStore};

/// The default port for the memcached text protocol endpoint.
pub const DEFAULT_MEMCACHED_PORT: u16 = 11211;

/// The default port for the RESP / notification endpoint.
pub const DEFAULT_RESP_PORT: u16 = 11311;

/// Version of cachebus.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
