//! Pub/Sub Module
//!
//! The notification side of the server:
//!
//! ```text
//!  store mutations ──> KeyEvent channel ──> NotificationPublisher
//!                                                  │ matching()
//!                                                  ▼
//!                                         SubscriptionRegistry ──> subscriber sockets
//! ```
//!
//! - `glob`: wildcard matching of subscription patterns against channel names
//! - `registry`: who is connected, and what each connection subscribed to
//! - `publisher`: builds `message` frames and fans them out

pub mod glob;
pub mod publisher;
pub mod registry;

// Re-export commonly used types
pub use glob::GlobPattern;
pub use publisher::{NotificationPublisher, KEYEVENT_PREFIX, KEYSPACE_PREFIX};
pub use registry::{ClientConnection, ClientInfo, SubscriptionRegistry};
