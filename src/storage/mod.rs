//! Storage Module
//!
//! The expiring key-value store shared by both protocol surfaces, plus the
//! mutation-event types it can emit for the notification bus.
//!
//! The store knows nothing about either wire protocol; it only speaks keys,
//! byte values, TTLs, and (optionally) [`events::KeyEvent`]s.

pub mod engine;
pub mod events;

// Re-export commonly used types
pub use engine::{Entry, KeyValueStore, StatsSnapshot};
pub use events::{event_channel, KeyEvent, KeyEventKind, KeyEventReceiver, KeyEventSender};
