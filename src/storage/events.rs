//! Key Mutation Events
//!
//! The store can be wired with an event hook: every mutation (and every lazy
//! expiration observed on a read) emits a [`KeyEvent`] into an unbounded
//! channel. The pub/sub side drains that channel and fans the events out to
//! subscribers; the store itself never touches a socket.
//!
//! A store constructed without a hook is the "plain" variant: same type, no
//! subclassing, events are simply not produced.

use bytes::Bytes;
use tokio::sync::mpsc;

/// Sending half of the mutation-event channel, held by the store.
pub type KeyEventSender = mpsc::UnboundedSender<KeyEvent>;

/// Receiving half, drained by the notification publisher.
pub type KeyEventReceiver = mpsc::UnboundedReceiver<KeyEvent>;

/// Creates the mutation-event channel.
pub fn event_channel() -> (KeyEventSender, KeyEventReceiver) {
    mpsc::unbounded_channel()
}

/// What happened to a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyEventKind {
    /// The key was written. Carries the stored value (may be arbitrary binary).
    Set(Bytes),
    /// The key was explicitly deleted.
    Del,
    /// The key was given a time-to-live.
    Expire,
    /// The key's time-to-live elapsed and the entry was dropped.
    Expired,
}

impl KeyEventKind {
    /// The event name used in `__keyevent@0__:<name>` channel names.
    pub fn name(&self) -> &'static str {
        match self {
            KeyEventKind::Set(_) => "set",
            KeyEventKind::Del => "del",
            KeyEventKind::Expire => "expire",
            KeyEventKind::Expired => "expired",
        }
    }
}

/// A single mutation event: which key, and what happened to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEvent {
    pub key: String,
    pub kind: KeyEventKind,
}

impl KeyEvent {
    pub fn set(key: impl Into<String>, value: Bytes) -> Self {
        Self {
            key: key.into(),
            kind: KeyEventKind::Set(value),
        }
    }

    pub fn del(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            kind: KeyEventKind::Del,
        }
    }

    pub fn expire(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            kind: KeyEventKind::Expire,
        }
    }

    pub fn expired(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            kind: KeyEventKind::Expired,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names() {
        assert_eq!(KeyEvent::set("k", Bytes::from("v")).kind.name(), "set");
        assert_eq!(KeyEvent::del("k").kind.name(), "del");
        assert_eq!(KeyEvent::expire("k").kind.name(), "expire");
        assert_eq!(KeyEvent::expired("k").kind.name(), "expired");
    }
}
