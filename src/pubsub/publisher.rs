//! Keyspace Notification Publisher
//!
//! Turns store mutation events into RESP `message` frames and pushes them
//! to every subscriber whose pattern covers one of the two channels derived
//! from the event:
//!
//! ```text
//! __keyevent@0__:<event>   keyed by what happened  (payload: the key)
//! __keyspace@0__:<key>     keyed by what changed   (payload: the event)
//! ```
//!
//! `set` frames carry four elements (channel, key, value) because the value
//! rides along; the other events carry three. Values are written as raw
//! bulk-string bytes, so arbitrary binary survives the trip.
//!
//! Delivery is per-target best effort: a dead subscriber socket is logged
//! and skipped, never letting one stale client block the rest.

use crate::protocol::RespValue;
use crate::pubsub::registry::SubscriptionRegistry;
use crate::storage::{KeyEvent, KeyEventKind, KeyEventReceiver};
use bytes::Bytes;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Prefix of channels keyed by event name.
pub const KEYEVENT_PREFIX: &str = "__keyevent@0__:";

/// Prefix of channels keyed by the affected key.
pub const KEYSPACE_PREFIX: &str = "__keyspace@0__:";

/// Fans mutation events out to matching registry entries.
pub struct NotificationPublisher {
    registry: Arc<SubscriptionRegistry>,
}

impl NotificationPublisher {
    pub fn new(registry: Arc<SubscriptionRegistry>) -> Self {
        Self { registry }
    }

    /// Spawns the bridge task that drains the store's event channel and
    /// publishes each event. The task ends when every sender is dropped.
    pub fn spawn(registry: Arc<SubscriptionRegistry>, mut events: KeyEventReceiver) -> JoinHandle<()> {
        let publisher = Self::new(registry);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                publisher.notify(&event).await;
            }
            debug!("notification bridge stopped");
        })
    }

    /// Broadcasts `event` on its keyevent channel and its keyspace channel.
    pub async fn notify(&self, event: &KeyEvent) {
        let event_channel = format!("{}{}", KEYEVENT_PREFIX, event.kind.name());
        let keyspace_channel = format!("{}{}", KEYSPACE_PREFIX, event.key);

        let (event_frame, keyspace_frame) = build_frames(event, &event_channel, &keyspace_channel);

        self.deliver(&event_channel, &event_frame).await;
        self.deliver(&keyspace_channel, &keyspace_frame).await;
    }

    /// Writes `frame` to every subscriber matching `channel`, one attempt
    /// per matching pattern. Failures are logged and skipped.
    async fn deliver(&self, channel: &str, frame: &[u8]) {
        for (conn, pattern) in self.registry.matching(channel) {
            match conn.write_all(frame).await {
                Ok(()) => debug!(
                    client = conn.id(),
                    channel = %channel,
                    pattern = %pattern,
                    "delivered notification"
                ),
                Err(e) => warn!(
                    client = conn.id(),
                    channel = %channel,
                    error = %e,
                    "failed to deliver notification"
                ),
            }
        }
    }
}

/// Builds the serialized `message` frames for both channels.
fn build_frames(event: &KeyEvent, event_channel: &str, keyspace_channel: &str) -> (Vec<u8>, Vec<u8>) {
    let message = RespValue::bulk_string(Bytes::from_static(b"message"));
    let key = RespValue::bulk_string(Bytes::from(event.key.clone()));

    match &event.kind {
        KeyEventKind::Set(value) => {
            // set carries both key and value: four elements on each channel.
            let value = RespValue::bulk_string(value.clone());
            let event_frame = RespValue::array(vec![
                message.clone(),
                RespValue::bulk_string(Bytes::from(event_channel.to_string())),
                key,
                value.clone(),
            ]);
            let keyspace_frame = RespValue::array(vec![
                message,
                RespValue::bulk_string(Bytes::from(keyspace_channel.to_string())),
                RespValue::bulk_string(Bytes::from_static(b"set")),
                value,
            ]);
            (event_frame.serialize(), keyspace_frame.serialize())
        }
        kind => {
            let event_frame = RespValue::array(vec![
                message.clone(),
                RespValue::bulk_string(Bytes::from(event_channel.to_string())),
                key,
            ]);
            let keyspace_frame = RespValue::array(vec![
                message,
                RespValue::bulk_string(Bytes::from(keyspace_channel.to_string())),
                RespValue::bulk_string(Bytes::from(kind.name())),
            ]);
            (event_frame.serialize(), keyspace_frame.serialize())
        }
    }
}
