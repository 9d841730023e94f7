//! Expiring Key-Value Store
//!
//! This module implements the shared store behind both protocol surfaces.
//! It is a single `RwLock`-guarded map of key → entry, where each entry
//! carries its value and its optional expiration instant together.
//!
//! ## Design Decisions
//!
//! 1. **One entry, both halves**: value and expiration live in the same map
//!    value, so a reader can never observe a value whose expiration was torn
//!    away by a concurrent writer.
//! 2. **Lazy Expiry**: a key's TTL is not actively swept; expiry is detected
//!    and applied on the next read that touches the key.
//! 3. **Single map**: one `RwLock<HashMap>` keeps `flush` atomic with respect
//!    to every other operation.
//! 4. **Optional event hook**: mutations can emit [`KeyEvent`]s for the
//!    notification bus; a store built without the hook behaves identically
//!    minus the events.

use crate::storage::events::{KeyEvent, KeyEventSender};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// A stored value with its optional expiration instant.
#[derive(Debug, Clone)]
pub struct Entry {
    /// The stored bytes.
    pub value: Bytes,
    /// When this entry expires (None = never expires).
    pub expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: Bytes, ttl_seconds: i64) -> Self {
        let expires_at = if ttl_seconds > 0 {
            Some(Instant::now() + Duration::from_secs(ttl_seconds as u64))
        } else {
            None
        };
        Self { value, expires_at }
    }

    /// Checks whether this entry's TTL has elapsed.
    #[inline]
    pub fn is_expired(&self) -> bool {
        self.expires_at
            .map(|exp| Instant::now() > exp)
            .unwrap_or(false)
    }
}

/// The in-memory expiring key-value store shared by every connection.
///
/// # Thread Safety
///
/// Designed to be wrapped in an `Arc` and shared across all session tasks.
/// All operations appear atomic with respect to each other.
///
/// # Example
///
/// ```
/// use cachebus::storage::KeyValueStore;
/// use bytes::Bytes;
///
/// let store = KeyValueStore::new();
///
/// store.set("name".to_string(), Bytes::from("bar"), 0);
/// assert_eq!(store.get("name"), Some(Bytes::from("bar")));
///
/// assert!(store.delete("name"));
/// assert_eq!(store.get("name"), None);
/// ```
pub struct KeyValueStore {
    /// The map; each entry carries value and expiration together.
    data: RwLock<HashMap<String, Entry>>,

    /// When the store (and with it, the server) came up.
    start_time: Instant,

    /// Statistics: total items ever stored.
    total_items: AtomicU64,

    /// Statistics: total get commands.
    cmd_get: AtomicU64,

    /// Statistics: total set commands.
    cmd_set: AtomicU64,

    /// Statistics: reads that found a live value.
    get_hits: AtomicU64,

    /// Statistics: reads that found nothing (or an expired entry).
    get_misses: AtomicU64,

    /// Optional mutation-event hook for the notification bus.
    events: Option<KeyEventSender>,
}

impl std::fmt::Debug for KeyValueStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyValueStore")
            .field("items", &self.len())
            .field("cmd_get", &self.cmd_get.load(Ordering::Relaxed))
            .field("cmd_set", &self.cmd_set.load(Ordering::Relaxed))
            .field("notifying", &self.events.is_some())
            .finish()
    }
}

impl Default for KeyValueStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyValueStore {
    /// Creates a plain store (no mutation events).
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Creates a store that emits a [`KeyEvent`] per mutation into `events`.
    pub fn with_events(events: KeyEventSender) -> Self {
        Self::build(Some(events))
    }

    fn build(events: Option<KeyEventSender>) -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
            start_time: Instant::now(),
            total_items: AtomicU64::new(0),
            cmd_get: AtomicU64::new(0),
            cmd_set: AtomicU64::new(0),
            get_hits: AtomicU64::new(0),
            get_misses: AtomicU64::new(0),
            events,
        }
    }

    fn emit(&self, event: KeyEvent) {
        if let Some(tx) = &self.events {
            // A closed bus just means nobody is listening anymore.
            let _ = tx.send(event);
        }
    }

    /// Stores `value` under `key`, unconditionally overwriting any previous
    /// entry. `ttl_seconds <= 0` means no expiration and clears any
    /// expiration a previous entry may have carried.
    pub fn set(&self, key: String, value: Bytes, ttl_seconds: i64) {
        self.cmd_set.fetch_add(1, Ordering::Relaxed);
        self.total_items.fetch_add(1, Ordering::Relaxed);

        let has_ttl = ttl_seconds > 0;
        {
            let mut data = self.data.write().unwrap();
            data.insert(key.clone(), Entry::new(value.clone(), ttl_seconds));
        }

        self.emit(KeyEvent::set(key.clone(), value));
        if has_ttl {
            self.emit(KeyEvent::expire(key));
        }
    }

    /// Returns the live value for `key`, or `None` if the key was never set,
    /// was deleted, or has expired. An expired entry is removed on the spot
    /// (lazy expiration) and counts as a miss.
    pub fn get(&self, key: &str) -> Option<Bytes> {
        self.cmd_get.fetch_add(1, Ordering::Relaxed);

        // Fast path: read lock for live entries.
        {
            let data = self.data.read().unwrap();
            match data.get(key) {
                Some(entry) if !entry.is_expired() => {
                    self.get_hits.fetch_add(1, Ordering::Relaxed);
                    return Some(entry.value.clone());
                }
                Some(_) => {} // expired, fall through to the write path
                None => {
                    self.get_misses.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
            }
        }

        // The entry looked expired; take the write lock to remove it.
        let mut data = self.data.write().unwrap();
        match data.get(key) {
            Some(entry) if entry.is_expired() => {
                data.remove(key);
                drop(data);
                self.get_misses.fetch_add(1, Ordering::Relaxed);
                self.emit(KeyEvent::expired(key));
                None
            }
            Some(entry) => {
                // A writer replaced the entry between the two locks.
                let value = entry.value.clone();
                self.get_hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            None => {
                self.get_misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Removes `key`. Returns whether the key was present.
    pub fn delete(&self, key: &str) -> bool {
        let existed = {
            let mut data = self.data.write().unwrap();
            data.remove(key).is_some()
        };
        if existed {
            self.emit(KeyEvent::del(key));
        }
        existed
    }

    /// Atomically empties the store.
    pub fn flush(&self) {
        let mut data = self.data.write().unwrap();
        data.clear();
    }

    /// Returns the number of entries currently in the map.
    pub fn len(&self) -> usize {
        self.data.read().unwrap().len()
    }

    /// Returns true if the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Recomputes the stats snapshot served by the memcached `stats` command.
    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            pid: std::process::id(),
            uptime: self.start_time.elapsed().as_secs(),
            time: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
            version: crate::VERSION,
            curr_items: self.len() as u64,
            total_items: self.total_items.load(Ordering::Relaxed),
            cmd_get: self.cmd_get.load(Ordering::Relaxed),
            cmd_set: self.cmd_set.load(Ordering::Relaxed),
            get_hits: self.get_hits.load(Ordering::Relaxed),
            get_misses: self.get_misses.load(Ordering::Relaxed),
        }
    }

    #[cfg(test)]
    fn force_expire(&self, key: &str) {
        let mut data = self.data.write().unwrap();
        if let Some(entry) = data.get_mut(key) {
            entry.expires_at = Some(Instant::now() - Duration::from_millis(10));
        }
    }
}

/// A point-in-time view of the store's counters.
///
/// The process-management tooling greps `STAT pid` out of this, so `pid`
/// must always be present.
#[derive(Debug, Clone)]
pub struct StatsSnapshot {
    pub pid: u32,
    pub uptime: u64,
    pub time: u64,
    pub version: &'static str,
    pub curr_items: u64,
    pub total_items: u64,
    pub cmd_get: u64,
    pub cmd_set: u64,
    pub get_hits: u64,
    pub get_misses: u64,
}

impl StatsSnapshot {
    /// The snapshot as ordered `STAT <name> <value>` pairs.
    pub fn entries(&self) -> Vec<(&'static str, String)> {
        vec![
            ("pid", self.pid.to_string()),
            ("uptime", self.uptime.to_string()),
            ("time", self.time.to_string()),
            ("version", self.version.to_string()),
            ("curr_items", self.curr_items.to_string()),
            ("total_items", self.total_items.to_string()),
            ("cmd_get", self.cmd_get.to_string()),
            ("cmd_set", self.cmd_set.to_string()),
            ("get_hits", self.get_hits.to_string()),
            ("get_misses", self.get_misses.to_string()),
        ]
    }
}
