use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::Duration;

use crate::models::Item;

struct LocalEntry {
    items: Vec<Item>,
    stored_at: DateTime<Utc>,
}

/// Process-private ranking tier.
///
/// Entries are never evicted on expiry: `get` ignores them once the TTL has
/// passed, `force_get` still returns them. Cleared only on restart.
pub struct LocalTier {
    entries: DashMap<String, LocalEntry>,
    ttl: Duration,
}

impl LocalTier {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Store a copy of `items`, replacing the previous snapshot.
    pub fn set(&self, key: &str, items: &[Item]) {
        self.set_at(key, items, Utc::now());
    }

    pub fn set_at(&self, key: &str, items: &[Item], stored_at: DateTime<Utc>) {
        self.entries.insert(
            key.to_string(),
            LocalEntry {
                items: items.to_vec(),
                stored_at,
            },
        );
    }

    /// Store `items` unless the entry already holds a snapshot stamped at or
    /// after `stored_at`. Returns whether the entry was written.
    pub fn set_if_newer(&self, key: &str, items: &[Item], stored_at: DateTime<Utc>) -> bool {
        let entry = LocalEntry {
            items: items.to_vec(),
            stored_at,
        };
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().stored_at >= stored_at {
                    return false;
                }
                occupied.insert(entry);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(entry);
            }
        }
        true
    }

    /// Fresh entries only.
    pub fn get(&self, key: &str) -> Option<Vec<Item>> {
        let entry = self.entries.get(key)?;
        if self.is_expired(entry.stored_at) {
            return None;
        }
        Some(entry.items.clone())
    }

    /// Most recent entry regardless of age.
    pub fn force_get(&self, key: &str) -> Option<Vec<Item>> {
        self.entries.get(key).map(|entry| entry.items.clone())
    }

    pub fn stored_at(&self, key: &str) -> Option<DateTime<Utc>> {
        self.entries.get(key).map(|entry| entry.stored_at)
    }

    fn is_expired(&self, stored_at: DateTime<Utc>) -> bool {
        match chrono::Duration::from_std(self.ttl) {
            Ok(ttl) => Utc::now() - stored_at >= ttl,
            Err(_) => false,
        }
    }
}
