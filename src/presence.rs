//! Presence registry — the in-memory table of connected identities.
//!
//! Keyed by (level, username): one identity may be active in several
//! levels at once, while a duplicate connect to the *same* level is what
//! demotes the newcomer to viewer mode. Every mutation touches only the
//! caller's own entry, so a single `RwLock` over the table suffices.

use crate::types::{now_ms, PresenceRecord, Vec3};
use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct PresenceKey {
    pub level: String,
    pub username: String,
}

#[derive(Default)]
pub struct PresenceRegistry {
    records: RwLock<HashMap<PresenceKey, PresenceRecord>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if the identity is currently active in this level.
    pub fn is_active(&self, level: &str, username: &str) -> bool {
        self.records.read().contains_key(&PresenceKey {
            level: level.to_string(),
            username: username.to_string(),
        })
    }

    pub fn add(&self, level: &str, username: &str, position: Vec3, rotation: Vec3) {
        let key = PresenceKey {
            level: level.to_string(),
            username: username.to_string(),
        };
        let record = PresenceRecord {
            username: username.to_string(),
            level: level.to_string(),
            position,
            rotation,
            last_update: now_ms(),
        };
        self.records.write().insert(key, record);
    }

    /// Refresh pose and liveness. Unknown identities are ignored — a
    /// position update racing a sweep must not resurrect the entry.
    pub fn update(&self, level: &str, username: &str, position: Vec3, rotation: Vec3) -> bool {
        let key = PresenceKey {
            level: level.to_string(),
            username: username.to_string(),
        };
        let mut records = self.records.write();
        match records.get_mut(&key) {
            Some(record) => {
                record.position = position;
                record.rotation = rotation;
                record.last_update = now_ms();
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, level: &str, username: &str) -> Option<PresenceRecord> {
        self.records.write().remove(&PresenceKey {
            level: level.to_string(),
            username: username.to_string(),
        })
    }

    pub fn get(&self, level: &str, username: &str) -> Option<PresenceRecord> {
        self.records
            .read()
            .get(&PresenceKey {
                level: level.to_string(),
                username: username.to_string(),
            })
            .cloned()
    }

    /// Snapshot of every record across all levels.
    pub fn all(&self) -> Vec<PresenceRecord> {
        self.records.read().values().cloned().collect()
    }

    /// All records for one level.
    pub fn level_players(&self, level: &str) -> Vec<PresenceRecord> {
        self.records
            .read()
            .values()
            .filter(|r| r.level == level)
            .cloned()
            .collect()
    }

    /// Levels where the identity is currently active (friendship fanout).
    pub fn active_levels(&self, username: &str) -> Vec<String> {
        self.records
            .read()
            .values()
            .filter(|r| r.username == username)
            .map(|r| r.level.clone())
            .collect()
    }

    pub fn level_count(&self, level: &str) -> usize {
        self.records
            .read()
            .values()
            .filter(|r| r.level == level)
            .count()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Remove entries whose last update is older than `timeout_ms`.
    /// Returns the swept records so the caller can broadcast the fallout.
    pub fn sweep_stale(&self, timeout_ms: u64) -> Vec<PresenceRecord> {
        let cutoff = now_ms().saturating_sub(timeout_ms);
        let mut records = self.records.write();
        let stale: Vec<PresenceKey> = records
            .iter()
            .filter(|(_, r)| r.last_update < cutoff)
            .map(|(k, _)| k.clone())
            .collect();
        stale
            .into_iter()
            .filter_map(|k| records.remove(&k))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
