//! Persistence adapter over the external KV store.
//!
//! The store exposes hash-map-per-key semantics: read/write a whole hash,
//! read/write/delete a single field. [`MemoryKv`] is the in-process
//! implementation; [`WorldStore`] layers the typed world layout on top:
//!
//! | Key                          | Field                 | Value            |
//! |------------------------------|-----------------------|------------------|
//! | `{level}:chunk:{cx}:{cz}`    | `block:{x}:{y}:{z}`   | `BlockRecord`    |
//! | `{level}:positions`          | `{username}`          | last-known pose  |
//! | `{level}:player:{username}`  | `score` / `joined_at` / `last_seen` | scalars |
//! | `{level}:meta`               | `seeds`               | `TerrainSeeds`   |
//! | `social`                     | `{username}`          | `FriendRecord`   |
//!
//! Block removals write tombstones (`placed = false`), never field deletes,
//! so late-arriving edits can still compare timestamps.

use crate::error::StoreError;
use crate::grid::{block_field, chunk_key};
use crate::types::{now_ms, BlockPos, BlockRecord, FriendRecord, PlayerRecord, TerrainSeeds, Vec3};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// KV trait
// ---------------------------------------------------------------------------

pub trait KvStore: Send + Sync {
    fn get_hash(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;
    fn put_hash(&self, key: &str, hash: HashMap<String, String>) -> Result<(), StoreError>;
    fn get_field(&self, key: &str, field: &str) -> Result<Option<String>, StoreError>;
    fn set_field(&self, key: &str, field: &str, value: String) -> Result<(), StoreError>;
    fn del_field(&self, key: &str, field: &str) -> Result<(), StoreError>;
}

/// Nested-map store guarded by one lock. Durability is the deployment's
/// concern; this implementation backs tests and single-node setups.
#[derive(Default)]
pub struct MemoryKv {
    data: RwLock<HashMap<String, HashMap<String, String>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryKv {
    fn get_hash(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        Ok(self.data.read().get(key).cloned().unwrap_or_default())
    }

    fn put_hash(&self, key: &str, hash: HashMap<String, String>) -> Result<(), StoreError> {
        self.data.write().insert(key.to_string(), hash);
        Ok(())
    }

    fn get_field(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .data
            .read()
            .get(key)
            .and_then(|h| h.get(field))
            .cloned())
    }

    fn set_field(&self, key: &str, field: &str, value: String) -> Result<(), StoreError> {
        self.data
            .write()
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value);
        Ok(())
    }

    fn del_field(&self, key: &str, field: &str) -> Result<(), StoreError> {
        if let Some(h) = self.data.write().get_mut(key) {
            h.remove(field);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Typed layout
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredPose {
    position: Vec3,
    rotation: Vec3,
}

/// Typed facade over the raw hash store.
#[derive(Clone)]
pub struct WorldStore {
    kv: Arc<dyn KvStore>,
}

impl WorldStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    fn decode<T: for<'de> Deserialize<'de>>(
        key: &str,
        field: &str,
        raw: &str,
    ) -> Result<T, StoreError> {
        serde_json::from_str(raw).map_err(|source| StoreError::Corrupt {
            key: key.to_string(),
            field: field.to_string(),
            source,
        })
    }

    // -----------------------------------------------------------------------
    // Terrain seeds
    // -----------------------------------------------------------------------

    /// Seeds for a level, minted on first access. The level name is mixed
    /// with the wall clock so two levels created at the same instant differ.
    pub fn terrain_seeds(&self, level: &str) -> Result<TerrainSeeds, StoreError> {
        let key = format!("{}:meta", level);
        if let Some(raw) = self.kv.get_field(&key, "seeds")? {
            return Self::decode(&key, "seeds", &raw);
        }
        let digest = md5::compute(format!("{}:{}", level, now_ms()));
        let seeds = TerrainSeeds {
            elevation: u64::from_le_bytes(digest.0[..8].try_into().unwrap_or_default()),
            moisture: u64::from_le_bytes(digest.0[8..].try_into().unwrap_or_default()),
        };
        self.kv.set_field(
            &key,
            "seeds",
            serde_json::to_string(&seeds).unwrap_or_default(),
        )?;
        Ok(seeds)
    }

    // -----------------------------------------------------------------------
    // Blocks
    // -----------------------------------------------------------------------

    /// Write one accepted batch. Placements and tombstones go through the
    /// same path; a tombstone simply carries `placed = false`.
    pub fn write_blocks(&self, level: &str, blocks: &[BlockRecord]) -> Result<(), StoreError> {
        for block in blocks {
            let (cx, cz) = crate::grid::chunk_of(block.x, block.z);
            let raw = serde_json::to_string(block).unwrap_or_default();
            self.kv
                .set_field(&chunk_key(level, cx, cz), &block_field(block.x, block.y, block.z), raw)?;
        }
        Ok(())
    }

    pub fn get_block(&self, level: &str, pos: BlockPos) -> Result<Option<BlockRecord>, StoreError> {
        let (cx, cz) = crate::grid::chunk_of(pos.x, pos.z);
        let key = chunk_key(level, cx, cz);
        let field = block_field(pos.x, pos.y, pos.z);
        match self.kv.get_field(&key, &field)? {
            Some(raw) => Ok(Some(Self::decode(&key, &field, &raw)?)),
            None => Ok(None),
        }
    }

    /// Every custom-block record of one chunk, tombstones included.
    pub fn chunk_blocks(
        &self,
        level: &str,
        chunk_x: i32,
        chunk_z: i32,
    ) -> Result<Vec<BlockRecord>, StoreError> {
        let key = chunk_key(level, chunk_x, chunk_z);
        let hash = self.kv.get_hash(&key)?;
        let mut blocks = Vec::with_capacity(hash.len());
        for (field, raw) in &hash {
            blocks.push(Self::decode(&key, field, raw)?);
        }
        Ok(blocks)
    }

    // -----------------------------------------------------------------------
    // Last-known positions
    // -----------------------------------------------------------------------

    pub fn last_position(
        &self,
        level: &str,
        username: &str,
    ) -> Result<Option<(Vec3, Vec3)>, StoreError> {
        let key = format!("{}:positions", level);
        match self.kv.get_field(&key, username)? {
            Some(raw) => {
                let pose: StoredPose = Self::decode(&key, username, &raw)?;
                Ok(Some((pose.position, pose.rotation)))
            }
            None => Ok(None),
        }
    }

    pub fn set_last_position(
        &self,
        level: &str,
        username: &str,
        position: Vec3,
        rotation: Vec3,
    ) -> Result<(), StoreError> {
        let pose = StoredPose { position, rotation };
        self.kv.set_field(
            &format!("{}:positions", level),
            username,
            serde_json::to_string(&pose).unwrap_or_default(),
        )
    }

    // -----------------------------------------------------------------------
    // Player records
    // -----------------------------------------------------------------------

    pub fn player_record(
        &self,
        level: &str,
        username: &str,
    ) -> Result<Option<PlayerRecord>, StoreError> {
        let key = format!("{}:player:{}", level, username);
        let hash = self.kv.get_hash(&key)?;
        if hash.is_empty() {
            return Ok(None);
        }
        let field = |name: &str| hash.get(name).and_then(|v| v.parse().ok()).unwrap_or(0);
        Ok(Some(PlayerRecord {
            score: hash
                .get("score")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            joined_at: field("joined_at"),
            last_seen: field("last_seen"),
        }))
    }

    /// Fetch-or-create, refreshing `last_seen`.
    pub fn touch_player_record(
        &self,
        level: &str,
        username: &str,
    ) -> Result<PlayerRecord, StoreError> {
        let now = now_ms();
        let key = format!("{}:player:{}", level, username);
        let mut record = self
            .player_record(level, username)?
            .unwrap_or(PlayerRecord {
                score: 0,
                joined_at: now,
                last_seen: now,
            });
        record.last_seen = now;
        self.kv
            .set_field(&key, "score", record.score.to_string())?;
        self.kv
            .set_field(&key, "joined_at", record.joined_at.to_string())?;
        self.kv
            .set_field(&key, "last_seen", record.last_seen.to_string())?;
        Ok(record)
    }

    /// Read-modify-write of the single score field.
    pub fn increment_score(
        &self,
        level: &str,
        username: &str,
        delta: i64,
    ) -> Result<i64, StoreError> {
        let key = format!("{}:player:{}", level, username);
        let current: i64 = self
            .kv
            .get_field(&key, "score")?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let next = current + delta;
        self.kv.set_field(&key, "score", next.to_string())?;
        Ok(next)
    }

    // -----------------------------------------------------------------------
    // Friendships
    // -----------------------------------------------------------------------

    pub fn friend_record(&self, username: &str) -> Result<FriendRecord, StoreError> {
        match self.kv.get_field("social", username)? {
            Some(raw) => Self::decode("social", username, &raw),
            None => Ok(FriendRecord::default()),
        }
    }

    pub fn set_friend_record(
        &self,
        username: &str,
        record: &FriendRecord,
    ) -> Result<(), StoreError> {
        self.kv.set_field(
            "social",
            username,
            serde_json::to_string(record).unwrap_or_default(),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
