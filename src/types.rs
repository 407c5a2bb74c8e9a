//! Core data model shared by the client and the server.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

// ---------------------------------------------------------------------------
// Basic math
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }
}

impl std::fmt::Display for Vec3 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.2}, {:.2}, {:.2})", self.x, self.y, self.z)
    }
}

/// Integer block address in world units.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct BlockPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPos {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }
}

impl std::fmt::Display for BlockPos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{},{},{}]", self.x, self.y, self.z)
    }
}

// ---------------------------------------------------------------------------
// Block records & modifications
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModifyAction {
    Place,
    Remove,
}

/// A persisted custom block — a deviation from generated terrain.
///
/// At most one authoritative record exists per (x, y, z) per level.
/// `placed = false` is a tombstone: the record stays so that a later,
/// stale "place" broadcast can still lose the timestamp comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub x: i32,
    pub y: i32,
    pub z: i32,
    #[serde(rename = "type")]
    pub block_type: Option<u32>,
    pub placed: bool,
    pub username: String,
    pub timestamp: u64,
}

impl BlockRecord {
    pub fn pos(&self) -> BlockPos {
        BlockPos::new(self.x, self.y, self.z)
    }
}

/// A client-originated place/remove intent, pre-acceptance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Modification {
    pub position: BlockPos,
    pub block_type: Option<u32>,
    pub action: ModifyAction,
    pub client_timestamp: u64,
}

// ---------------------------------------------------------------------------
// Presence & player data
// ---------------------------------------------------------------------------

/// Server-memory-only record of a connected identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceRecord {
    pub username: String,
    pub level: String,
    pub position: Vec3,
    pub rotation: Vec3,
    /// Unix milliseconds of the last position update (or connect).
    pub last_update: u64,
}

/// Seeds handed to the terrain generator. Opaque to the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerrainSeeds {
    pub elevation: u64,
    pub moisture: u64,
}

/// Per-(username, level) durable record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerRecord {
    pub score: i64,
    pub joined_at: u64,
    pub last_seen: u64,
}

/// Global friendship record, keyed by username in the social hash.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FriendRecord {
    pub friends: Vec<String>,
    pub friended_by: Vec<String>,
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Maximum |x| and |z| accepted by edit validation.
    pub max_coord: i32,
    /// Chunk radius of the initial-state box returned on connect.
    pub draw_distance: i32,
    /// Y assigned to freshly placed spawn points.
    pub spawn_height: f32,
    /// Presence entries older than this are swept.
    pub staleness_timeout_ms: u64,
    /// Position fanout rate.
    pub broadcast_hz: f32,
    /// Persistence retry attempts after the initial failure.
    pub persist_retries: u32,
    /// First retry delay; doubled per attempt.
    pub persist_backoff_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_coord: 100_000,
            draw_distance: 3,
            spawn_height: 32.0,
            staleness_timeout_ms: 120_000,
            broadcast_hz: 10.0,
            persist_retries: 3,
            persist_backoff_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Chunk radius the renderer draws; the state buffer is twice this.
    pub draw_distance: i32,
    /// Quiet period before a pending batch is flushed.
    pub debounce_interval_ms: u64,
    /// Pending-buffer size that forces an immediate flush.
    pub max_batch_size: usize,
    /// Directory holding the durable offline queues (one per level).
    pub offline_dir: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            draw_distance: 3,
            debounce_interval_ms: 1000,
            max_batch_size: 100,
            offline_dir: PathBuf::from(".voxel-world/offline"),
        }
    }
}

impl ClientConfig {
    /// Chunk radius kept loaded around the player.
    pub fn state_buffer(&self) -> i32 {
        self.draw_distance * 2
    }

    /// Chebyshev distance beyond which loaded chunks are evicted.
    ///
    /// One draw-distance wider than the state buffer so a player pacing on
    /// a subscribe boundary does not thrash load/unload.
    pub fn unload_distance(&self) -> i32 {
        self.state_buffer() + self.draw_distance
    }
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// Unix milliseconds. Every timestamp in the protocol uses this clock.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
