//! Wire protocol — every message that crosses the boundary between a
//! client and the world service.
//!
//! ## Channel map
//!
//! | Traffic                      | Carried by                          |
//! |------------------------------|-------------------------------------|
//! | requests / responses         | `WorldApi` (request-reply)          |
//! | block edits, positions       | regional topic `region:{lvl}:{x}:{z}` |
//! | friendships, player counts   | level topic `game:{lvl}`            |
//!
//! ## Design rules
//!
//! 1. Every struct is `Serialize + Deserialize` with snake_case JSON.
//! 2. Broadcasts are one tagged enum (`kind`), so a topic can carry more
//!    than one payload family without ambiguity.
//! 3. Timestamps are unix milliseconds from [`crate::types::now_ms`].

use crate::types::{BlockRecord, Modification, ModifyAction, BlockPos, PlayerRecord, TerrainSeeds, Vec3};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Connect
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectRequest {
    pub level: String,
    /// Known identity; a fresh one is minted when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

/// `Viewer` is handed out when the identity is already active in the same
/// level; the client must disable write operations in that mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientMode {
    Player,
    Viewer,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub username: String,
    pub position: Vec3,
    pub rotation: Vec3,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkState {
    pub chunk_x: i32,
    pub chunk_z: i32,
    pub blocks: Vec<BlockRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectResponse {
    pub mode: ClientMode,
    pub username: String,
    pub level: String,
    pub terrain_seeds: TerrainSeeds,
    pub spawn_position: Vec3,
    pub initial_chunks: Vec<ChunkState>,
    pub players: Vec<PlayerSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub player_data: Option<PlayerRecord>,
    pub player_count: usize,
}

// ---------------------------------------------------------------------------
// Position updates
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionUpdate {
    pub username: String,
    pub level: String,
    pub position: Vec3,
    pub rotation: Vec3,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ack {
    pub ok: bool,
}

// ---------------------------------------------------------------------------
// Modification batches
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModifyRequest {
    pub username: String,
    pub level: String,
    pub modifications: Vec<Modification>,
}

/// `failed_at` is the index of the first invalid entry; everything before
/// it was accepted, everything at and after it was never processed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModifyResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ModifyResponse {
    pub fn accepted() -> Self {
        Self {
            ok: true,
            failed_at: None,
            message: None,
        }
    }

    pub fn failed(index: usize, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            failed_at: Some(index),
            message: Some(message.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Chunk-state queries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct ChunkCoord {
    pub chunk_x: i32,
    pub chunk_z: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkStateRequest {
    pub username: String,
    pub level: String,
    pub chunks: Vec<ChunkCoord>,
}

/// Out-of-bound chunk coordinates are silently filtered, not errored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkStateResponse {
    pub chunks: Vec<ChunkState>,
    pub request_timestamp: u64,
    pub response_timestamp: u64,
}

// ---------------------------------------------------------------------------
// Friends & upvotes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FriendRequest {
    pub username: String,
    pub level: String,
    pub friend_username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FriendResponse {
    pub ok: bool,
    pub friends: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpvoteRequest {
    pub username: String,
    pub level: String,
    pub builder_username: String,
}

// ---------------------------------------------------------------------------
// Broadcasts
// ---------------------------------------------------------------------------

/// A confirmed block edit, fanned out on the regional topic before it is
/// persisted so live clients converge with minimal latency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockModify {
    pub username: String,
    pub action: ModifyAction,
    pub position: BlockPos,
    #[serde(rename = "type")]
    pub block_type: Option<u32>,
    pub client_timestamp: u64,
    pub server_timestamp: u64,
}

impl BlockModify {
    /// The timestamp used for last-writer-wins comparison.
    pub fn effective_timestamp(&self) -> u64 {
        self.server_timestamp.max(self.client_timestamp)
    }
}

/// Every payload published to a topic. The `kind` tag lets one topic carry
/// several payload families.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Broadcast {
    BlockModify(BlockModify),
    PlayerPositions {
        level: String,
        players: Vec<PlayerSnapshot>,
    },
    FriendshipAdded {
        username: String,
        friend_username: String,
    },
    FriendshipRemoved {
        username: String,
        friend_username: String,
    },
    PlayerCountUpdate {
        level: String,
        count: usize,
    },
}
