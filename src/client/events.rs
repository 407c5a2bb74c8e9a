//! Semantic events handed from the sync manager to the rendering layer.
//!
//! The manager translates raw topic messages into these after conflict
//! resolution; a renderer drains them via [`super::sync::SyncManager::poll`]
//! and never touches the wire format.

use crate::protocol::PlayerSnapshot;
use crate::types::BlockPos;

#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// A block in a loaded chunk changed (remote edit that won resolution).
    /// `placed = false` means the position reverted to generated terrain.
    BlockChanged {
        position: BlockPos,
        block_type: Option<u32>,
        placed: bool,
        username: String,
    },

    /// A requested chunk's custom blocks arrived and were cached.
    ChunkLoaded { chunk_x: i32, chunk_z: i32 },

    /// Batched poses of nearby players (self already filtered out).
    PlayerPositions { players: Vec<PlayerSnapshot> },

    FriendshipAdded {
        username: String,
        friend_username: String,
    },
    FriendshipRemoved {
        username: String,
        friend_username: String,
    },

    PlayerCountUpdate { level: String, count: usize },
}
