//! `WorldApi` — the request/response boundary between a client and the
//! world service.
//!
//! The in-process server implements this directly; a networked deployment
//! wraps it in whatever request-reply transport it uses. Signatures are
//! synchronous and dyn-safe so the sync manager can hold `Arc<dyn WorldApi>`
//! and tests can substitute failing stubs.

use crate::error::ApiError;
use crate::protocol::{
    Ack, ChunkStateRequest, ChunkStateResponse, ConnectRequest, ConnectResponse, FriendRequest,
    FriendResponse, ModifyRequest, ModifyResponse, PositionUpdate, UpvoteRequest,
};

pub trait WorldApi: Send + Sync {
    /// Join a level. Returns viewer mode when the identity is already
    /// active in the same level.
    fn connect(&self, req: ConnectRequest) -> Result<ConnectResponse, ApiError>;

    /// Clean shutdown: persists the last-known position and frees presence.
    fn disconnect(&self, username: &str, level: &str) -> Result<Ack, ApiError>;

    fn update_position(&self, req: PositionUpdate) -> Result<Ack, ApiError>;

    /// Submit a batch of block modifications (see the ingestion pipeline
    /// for the sequential validation contract).
    fn modify_blocks(&self, req: ModifyRequest) -> Result<ModifyResponse, ApiError>;

    fn chunk_state(&self, req: ChunkStateRequest) -> Result<ChunkStateResponse, ApiError>;

    fn add_friend(&self, req: FriendRequest) -> Result<FriendResponse, ApiError>;

    fn remove_friend(&self, req: FriendRequest) -> Result<FriendResponse, ApiError>;

    /// Validates and acks immediately; the score mutation is asynchronous.
    fn upvote(&self, req: UpvoteRequest) -> Result<Ack, ApiError>;
}
