//! Voxel World Engine
//!
//! A regional synchronization engine for co-edited block worlds: many
//! concurrent clients edit a shared voxel world in near-real time,
//! tolerating intermittent connectivity, without every client seeing
//! every edit.
//!
//! ## Architecture
//!
//! ```text
//! WorldAgent  (bus.rs)                        ← fanout + sweep loops
//!   └── WorldService  (service.rs)            ← request handling
//!         ├── IngestPipeline  (ingest.rs)     ← validate/stamp/broadcast/persist
//!         ├── PresenceRegistry (presence.rs)  ← connected identities
//!         ├── spawn  (spawn.rs)               ← spiral placement
//!         └── WorldStore  (store.rs)          ← KV layout
//!
//! SyncManager  (client/sync.rs)               ← chunk cache, subscriptions,
//!   ├── TopicRegistry (client/topics.rs)         edit batching, offline queue
//!   ├── OfflineQueue  (client/queue.rs)
//!   └── resolve       (client/resolve.rs)     ← last-writer-wins
//! ```
//!
//! The two halves meet at three seams: the `WorldApi` request boundary,
//! the `Transport` pub/sub boundary (regions are the topic unit), and the
//! shared `grid` coordinate scheme, which must match on both sides.

// Protocol types are always available (no server/client feature needed).
pub mod api;
pub mod error;
pub mod grid;
pub mod protocol;
pub mod types;

// The transport seam is shared by both halves.
#[cfg(any(feature = "server", feature = "client"))]
pub mod transport;

// Server-side modules require the `server` feature.
#[cfg(feature = "server")]
pub mod bus;
#[cfg(feature = "server")]
pub mod ingest;
#[cfg(feature = "server")]
pub mod presence;
#[cfg(feature = "server")]
pub mod service;
#[cfg(feature = "server")]
pub mod spawn;
#[cfg(feature = "server")]
pub mod store;

// Client-side modules require the `client` feature.
#[cfg(feature = "client")]
pub mod client;

// Convenience re-exports
pub use api::WorldApi;
pub use grid::{CHUNK_SIZE, REGION_SIZE};
pub use types::{BlockPos, BlockRecord, ClientConfig, Modification, ModifyAction, ServerConfig, Vec3};

#[cfg(feature = "server")]
pub use bus::{WorldAgent, WorldAgentConfig};
#[cfg(feature = "server")]
pub use presence::PresenceRegistry;
#[cfg(feature = "server")]
pub use service::WorldService;
#[cfg(feature = "server")]
pub use store::{KvStore, MemoryKv, WorldStore};
#[cfg(any(feature = "server", feature = "client"))]
pub use transport::{MemoryTransport, Transport};

#[cfg(feature = "client")]
pub use client::{ClientEvent, SyncManager};
