//! Client-side synchronization: chunk cache, region subscriptions, edit
//! batching, offline durability, and conflict resolution.

pub mod events;
pub mod queue;
pub mod resolve;
pub mod sync;
pub mod topics;

pub use events::ClientEvent;
pub use queue::OfflineQueue;
pub use resolve::{apply_local, resolve_incoming, Resolution};
pub use sync::{required_chunks, required_regions, SyncManager};
pub use topics::{Route, TopicRegistry};
