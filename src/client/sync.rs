//! `SyncManager` — the client half of the synchronization engine.
//!
//! Owns the loaded-chunk cache, the region subscriptions, the pending
//! edit buffer with its debounce timer, and the durable offline queue.
//! The embedding renderer drives it with three calls:
//!
//! ```text
//! manager.connect(level, identity)      // once
//! manager.update_position(pos, rot)     // when the player moves
//! manager.poll(256)                     // every frame → ClientEvents
//! ```
//!
//! All state sits behind one mutex; the manager is a cheap cloneable
//! handle, and only subscriptions, chunk fetches, and the debounce timer
//! cross an async boundary.

use crate::api::WorldApi;
use crate::client::events::ClientEvent;
use crate::client::queue::OfflineQueue;
use crate::client::resolve::{apply_local, resolve_incoming, Resolution};
use crate::client::topics::{Route, TopicRegistry};
use crate::error::{ApiError, TransportError};
use crate::grid::{chunk_of, level_topic, region_of, region_topic};
use crate::protocol::{
    Broadcast, ChunkCoord, ChunkState, ChunkStateRequest, ClientMode, ConnectRequest,
    ConnectResponse, ModifyRequest, ModifyResponse, PositionUpdate,
};
use crate::transport::Transport;
use crate::types::{
    now_ms, BlockPos, BlockRecord, ClientConfig, Modification, ModifyAction, Vec3,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

// ---------------------------------------------------------------------------
// Pure geometry
// ---------------------------------------------------------------------------

pub fn chebyshev(a: (i32, i32), b: (i32, i32)) -> i32 {
    (a.0 - b.0).abs().max((a.1 - b.1).abs())
}

/// Every chunk within `state_buffer` (Chebyshev, inclusive) of the
/// player's chunk: exactly `(2 * state_buffer + 1)²` entries.
pub fn required_chunks(pcx: i32, pcz: i32, state_buffer: i32) -> Vec<(i32, i32)> {
    let mut chunks = Vec::with_capacity(((2 * state_buffer + 1) * (2 * state_buffer + 1)) as usize);
    for cx in (pcx - state_buffer)..=(pcx + state_buffer) {
        for cz in (pcz - state_buffer)..=(pcz + state_buffer) {
            chunks.push((cx, cz));
        }
    }
    chunks
}

/// The deduplicated regions covering a chunk set.
pub fn required_regions(chunks: &[(i32, i32)]) -> Vec<(i32, i32)> {
    let mut regions = Vec::new();
    for &(cx, cz) in chunks {
        let r = region_of(cx, cz);
        if !regions.contains(&r) {
            regions.push(r);
        }
    }
    regions
}

// ---------------------------------------------------------------------------
// Internal plumbing
// ---------------------------------------------------------------------------

enum Incoming {
    /// A raw broadcast from a subscribed topic.
    Topic(String, bytes::Bytes),
    /// A chunk fetch finished.
    ChunksLoaded(Vec<ChunkState>),
    /// A chunk fetch failed; the keys go back to fetchable.
    ChunkFetchFailed(Vec<(i32, i32)>),
}

struct SyncState {
    username: String,
    level: String,
    mode: ClientMode,
    connected: bool,
    loaded: HashMap<(i32, i32), Vec<BlockRecord>>,
    pending_chunks: HashSet<(i32, i32)>,
    region_subs: HashMap<(i32, i32), JoinHandle<()>>,
    level_sub: Option<JoinHandle<()>>,
    registry: TopicRegistry,
    pending_mods: Vec<Modification>,
    debounce: Option<JoinHandle<()>>,
    queue: Option<OfflineQueue>,
    incoming_rx: mpsc::UnboundedReceiver<Incoming>,
}

struct Inner {
    config: ClientConfig,
    api: Arc<dyn WorldApi>,
    transport: Arc<dyn Transport>,
    incoming_tx: mpsc::UnboundedSender<Incoming>,
    state: Mutex<SyncState>,
}

pub struct SyncManager {
    inner: Arc<Inner>,
}

impl Clone for SyncManager {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl SyncManager {
    pub fn new(config: ClientConfig, api: Arc<dyn WorldApi>, transport: Arc<dyn Transport>) -> Self {
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                config,
                api,
                transport,
                incoming_tx,
                state: Mutex::new(SyncState {
                    username: String::new(),
                    level: String::new(),
                    mode: ClientMode::Player,
                    connected: false,
                    loaded: HashMap::new(),
                    pending_chunks: HashSet::new(),
                    region_subs: HashMap::new(),
                    level_sub: None,
                    registry: TopicRegistry::new(),
                    pending_mods: Vec::new(),
                    debounce: None,
                    queue: None,
                    incoming_rx,
                }),
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Connection lifecycle
    // -----------------------------------------------------------------------

    /// Join a level: fetch initial state, subscribe the level topic and the
    /// spawn area's regions, then replay any offline backlog.
    pub fn connect(
        &self,
        level: &str,
        username: Option<String>,
    ) -> Result<ConnectResponse, ApiError> {
        let resp = self.inner.api.connect(ConnectRequest {
            level: level.to_string(),
            username,
        })?;

        let queue = match OfflineQueue::open(&self.inner.config.offline_dir, level) {
            Ok(q) => Some(q),
            Err(e) => {
                log::error!("offline queue unavailable for {}: {}", level, e);
                None
            }
        };

        {
            let mut st = self.inner.state.lock();
            st.username = resp.username.clone();
            st.level = resp.level.clone();
            st.mode = resp.mode;
            st.connected = true;
            st.loaded.clear();
            st.pending_chunks.clear();
            for chunk in &resp.initial_chunks {
                st.loaded
                    .insert((chunk.chunk_x, chunk.chunk_z), chunk.blocks.clone());
            }
            st.queue = queue;

            let topic = level_topic(level);
            st.registry.register(
                &topic,
                Route::Level {
                    level: level.to_string(),
                },
            );
            st.level_sub = Some(self.spawn_forwarder(topic));
        }

        let (pcx, pcz) = chunk_of(resp.spawn_position.x as i32, resp.spawn_position.z as i32);
        self.update_subscriptions(pcx, pcz);
        self.sync_offline_modifications();

        log::info!(
            "connected to {} as {} ({:?}), {} chunk(s) preloaded",
            resp.level,
            resp.username,
            resp.mode,
            resp.initial_chunks.len()
        );
        Ok(resp)
    }

    /// Clean shutdown: flush the pending batch *before* tearing down
    /// subscriptions so no in-flight edit is silently lost.
    pub fn disconnect(&self) {
        self.flush_batch();

        let (username, level, was_connected) = {
            let mut st = self.inner.state.lock();
            if let Some(timer) = st.debounce.take() {
                timer.abort();
            }
            for (_, handle) in st.region_subs.drain() {
                handle.abort();
            }
            if let Some(handle) = st.level_sub.take() {
                handle.abort();
            }
            st.registry = TopicRegistry::new();
            st.loaded.clear();
            st.pending_chunks.clear();
            let was_connected = st.connected;
            st.connected = false;
            (st.username.clone(), st.level.clone(), was_connected)
        };

        if was_connected {
            if let Err(e) = self.inner.api.disconnect(&username, &level) {
                log::warn!("disconnect notification failed: {}", e);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Movement-driven maintenance
    // -----------------------------------------------------------------------

    /// Report a new pose; keeps chunks, subscriptions, and eviction in step.
    pub fn update_position(&self, position: Vec3, rotation: Vec3) {
        let (pcx, pcz) = chunk_of(position.x as i32, position.z as i32);
        self.request_missing_chunks(pcx, pcz);
        self.update_subscriptions(pcx, pcz);
        self.unload_distant(pcx, pcz);

        let (username, level) = {
            let st = self.inner.state.lock();
            if !st.connected {
                return;
            }
            (st.username.clone(), st.level.clone())
        };
        if let Err(e) = self.inner.api.update_position(PositionUpdate {
            username,
            level,
            position,
            rotation,
        }) {
            log::warn!("position update failed: {}", e);
        }
    }

    /// Required chunks not already loaded and not already in flight.
    pub fn missing_chunks(&self, required: &[(i32, i32)]) -> Vec<(i32, i32)> {
        let st = self.inner.state.lock();
        required
            .iter()
            .filter(|k| !st.loaded.contains_key(*k) && !st.pending_chunks.contains(*k))
            .copied()
            .collect()
    }

    fn request_missing_chunks(&self, pcx: i32, pcz: i32) {
        let required = required_chunks(pcx, pcz, self.inner.config.state_buffer());
        let missing = self.missing_chunks(&required);
        if missing.is_empty() {
            return;
        }

        let request = {
            let mut st = self.inner.state.lock();
            st.pending_chunks.extend(missing.iter().copied());
            ChunkStateRequest {
                username: st.username.clone(),
                level: st.level.clone(),
                chunks: missing
                    .iter()
                    .map(|&(cx, cz)| ChunkCoord {
                        chunk_x: cx,
                        chunk_z: cz,
                    })
                    .collect(),
            }
        };

        let api = self.inner.api.clone();
        let tx = self.inner.incoming_tx.clone();
        tokio::spawn(async move {
            match api.chunk_state(request) {
                Ok(resp) => {
                    let _ = tx.send(Incoming::ChunksLoaded(resp.chunks));
                }
                Err(e) => {
                    log::warn!("chunk fetch failed: {}", e);
                    let _ = tx.send(Incoming::ChunkFetchFailed(missing));
                }
            }
        });
    }

    /// Evict loaded chunks beyond the hysteresis distance. Never touches
    /// anything inside the state buffer.
    pub fn unload_distant(&self, pcx: i32, pcz: i32) {
        let limit = self.inner.config.unload_distance();
        let mut st = self.inner.state.lock();
        st.loaded
            .retain(|&key, _| chebyshev(key, (pcx, pcz)) <= limit);
    }

    /// Diff subscribed regions against the required set. Idempotent: rapid
    /// repeated calls at a region boundary neither duplicate subscriptions
    /// nor leak forwarder tasks.
    pub fn update_subscriptions(&self, pcx: i32, pcz: i32) {
        let required = required_regions(&required_chunks(
            pcx,
            pcz,
            self.inner.config.state_buffer(),
        ));

        let to_open: Vec<(i32, i32)> = {
            let mut st = self.inner.state.lock();
            let level = st.level.clone();

            let stale: Vec<(i32, i32)> = st
                .region_subs
                .keys()
                .filter(|k| !required.contains(k))
                .copied()
                .collect();
            for key in stale {
                if let Some(handle) = st.region_subs.remove(&key) {
                    handle.abort();
                }
                st.registry.unregister(&region_topic(&level, key.0, key.1));
                log::debug!("unsubscribed region ({}, {})", key.0, key.1);
            }

            required
                .into_iter()
                .filter(|k| !st.region_subs.contains_key(k))
                .collect()
        };

        for key in to_open {
            let topic = {
                let st = self.inner.state.lock();
                region_topic(&st.level, key.0, key.1)
            };
            let handle = self.spawn_forwarder(topic.clone());
            let mut st = self.inner.state.lock();
            st.registry.register(
                &topic,
                Route::Region {
                    region_x: key.0,
                    region_z: key.1,
                },
            );
            st.region_subs.insert(key, handle);
            log::debug!("subscribed region ({}, {})", key.0, key.1);
        }
    }

    /// Forward one topic's messages into the incoming queue until the
    /// subscription dies or is aborted.
    fn spawn_forwarder(&self, topic: String) -> JoinHandle<()> {
        let mut sub = self.inner.transport.subscribe(&topic);
        let tx = self.inner.incoming_tx.clone();
        tokio::spawn(async move {
            loop {
                match sub.recv().await {
                    Ok(payload) => {
                        if tx.send(Incoming::Topic(topic.clone(), payload)).is_err() {
                            break;
                        }
                    }
                    Err(TransportError::Lagged(topic, n)) => {
                        log::warn!("subscription to {} lagged, lost {} message(s)", topic, n);
                    }
                    Err(_) => break,
                }
            }
        })
    }

    // -----------------------------------------------------------------------
    // Edits
    // -----------------------------------------------------------------------

    /// Record a local edit: apply it optimistically, buffer it, and either
    /// flush (full batch) or re-arm the debounce timer.
    ///
    /// Returns false when the edit was refused (viewer mode).
    pub fn add_modification(
        &self,
        position: BlockPos,
        block_type: Option<u32>,
        action: ModifyAction,
    ) -> bool {
        let flush_now = {
            let mut st = self.inner.state.lock();
            if st.mode == ClientMode::Viewer {
                log::warn!("viewer mode: dropping write at {}", position);
                return false;
            }
            let m = Modification {
                position,
                block_type,
                action,
                client_timestamp: now_ms(),
            };
            let chunk = chunk_of(position.x, position.z);
            let username = st.username.clone();
            if let Some(blocks) = st.loaded.get_mut(&chunk) {
                apply_local(blocks, &m, &username);
            }
            st.pending_mods.push(m);
            st.pending_mods.len() >= self.inner.config.max_batch_size
        };

        if flush_now {
            self.flush_batch();
        } else {
            self.reset_debounce();
        }
        true
    }

    /// Cancel-and-reschedule: at most one pending flush timer exists.
    fn reset_debounce(&self) {
        let manager = self.clone();
        let delay = Duration::from_millis(self.inner.config.debounce_interval_ms);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            manager.flush_batch();
        });
        let mut st = self.inner.state.lock();
        if let Some(old) = st.debounce.replace(timer) {
            old.abort();
        }
    }

    /// Swap out the pending buffer and send it as one request.
    ///
    /// Transport failure routes the batch to the durable offline queue —
    /// nothing is dropped. A partial-failure response is logged and
    /// returned; resynchronizing the affected positions is the caller's
    /// policy.
    pub fn flush_batch(&self) -> Option<ModifyResponse> {
        let (batch, username, level) = {
            let mut st = self.inner.state.lock();
            if let Some(timer) = st.debounce.take() {
                timer.abort();
            }
            if st.pending_mods.is_empty() {
                return None;
            }
            (
                std::mem::take(&mut st.pending_mods),
                st.username.clone(),
                st.level.clone(),
            )
        };

        match self.inner.api.modify_blocks(ModifyRequest {
            username,
            level,
            modifications: batch.clone(),
        }) {
            Ok(resp) => {
                if let Some(index) = resp.failed_at {
                    log::warn!(
                        "batch partially rejected at index {}: {}",
                        index,
                        resp.message.as_deref().unwrap_or("no reason given")
                    );
                }
                Some(resp)
            }
            Err(e) => {
                log::warn!(
                    "flush failed ({}); queueing {} modification(s) offline",
                    e,
                    batch.len()
                );
                let mut st = self.inner.state.lock();
                match st.queue.as_mut() {
                    Some(q) => {
                        if let Err(io) = q.append(&batch) {
                            log::error!("CRITICAL: offline queue write failed: {}", io);
                        }
                    }
                    None => log::error!(
                        "CRITICAL: no offline queue, {} modification(s) lost",
                        batch.len()
                    ),
                }
                None
            }
        }
    }

    /// Replay the offline backlog in one batch. Full success clears it; a
    /// partial failure advances the cursor to the failed index; transport
    /// failure leaves it untouched for the next reconnect.
    pub fn sync_offline_modifications(&self) -> Option<ModifyResponse> {
        let (batch, username, level) = {
            let st = self.inner.state.lock();
            let queue = st.queue.as_ref()?;
            if queue.is_empty() {
                return None;
            }
            (
                queue.pending().to_vec(),
                st.username.clone(),
                st.level.clone(),
            )
        };

        log::info!("replaying {} offline modification(s)", batch.len());
        match self.inner.api.modify_blocks(ModifyRequest {
            username,
            level,
            modifications: batch,
        }) {
            Ok(resp) => {
                let mut st = self.inner.state.lock();
                if let Some(queue) = st.queue.as_mut() {
                    let result = match resp.failed_at {
                        None => queue.clear(),
                        Some(index) => queue.advance(index),
                    };
                    if let Err(e) = result {
                        log::error!("failed to advance offline queue: {}", e);
                    }
                }
                Some(resp)
            }
            Err(e) => {
                log::warn!("offline replay failed, keeping queue: {}", e);
                None
            }
        }
    }

    // -----------------------------------------------------------------------
    // Poll — drain broadcasts into renderer events
    // -----------------------------------------------------------------------

    /// Drain up to `limit` queued messages, resolve them against local
    /// state, and return the events the renderer should apply.
    pub fn poll(&self, limit: usize) -> Vec<ClientEvent> {
        let mut events = Vec::new();
        for _ in 0..limit {
            let item = match self.inner.state.lock().incoming_rx.try_recv() {
                Ok(item) => item,
                Err(_) => break,
            };
            match item {
                Incoming::Topic(topic, payload) => {
                    self.apply_broadcast(&topic, &payload, &mut events);
                }
                Incoming::ChunksLoaded(chunks) => {
                    let mut st = self.inner.state.lock();
                    for chunk in chunks {
                        let key = (chunk.chunk_x, chunk.chunk_z);
                        st.pending_chunks.remove(&key);
                        st.loaded.insert(key, chunk.blocks);
                        events.push(ClientEvent::ChunkLoaded {
                            chunk_x: key.0,
                            chunk_z: key.1,
                        });
                    }
                }
                Incoming::ChunkFetchFailed(keys) => {
                    let mut st = self.inner.state.lock();
                    for key in keys {
                        st.pending_chunks.remove(&key);
                    }
                }
            }
        }
        events
    }

    fn apply_broadcast(&self, topic: &str, payload: &[u8], events: &mut Vec<ClientEvent>) {
        let mut st = self.inner.state.lock();
        let Some((_route, msg)) = st.registry.dispatch(topic, payload) else {
            return;
        };
        match msg {
            Broadcast::BlockModify(m) => {
                let username = st.username.clone();
                let chunk = chunk_of(m.position.x, m.position.z);
                let Some(blocks) = st.loaded.get_mut(&chunk) else {
                    return;
                };
                if resolve_incoming(blocks, &m, &username) == Resolution::Applied {
                    events.push(ClientEvent::BlockChanged {
                        position: m.position,
                        block_type: m.block_type,
                        placed: m.action == ModifyAction::Place,
                        username: m.username,
                    });
                }
            }
            Broadcast::PlayerPositions { players, .. } => {
                let me = st.username.clone();
                events.push(ClientEvent::PlayerPositions {
                    players: players.into_iter().filter(|p| p.username != me).collect(),
                });
            }
            Broadcast::FriendshipAdded {
                username,
                friend_username,
            } => events.push(ClientEvent::FriendshipAdded {
                username,
                friend_username,
            }),
            Broadcast::FriendshipRemoved {
                username,
                friend_username,
            } => events.push(ClientEvent::FriendshipRemoved {
                username,
                friend_username,
            }),
            Broadcast::PlayerCountUpdate { level, count } => {
                events.push(ClientEvent::PlayerCountUpdate { level, count })
            }
        }
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    pub fn mode(&self) -> ClientMode {
        self.inner.state.lock().mode
    }

    pub fn loaded_chunk(&self, chunk_x: i32, chunk_z: i32) -> Option<Vec<BlockRecord>> {
        self.inner
            .state
            .lock()
            .loaded
            .get(&(chunk_x, chunk_z))
            .cloned()
    }

    pub fn loaded_count(&self) -> usize {
        self.inner.state.lock().loaded.len()
    }

    pub fn subscribed_regions(&self) -> Vec<(i32, i32)> {
        let mut regions: Vec<(i32, i32)> =
            self.inner.state.lock().region_subs.keys().copied().collect();
        regions.sort();
        regions
    }

    pub fn pending_modifications(&self) -> usize {
        self.inner.state.lock().pending_mods.len()
    }

    pub fn offline_backlog(&self) -> usize {
        self.inner
            .state
            .lock()
            .queue
            .as_ref()
            .map_or(0, |q| q.len())
    }
}

// ---------------------------------------------------------------------------
// Tests (pure geometry; full scenarios live in tests/sync_tests.rs)
// ---------------------------------------------------------------------------
