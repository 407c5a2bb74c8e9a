//! `WorldService` — request handling, regional fanout, initial state.
//!
//! One instance owns everything a world needs: the typed store, the
//! transport, the presence registry, the ingestion pipeline, and the
//! last-broadcast digest cache. Handlers run concurrently; shared state is
//! interior-locked, and presence updates only ever touch the caller's own
//! entry.

use crate::api::WorldApi;
use crate::error::ApiError;
use crate::grid::{chunk_of, level_topic, region_topic, CHUNK_SIZE};
use crate::ingest::IngestPipeline;
use crate::presence::PresenceRegistry;
use crate::protocol::{
    Ack, Broadcast, ChunkState, ChunkStateRequest, ChunkStateResponse, ClientMode, ConnectRequest,
    ConnectResponse, FriendRequest, FriendResponse, ModifyRequest, ModifyResponse, PlayerSnapshot,
    PositionUpdate, UpvoteRequest,
};
use crate::store::{KvStore, WorldStore};
use crate::transport::{publish_json, Transport};
use crate::types::{now_ms, ServerConfig, Vec3};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub struct WorldService {
    config: ServerConfig,
    store: WorldStore,
    transport: Arc<dyn Transport>,
    presence: PresenceRegistry,
    ingest: IngestPipeline,
    /// Digest of the last payload published per topic; a publish is
    /// skipped when nothing changed since.
    last_broadcast: Mutex<HashMap<String, [u8; 16]>>,
}

impl WorldService {
    pub fn new(config: ServerConfig, kv: Arc<dyn KvStore>, transport: Arc<dyn Transport>) -> Self {
        let store = WorldStore::new(kv);
        let ingest = IngestPipeline::new(
            store.clone(),
            transport.clone(),
            config.max_coord,
            config.persist_retries,
            Duration::from_millis(config.persist_backoff_ms),
        );
        Self {
            config,
            store,
            transport,
            presence: PresenceRegistry::new(),
            ingest,
            last_broadcast: Mutex::new(HashMap::new()),
        }
    }

    pub fn presence(&self) -> &PresenceRegistry {
        &self.presence
    }

    pub fn store(&self) -> &WorldStore {
        &self.store
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Fanout helpers
    // -----------------------------------------------------------------------

    fn publish_player_count(&self, level: &str) {
        let msg = Broadcast::PlayerCountUpdate {
            level: level.to_string(),
            count: self.presence.level_count(level),
        };
        if let Err(e) = publish_json(self.transport.as_ref(), &level_topic(level), &msg) {
            log::warn!("failed to publish player count for {}: {}", level, e);
        }
    }

    /// One pass of the fixed-rate position fanout.
    ///
    /// Presence is batched per (level, region) topic; a topic whose payload
    /// digest matches the last published one is skipped, and a topic that
    /// just emptied gets one final empty batch before being forgotten.
    pub fn broadcast_positions(&self) {
        let mut batches: HashMap<String, (String, Vec<PlayerSnapshot>)> = HashMap::new();
        for record in self.presence.all() {
            let (cx, cz) = chunk_of(record.position.x as i32, record.position.z as i32);
            let (rx, rz) = crate::grid::region_of(cx, cz);
            let topic = region_topic(&record.level, rx, rz);
            batches
                .entry(topic)
                .or_insert_with(|| (record.level.clone(), Vec::new()))
                .1
                .push(PlayerSnapshot {
                    username: record.username,
                    position: record.position,
                    rotation: record.rotation,
                });
        }

        let mut cache = self.last_broadcast.lock();

        // Topics that went quiet since the last pass.
        let vanished: Vec<String> = cache
            .keys()
            .filter(|t| !batches.contains_key(*t))
            .cloned()
            .collect();
        for topic in vanished {
            cache.remove(&topic);
            let level = topic.split(':').nth(1).unwrap_or_default().to_string();
            let msg = Broadcast::PlayerPositions {
                level,
                players: Vec::new(),
            };
            if let Err(e) = publish_json(self.transport.as_ref(), &topic, &msg) {
                log::warn!("failed to publish final empty batch to {}: {}", topic, e);
            }
        }

        for (topic, (level, mut players)) in batches {
            // Stable order so the digest does not churn on map iteration.
            players.sort_by(|a, b| a.username.cmp(&b.username));
            let msg = Broadcast::PlayerPositions { level, players };
            let payload = match serde_json::to_vec(&msg) {
                Ok(p) => p,
                Err(e) => {
                    log::warn!("failed to serialize position batch for {}: {}", topic, e);
                    continue;
                }
            };
            let digest = md5::compute(&payload).0;
            if cache.get(&topic) == Some(&digest) {
                continue;
            }
            if let Err(e) = self
                .transport
                .publish(&topic, bytes::Bytes::from(payload))
            {
                log::warn!("failed to publish positions to {}: {}", topic, e);
                continue;
            }
            cache.insert(topic, digest);
        }
    }

    /// Sweep stale presence entries, persisting their last positions and
    /// announcing the new counts. Returns the number of entries removed.
    pub fn sweep_presence(&self) -> usize {
        let swept = self.presence.sweep_stale(self.config.staleness_timeout_ms);
        let mut levels: Vec<String> = Vec::new();
        for record in &swept {
            log::info!(
                "sweeping stale presence {} in {} (idle since {})",
                record.username,
                record.level,
                record.last_update
            );
            if let Err(e) = self.store.set_last_position(
                &record.level,
                &record.username,
                record.position,
                record.rotation,
            ) {
                log::warn!("failed to persist swept position: {}", e);
            }
            if !levels.contains(&record.level) {
                levels.push(record.level.clone());
            }
        }
        for level in levels {
            self.publish_player_count(&level);
        }
        swept.len()
    }

    // -----------------------------------------------------------------------
    // Connect internals
    // -----------------------------------------------------------------------

    fn mint_username(level: &str) -> String {
        let digest = md5::compute(format!("{}:{}", level, now_ms()));
        format!("player-{:02x}{:02x}{:02x}", digest.0[0], digest.0[1], digest.0[2])
    }

    fn spawn_position(&self, level: &str, username: &str) -> Result<Vec3, ApiError> {
        // Reconnect-to-last-spot short-circuits the spiral search.
        if let Some((position, _)) = self.store.last_position(level, username)? {
            return Ok(position);
        }
        Ok(crate::spawn::find_spawn(
            &self.store,
            &self.presence,
            level,
            username,
            self.config.spawn_height,
        )?)
    }

    fn initial_chunks(&self, level: &str, spawn: Vec3) -> Result<Vec<ChunkState>, ApiError> {
        let (pcx, pcz) = chunk_of(spawn.x as i32, spawn.z as i32);
        let r = self.config.draw_distance;
        let mut chunks = Vec::with_capacity(((2 * r + 1) * (2 * r + 1)) as usize);
        for cx in (pcx - r)..=(pcx + r) {
            for cz in (pcz - r)..=(pcz + r) {
                chunks.push(ChunkState {
                    chunk_x: cx,
                    chunk_z: cz,
                    blocks: self.store.chunk_blocks(level, cx, cz)?,
                });
            }
        }
        Ok(chunks)
    }

    fn max_chunk_coord(&self) -> i32 {
        self.config.max_coord / CHUNK_SIZE
    }
}

// ---------------------------------------------------------------------------
// Request handlers
// ---------------------------------------------------------------------------

impl WorldApi for WorldService {
    fn connect(&self, req: ConnectRequest) -> Result<ConnectResponse, ApiError> {
        let level = req.level;
        let username = req
            .username
            .unwrap_or_else(|| Self::mint_username(&level));

        // A same-level duplicate demotes the newcomer to viewer: it may
        // watch but not write, and it never touches presence.
        let mode = if self.presence.is_active(&level, &username) {
            ClientMode::Viewer
        } else {
            ClientMode::Player
        };

        let terrain_seeds = self.store.terrain_seeds(&level)?;
        let spawn_position = self.spawn_position(&level, &username)?;
        let initial_chunks = self.initial_chunks(&level, spawn_position)?;

        let players: Vec<PlayerSnapshot> = self
            .presence
            .level_players(&level)
            .into_iter()
            .filter(|p| p.username != username)
            .map(|p| PlayerSnapshot {
                username: p.username,
                position: p.position,
                rotation: p.rotation,
            })
            .collect();

        let player_data = match mode {
            ClientMode::Player => Some(self.store.touch_player_record(&level, &username)?),
            ClientMode::Viewer => self.store.player_record(&level, &username)?,
        };

        if mode == ClientMode::Player {
            self.presence
                .add(&level, &username, spawn_position, Vec3::zero());
            self.publish_player_count(&level);
        }

        log::info!(
            "{} connected to {} as {:?} at {}",
            username,
            level,
            mode,
            spawn_position
        );

        Ok(ConnectResponse {
            mode,
            username,
            level: level.clone(),
            terrain_seeds,
            spawn_position,
            initial_chunks,
            players,
            player_data,
            player_count: self.presence.level_count(&level),
        })
    }

    fn disconnect(&self, username: &str, level: &str) -> Result<Ack, ApiError> {
        match self.presence.remove(level, username) {
            Some(record) => {
                self.store
                    .set_last_position(level, username, record.position, record.rotation)?;
                self.publish_player_count(level);
                log::info!("{} disconnected from {}", username, level);
                Ok(Ack { ok: true })
            }
            None => Ok(Ack { ok: false }),
        }
    }

    fn update_position(&self, req: PositionUpdate) -> Result<Ack, ApiError> {
        let known = self
            .presence
            .update(&req.level, &req.username, req.position, req.rotation);
        if !known {
            return Ok(Ack { ok: false });
        }
        self.store
            .set_last_position(&req.level, &req.username, req.position, req.rotation)?;
        Ok(Ack { ok: true })
    }

    fn modify_blocks(&self, req: ModifyRequest) -> Result<ModifyResponse, ApiError> {
        Ok(self.ingest.process_batch(req))
    }

    fn chunk_state(&self, req: ChunkStateRequest) -> Result<ChunkStateResponse, ApiError> {
        let request_timestamp = now_ms();
        let bound = self.max_chunk_coord();
        let mut chunks = Vec::new();
        for coord in req
            .chunks
            .iter()
            .filter(|c| c.chunk_x.abs() <= bound && c.chunk_z.abs() <= bound)
        {
            chunks.push(ChunkState {
                chunk_x: coord.chunk_x,
                chunk_z: coord.chunk_z,
                blocks: self.store.chunk_blocks(&req.level, coord.chunk_x, coord.chunk_z)?,
            });
        }
        Ok(ChunkStateResponse {
            chunks,
            request_timestamp,
            response_timestamp: now_ms(),
        })
    }

    fn add_friend(&self, req: FriendRequest) -> Result<FriendResponse, ApiError> {
        if req.friend_username == req.username {
            let record = self.store.friend_record(&req.username)?;
            return Ok(FriendResponse {
                ok: false,
                friends: record.friends,
                message: Some("cannot friend yourself".into()),
            });
        }

        let mut mine = self.store.friend_record(&req.username)?;
        if mine.friends.contains(&req.friend_username) {
            return Ok(FriendResponse {
                ok: true,
                friends: mine.friends,
                message: Some("already friends".into()),
            });
        }
        mine.friends.push(req.friend_username.clone());
        self.store.set_friend_record(&req.username, &mine)?;

        let mut theirs = self.store.friend_record(&req.friend_username)?;
        if !theirs.friended_by.contains(&req.username) {
            theirs.friended_by.push(req.username.clone());
            self.store.set_friend_record(&req.friend_username, &theirs)?;
        }

        // Reach the friend wherever they currently are.
        for level in self.presence.active_levels(&req.friend_username) {
            let msg = Broadcast::FriendshipAdded {
                username: req.username.clone(),
                friend_username: req.friend_username.clone(),
            };
            if let Err(e) = publish_json(self.transport.as_ref(), &level_topic(&level), &msg) {
                log::warn!("failed to publish friendship to {}: {}", level, e);
            }
        }

        Ok(FriendResponse {
            ok: true,
            friends: mine.friends,
            message: None,
        })
    }

    fn remove_friend(&self, req: FriendRequest) -> Result<FriendResponse, ApiError> {
        let mut mine = self.store.friend_record(&req.username)?;
        let before = mine.friends.len();
        mine.friends.retain(|f| f != &req.friend_username);
        if mine.friends.len() == before {
            return Ok(FriendResponse {
                ok: true,
                friends: mine.friends,
                message: Some("not friends".into()),
            });
        }
        self.store.set_friend_record(&req.username, &mine)?;

        let mut theirs = self.store.friend_record(&req.friend_username)?;
        theirs.friended_by.retain(|f| f != &req.username);
        self.store.set_friend_record(&req.friend_username, &theirs)?;

        for level in self.presence.active_levels(&req.friend_username) {
            let msg = Broadcast::FriendshipRemoved {
                username: req.username.clone(),
                friend_username: req.friend_username.clone(),
            };
            if let Err(e) = publish_json(self.transport.as_ref(), &level_topic(&level), &msg) {
                log::warn!("failed to publish unfriend to {}: {}", level, e);
            }
        }

        Ok(FriendResponse {
            ok: true,
            friends: mine.friends,
            message: None,
        })
    }

    fn upvote(&self, req: UpvoteRequest) -> Result<Ack, ApiError> {
        if req.builder_username == req.username {
            return Ok(Ack { ok: false });
        }
        if self
            .store
            .player_record(&req.level, &req.builder_username)?
            .is_none()
        {
            return Ok(Ack { ok: false });
        }

        // Ack immediately; the score mutation is fire-and-forget.
        let store = self.store.clone();
        let level = req.level.clone();
        let builder = req.builder_username.clone();
        tokio::spawn(async move {
            if let Err(e) = store.increment_score(&level, &builder, 1) {
                log::warn!("upvote for {} in {} lost: {}", builder, level, e);
            }
        });
        Ok(Ack { ok: true })
    }
}
