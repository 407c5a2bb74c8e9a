//! Edit ingestion pipeline — validate, stamp, fan out, persist.
//!
//! Batches are processed strictly sequentially so `failed_at` is
//! well-defined: the first invalid entry stops the loop, and entries after
//! it are never validated, broadcast, or persisted. Accepted entries are
//! published to their regional topic *before* persistence — live clients
//! converge at broadcast latency, durable storage follows.

use crate::error::ValidationError;
use crate::grid::{region_of_pos, region_topic};
use crate::protocol::{BlockModify, Broadcast, ModifyRequest, ModifyResponse};
use crate::store::WorldStore;
use crate::transport::{publish_json, Transport};
use crate::types::{now_ms, BlockRecord, Modification, ModifyAction};
use std::sync::Arc;
use std::time::Duration;

pub struct IngestPipeline {
    store: WorldStore,
    transport: Arc<dyn Transport>,
    max_coord: i32,
    persist_retries: u32,
    persist_backoff: Duration,
}

impl IngestPipeline {
    pub fn new(
        store: WorldStore,
        transport: Arc<dyn Transport>,
        max_coord: i32,
        persist_retries: u32,
        persist_backoff: Duration,
    ) -> Self {
        Self {
            store,
            transport,
            max_coord,
            persist_retries,
            persist_backoff,
        }
    }

    /// Validate a single modification against the world bounds.
    pub fn validate(&self, m: &Modification) -> Result<(), ValidationError> {
        let p = m.position;
        if !(0..=255).contains(&p.y) {
            return Err(ValidationError::HeightOutOfRange(p.y));
        }
        if p.x.abs() > self.max_coord {
            return Err(ValidationError::CoordOutOfRange(p.x, self.max_coord));
        }
        if p.z.abs() > self.max_coord {
            return Err(ValidationError::CoordOutOfRange(p.z, self.max_coord));
        }
        Ok(())
    }

    /// Run one batch through the pipeline.
    ///
    /// Returns after every accepted entry has been broadcast; the batched
    /// persistence write runs on a spawned task with retry/backoff.
    pub fn process_batch(&self, req: ModifyRequest) -> ModifyResponse {
        let mut accepted: Vec<BlockRecord> = Vec::with_capacity(req.modifications.len());
        let mut failure: Option<(usize, String)> = None;

        for (index, m) in req.modifications.iter().enumerate() {
            if let Err(e) = self.validate(m) {
                log::warn!(
                    "batch from {} rejected at index {}: {}",
                    req.username,
                    index,
                    e
                );
                failure = Some((index, e.to_string()));
                break;
            }

            let server_timestamp = now_ms();
            let broadcast = BlockModify {
                username: req.username.clone(),
                action: m.action,
                position: m.position,
                block_type: match m.action {
                    ModifyAction::Place => m.block_type,
                    ModifyAction::Remove => None,
                },
                client_timestamp: m.client_timestamp,
                server_timestamp,
            };

            // Fan out first; a failed publish is logged, never fatal.
            let (rx, rz) = region_of_pos(m.position.x, m.position.z);
            let topic = region_topic(&req.level, rx, rz);
            if let Err(e) = publish_json(
                self.transport.as_ref(),
                &topic,
                &Broadcast::BlockModify(broadcast.clone()),
            ) {
                log::warn!("failed to publish block-modify to {}: {}", topic, e);
            }

            accepted.push(BlockRecord {
                x: m.position.x,
                y: m.position.y,
                z: m.position.z,
                block_type: broadcast.block_type,
                placed: m.action == ModifyAction::Place,
                username: req.username.clone(),
                timestamp: broadcast.effective_timestamp(),
            });
        }

        if !accepted.is_empty() {
            let store = self.store.clone();
            let level = req.level.clone();
            let retries = self.persist_retries;
            let backoff = self.persist_backoff;
            tokio::spawn(async move {
                persist_with_retry(store, level, accepted, retries, backoff).await;
            });
        }

        match failure {
            Some((index, message)) => ModifyResponse::failed(index, message),
            None => ModifyResponse::accepted(),
        }
    }
}

/// One batched write, retried with doubling backoff. Exhaustion is logged
/// as critical and swallowed: the broadcast already went out, so live
/// clients converged even while durable storage lags.
async fn persist_with_retry(
    store: WorldStore,
    level: String,
    blocks: Vec<BlockRecord>,
    retries: u32,
    backoff: Duration,
) {
    let mut delay = backoff;
    for attempt in 0..=retries {
        match store.write_blocks(&level, &blocks) {
            Ok(()) => {
                if attempt > 0 {
                    log::info!(
                        "persisted {} block(s) for {} after {} retries",
                        blocks.len(),
                        level,
                        attempt
                    );
                }
                return;
            }
            Err(e) if attempt < retries => {
                log::warn!(
                    "persisting {} block(s) for {} failed (attempt {}): {}",
                    blocks.len(),
                    level,
                    attempt + 1,
                    e
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(e) => {
                log::error!(
                    "CRITICAL: dropping {} block(s) for {} after {} attempts: {}",
                    blocks.len(),
                    level,
                    retries + 1,
                    e
                );
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests (validation only; broadcast/persistence paths live in tests/)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryKv;
    use crate::transport::MemoryTransport;
    use crate::types::BlockPos;

    fn pipeline() -> IngestPipeline {
        IngestPipeline::new(
            WorldStore::new(Arc::new(MemoryKv::new())),
            Arc::new(MemoryTransport::new()),
            1000,
            3,
            Duration::from_millis(100),
        )
    }

    fn place(x: i32, y: i32, z: i32) -> Modification {
        Modification {
            position: BlockPos::new(x, y, z),
            block_type: Some(1),
            action: ModifyAction::Place,
            client_timestamp: now_ms(),
        }
    }

    #[test]
    fn validate_bounds() {
        let p = pipeline();
        assert!(p.validate(&place(0, 0, 0)).is_ok());
        assert!(p.validate(&place(1000, 255, -1000)).is_ok());
        assert!(matches!(
            p.validate(&place(0, -1, 0)),
            Err(ValidationError::HeightOutOfRange(-1))
        ));
        assert!(matches!(
            p.validate(&place(0, 256, 0)),
            Err(ValidationError::HeightOutOfRange(256))
        ));
        assert!(matches!(
            p.validate(&place(1001, 0, 0)),
            Err(ValidationError::CoordOutOfRange(1001, 1000))
        ));
        assert!(matches!(
            p.validate(&place(0, 0, -1001)),
            Err(ValidationError::CoordOutOfRange(-1001, 1000))
        ));
    }
}
