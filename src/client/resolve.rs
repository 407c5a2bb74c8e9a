//! Conflict resolution — last-writer-wins over the cached chunk state.
//!
//! Incoming broadcasts collide with local optimistic edits at the same
//! position. The rule: the edit with the greater effective timestamp wins,
//! and a tie goes to the incoming/remote side. With millisecond clocks
//! this resolves truly simultaneous edits by arrival order at the server —
//! a known, accepted weakness, not a bug.

use crate::protocol::BlockModify;
use crate::types::{BlockRecord, Modification, ModifyAction};

/// What happened to an incoming broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The incoming edit was written into the cached chunk.
    Applied,
    /// Originated here; already applied optimistically.
    IgnoredSelf,
    /// A newer local optimistic edit at the position won; incoming dropped.
    KeptLocal,
}

fn upsert(blocks: &mut Vec<BlockRecord>, record: BlockRecord) {
    match blocks.iter_mut().find(|b| b.pos() == record.pos()) {
        Some(existing) => *existing = record,
        None => blocks.push(record),
    }
}

/// Apply an incoming `block-modify` broadcast to one cached chunk.
pub fn resolve_incoming(
    blocks: &mut Vec<BlockRecord>,
    incoming: &BlockModify,
    self_username: &str,
) -> Resolution {
    if incoming.username == self_username {
        return Resolution::IgnoredSelf;
    }

    let incoming_ts = incoming.effective_timestamp();

    // Only a *self-authored* record guards the position; anything else is
    // overwritten unconditionally.
    if let Some(local) = blocks
        .iter()
        .find(|b| b.pos() == incoming.position && b.username == self_username)
    {
        if incoming_ts < local.timestamp {
            log::debug!(
                "kept local edit at {} (local {} > incoming {})",
                incoming.position,
                local.timestamp,
                incoming_ts
            );
            return Resolution::KeptLocal;
        }
        log::debug!(
            "incoming edit from {} overrode local at {}",
            incoming.username,
            incoming.position
        );
    }

    upsert(
        blocks,
        BlockRecord {
            x: incoming.position.x,
            y: incoming.position.y,
            z: incoming.position.z,
            block_type: incoming.block_type,
            placed: incoming.action == ModifyAction::Place,
            username: incoming.username.clone(),
            timestamp: incoming_ts,
        },
    );
    Resolution::Applied
}

/// Apply one of our own modifications optimistically, before acceptance.
pub fn apply_local(blocks: &mut Vec<BlockRecord>, m: &Modification, self_username: &str) {
    upsert(
        blocks,
        BlockRecord {
            x: m.position.x,
            y: m.position.y,
            z: m.position.z,
            block_type: match m.action {
                ModifyAction::Place => m.block_type,
                ModifyAction::Remove => None,
            },
            placed: m.action == ModifyAction::Place,
            username: self_username.to_string(),
            timestamp: m.client_timestamp,
        },
    );
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BlockPos;

    fn incoming(username: &str, ts: u64) -> BlockModify {
        BlockModify {
            username: username.into(),
            action: ModifyAction::Place,
            position: BlockPos::new(10, 5, 3),
            block_type: Some(7),
            client_timestamp: ts,
            server_timestamp: ts,
        }
    }

    fn local_edit(ts: u64) -> Modification {
        Modification {
            position: BlockPos::new(10, 5, 3),
            block_type: Some(2),
            action: ModifyAction::Place,
            client_timestamp: ts,
        }
    }

    #[test]
    fn self_broadcast_is_ignored() {
        let mut blocks = Vec::new();
        apply_local(&mut blocks, &local_edit(100), "ada");
        let r = resolve_incoming(&mut blocks, &incoming("ada", 200), "ada");
        assert_eq!(r, Resolution::IgnoredSelf);
        assert_eq!(blocks[0].block_type, Some(2));
    }

    #[test]
    fn no_local_record_applies_unconditionally() {
        let mut blocks = Vec::new();
        let r = resolve_incoming(&mut blocks, &incoming("grace", 1), "ada");
        assert_eq!(r, Resolution::Applied);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].username, "grace");
    }

    #[test]
    fn newer_incoming_wins_over_local() {
        let mut blocks = Vec::new();
        apply_local(&mut blocks, &local_edit(100), "ada");
        let r = resolve_incoming(&mut blocks, &incoming("grace", 200), "ada");
        assert_eq!(r, Resolution::Applied);
        assert_eq!(blocks[0].username, "grace");
        assert_eq!(blocks[0].block_type, Some(7));
    }

    #[test]
    fn older_incoming_is_dropped() {
        let mut blocks = Vec::new();
        apply_local(&mut blocks, &local_edit(300), "ada");
        let r = resolve_incoming(&mut blocks, &incoming("grace", 200), "ada");
        assert_eq!(r, Resolution::KeptLocal);
        assert_eq!(blocks[0].username, "ada");
        assert_eq!(blocks[0].block_type, Some(2));
    }

    #[test]
    fn tie_favors_incoming() {
        let mut blocks = Vec::new();
        apply_local(&mut blocks, &local_edit(200), "ada");
        let r = resolve_incoming(&mut blocks, &incoming("grace", 200), "ada");
        assert_eq!(r, Resolution::Applied);
        assert_eq!(blocks[0].username, "grace");
    }

    #[test]
    fn effective_timestamp_uses_larger_of_both_clocks() {
        let mut blocks = Vec::new();
        apply_local(&mut blocks, &local_edit(250), "ada");
        // Server clock behind, client clock ahead: max(300, 200) = 300 wins.
        let msg = BlockModify {
            client_timestamp: 300,
            server_timestamp: 200,
            ..incoming("grace", 0)
        };
        assert_eq!(resolve_incoming(&mut blocks, &msg, "ada"), Resolution::Applied);
    }

    #[test]
    fn foreign_record_does_not_guard_position() {
        let mut blocks = vec![BlockRecord {
            x: 10,
            y: 5,
            z: 3,
            block_type: Some(9),
            placed: true,
            username: "hopper".into(),
            timestamp: 9_999,
        }];
        // Incoming is older than hopper's record, but hopper isn't us.
        let r = resolve_incoming(&mut blocks, &incoming("grace", 1), "ada");
        assert_eq!(r, Resolution::Applied);
        assert_eq!(blocks[0].username, "grace");
    }

    #[test]
    fn removal_becomes_tombstone_in_cache() {
        let mut blocks = Vec::new();
        let msg = BlockModify {
            action: ModifyAction::Remove,
            block_type: None,
            ..incoming("grace", 50)
        };
        resolve_incoming(&mut blocks, &msg, "ada");
        assert_eq!(blocks.len(), 1);
        assert!(!blocks[0].placed);
        assert_eq!(blocks[0].block_type, None);
    }
}
