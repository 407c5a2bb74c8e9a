//! Spawn placement — deterministic spiral search for a free spot.
//!
//! A joining identity with no stored position gets a pseudo-random base
//! point inside one region's extent, then a fixed 25-point spiral of
//! offsets is probed around it. A candidate is rejected when another
//! connected identity stands within 5 units, or when any placed custom
//! block occupies the candidate's (x, z) column. If every probe fails the
//! unmodified base point is returned.

use crate::error::StoreError;
use crate::grid::{CHUNK_SIZE, REGION_SIZE};
use crate::presence::PresenceRegistry;
use crate::store::WorldStore;
use crate::types::Vec3;

/// Minimum (x, z) distance to any other connected identity.
const OCCUPANCY_RADIUS: f32 = 5.0;

/// Probe order: center, cardinals, diagonals, then two wider rings.
/// All offsets stay within ±15 blocks of the base point.
const SPIRAL: [(i32, i32); 25] = [
    (0, 0),
    (5, 0),
    (-5, 0),
    (0, 5),
    (0, -5),
    (5, 5),
    (5, -5),
    (-5, 5),
    (-5, -5),
    (10, 0),
    (-10, 0),
    (0, 10),
    (0, -10),
    (10, 10),
    (10, -10),
    (-10, 10),
    (-10, -10),
    (15, 0),
    (-15, 0),
    (0, 15),
    (0, -15),
    (15, 15),
    (15, -15),
    (-15, 15),
    (-15, -15),
];

/// Pseudo-random (x, z) inside one region's extent, stable per identity.
pub fn base_point(level: &str, username: &str) -> (i32, i32) {
    let extent = (REGION_SIZE * CHUNK_SIZE) as u64;
    let digest = md5::compute(format!("{}:{}", level, username));
    let a = u64::from_le_bytes(digest.0[..8].try_into().unwrap_or_default());
    let b = u64::from_le_bytes(digest.0[8..].try_into().unwrap_or_default());
    ((a % extent) as i32, (b % extent) as i32)
}

fn occupied(presence: &PresenceRegistry, level: &str, x: i32, z: i32) -> bool {
    presence.level_players(level).iter().any(|p| {
        let dx = p.position.x - x as f32;
        let dz = p.position.z - z as f32;
        dx * dx + dz * dz <= OCCUPANCY_RADIUS * OCCUPANCY_RADIUS
    })
}

fn built_on(store: &WorldStore, level: &str, x: i32, z: i32) -> Result<bool, StoreError> {
    let (cx, cz) = crate::grid::chunk_of(x, z);
    let blocks = store.chunk_blocks(level, cx, cz)?;
    Ok(blocks.iter().any(|b| b.placed && b.x == x && b.z == z))
}

/// Pick a spawn position for `username` in `level`.
///
/// Works outward along [`SPIRAL`]; returns the first candidate that is
/// neither occupied nor built on, or the base point if all 25 fail.
pub fn find_spawn(
    store: &WorldStore,
    presence: &PresenceRegistry,
    level: &str,
    username: &str,
    spawn_height: f32,
) -> Result<Vec3, StoreError> {
    let (bx, bz) = base_point(level, username);

    for (dx, dz) in SPIRAL {
        let (x, z) = (bx + dx, bz + dz);
        if occupied(presence, level, x, z) {
            continue;
        }
        if built_on(store, level, x, z)? {
            continue;
        }
        return Ok(Vec3::new(x as f32, spawn_height, z as f32));
    }

    log::warn!(
        "spawn search exhausted for {} in {}, using base point",
        username,
        level
    );
    Ok(Vec3::new(bx as f32, spawn_height, bz as f32))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryKv;
    use crate::types::BlockRecord;
    use std::sync::Arc;

    fn store() -> WorldStore {
        WorldStore::new(Arc::new(MemoryKv::new()))
    }

    #[test]
    fn base_point_is_deterministic_and_in_extent() {
        let (x1, z1) = base_point("earth", "ada");
        let (x2, z2) = base_point("earth", "ada");
        assert_eq!((x1, z1), (x2, z2));
        let extent = REGION_SIZE * CHUNK_SIZE;
        assert!((0..extent).contains(&x1));
        assert!((0..extent).contains(&z1));
        assert_ne!(base_point("earth", "ada"), base_point("earth", "grace"));
    }

    #[test]
    fn clean_base_point_wins_at_offset_zero() {
        let s = store();
        let p = PresenceRegistry::new();
        let (bx, bz) = base_point("earth", "ada");
        let spawn = find_spawn(&s, &p, "earth", "ada", 32.0).unwrap();
        assert_eq!((spawn.x as i32, spawn.z as i32), (bx, bz));
        assert_eq!(spawn.y, 32.0);
    }

    #[test]
    fn occupied_base_point_moves_to_next_probe() {
        let s = store();
        let p = PresenceRegistry::new();
        let (bx, bz) = base_point("earth", "ada");
        p.add(
            "earth",
            "grace",
            Vec3::new(bx as f32, 0.0, bz as f32),
            Vec3::zero(),
        );
        let spawn = find_spawn(&s, &p, "earth", "ada", 32.0).unwrap();
        // Cardinal probes sit exactly 5 units from the blocker and are
        // still inside the radius; the first diagonal clears it.
        assert_eq!((spawn.x as i32, spawn.z as i32), (bx + 5, bz + 5));
    }

    #[test]
    fn built_on_column_is_rejected_regardless_of_y() {
        let s = store();
        let p = PresenceRegistry::new();
        let (bx, bz) = base_point("earth", "ada");
        s.write_blocks(
            "earth",
            &[BlockRecord {
                x: bx,
                y: 200,
                z: bz,
                block_type: Some(1),
                placed: true,
                username: "grace".into(),
                timestamp: 1,
            }],
        )
        .unwrap();
        let spawn = find_spawn(&s, &p, "earth", "ada", 32.0).unwrap();
        assert_ne!((spawn.x as i32, spawn.z as i32), (bx, bz));
    }

    #[test]
    fn tombstone_does_not_block_spawn() {
        let s = store();
        let p = PresenceRegistry::new();
        let (bx, bz) = base_point("earth", "ada");
        s.write_blocks(
            "earth",
            &[BlockRecord {
                x: bx,
                y: 10,
                z: bz,
                block_type: None,
                placed: false,
                username: "grace".into(),
                timestamp: 1,
            }],
        )
        .unwrap();
        let spawn = find_spawn(&s, &p, "earth", "ada", 32.0).unwrap();
        assert_eq!((spawn.x as i32, spawn.z as i32), (bx, bz));
    }

    #[test]
    fn all_probes_failing_falls_back_to_base() {
        let s = store();
        let p = PresenceRegistry::new();
        let (bx, bz) = base_point("earth", "ada");
        // Park an identity on every probe point.
        for (i, (dx, dz)) in SPIRAL.iter().enumerate() {
            p.add(
                "earth",
                &format!("blocker{}", i),
                Vec3::new((bx + dx) as f32, 0.0, (bz + dz) as f32),
                Vec3::zero(),
            );
        }
        let spawn = find_spawn(&s, &p, "earth", "ada", 32.0).unwrap();
        assert_eq!((spawn.x as i32, spawn.z as i32), (bx, bz));
    }
}
