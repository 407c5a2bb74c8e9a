//! Spatial indexing: world position → chunk → region, and the topic/key
//! naming scheme built on top of it.
//!
//! Every function here is pure and must behave identically on the client
//! and the server — a mismatch silently breaks subscription routing.

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Side length of a chunk in blocks.
pub const CHUNK_SIZE: i32 = 24;

/// Side length of a region in chunks. Regions are the pub/sub fanout unit:
/// coarser than chunks to bound topic count, finer than the whole world to
/// bound per-client broadcast volume.
pub const REGION_SIZE: i32 = 15;

// ---------------------------------------------------------------------------
// Coordinate mapping
// ---------------------------------------------------------------------------

/// Chunk coordinates of a world position (floor division).
pub fn chunk_of(x: i32, z: i32) -> (i32, i32) {
    (x.div_euclid(CHUNK_SIZE), z.div_euclid(CHUNK_SIZE))
}

/// Region coordinates of a chunk (floor division).
pub fn region_of(chunk_x: i32, chunk_z: i32) -> (i32, i32) {
    (chunk_x.div_euclid(REGION_SIZE), chunk_z.div_euclid(REGION_SIZE))
}

/// Region coordinates of a world position.
pub fn region_of_pos(x: i32, z: i32) -> (i32, i32) {
    let (cx, cz) = chunk_of(x, z);
    region_of(cx, cz)
}

// ---------------------------------------------------------------------------
// Topics
// ---------------------------------------------------------------------------

/// Regional topic carrying block-modify and player-position traffic.
pub fn region_topic(level: &str, region_x: i32, region_z: i32) -> String {
    format!("region:{}:{}:{}", level, region_x, region_z)
}

/// Level-wide topic carrying friendship and player-count traffic that must
/// reach a player regardless of their current region.
pub fn level_topic(level: &str) -> String {
    format!("game:{}", level)
}

// ---------------------------------------------------------------------------
// Store keys
// ---------------------------------------------------------------------------

/// Hash key holding one chunk's custom blocks.
pub fn chunk_key(level: &str, chunk_x: i32, chunk_z: i32) -> String {
    format!("{}:chunk:{}:{}", level, chunk_x, chunk_z)
}

/// Field within a chunk hash addressing a single block.
pub fn block_field(x: i32, y: i32, z: i32) -> String {
    format!("block:{}:{}:{}", x, y, z)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
