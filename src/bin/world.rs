//! voxel-world-server binary
//!
//! Hosts the synchronization engine with in-memory store and transport —
//! the single-node deployment used for development and embedded setups.
//!
//! ## Configuration (CLI / env, plus optional TOML via the `config` crate)
//!
//! | Key                      | Default   | Description                      |
//! |--------------------------|-----------|----------------------------------|
//! | `WORLD_CONFIG`           | *(none)*  | TOML file overriding the below   |
//! | `WORLD_MAX_COORD`        | `100000`  | |x|,|z| bound for edits          |
//! | `WORLD_DRAW_DISTANCE`    | `3`       | Initial-state chunk radius       |
//! | `WORLD_SPAWN_HEIGHT`     | `32`      | Y of fresh spawn points          |
//! | `WORLD_STALENESS_SECS`   | `120`     | Presence staleness timeout       |
//! | `WORLD_BROADCAST_HZ`     | `10`      | Position fanout rate             |
//! | `WORLD_SWEEP_SECS`       | `10`      | Presence sweep interval          |

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use voxel_world::{
    bus::{WorldAgent, WorldAgentConfig},
    service::WorldService,
    store::MemoryKv,
    transport::MemoryTransport,
    types::ServerConfig,
};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "voxel-world-server", about = "Voxel World Engine", version)]
struct Args {
    /// Optional TOML config file; its keys override the flags below
    #[arg(long, env = "WORLD_CONFIG")]
    config: Option<PathBuf>,

    /// Coordinate bound for edit validation
    #[arg(long, env = "WORLD_MAX_COORD", default_value_t = 100_000)]
    max_coord: i32,

    /// Chunk radius of the initial-state box
    #[arg(long, env = "WORLD_DRAW_DISTANCE", default_value_t = 3)]
    draw_distance: i32,

    /// Y assigned to fresh spawn points
    #[arg(long, env = "WORLD_SPAWN_HEIGHT", default_value_t = 32.0)]
    spawn_height: f32,

    /// Presence staleness timeout (seconds)
    #[arg(long, env = "WORLD_STALENESS_SECS", default_value_t = 120)]
    staleness_secs: u64,

    /// Position fanout rate (Hz)
    #[arg(long, env = "WORLD_BROADCAST_HZ", default_value_t = 10.0)]
    broadcast_hz: f32,

    /// Presence sweep interval (seconds)
    #[arg(long, env = "WORLD_SWEEP_SECS", default_value_t = 10)]
    sweep_secs: u64,
}

/// CLI flags first, then TOML keys on top when a file is given.
fn load_config(args: &Args) -> Result<ServerConfig> {
    let mut cfg = ServerConfig {
        max_coord: args.max_coord,
        draw_distance: args.draw_distance,
        spawn_height: args.spawn_height,
        staleness_timeout_ms: args.staleness_secs * 1000,
        broadcast_hz: args.broadcast_hz,
        ..Default::default()
    };

    if let Some(path) = &args.config {
        let file = config::Config::builder()
            .add_source(config::File::from(path.clone()))
            .add_source(config::Environment::with_prefix("WORLD"))
            .build()
            .with_context(|| format!("failed to load config from {}", path.display()))?;

        if let Ok(v) = file.get_int("max_coord") {
            cfg.max_coord = v as i32;
        }
        if let Ok(v) = file.get_int("draw_distance") {
            cfg.draw_distance = v as i32;
        }
        if let Ok(v) = file.get_float("spawn_height") {
            cfg.spawn_height = v as f32;
        }
        if let Ok(v) = file.get_int("staleness_timeout_ms") {
            cfg.staleness_timeout_ms = v as u64;
        }
        if let Ok(v) = file.get_float("broadcast_hz") {
            cfg.broadcast_hz = v as f32;
        }
        if let Ok(v) = file.get_int("persist_retries") {
            cfg.persist_retries = v as u32;
        }
        if let Ok(v) = file.get_int("persist_backoff_ms") {
            cfg.persist_backoff_ms = v as u64;
        }
    }

    Ok(cfg)
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("voxel_world=debug".parse()?),
        )
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;

    tracing::info!(
        "Starting voxel-world-server (max_coord={}, draw_distance={}, broadcast={}Hz, staleness={}ms)",
        config.max_coord,
        config.draw_distance,
        config.broadcast_hz,
        config.staleness_timeout_ms,
    );

    let kv = Arc::new(MemoryKv::new());
    let transport = Arc::new(MemoryTransport::new());
    let service = Arc::new(WorldService::new(config, kv, transport));

    let agent_config = WorldAgentConfig {
        sweep_interval: Duration::from_secs(args.sweep_secs),
    };

    // Run until shutdown
    WorldAgent::new(agent_config, service).run().await
}
