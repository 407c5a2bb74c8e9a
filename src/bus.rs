//! `WorldAgent` — drives a [`WorldService`] with its periodic loops.
//!
//! ## Loops
//!
//! | Loop               | Rate                   | Work                         |
//! |--------------------|------------------------|------------------------------|
//! | position fanout    | `broadcast_hz` (10 Hz) | diff-and-publish per topic   |
//! | presence sweep     | `sweep_interval`       | drop stale identities        |
//!
//! Call [`WorldAgent::run`] inside a Tokio task; it returns on SIGINT.

use crate::service::WorldService;
use anyhow::Result;
use log::info;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct WorldAgentConfig {
    /// How often stale presence entries are collected.
    pub sweep_interval: Duration,
}

impl Default for WorldAgentConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(10),
        }
    }
}

pub struct WorldAgent {
    config: WorldAgentConfig,
    service: Arc<WorldService>,
}

impl WorldAgent {
    pub fn new(config: WorldAgentConfig, service: Arc<WorldService>) -> Self {
        Self { config, service }
    }

    /// Start the fanout and sweep loops and block until SIGINT.
    pub async fn run(self) -> Result<()> {
        let broadcast_hz = self.service.config().broadcast_hz;
        info!(
            "WorldAgent active – position fanout at {:.0}Hz, sweep every {:?}",
            broadcast_hz, self.config.sweep_interval
        );

        let service_bcast = self.service.clone();
        let broadcast_handle = tokio::spawn(async move {
            let period = Duration::from_secs_f32(1.0 / broadcast_hz.max(0.1));
            let mut timer = tokio::time::interval(period);
            loop {
                timer.tick().await;
                service_bcast.broadcast_positions();
            }
        });

        let service_sweep = self.service.clone();
        let sweep_interval = self.config.sweep_interval;
        let sweep_handle = tokio::spawn(async move {
            let mut timer = tokio::time::interval(sweep_interval);
            loop {
                timer.tick().await;
                let swept = service_sweep.sweep_presence();
                if swept > 0 {
                    info!("swept {} stale presence entr{}", swept, if swept == 1 { "y" } else { "ies" });
                }
            }
        });

        tokio::select! {
            _ = broadcast_handle => {
                log::error!("position fanout loop exited unexpectedly");
            }
            _ = sweep_handle => {
                log::error!("presence sweep loop exited unexpectedly");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("WorldAgent shutting down (SIGINT)");
            }
        }

        Ok(())
    }
}
