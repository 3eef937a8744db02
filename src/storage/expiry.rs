//! Background Expiry Sweeper
//!
//! Keys are never deleted at the moment their deadline passes; they are
//! collected by a periodic sweep. This module runs that sweep as a
//! background Tokio task: every tick it takes the engine write lock
//! once, pops all due TTL records, and applies the deletions.
//!
//! Between a deadline passing and the next tick, an expired key is still
//! readable and its TTL reports -2. The tick interval (default 100 ms)
//! bounds that window.
//!
//! The task is stopped through a watch channel; dropping the
//! [`ExpirySweeper`] handle stops it.

use crate::storage::Engine;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info};

/// Configuration for the expiry sweeper.
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// Interval between sweeps.
    pub tick: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(100),
        }
    }
}

/// Handle to the running sweeper task.
///
/// Dropping the handle stops the task.
#[derive(Debug)]
pub struct ExpirySweeper {
    shutdown_tx: watch::Sender<bool>,
}

impl ExpirySweeper {
    /// Spawns the sweeper over the shared engine.
    pub fn start(engine: Arc<RwLock<Engine>>, config: SweeperConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(sweeper_loop(engine, config, shutdown_rx));

        Self { shutdown_tx }
    }

    /// Stops the sweeper task. Called automatically on drop.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Drop for ExpirySweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn sweeper_loop(
    engine: Arc<RwLock<Engine>>,
    config: SweeperConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    info!(tick_ms = config.tick.as_millis() as u64, "Expiry sweeper started");

    let mut ticker = tokio::time::interval(config.tick);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Expiry sweeper shutting down");
                    return;
                }
            }
        }

        // Lock is taken and released inside the tick, never across one
        let expired = engine.write().sweep(Instant::now());
        if expired > 0 {
            debug!(expired, "Swept expired keys");
        }
    }
}

/// Starts the sweeper with the default tick.
pub fn start_expiry_sweeper(engine: Arc<RwLock<Engine>>) -> ExpirySweeper {
    ExpirySweeper::start(engine, SweeperConfig::default())
}
