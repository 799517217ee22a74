//! Periodic broker duties on one task.
//!
//! Three interval-driven sweeps share a single monotonic clock: the
//! pending-ack sweep, dedup garbage collection, and the broker
//! heartbeat.  The heartbeat interval fires immediately, so the first
//! heartbeat goes out at startup.

use crate::engine::RoutingEngine;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval};
use tracing::debug;

pub(crate) async fn run(engine: Arc<RoutingEngine>, mut shutdown: watch::Receiver<bool>) {
    let mut heartbeat = interval(engine.heartbeat_period());
    let mut ack_sweep = interval(engine.ack_sweep_interval());
    let mut dedup_gc = interval(engine.dedup_gc_interval());
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ack_sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
    dedup_gc.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => {
                if *shutdown.borrow() { break; }
            }
            _ = heartbeat.tick() => engine.emit_heartbeat().await,
            _ = ack_sweep.tick() => engine.sweep_pending().await,
            _ = dedup_gc.tick() => engine.gc_dedup(),
        }
    }
    debug!("timer loop exited");
}
