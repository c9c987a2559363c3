//! Simulation-config watcher: applies external writes on the writable
//! `SimConfig` nodes (`Mode`, `SimulationInterval`, `TimeAcceleration`) to
//! the kernel.
//!
//! The kernel itself never writes these nodes, so every observed change
//! originated from a client and is safe to forward without echo loops.

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::model::space::{NodeId, Variant};
use crate::model::SharedSpace;
use crate::sim::modes::SimulationMode;
use super::ControlHandle;

/// Node handles the watcher reacts to.
#[derive(Debug, Clone, Copy)]
struct WatchedNodes {
    mode: Option<NodeId>,
    interval: Option<NodeId>,
    time_acceleration: Option<NodeId>,
}

/// Spawn the watcher task. Returns `None` when the model has no `SimConfig`
/// object to watch.
pub async fn spawn_config_watcher(
    space: SharedSpace,
    sim_config: NodeId,
    handle: ControlHandle,
) -> Option<JoinHandle<()>> {
    let (nodes, mut changes) = {
        let space = space.read().await;
        let nodes = WatchedNodes {
            mode: space.child_by_name(sim_config, "Mode"),
            interval: space.child_by_name(sim_config, "SimulationInterval"),
            time_acceleration: space.child_by_name(sim_config, "TimeAcceleration"),
        };
        (nodes, space.subscribe())
    };

    if nodes.mode.is_none() && nodes.interval.is_none() && nodes.time_acceleration.is_none() {
        debug!("SimConfig has no writable configuration nodes; watcher not started");
        return None;
    }
    info!("Simulation-config watcher started");

    Some(tokio::spawn(async move {
        loop {
            let change = match changes.recv().await {
                Ok(change) => change,
                Err(RecvError::Lagged(missed)) => {
                    debug!(missed, "Config watcher lagged behind data changes");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            if Some(change.node) == nodes.interval {
                if let Some(ms) = change.value.as_f64() {
                    handle.set_interval(ms).await;
                }
            } else if Some(change.node) == nodes.time_acceleration {
                if let Some(factor) = change.value.as_f64() {
                    handle.set_time_acceleration(factor).await;
                }
            } else if Some(change.node) == nodes.mode {
                let raw = match change.value {
                    Variant::Int32(v) => Some(v),
                    ref other => other.as_f64().map(|v| v as i32),
                };
                match raw.and_then(SimulationMode::from_wire) {
                    Some(mode) => {
                        let (ok, reason) = handle.set_mode(mode).await;
                        if !ok {
                            warn!(reason = %reason, "Mode write rejected by kernel");
                        }
                    }
                    None => warn!(value = ?change.value, "Ignoring write of unknown mode value"),
                }
            }
        }
    }))
}
