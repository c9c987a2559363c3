//! Value forwarding: committed in-process writes → wire server variables.

use std::collections::HashMap;

use open62541::{ua, Server};
use tokio::sync::broadcast;
use tracing::debug;

use crate::model::space::{DataChange, NodeId, Variant};

/// Convert a model variant to a wire variant. Structured property values
/// (ranges, unit structures) are rendered as strings on the wire; the
/// in-process model remains the authoritative structured source.
pub(super) fn to_ua_variant(value: &Variant) -> Option<ua::Variant> {
    match value {
        Variant::Boolean(v) => Some(ua::Variant::scalar(ua::Boolean::new(*v))),
        Variant::Int16(v) => Some(ua::Variant::scalar(ua::Int32::new(i32::from(*v)))),
        Variant::Int32(v) => Some(ua::Variant::scalar(ua::Int32::new(*v))),
        Variant::UInt16(v) => Some(ua::Variant::scalar(ua::UInt32::new(u32::from(*v)))),
        Variant::UInt32(v) => Some(ua::Variant::scalar(ua::UInt32::new(*v))),
        Variant::Float(v) => Some(ua::Variant::scalar(ua::Double::new(f64::from(*v)))),
        Variant::Double(v) => Some(ua::Variant::scalar(ua::Double::new(*v))),
        Variant::String(s) | Variant::LocalizedText(s) => {
            ua::String::new(s).ok().map(ua::Variant::scalar)
        }
        Variant::Range { low, high } => {
            ua::String::new(&format!("[{low}, {high}]")).ok().map(ua::Variant::scalar)
        }
        Variant::EuInformation { display_name, .. } => {
            ua::String::new(display_name).ok().map(ua::Variant::scalar)
        }
        Variant::DateTime(_) | Variant::Null => None,
    }
}

/// Forward committed writes to the wire server from a dedicated thread.
///
/// The broadcast subscription decouples the kernel from wire latency: a
/// lagging mirror skips intermediate values and catches up at the latest
/// committed one.
pub(super) fn spawn_value_writer(
    server: Server,
    node_map: HashMap<NodeId, ua::NodeId>,
    changes: broadcast::Receiver<DataChange>,
) -> std::thread::JoinHandle<()> {
    let (tx, rx) = std::sync::mpsc::channel::<DataChange>();

    // Bridge: async broadcast → std channel consumed by the writer thread.
    tokio::spawn(async move {
        let mut changes = changes;
        loop {
            match changes.recv().await {
                Ok(change) => {
                    if tx.send(change).is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    debug!(missed, "OPC-UA mirror lagged behind data changes");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    std::thread::Builder::new()
        .name("opcua-writer".to_string())
        .spawn(move || {
            while let Ok(change) = rx.recv() {
                let Some(wire_id) = node_map.get(&change.node) else { continue };
                let Some(variant) = to_ua_variant(&change.value) else { continue };
                if let Err(e) = server.write_variable(wire_id, &variant) {
                    debug!(node = %change.node, error = %e, "Wire write rejected");
                }
            }
        })
        .unwrap_or_else(|e| {
            // Thread spawn failure at bootstrap is unrecoverable for the
            // endpoint; surface it loudly but keep the process alive.
            tracing::error!(error = %e, "Failed to spawn OPC-UA writer thread");
            std::thread::spawn(|| {})
        })
}
