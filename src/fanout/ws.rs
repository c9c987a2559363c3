//! WebSocket hub: connection registry and tick broadcasting.
//!
//! Connections register an unbounded outbound queue; the actual socket I/O
//! lives in the API layer. A connection whose queue is gone (client hung up)
//! is evicted on the first failed send and never retried.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

use crate::sim::pump::PumpSnapshot;

/// Outbound message queue of one connection.
pub type WsSender = mpsc::UnboundedSender<String>;

#[derive(Default)]
struct HubInner {
    next_id: u64,
    connections: HashMap<u64, WsSender>,
    /// Last per-pump data, replayed to new connections as `initial_state`.
    last_data: BTreeMap<String, Value>,
}

/// Shared hub handed to both the kernel fan-out and the API layer.
#[derive(Clone, Default)]
pub struct WsHub {
    inner: Arc<Mutex<HubInner>>,
}

impl WsHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection and push its `initial_state` message.
    pub async fn register(&self, sender: WsSender) -> u64 {
        let mut inner = self.inner.lock().await;
        inner.next_id += 1;
        let id = inner.next_id;

        let initial = json!({
            "type": "initial_state",
            "data": inner.last_data,
            "timestamp": Utc::now().to_rfc3339(),
        });
        if sender.send(initial.to_string()).is_ok() {
            inner.connections.insert(id, sender);
            info!(connection = id, total = inner.connections.len(), "WebSocket client connected");
        }
        id
    }

    pub async fn unregister(&self, id: u64) {
        let mut inner = self.inner.lock().await;
        if inner.connections.remove(&id).is_some() {
            info!(connection = id, total = inner.connections.len(), "WebSocket client disconnected");
        }
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.lock().await.connections.len()
    }

    /// Store the tick's snapshot map and broadcast one `bulk_update`.
    pub async fn bulk_update(
        &self,
        snapshots: &BTreeMap<String, PumpSnapshot>,
        at: DateTime<Utc>,
    ) {
        let timestamp = at.to_rfc3339();
        let mut inner = self.inner.lock().await;
        for (id, snapshot) in snapshots {
            let mut data = serde_json::to_value(snapshot).unwrap_or(Value::Null);
            if let Value::Object(map) = &mut data {
                map.insert("timestamp".to_string(), Value::String(timestamp.clone()));
            }
            inner.last_data.insert(id.clone(), data);
        }
        let message = json!({
            "type": "bulk_update",
            "data": inner.last_data,
            "timestamp": timestamp,
        });
        Self::broadcast(&mut inner, &message.to_string());
    }

    /// Broadcast one MQTT-mirrored topic/payload pair.
    pub async fn pubsub_update(&self, topic: &str, payload: &Value, at: DateTime<Utc>) {
        let message = json!({
            "type": "pubsub_update",
            "topic": topic,
            "payload": payload,
            "timestamp": at.to_rfc3339(),
        });
        let mut inner = self.inner.lock().await;
        Self::broadcast(&mut inner, &message.to_string());
    }

    /// Send to every connection, evicting the dead ones.
    fn broadcast(inner: &mut HubInner, message: &str) {
        let mut dead = Vec::new();
        for (&id, sender) in &inner.connections {
            if sender.send(message.to_string()).is_err() {
                dead.push(id);
            }
        }
        for id in dead {
            inner.connections.remove(&id);
            debug!(connection = id, "Evicted dead WebSocket connection");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fanout::topics::tests::snapshot;

    #[tokio::test]
    async fn new_connection_receives_initial_state() {
        let hub = WsHub::new();
        let mut snapshots = BTreeMap::new();
        snapshots.insert("P1".to_string(), snapshot("P1", true, 2000.0, 80.0));
        hub.bulk_update(&snapshots, Utc::now()).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        hub.register(tx).await;
        let msg: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(msg["type"], "initial_state");
        assert!(msg["data"]["P1"]["flow_rate"].is_number());
    }

    #[tokio::test]
    async fn bulk_update_reaches_all_connections() {
        let hub = WsHub::new();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        hub.register(tx1).await;
        hub.register(tx2).await;
        rx1.recv().await; // initial_state
        rx2.recv().await;

        let mut snapshots = BTreeMap::new();
        snapshots.insert("P1".to_string(), snapshot("P1", true, 1500.0, 75.0));
        hub.bulk_update(&snapshots, Utc::now()).await;

        for rx in [&mut rx1, &mut rx2] {
            let msg: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
            assert_eq!(msg["type"], "bulk_update");
            assert_eq!(msg["data"]["P1"]["flow_rate"], 1500.0);
        }
    }

    #[tokio::test]
    async fn dead_connections_are_evicted_on_first_failed_send() {
        let hub = WsHub::new();
        let (tx, rx) = mpsc::unbounded_channel();
        hub.register(tx).await;
        assert_eq!(hub.connection_count().await, 1);
        drop(rx);

        hub.pubsub_update("plant/system/analytics", &json!({}), Utc::now()).await;
        assert_eq!(hub.connection_count().await, 0);
    }
}
