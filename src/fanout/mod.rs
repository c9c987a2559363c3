//! Fan-out plane: per-tick distribution of pump snapshots to the broker
//! and WebSocket sinks.
//!
//! Node writes (the first sink) happen inside each actor's tick, before the
//! kernel invokes [`FanoutPlane::broadcast`]. Publication failure on any
//! sink is logged and never reaches the kernel.

pub mod broker;
pub mod topics;
pub mod ws;

pub use broker::{BrokerError, BrokerPublisher};
pub use ws::WsHub;

use std::collections::BTreeMap;

use chrono::Utc;
use serde_json::Value;

use crate::sim::pump::PumpSnapshot;

/// Per-tick topic/payload fan-out with maintenance-cadence tracking.
#[derive(Default)]
pub struct FanoutPlane {
    broker: Option<BrokerPublisher>,
    ws: Option<WsHub>,
    /// Last published runtime decade (`floor(runtime_hours / 10)`) per pump.
    maintenance_decades: BTreeMap<String, u64>,
}

impl FanoutPlane {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_broker(mut self, publisher: BrokerPublisher) -> Self {
        self.broker = Some(publisher);
        self
    }

    pub fn with_ws(mut self, hub: WsHub) -> Self {
        self.ws = Some(hub);
        self
    }

    /// Distribute one tick's snapshot map to every configured sink.
    ///
    /// Topic order per tick: telemetry per pump, maintenance on runtime
    /// decade crossings, then one analytics aggregate. The WebSocket sink
    /// additionally receives a `bulk_update` ahead of the topic pairs.
    pub async fn broadcast(&mut self, snapshots: &BTreeMap<String, PumpSnapshot>) {
        let at = Utc::now();
        let mut messages: Vec<(String, Value)> = Vec::with_capacity(snapshots.len() + 1);

        for (id, snapshot) in snapshots {
            messages.push((topics::telemetry_topic(id), topics::telemetry_payload(snapshot, at)));

            let decade = (snapshot.runtime_hours / 10.0).floor() as u64;
            let last = self.maintenance_decades.entry(id.clone()).or_insert(0);
            if decade > *last {
                *last = decade;
                messages
                    .push((topics::maintenance_topic(id), topics::maintenance_payload(snapshot, at)));
            }
        }
        messages.push((topics::ANALYTICS_TOPIC.to_string(), topics::analytics_payload(snapshots)));

        if let Some(broker) = &self.broker {
            for (topic, payload) in &messages {
                broker.publish(topic, payload);
            }
        }

        if let Some(ws) = &self.ws {
            ws.bulk_update(snapshots, at).await;
            for (topic, payload) in &messages {
                ws.pubsub_update(topic, payload, at).await;
            }
        }
    }

    /// Reset maintenance cadence tracking (simulation reset).
    pub fn reset_cadence(&mut self) {
        self.maintenance_decades.clear();
    }

    /// Drain and close the sinks.
    pub async fn shutdown(&self) {
        if let Some(broker) = &self.broker {
            broker.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::topics::tests::snapshot;
    use super::*;
    use tokio::sync::mpsc;

    async fn hub_with_listener() -> (WsHub, mpsc::UnboundedReceiver<String>) {
        let hub = WsHub::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        hub.register(tx).await;
        rx.recv().await; // swallow initial_state
        (hub, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(serde_json::from_str(&msg).unwrap());
        }
        out
    }

    #[tokio::test]
    async fn one_bulk_n_telemetry_one_analytics_per_tick() {
        let (hub, mut rx) = hub_with_listener().await;
        let mut plane = FanoutPlane::new().with_ws(hub);

        let mut snapshots = BTreeMap::new();
        snapshots.insert("P1".to_string(), snapshot("P1", true, 2000.0, 80.0));
        snapshots.insert("P2".to_string(), snapshot("P2", true, 1800.0, 78.0));
        snapshots.insert("P3".to_string(), snapshot("P3", false, 0.0, 20.0));
        plane.broadcast(&snapshots).await;

        let messages = drain(&mut rx);
        let bulk: Vec<_> = messages.iter().filter(|m| m["type"] == "bulk_update").collect();
        assert_eq!(bulk.len(), 1);

        let telemetry: Vec<_> = messages
            .iter()
            .filter(|m| {
                m["type"] == "pubsub_update"
                    && m["topic"].as_str().is_some_and(|t| t.ends_with("/telemetry"))
            })
            .collect();
        assert_eq!(telemetry.len(), 3);

        let analytics: Vec<_> = messages
            .iter()
            .filter(|m| m["topic"] == "plant/system/analytics")
            .collect();
        assert_eq!(analytics.len(), 1);
        assert_eq!(analytics[0]["payload"]["active_pumps"], 2);
    }

    #[tokio::test]
    async fn maintenance_publishes_on_decade_crossing_only() {
        let (hub, mut rx) = hub_with_listener().await;
        let mut plane = FanoutPlane::new().with_ws(hub);

        let maintenance_count = |messages: &[Value]| {
            messages
                .iter()
                .filter(|m| m["topic"].as_str().is_some_and(|t| t.ends_with("/maintenance")))
                .count()
        };

        let mut snapshots = BTreeMap::new();
        let mut snap = snapshot("P1", true, 2000.0, 80.0);

        // Below the first decade: nothing.
        snap.runtime_hours = 9.9;
        snapshots.insert("P1".to_string(), snap.clone());
        plane.broadcast(&snapshots).await;
        assert_eq!(maintenance_count(&drain(&mut rx)), 0);

        // Crossing 10 h publishes exactly once.
        snap.runtime_hours = 10.2;
        snapshots.insert("P1".to_string(), snap.clone());
        plane.broadcast(&snapshots).await;
        assert_eq!(maintenance_count(&drain(&mut rx)), 1);

        // Staying inside the same decade stays quiet.
        snap.runtime_hours = 17.0;
        snapshots.insert("P1".to_string(), snap.clone());
        plane.broadcast(&snapshots).await;
        assert_eq!(maintenance_count(&drain(&mut rx)), 0);

        // Next decade fires again.
        snap.runtime_hours = 21.0;
        snapshots.insert("P1".to_string(), snap);
        plane.broadcast(&snapshots).await;
        assert_eq!(maintenance_count(&drain(&mut rx)), 1);
    }
}
