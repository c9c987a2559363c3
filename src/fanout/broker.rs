//! Embedded MQTT broker and the in-process telemetry publisher.
//!
//! The broker (rumqttd) runs on its own OS thread and accepts anonymous TCP
//! connections. The publisher is a rumqttc client connected over loopback;
//! its bounded request queue is the back-pressure boundary between the
//! kernel and the network. On overflow the newest message is dropped and a
//! monotonic counter is bumped — the kernel never blocks on a publish.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rumqttc::{AsyncClient, MqttOptions, QoS};
use tracing::{debug, info, warn};

/// Publisher request-queue depth; ticks publishing a few messages per pump
/// stay far below this unless the broker stalls.
const PUBLISH_QUEUE_DEPTH: usize = 256;

/// Broker configuration template; the listener port is substituted at
/// startup.
const BROKER_CONFIG_TEMPLATE: &str = r#"
id = 0

[router]
max_connections = 512
max_outgoing_packet_count = 200
max_segment_size = 104857600
max_segment_count = 10

[v4.sim]
name = "sim"
listen = "0.0.0.0:{port}"
next_connection_delay_ms = 1

[v4.sim.connections]
connection_timeout_ms = 60000
max_payload_size = 20480
max_inflight_count = 100
dynamic_filters = true
"#;

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("embedded broker configuration is invalid")]
    Config(#[from] toml::de::Error),
}

/// Handle used by the fan-out plane to queue JSON publications.
#[derive(Debug, Clone)]
pub struct BrokerPublisher {
    client: AsyncClient,
    dropped: Arc<AtomicU64>,
}

impl BrokerPublisher {
    /// Queue one QoS 1 JSON message. Never blocks: a full queue drops the
    /// message and bumps the drop counter.
    pub fn publish(&self, topic: &str, payload: &serde_json::Value) {
        let bytes = match serde_json::to_vec(payload) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(topic, error = %e, "Failed to encode broker payload");
                return;
            }
        };
        if let Err(e) = self.client.try_publish(topic, QoS::AtLeastOnce, false, bytes) {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(topic, dropped, error = %e, "Broker queue full; dropping newest message");
        }
    }

    /// Total messages dropped on queue overflow since startup.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Disconnect the publisher client.
    pub async fn shutdown(&self) {
        let _ = self.client.disconnect().await;
    }
}

/// Start the embedded broker and connect the loopback publisher.
///
/// The broker thread runs for the life of the process; the returned
/// publisher is handed to the fan-out plane.
pub fn start(port: u16) -> Result<BrokerPublisher, BrokerError> {
    let raw = BROKER_CONFIG_TEMPLATE.replace("{port}", &port.to_string());
    let config: rumqttd::Config = toml::from_str(&raw)?;

    let mut broker = rumqttd::Broker::new(config);
    std::thread::Builder::new()
        .name("mqtt-broker".to_string())
        .spawn(move || {
            if let Err(e) = broker.start() {
                warn!(error = ?e, "Embedded MQTT broker exited");
            }
        })
        .ok();
    info!(port, "Embedded MQTT broker listening");

    let mut options = MqttOptions::new("ips-sim-publisher", "127.0.0.1", port);
    options.set_keep_alive(Duration::from_secs(30));
    let (client, mut eventloop) = AsyncClient::new(options, PUBLISH_QUEUE_DEPTH);

    // Drive the client event loop; reconnects are handled by polling again.
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(_event) => {}
                Err(e) => {
                    debug!(error = %e, "MQTT publisher connection error; retrying");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    });

    Ok(BrokerPublisher { client, dropped: Arc::new(AtomicU64::new(0)) })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broker_config_template_parses() {
        let raw = BROKER_CONFIG_TEMPLATE.replace("{port}", "1883");
        let config: Result<rumqttd::Config, _> = toml::from_str(&raw);
        assert!(config.is_ok(), "{:?}", config.err());
    }

    #[tokio::test]
    async fn overflow_drops_newest_and_counts() {
        // A client with no event loop drains nothing, so a tiny queue
        // overflows deterministically.
        let options = MqttOptions::new("test", "127.0.0.1", 1);
        let (client, _eventloop) = AsyncClient::new(options, 1);
        let publisher = BrokerPublisher { client, dropped: Arc::new(AtomicU64::new(0)) };

        let payload = serde_json::json!({"v": 1});
        for _ in 0..10 {
            publisher.publish("t", &payload);
        }
        assert!(publisher.dropped_count() > 0);
    }
}
