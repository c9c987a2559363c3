//! Topic shapes and JSON payloads for the publish/subscribe sinks.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use crate::sim::pump::PumpSnapshot;

/// System-wide analytics topic, published once per tick.
pub const ANALYTICS_TOPIC: &str = "plant/system/analytics";

pub fn telemetry_topic(pump_id: &str) -> String {
    format!("plant/pumps/{pump_id}/telemetry")
}

pub fn maintenance_topic(pump_id: &str) -> String {
    format!("plant/pumps/{pump_id}/maintenance")
}

/// Per-tick telemetry message: headline metrics plus run state.
pub fn telemetry_payload(snapshot: &PumpSnapshot, at: DateTime<Utc>) -> Value {
    json!({
        "timestamp": at.to_rfc3339(),
        "pump_id": snapshot.id,
        "metrics": {
            "flow_rate": snapshot.flow_rate,
            "discharge_pressure": snapshot.discharge_pressure,
            "suction_pressure": snapshot.suction_pressure,
            "rpm": snapshot.rpm,
            "power_consumption": snapshot.power_consumption,
            "efficiency": snapshot.efficiency,
            "motor_temp": snapshot.motor_winding_temp,
            "vibration_level": snapshot.vibration_de_h,
        },
        "state": {
            "is_running": snapshot.is_running,
            "is_faulted": snapshot.is_faulted,
        },
    })
}

/// Lifecycle counters, published when a pump crosses a runtime decade.
pub fn maintenance_payload(snapshot: &PumpSnapshot, at: DateTime<Utc>) -> Value {
    json!({
        "timestamp": at.to_rfc3339(),
        "pump_id": snapshot.id,
        "runtime_hours": snapshot.runtime_hours,
        "start_count": snapshot.start_count,
    })
}

/// Station aggregates across all pumps.
pub fn analytics_payload(snapshots: &BTreeMap<String, PumpSnapshot>) -> Value {
    let count = snapshots.len();
    let system_efficiency = if count > 0 {
        snapshots.values().map(|s| s.efficiency).sum::<f64>() / count as f64
    } else {
        0.0
    };
    json!({
        "system_efficiency": system_efficiency,
        "active_pumps": snapshots.values().filter(|s| s.is_running).count(),
        "total_flow": snapshots.values().map(|s| s.flow_rate).sum::<f64>(),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Zeroed snapshot with the fields the fan-out plane cares about.
    pub(crate) fn snapshot(id: &str, running: bool, flow: f64, efficiency: f64) -> PumpSnapshot {
        PumpSnapshot {
            id: id.to_string(),
            name: id.to_string(),
            is_running: running,
            is_faulted: false,
            flow_rate: flow,
            suction_pressure: 0.3,
            discharge_pressure: 1.7,
            rpm: if running { 1121.0 } else { 0.0 },
            motor_current: 150.0,
            voltage: 480.0,
            power_consumption: 120.0,
            power_factor: 0.85,
            vfd_frequency: 56.0,
            efficiency,
            motor_winding_temp: 65.0,
            bearing_temp_de: 55.0,
            bearing_temp_nde: 52.0,
            seal_chamber_temp: 40.0,
            ambient_temp: 25.0,
            vibration_de_h: 2.1,
            vibration_de_v: 1.9,
            vibration_de_a: 1.5,
            vibration_nde_h: 1.8,
            vibration_nde_v: 1.6,
            vibration_nde_a: 1.3,
            runtime_hours: 0.0,
            start_count: u32::from(running),
            wet_well_level: 4.0,
        }
    }

    #[test]
    fn analytics_aggregates_running_pumps_and_flow() {
        let mut snapshots = BTreeMap::new();
        snapshots.insert("P1".to_string(), snapshot("P1", true, 2000.0, 80.0));
        snapshots.insert("P2".to_string(), snapshot("P2", false, 0.0, 60.0));

        let payload = analytics_payload(&snapshots);
        assert_eq!(payload["active_pumps"], 1);
        assert_eq!(payload["total_flow"], 2000.0);
        assert_eq!(payload["system_efficiency"], 70.0);
    }

    #[test]
    fn topic_shapes() {
        assert_eq!(telemetry_topic("IPS_PMP_001"), "plant/pumps/IPS_PMP_001/telemetry");
        assert_eq!(maintenance_topic("IPS_PMP_001"), "plant/pumps/IPS_PMP_001/maintenance");
    }

    #[test]
    fn telemetry_payload_carries_state_and_metrics() {
        let snap = snapshot("P1", true, 2375.0, 82.0);
        let payload = telemetry_payload(&snap, Utc::now());
        assert_eq!(payload["pump_id"], "P1");
        assert_eq!(payload["metrics"]["flow_rate"], 2375.0);
        assert_eq!(payload["state"]["is_running"], true);
    }
}
