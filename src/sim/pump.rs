//! Pump actor: owns per-pump state, derives the full analog sample vector
//! each tick, and writes it into the pump's nodes.
//!
//! The actor binds once against its instance subtree (node handles and
//! EURange cache), then ticks under the kernel. Control verbs mutate state
//! and — for start/stop — push the discrete status nodes immediately so the
//! transition is observable before the verb returns.

use std::collections::HashMap;

use chrono::{DateTime, Timelike, Utc};
use rand::Rng;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::schema::DesignSpecs;
use crate::model::space::{AddressSpace, NodeClass, NodeId, SpaceError, Variant};
use crate::model::SharedSpace;
use super::modes::ModeParameters;
use super::physics::PumpPhysics;

/// Bounded RPM ramp rate, RPM per second.
const RPM_RAMP_RATE: f64 = 150.0;

/// RunFeedback asserts above this speed.
const FEEDBACK_RPM_THRESHOLD: f64 = 100.0;

/// Minimum electrical draw while running (VFD and auxiliary losses), kW.
const IDLE_POWER_KW: f64 = 5.0;

// ============================================================================
// State & snapshot
// ============================================================================

/// Mutable pump state. `runtime_hours` only advances while running;
/// `start_count` increments on every false→true transition of `is_running`.
#[derive(Debug, Clone, Serialize)]
pub struct PumpState {
    pub is_running: bool,
    pub is_faulted: bool,
    pub is_local_mode: bool,
    pub current_rpm: f64,
    pub target_rpm: f64,
    pub runtime_hours: f64,
    pub start_count: u32,
    pub wet_well_level: f64,
    pub ambient_temp: f64,
    pub last_tick_at: Option<DateTime<Utc>>,
}

impl Default for PumpState {
    fn default() -> Self {
        Self {
            is_running: false,
            is_faulted: false,
            is_local_mode: false,
            current_rpm: 0.0,
            target_rpm: 0.0,
            runtime_hours: 0.0,
            start_count: 0,
            wet_well_level: 4.0,
            ambient_temp: 25.0,
            last_tick_at: None,
        }
    }
}

/// Full per-tick sample vector plus identity, shaped for fan-out.
#[derive(Debug, Clone, Serialize)]
pub struct PumpSnapshot {
    pub id: String,
    pub name: String,
    pub is_running: bool,
    pub is_faulted: bool,
    pub flow_rate: f64,
    pub suction_pressure: f64,
    pub discharge_pressure: f64,
    pub rpm: f64,
    pub motor_current: f64,
    pub voltage: f64,
    pub power_consumption: f64,
    pub power_factor: f64,
    pub vfd_frequency: f64,
    /// Pump efficiency at the operating point, percent.
    pub efficiency: f64,
    pub motor_winding_temp: f64,
    pub bearing_temp_de: f64,
    pub bearing_temp_nde: f64,
    pub seal_chamber_temp: f64,
    pub ambient_temp: f64,
    pub vibration_de_h: f64,
    pub vibration_de_v: f64,
    pub vibration_de_a: f64,
    pub vibration_nde_h: f64,
    pub vibration_nde_v: f64,
    pub vibration_nde_a: f64,
    pub runtime_hours: f64,
    pub start_count: u32,
    pub wet_well_level: f64,
}

impl PumpSnapshot {
    /// Numeric value of a node-named sample variable, for alarm inputs.
    pub fn value_of(&self, variable: &str) -> Option<f64> {
        let value = match variable {
            "FlowRate" => self.flow_rate,
            "SuctionPressure" => self.suction_pressure,
            "DischargePressure" => self.discharge_pressure,
            "RPM" => self.rpm,
            "MotorCurrent" => self.motor_current,
            "Voltage" => self.voltage,
            "PowerConsumption" => self.power_consumption,
            "PowerFactor" => self.power_factor,
            "VFDFrequency" => self.vfd_frequency,
            "MotorWindingTemp" => self.motor_winding_temp,
            "BearingTemp_DE" => self.bearing_temp_de,
            "BearingTemp_NDE" => self.bearing_temp_nde,
            "SealChamberTemp" => self.seal_chamber_temp,
            "AmbientTemp" => self.ambient_temp,
            "Vibration_DE_H" => self.vibration_de_h,
            "Vibration_DE_V" => self.vibration_de_v,
            "Vibration_DE_A" => self.vibration_de_a,
            "Vibration_NDE_H" => self.vibration_nde_h,
            "Vibration_NDE_V" => self.vibration_nde_v,
            "Vibration_NDE_A" => self.vibration_nde_a,
            "RuntimeHours" => self.runtime_hours,
            "StartCount" => f64::from(self.start_count),
            "WetWellLevel" => self.wet_well_level,
            _ => return None,
        };
        Some(value)
    }
}

// ============================================================================
// Actor
// ============================================================================

pub struct PumpActor {
    pub id: String,
    pub name: String,
    pub root: NodeId,
    physics: PumpPhysics,
    pub state: PumpState,
    /// Dotted browse name → node, resolved once at bind.
    nodes: HashMap<String, NodeId>,
    /// Variable name → (low, high) from the node's EURange property.
    eu_ranges: HashMap<String, (f64, f64)>,
    /// Diurnal flow target ratio, refreshed at the top of every tick.
    target_flow_ratio: f64,
    last_snapshot: Option<PumpSnapshot>,
}

impl PumpActor {
    pub fn new(id: &str, name: &str, root: NodeId, specs: DesignSpecs) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            root,
            physics: PumpPhysics::new(specs),
            state: PumpState::default(),
            nodes: HashMap::new(),
            eu_ranges: HashMap::new(),
            target_flow_ratio: 1.0,
            last_snapshot: None,
        }
    }

    pub fn specs(&self) -> &DesignSpecs {
        self.physics.design()
    }

    /// Resolve node handles and EURange limits from the instance subtree.
    pub fn bind(&mut self, space: &AddressSpace) {
        self.nodes.clear();
        self.collect_nodes(space, self.root, String::new());

        for (key, &node) in &self.nodes {
            if key.contains('.') {
                continue;
            }
            if let Some(range_node) = space.child_by_name(node, "EURange") {
                if let Ok(dv) = space.read_value(range_node) {
                    if let Variant::Range { low, high } = dv.value {
                        self.eu_ranges.insert(key.clone(), (low, high));
                    }
                }
            }
        }
        info!(pump = %self.name, nodes = self.nodes.len(), "Bound pump actor");
    }

    fn collect_nodes(&mut self, space: &AddressSpace, node: NodeId, prefix: String) {
        for &child in space.children(node) {
            let Some(n) = space.node(child) else { continue };
            let key = if prefix.is_empty() {
                n.browse_name.name.clone()
            } else {
                format!("{prefix}.{}", n.browse_name.name)
            };
            if matches!(n.class, NodeClass::Object | NodeClass::Variable) {
                self.collect_nodes(space, child, key.clone());
            }
            self.nodes.insert(key, child);
        }
    }

    // ------------------------------------------------------------------
    // Control verbs
    // ------------------------------------------------------------------

    /// Start the pump: spins toward 95 % of max RPM. Rejected while faulted
    /// or in local mode. Status nodes are written before returning.
    pub async fn start(&mut self, space: &SharedSpace) -> (bool, String) {
        if self.state.is_faulted {
            return (false, "Cannot start: pump is faulted".to_string());
        }
        if self.state.is_local_mode {
            return (false, "Cannot start: pump is in local mode".to_string());
        }
        if !self.state.is_running {
            self.state.start_count += 1;
        }
        self.state.is_running = true;
        self.state.target_rpm = self.specs().max_rpm * 0.95;
        info!(pump = %self.name, target_rpm = self.state.target_rpm, "Pump started");
        self.write_status(space).await;
        (true, "Pump started successfully".to_string())
    }

    /// Stop the pump. Status nodes are written before returning.
    pub async fn stop(&mut self, space: &SharedSpace) -> (bool, String) {
        self.state.is_running = false;
        self.state.target_rpm = 0.0;
        info!(pump = %self.name, "Pump stopped");
        self.write_status(space).await;
        (true, "Pump stopped successfully".to_string())
    }

    /// Set the target speed; only valid while running and inside the
    /// continuous speed band.
    pub fn set_speed(&mut self, rpm: f64) -> (bool, String) {
        let specs = self.specs();
        if rpm < specs.min_rpm || rpm > specs.max_rpm {
            return (
                false,
                format!("Speed must be between {} and {} RPM", specs.min_rpm, specs.max_rpm),
            );
        }
        if !self.state.is_running {
            return (false, "Pump must be running to set speed".to_string());
        }
        self.state.target_rpm = rpm;
        info!(pump = %self.name, rpm, "Pump speed set");
        (true, format!("Speed set to {rpm} RPM"))
    }

    pub fn reset_fault(&mut self) -> (bool, String) {
        self.state.is_faulted = false;
        info!(pump = %self.name, "Fault reset");
        (true, "Fault reset".to_string())
    }

    /// Latch a fault: trips the pump within the same call.
    pub fn trigger_fault(&mut self) {
        self.state.is_faulted = true;
        self.state.is_running = false;
        self.state.target_rpm = 0.0;
    }

    /// Last computed snapshot, for initial-state pushes and the control
    /// surface. `None` before the first tick.
    pub fn snapshot(&self) -> Option<&PumpSnapshot> {
        self.last_snapshot.as_ref()
    }

    // ------------------------------------------------------------------
    // Tick
    // ------------------------------------------------------------------

    /// Advance the pump by `dt` seconds and write the sample vector.
    pub async fn tick(
        &mut self,
        dt: f64,
        params: &ModeParameters,
        rng: &mut impl Rng,
        space: &SharedSpace,
    ) -> Result<PumpSnapshot, SpaceError> {
        self.target_flow_ratio = params.diurnal_ratio(chrono::Local::now().hour());
        self.update_rpm(dt);

        if self.state.is_running {
            self.state.runtime_hours += (dt / 3600.0) * params.time_acceleration;
        }

        let snapshot = self.compute_snapshot(params, rng);
        let now = Utc::now();
        self.state.last_tick_at = Some(now);

        {
            let mut space = space.write().await;
            for (name, variant) in self.node_values(&snapshot) {
                let Some(&node) = self.nodes.get(name) else {
                    debug!(pump = %self.name, variable = name, "No node for sample variable");
                    continue;
                };
                let variant = self.clamp_to_eu_range(name, variant);
                if let Err(e) = space.write_value(node, variant, now) {
                    debug!(pump = %self.name, variable = name, error = %e, "Sample write rejected");
                }
            }
        }

        self.last_snapshot = Some(snapshot.clone());
        Ok(snapshot)
    }

    /// Ramp current RPM toward the target at the bounded rate.
    fn update_rpm(&mut self, dt: f64) {
        let step = RPM_RAMP_RATE * dt;
        if self.state.target_rpm > self.state.current_rpm {
            self.state.current_rpm = (self.state.current_rpm + step).min(self.state.target_rpm);
        } else if self.state.target_rpm < self.state.current_rpm {
            self.state.current_rpm = (self.state.current_rpm - step).max(self.state.target_rpm);
        }
    }

    /// Derive the full sample vector from current state and mode factors.
    fn compute_snapshot(&self, params: &ModeParameters, rng: &mut impl Rng) -> PumpSnapshot {
        let factors = params.factors();
        let specs = self.specs().clone();
        let state = &self.state;

        let flow = self.physics.flow_at_speed(state.current_rpm)
            * factors.flow_reduction
            * self.target_flow_ratio;
        let head = self.physics.head_at_flow(flow, state.current_rpm);
        let suction = self.physics.suction_pressure(state.wet_well_level, flow, rng);
        let discharge = PumpPhysics::discharge_pressure(suction, head, rng);

        let pump_efficiency =
            self.physics.efficiency_at(flow, state.current_rpm) * factors.efficiency;
        let mut power =
            PumpPhysics::electrical_power(flow, head, pump_efficiency, specs.motor_efficiency);
        if state.is_running && power < IDLE_POWER_KW {
            power = IDLE_POWER_KW;
        }

        let load_fraction = if state.is_running { power / specs.design_power } else { 0.0 };
        let power_factor = PumpPhysics::power_factor(load_fraction);
        let voltage = specs.rated_voltage * (0.98 + rng.gen_range(-0.02..=0.02));
        let current = PumpPhysics::motor_current(power, voltage, power_factor);
        let frequency = self.physics.vfd_frequency(state.current_rpm);

        let hot_ambient = state.ambient_temp + factors.temp_offset;
        let winding_temp = PumpPhysics::winding_temp(hot_ambient, current, specs.full_load_amps, rng);

        let flow_deviation = if specs.design_flow > 0.0 {
            (flow - specs.design_flow * 0.8) / specs.design_flow
        } else {
            0.0
        };
        let base_vibration = self.physics.vibration(
            state.current_rpm,
            factors.vibration,
            factors.vibration,
            flow_deviation,
            rng,
        );

        let bearing_de =
            PumpPhysics::bearing_temp(hot_ambient, power, base_vibration, factors.vibration - 1.0, rng);
        let bearing_nde = bearing_de - rng.gen_range(2.0..=5.0);
        let seal_temp = self.physics.seal_temp(hot_ambient, flow, params.seal_wear_factor(), rng);

        // Three-axis spread with ±10 % per-axis noise; NDE runs at 0.85×.
        let nde_base = base_vibration * 0.85;
        let vibration_de_h = base_vibration * (1.0 + rng.gen_range(-0.1..=0.1));
        let vibration_de_v = base_vibration * 0.9 * (1.0 + rng.gen_range(-0.1..=0.1));
        let vibration_de_a = base_vibration * 0.7 * (1.0 + rng.gen_range(-0.1..=0.1));
        let vibration_nde_h = nde_base * (1.0 + rng.gen_range(-0.1..=0.1));
        let vibration_nde_v = nde_base * 0.9 * (1.0 + rng.gen_range(-0.1..=0.1));
        let vibration_nde_a = nde_base * 0.7 * (1.0 + rng.gen_range(-0.1..=0.1));

        PumpSnapshot {
            id: self.id.clone(),
            name: self.name.clone(),
            is_running: state.is_running,
            is_faulted: state.is_faulted,
            flow_rate: flow,
            suction_pressure: suction,
            discharge_pressure: discharge,
            rpm: state.current_rpm,
            motor_current: current,
            voltage,
            power_consumption: power,
            power_factor,
            vfd_frequency: frequency,
            efficiency: pump_efficiency,
            motor_winding_temp: winding_temp,
            bearing_temp_de: bearing_de,
            bearing_temp_nde: bearing_nde,
            seal_chamber_temp: seal_temp,
            ambient_temp: state.ambient_temp + rng.gen_range(-0.5..=0.5),
            vibration_de_h,
            vibration_de_v,
            vibration_de_a,
            vibration_nde_h,
            vibration_nde_v,
            vibration_nde_a,
            runtime_hours: state.runtime_hours,
            start_count: state.start_count,
            wet_well_level: state.wet_well_level + (state.runtime_hours * 0.1).sin() * 0.5,
        }
    }

    /// Node write list for a snapshot: bool → Boolean, counter → UInt32,
    /// everything else → Double.
    fn node_values(&self, s: &PumpSnapshot) -> Vec<(&'static str, Variant)> {
        let state = &self.state;
        vec![
            ("FlowRate", Variant::Double(s.flow_rate)),
            ("SuctionPressure", Variant::Double(s.suction_pressure)),
            ("DischargePressure", Variant::Double(s.discharge_pressure)),
            ("RPM", Variant::Double(s.rpm)),
            ("MotorCurrent", Variant::Double(s.motor_current)),
            ("Voltage", Variant::Double(s.voltage)),
            ("PowerConsumption", Variant::Double(s.power_consumption)),
            ("PowerFactor", Variant::Double(s.power_factor)),
            ("VFDFrequency", Variant::Double(s.vfd_frequency)),
            ("MotorWindingTemp", Variant::Double(s.motor_winding_temp)),
            ("BearingTemp_DE", Variant::Double(s.bearing_temp_de)),
            ("BearingTemp_NDE", Variant::Double(s.bearing_temp_nde)),
            ("SealChamberTemp", Variant::Double(s.seal_chamber_temp)),
            ("AmbientTemp", Variant::Double(s.ambient_temp)),
            ("Vibration_DE_H", Variant::Double(s.vibration_de_h)),
            ("Vibration_DE_V", Variant::Double(s.vibration_de_v)),
            ("Vibration_DE_A", Variant::Double(s.vibration_de_a)),
            ("Vibration_NDE_H", Variant::Double(s.vibration_nde_h)),
            ("Vibration_NDE_V", Variant::Double(s.vibration_nde_v)),
            ("Vibration_NDE_A", Variant::Double(s.vibration_nde_a)),
            ("RuntimeHours", Variant::Double(s.runtime_hours)),
            ("StartCount", Variant::UInt32(s.start_count)),
            ("WetWellLevel", Variant::Double(s.wet_well_level)),
            ("RunCommand", Variant::Boolean(state.is_running)),
            (
                "RunFeedback",
                Variant::Boolean(state.is_running && state.current_rpm > FEEDBACK_RPM_THRESHOLD),
            ),
            ("FaultStatus", Variant::Boolean(state.is_faulted)),
            ("ReadyStatus", Variant::Boolean(!state.is_faulted && !state.is_local_mode)),
            ("LocalRemote", Variant::Boolean(!state.is_local_mode)),
        ]
    }

    fn clamp_to_eu_range(&self, name: &str, variant: Variant) -> Variant {
        let Some(&(low, high)) = self.eu_ranges.get(name) else { return variant };
        match variant {
            Variant::Double(v) => Variant::Double(v.clamp(low, high)),
            Variant::UInt32(v) => {
                Variant::UInt32((f64::from(v).clamp(low.max(0.0), high)) as u32)
            }
            other => other,
        }
    }

    /// Write the five discrete status nodes with a fresh timestamp.
    async fn write_status(&self, space: &SharedSpace) {
        let state = &self.state;
        let values = [
            ("RunCommand", state.is_running),
            (
                "RunFeedback",
                state.is_running && state.current_rpm > FEEDBACK_RPM_THRESHOLD,
            ),
            ("FaultStatus", state.is_faulted),
            ("ReadyStatus", !state.is_faulted && !state.is_local_mode),
            ("LocalRemote", !state.is_local_mode),
        ];
        let now = Utc::now();
        let mut space = space.write().await;
        for (name, value) in values {
            let Some(&node) = self.nodes.get(name) else { continue };
            if let Err(e) = space.write_value(node, Variant::Boolean(value), now) {
                debug!(pump = %self.name, variable = name, error = %e, "Status write rejected");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{shared, AddressSpace};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn actor() -> (PumpActor, SharedSpace) {
        let mut space = AddressSpace::new();
        let objects = space.objects_folder();
        let root = space
            .add_object(
                objects,
                crate::model::QualifiedName::new(2, "IPS_PMP_001"),
                "Pump 1",
                None,
            )
            .unwrap();
        let mut actor = PumpActor::new("IPS_PMP_001", "IPS_PMP_001", root, DesignSpecs::default());
        actor.bind(&space);
        (actor, shared(space))
    }

    fn quiet_params() -> ModeParameters {
        let mut params = ModeParameters::default();
        params.flow_profile.diurnal_enabled = false;
        params
    }

    #[tokio::test]
    async fn start_increments_counter_and_sets_target() {
        let (mut actor, space) = actor();
        let (ok, _) = actor.start(&space).await;
        assert!(ok);
        assert_eq!(actor.state.start_count, 1);
        assert!((actor.state.target_rpm - 1121.0).abs() < 1e-9); // 0.95 × 1180

        // A second start while already running succeeds but is not a
        // false→true transition, so the counter holds.
        let (ok, _) = actor.start(&space).await;
        assert!(ok);
        assert_eq!(actor.state.start_count, 1);
    }

    #[tokio::test]
    async fn start_is_rejected_while_faulted() {
        let (mut actor, space) = actor();
        actor.trigger_fault();
        let (ok, reason) = actor.start(&space).await;
        assert!(!ok);
        assert!(reason.contains("faulted"));
        assert_eq!(actor.state.start_count, 0);
        assert!(!actor.state.is_running);
    }

    #[tokio::test]
    async fn stop_zeroes_the_target() {
        let (mut actor, space) = actor();
        actor.start(&space).await;
        actor.stop(&space).await;
        assert!(!actor.state.is_running);
        assert_eq!(actor.state.target_rpm, 0.0);
    }

    #[test]
    fn set_speed_validates_preconditions() {
        let (mut actor, _) = actor();
        let (ok, reason) = actor.set_speed(800.0);
        assert!(!ok);
        assert!(reason.contains("running"));

        actor.state.is_running = true;
        let (ok, _) = actor.set_speed(800.0);
        assert!(ok);
        assert_eq!(actor.state.target_rpm, 800.0);

        let (ok, _) = actor.set_speed(599.0);
        assert!(!ok);
        let (ok, _) = actor.set_speed(1181.0);
        assert!(!ok);
    }

    #[tokio::test]
    async fn rpm_ramp_is_bounded() {
        let (mut actor, space) = actor();
        let params = quiet_params();
        let mut rng = StdRng::seed_from_u64(42);

        actor.start(&space).await;
        actor.tick(1.0, &params, &mut rng, &space).await.unwrap();
        assert!((actor.state.current_rpm - 150.0).abs() < 1e-9);

        // A long tick reaches the target instead of overshooting.
        actor.tick(60.0, &params, &mut rng, &space).await.unwrap();
        assert!((actor.state.current_rpm - actor.state.target_rpm).abs() < 1e-9);
    }

    #[tokio::test]
    async fn runtime_advances_only_while_running() {
        let (mut actor, space) = actor();
        let params = quiet_params();
        let mut rng = StdRng::seed_from_u64(42);

        actor.tick(10.0, &params, &mut rng, &space).await.unwrap();
        assert_eq!(actor.state.runtime_hours, 0.0);

        actor.start(&space).await;
        actor.tick(3600.0, &params, &mut rng, &space).await.unwrap();
        assert!((actor.state.runtime_hours - 1.0).abs() < 1e-9);

        let mut accelerated = params.clone();
        accelerated.time_acceleration = 10.0;
        actor.tick(3600.0, &accelerated, &mut rng, &space).await.unwrap();
        assert!((actor.state.runtime_hours - 11.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn steady_state_flow_tracks_affinity_law() {
        let (mut actor, space) = actor();
        let params = quiet_params();
        let mut rng = StdRng::seed_from_u64(42);

        actor.start(&space).await;
        // Ramp to target: 1121 RPM needs ~7.5 s at 150 RPM/s.
        for _ in 0..10 {
            actor.tick(1.0, &params, &mut rng, &space).await.unwrap();
        }
        let snapshot = actor.tick(1.0, &params, &mut rng, &space).await.unwrap();
        let expected = 0.95 * 2500.0;
        assert!(
            (snapshot.flow_rate - expected).abs() / expected < 0.05,
            "flow {} not within 5% of {}",
            snapshot.flow_rate,
            expected
        );
        assert!(snapshot.is_running);
        assert!(snapshot.power_consumption > IDLE_POWER_KW);
    }

    #[tokio::test]
    async fn stopped_pump_reports_floor_values() {
        let (mut actor, space) = actor();
        let params = quiet_params();
        let mut rng = StdRng::seed_from_u64(42);
        let snapshot = actor.tick(1.0, &params, &mut rng, &space).await.unwrap();
        assert_eq!(snapshot.flow_rate, 0.0);
        assert_eq!(snapshot.rpm, 0.0);
        assert_eq!(snapshot.power_consumption, 0.0);
        // Stopped machine shows baseline sensor noise only (0.1 ± 10 %).
        assert!(snapshot.vibration_de_h <= 0.12);
        assert!(!snapshot.is_running);
    }

    #[test]
    fn snapshot_exposes_alarm_inputs() {
        let (actor, _) = actor();
        let mut rng = StdRng::seed_from_u64(42);
        let snapshot = actor.compute_snapshot(&quiet_params(), &mut rng);
        assert!(snapshot.value_of("Vibration_DE_H").is_some());
        assert!(snapshot.value_of("BearingTemp_DE").is_some());
        assert!(snapshot.value_of("NoSuchVariable").is_none());
    }
}
