//! Simulation mode model: wear and failure parameters and the factors they
//! impose on the physics.
//!
//! Four modes are supported:
//! - OPTIMAL: new pump at manufacturer specifications
//! - AGED: parameterized multi-year wear
//! - DEGRADED: explicit impeller/bearing/seal wear percentages
//! - FAILURE: progressive failure of a selected type

use serde::{Deserialize, Serialize};

// ============================================================================
// Mode and failure vocabulary
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SimulationMode {
    #[default]
    Optimal,
    Aged,
    Degraded,
    Failure,
}

impl SimulationMode {
    /// Wire encoding used by the `Mode` node and the `SetMode` method.
    pub fn from_wire(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Optimal),
            1 => Some(Self::Aged),
            2 => Some(Self::Degraded),
            3 => Some(Self::Failure),
            _ => None,
        }
    }

    pub fn to_wire(self) -> i32 {
        match self {
            Self::Optimal => 0,
            Self::Aged => 1,
            Self::Degraded => 2,
            Self::Failure => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Optimal => "OPTIMAL",
            Self::Aged => "AGED",
            Self::Degraded => "DEGRADED",
            Self::Failure => "FAILURE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureType {
    #[default]
    None,
    Bearing,
    Seal,
    Cavitation,
    Impeller,
    Motor,
}

impl FailureType {
    pub fn from_wire(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::None),
            1 => Some(Self::Bearing),
            2 => Some(Self::Seal),
            3 => Some(Self::Cavitation),
            4 => Some(Self::Impeller),
            5 => Some(Self::Motor),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Bearing => "BEARING",
            Self::Seal => "SEAL",
            Self::Cavitation => "CAVITATION",
            Self::Impeller => "IMPELLER",
            Self::Motor => "MOTOR",
        }
    }
}

// ============================================================================
// Per-mode configuration
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AgedConfig {
    pub years_of_operation: f64,
    pub average_run_hours_per_year: f64,
    pub start_cycles_per_year: u32,
}

impl Default for AgedConfig {
    fn default() -> Self {
        Self { years_of_operation: 5.0, average_run_hours_per_year: 6000.0, start_cycles_per_year: 500 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DegradedConfig {
    /// Impeller clearance increase, percent (0-50).
    pub impeller_wear: f64,
    /// Bearing damage, percent (0-100).
    pub bearing_wear: f64,
    /// Seal degradation, percent (0-100).
    pub seal_wear: f64,
}

impl Default for DegradedConfig {
    fn default() -> Self {
        Self { impeller_wear: 15.0, bearing_wear: 20.0, seal_wear: 25.0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FailureConfig {
    pub failure_type: FailureType,
    /// Progression, percent (0-100).
    pub progression: f64,
    /// Nominal time from trigger to complete failure, hours.
    pub time_to_failure: f64,
}

impl Default for FailureConfig {
    fn default() -> Self {
        Self { failure_type: FailureType::None, progression: 0.0, time_to_failure: 100.0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FlowProfile {
    pub diurnal_enabled: bool,
    /// Minimum demand, m³/h.
    pub base_flow: f64,
    /// Maximum demand, m³/h.
    pub peak_flow: f64,
    /// Morning peak hour (0-23).
    pub peak_hour_1: u32,
    /// Evening peak hour (0-23).
    pub peak_hour_2: u32,
}

impl Default for FlowProfile {
    fn default() -> Self {
        Self { diurnal_enabled: true, base_flow: 1600.0, peak_flow: 4000.0, peak_hour_1: 7, peak_hour_2: 19 }
    }
}

// ============================================================================
// Diurnal demand
// ============================================================================

/// Per-hour flow multipliers for a typical wastewater influent pattern:
/// morning and evening peaks, overnight trough.
pub const HOURLY_FLOW_MULTIPLIERS: [f64; 24] = [
    0.60, 0.55, 0.50, 0.50, 0.55, 0.70, // 00-05
    1.00, 1.30, 1.40, 1.20, 1.00, 0.95, // 06-11
    1.10, 1.15, 1.00, 0.90, 0.95, 1.00, // 12-17
    1.20, 1.30, 1.20, 1.00, 0.85, 0.70, // 18-23
];

/// Flow multiplier for the given hour of day.
pub fn diurnal_multiplier(hour: u32) -> f64 {
    HOURLY_FLOW_MULTIPLIERS[(hour % 24) as usize]
}

// ============================================================================
// Mode parameters
// ============================================================================

/// Derived per-tick factors applied to the physics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModeFactors {
    /// Multiplier on pump efficiency, [0.3, 1.0].
    pub efficiency: f64,
    /// Multiplier on vibration, ≥ 1.
    pub vibration: f64,
    /// Additive temperature offset, °C, ≥ 0.
    pub temp_offset: f64,
    /// Multiplier on delivered flow, (0, 1].
    pub flow_reduction: f64,
}

/// Complete mode parameters. Owned by the kernel; mutated only through the
/// bound control operations, between ticks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeParameters {
    pub mode: SimulationMode,
    pub aged: AgedConfig,
    pub degraded: DegradedConfig,
    pub failure: FailureConfig,
    pub flow_profile: FlowProfile,
    /// Tick interval, ms.
    pub simulation_interval: f64,
    /// Simulated-time multiplier, [0.1, 100].
    pub time_acceleration: f64,
}

impl Default for ModeParameters {
    fn default() -> Self {
        Self {
            mode: SimulationMode::default(),
            aged: AgedConfig::default(),
            degraded: DegradedConfig::default(),
            failure: FailureConfig::default(),
            flow_profile: FlowProfile::default(),
            simulation_interval: 1000.0,
            time_acceleration: 1.0,
        }
    }
}

impl ModeParameters {
    /// Efficiency multiplier for the active mode.
    pub fn efficiency_factor(&self) -> f64 {
        match self.mode {
            SimulationMode::Optimal => 1.0,
            SimulationMode::Aged => (1.0 - self.aged.years_of_operation * 0.006).max(0.85),
            SimulationMode::Degraded => (1.0 - self.degraded.impeller_wear / 100.0).max(0.6),
            SimulationMode::Failure => (1.0 - 0.7 * self.failure.progression / 100.0).max(0.3),
        }
    }

    /// Vibration multiplier for the active mode.
    pub fn vibration_factor(&self) -> f64 {
        match self.mode {
            SimulationMode::Optimal => 1.0,
            SimulationMode::Aged => 1.0 + self.aged.years_of_operation * 0.1,
            SimulationMode::Degraded => 1.0 + self.degraded.bearing_wear / 50.0,
            SimulationMode::Failure => {
                let p = self.failure.progression / 100.0;
                match self.failure.failure_type {
                    FailureType::Bearing => 1.0 + p * 5.0,
                    FailureType::Impeller => 1.0 + p * 3.0,
                    _ => 1.0 + p,
                }
            }
        }
    }

    /// Temperature offset in °C for the active mode.
    pub fn temperature_offset(&self) -> f64 {
        match self.mode {
            SimulationMode::Optimal => 0.0,
            SimulationMode::Aged => 5.0,
            SimulationMode::Degraded => self.degraded.bearing_wear * 0.3,
            SimulationMode::Failure => match self.failure.failure_type {
                FailureType::Bearing => self.failure.progression * 0.5,
                FailureType::Motor => self.failure.progression * 0.8,
                _ => self.failure.progression * 0.2,
            },
        }
    }

    /// Delivered-flow multiplier for the active mode. Only impeller damage
    /// and cavitation actually reduce flow during a failure.
    pub fn flow_reduction_factor(&self) -> f64 {
        match self.mode {
            SimulationMode::Optimal => 1.0,
            SimulationMode::Aged => 0.97,
            SimulationMode::Degraded => 1.0 - self.degraded.impeller_wear / 200.0,
            SimulationMode::Failure => match self.failure.failure_type {
                FailureType::Impeller => 1.0 - self.failure.progression / 150.0,
                FailureType::Cavitation => 1.0 - self.failure.progression / 200.0,
                _ => 1.0,
            },
        }
    }

    /// All four factors at once, evaluated at the top of an actor tick.
    pub fn factors(&self) -> ModeFactors {
        ModeFactors {
            efficiency: self.efficiency_factor(),
            vibration: self.vibration_factor(),
            temp_offset: self.temperature_offset(),
            flow_reduction: self.flow_reduction_factor(),
        }
    }

    /// Diurnal flow target ratio for the given wall-clock hour; 1.0 when the
    /// profile is disabled.
    pub fn diurnal_ratio(&self, hour: u32) -> f64 {
        if self.flow_profile.diurnal_enabled {
            diurnal_multiplier(hour)
        } else {
            1.0
        }
    }

    /// Seal wear fraction feeding the seal temperature model; only the
    /// DEGRADED mode models explicit seal wear.
    pub fn seal_wear_factor(&self) -> f64 {
        if self.mode == SimulationMode::Degraded {
            self.degraded.seal_wear / 100.0
        } else {
            0.0
        }
    }
}

/// Partial update accepted from the persistence collaborator; any subset of
/// the named fields may be present.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModeUpdate {
    pub mode: Option<SimulationMode>,
    pub aged: Option<AgedConfig>,
    pub degraded: Option<DegradedConfig>,
    pub failure: Option<FailureConfig>,
    pub flow_profile: Option<FlowProfile>,
    pub simulation_interval: Option<f64>,
    pub time_acceleration: Option<f64>,
}

impl ModeUpdate {
    /// Apply the update onto existing parameters, clamping the global knobs.
    pub fn apply_to(&self, params: &mut ModeParameters) {
        if let Some(mode) = self.mode {
            params.mode = mode;
        }
        if let Some(aged) = self.aged {
            params.aged = aged;
        }
        if let Some(degraded) = self.degraded {
            params.degraded = degraded;
        }
        if let Some(failure) = self.failure {
            params.failure = failure;
        }
        if let Some(profile) = self.flow_profile {
            params.flow_profile = profile;
        }
        if let Some(interval) = self.simulation_interval {
            params.simulation_interval = interval.clamp(10.0, 10_000.0);
        }
        if let Some(accel) = self.time_acceleration {
            params.time_acceleration = accel.clamp(0.1, 100.0);
        }
    }
}
