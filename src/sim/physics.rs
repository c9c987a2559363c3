//! Centrifugal pump physics based on the affinity laws.
//!
//! Key calculations for the per-tick sample vector:
//! - Affinity laws for VFD speed control (Q ∝ N, H ∝ N², P ∝ N³)
//! - Head-flow curve and off-BEP efficiency
//! - Power chain (hydraulic → shaft → electrical) and motor electrics
//! - Vibration and temperature models
//! - Suction/discharge pressure

use rand::Rng;

use crate::config::schema::DesignSpecs;

/// Water density, kg/m³.
const WATER_DENSITY: f64 = 998.0;
/// Gravitational acceleration, m/s².
const GRAVITY: f64 = 9.81;
/// 1 bar of water column, m.
const METERS_PER_BAR: f64 = 10.2;

/// Physics engine for one pump. Curve coefficients are derived from the
/// design point once, at construction.
#[derive(Debug, Clone)]
pub struct PumpPhysics {
    design: DesignSpecs,
    /// Head at zero flow, modeled as 1.2× design head.
    shutoff_head: f64,
    /// Head-curve coefficient: (H_shutoff − H_design) / Q_design².
    curve_k: f64,
}

impl PumpPhysics {
    pub fn new(design: DesignSpecs) -> Self {
        let shutoff_head = design.design_head * 1.2;
        let curve_k = if design.design_flow > 0.0 {
            (shutoff_head - design.design_head) / (design.design_flow * design.design_flow)
        } else {
            0.0
        };
        Self { design, shutoff_head, curve_k }
    }

    pub fn design(&self) -> &DesignSpecs {
        &self.design
    }

    fn speed_ratio(&self, rpm: f64) -> f64 {
        if self.design.max_rpm == 0.0 {
            return 0.0;
        }
        rpm / self.design.max_rpm
    }

    // ------------------------------------------------------------------
    // Affinity laws
    // ------------------------------------------------------------------

    /// Flow at speed: Q₂/Q₁ = N₂/N₁.
    pub fn flow_at_speed(&self, rpm: f64) -> f64 {
        self.design.design_flow * self.speed_ratio(rpm)
    }

    /// Head on the pump curve at the given flow and speed:
    /// H = H_shutoff·r² − k·Q², never negative.
    pub fn head_at_flow(&self, flow: f64, rpm: f64) -> f64 {
        let r2 = self.speed_ratio(rpm).powi(2);
        let head = self.shutoff_head * r2 - self.curve_k * flow * flow;
        head.max(0.0)
    }

    /// Pump efficiency at the operating point. Peaks at the speed-scaled BEP
    /// flow and drops off quadratically, clamped to [20, design efficiency].
    pub fn efficiency_at(&self, flow: f64, rpm: f64) -> f64 {
        let bep_flow = self.design.design_flow * self.speed_ratio(rpm);
        if bep_flow == 0.0 {
            return 0.0;
        }
        let deviation = (flow - bep_flow) / bep_flow;
        let efficiency = self.design.bep_efficiency * (1.0 - 0.5 * deviation * deviation);
        efficiency.clamp(20.0, self.design.bep_efficiency)
    }

    // ------------------------------------------------------------------
    // Power chain
    // ------------------------------------------------------------------

    /// Hydraulic power in kW: ρ·g·Q·H / 1000 with Q in m³/s.
    pub fn hydraulic_power(flow: f64, head: f64) -> f64 {
        WATER_DENSITY * GRAVITY * (flow / 3600.0) * head / 1000.0
    }

    /// Shaft power: P_h / η_pump.
    pub fn shaft_power(flow: f64, head: f64, pump_efficiency: f64) -> f64 {
        if pump_efficiency <= 0.0 {
            return 0.0;
        }
        Self::hydraulic_power(flow, head) / (pump_efficiency / 100.0)
    }

    /// Electrical power: P_shaft / η_motor.
    pub fn electrical_power(flow: f64, head: f64, pump_efficiency: f64, motor_efficiency: f64) -> f64 {
        if motor_efficiency <= 0.0 {
            return 0.0;
        }
        Self::shaft_power(flow, head, pump_efficiency) / (motor_efficiency / 100.0)
    }

    /// Three-phase motor current: I = 1000·P / (√3·V·pf).
    pub fn motor_current(power_kw: f64, voltage: f64, power_factor: f64) -> f64 {
        if voltage == 0.0 || power_factor == 0.0 {
            return 0.0;
        }
        power_kw * 1000.0 / (3.0_f64.sqrt() * voltage * power_factor)
    }

    /// Power factor as a function of motor load; improves with load and
    /// plateaus at 0.90 above rated.
    pub fn power_factor(load_fraction: f64) -> f64 {
        if load_fraction < 0.25 {
            0.65 + load_fraction * 0.4
        } else if load_fraction < 1.0 {
            0.75 + load_fraction * 0.15
        } else {
            0.90
        }
    }

    /// VFD output frequency: f = RPM·poles/120, clamped to [0, 65] Hz.
    /// Pole count follows synchronous speed: 4-pole above 1500 RPM,
    /// 6-pole otherwise.
    pub fn vfd_frequency(&self, rpm: f64) -> f64 {
        let poles = if self.design.max_rpm > 1500.0 { 4.0 } else { 6.0 };
        (rpm * poles / 120.0).clamp(0.0, 65.0)
    }

    // ------------------------------------------------------------------
    // Vibration
    // ------------------------------------------------------------------

    /// Overall vibration velocity in mm/s RMS.
    ///
    /// Components: base (2·r), imbalance (1× RPM), bearing wear, hydraulic
    /// vibration from off-BEP operation, and ±10 % noise on the base term.
    /// Clamped to [0.3, 30].
    pub fn vibration(
        &self,
        rpm: f64,
        imbalance_factor: f64,
        bearing_condition: f64,
        flow_deviation: f64,
        rng: &mut impl Rng,
    ) -> f64 {
        if rpm == 0.0 {
            // Baseline sensor noise on a stopped machine.
            return 0.1;
        }
        let r = self.speed_ratio(rpm);
        let base = 2.0 * r;
        let imbalance = 0.5 * imbalance_factor * r;
        let bearing = 0.3 * (bearing_condition - 1.0) * r;
        let hydraulic = 1.5 * flow_deviation.abs();
        let noise = rng.gen_range(-0.1..=0.1) * base;
        (base + imbalance + bearing + hydraulic + noise).clamp(0.3, 30.0)
    }

    // ------------------------------------------------------------------
    // Temperatures
    // ------------------------------------------------------------------

    /// Bearing temperature in °C: ambient + power rise + vibration friction
    /// + wear friction, never below ambient, capped at 150.
    pub fn bearing_temp(
        ambient: f64,
        power_kw: f64,
        vibration: f64,
        wear_factor: f64,
        rng: &mut impl Rng,
    ) -> f64 {
        let temp = ambient
            + power_kw * 0.15
            + vibration * 2.0
            + wear_factor * 15.0
            + rng.gen_range(-1.0..=1.0);
        temp.clamp(ambient, 150.0)
    }

    /// Motor winding temperature in °C. Copper losses rise with I²; class F
    /// insulation gives an 80 °C rise at full-load amps. Capped at 180.
    pub fn winding_temp(ambient: f64, current: f64, full_load_amps: f64, rng: &mut impl Rng) -> f64 {
        if full_load_amps == 0.0 {
            return ambient;
        }
        let load = current / full_load_amps;
        let temp = ambient + 80.0 * load * load + rng.gen_range(-2.0..=2.0);
        temp.clamp(ambient, 180.0)
    }

    /// Mechanical seal chamber temperature in °C. Runs slightly above the
    /// pumped fluid; low flow and seal wear both heat the chamber. Capped
    /// at 120.
    pub fn seal_temp(&self, ambient: f64, flow: f64, wear_factor: f64, rng: &mut impl Rng) -> f64 {
        let half_design = self.design.design_flow * 0.5;
        let low_flow_rise = if half_design > 0.0 && flow < half_design {
            (1.0 - flow / half_design) * 20.0
        } else {
            0.0
        };
        let temp = ambient + 5.0 + low_flow_rise + wear_factor * 10.0 + rng.gen_range(-1.0..=1.0);
        temp.clamp(ambient, 120.0)
    }

    // ------------------------------------------------------------------
    // Pressures
    // ------------------------------------------------------------------

    /// Suction pressure in bar: static head minus flow-squared friction
    /// losses, bounded to [-0.5, 2.0].
    pub fn suction_pressure(&self, static_head: f64, flow: f64, rng: &mut impl Rng) -> f64 {
        let friction = if self.design.design_flow > 0.0 {
            0.1 * (flow / self.design.design_flow).powi(2)
        } else {
            0.0
        };
        let pressure = static_head / METERS_PER_BAR - friction + rng.gen_range(-0.02..=0.02);
        pressure.clamp(-0.5, 2.0)
    }

    /// Discharge pressure in bar: suction plus developed head.
    pub fn discharge_pressure(suction: f64, head: f64, rng: &mut impl Rng) -> f64 {
        suction + head / METERS_PER_BAR + rng.gen_range(-0.02..=0.02)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn physics() -> PumpPhysics {
        PumpPhysics::new(DesignSpecs::default())
    }

    #[test]
    fn affinity_flow_is_linear_in_speed() {
        let p = physics();
        assert!((p.flow_at_speed(1180.0) - 2500.0).abs() < 1e-9);
        assert!((p.flow_at_speed(590.0) - 1250.0).abs() < 1e-9);
        assert_eq!(p.flow_at_speed(0.0), 0.0);
    }

    #[test]
    fn head_curve_peaks_at_shutoff_and_never_goes_negative() {
        let p = physics();
        let shutoff = p.head_at_flow(0.0, 1180.0);
        assert!((shutoff - 18.0).abs() < 1e-9); // 1.2 × 15 m
        let at_design = p.head_at_flow(2500.0, 1180.0);
        assert!((at_design - 15.0).abs() < 1e-9);
        assert_eq!(p.head_at_flow(50_000.0, 1180.0), 0.0);
    }

    #[test]
    fn efficiency_is_clamped_to_design_band() {
        let p = physics();
        let at_bep = p.efficiency_at(2500.0, 1180.0);
        assert!((at_bep - 84.0).abs() < 1e-9);
        let far_off = p.efficiency_at(100.0, 1180.0);
        assert_eq!(far_off, 20.0);
    }

    #[test]
    fn power_chain_is_consistent() {
        let hydraulic = PumpPhysics::hydraulic_power(2500.0, 15.0);
        // ρ·g·(2500/3600)·15/1000 ≈ 101.9 kW
        assert!((hydraulic - 101.95).abs() < 0.1);
        let shaft = PumpPhysics::shaft_power(2500.0, 15.0, 84.0);
        assert!(shaft > hydraulic);
        let electrical = PumpPhysics::electrical_power(2500.0, 15.0, 84.0, 95.4);
        assert!(electrical > shaft);
    }

    #[test]
    fn power_factor_is_piecewise_monotone() {
        assert!((PumpPhysics::power_factor(0.1) - 0.69).abs() < 1e-9);
        assert!((PumpPhysics::power_factor(0.5) - 0.825).abs() < 1e-9);
        assert_eq!(PumpPhysics::power_factor(1.5), 0.90);
    }

    #[test]
    fn vfd_frequency_uses_pole_count_and_clamp() {
        let p = physics(); // 1180 RPM → 6-pole
        assert!((p.vfd_frequency(1180.0) - 59.0).abs() < 1e-9);
        assert_eq!(p.vfd_frequency(2000.0), 65.0);

        let fast = PumpPhysics::new(DesignSpecs { max_rpm: 1750.0, ..DesignSpecs::default() });
        assert!((fast.vfd_frequency(1750.0) - 58.333).abs() < 0.01);
    }

    #[test]
    fn vibration_bounds_hold_for_extreme_wear() {
        let p = physics();
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(p.vibration(0.0, 1.0, 1.0, 0.0, &mut rng), 0.1);
        for _ in 0..100 {
            let v = p.vibration(1180.0, 6.0, 6.0, 1.0, &mut rng);
            assert!((0.3..=30.0).contains(&v));
        }
    }

    #[test]
    fn temperatures_never_drop_below_ambient() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            assert!(PumpPhysics::bearing_temp(25.0, 0.0, 0.0, 0.0, &mut rng) >= 25.0);
            assert!(PumpPhysics::winding_temp(25.0, 0.0, 225.0, &mut rng) >= 25.0);
        }
        assert!(PumpPhysics::winding_temp(25.0, 1000.0, 225.0, &mut rng) <= 180.0);
    }
}
