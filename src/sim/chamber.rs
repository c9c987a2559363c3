//! Chamber actor: level and temperature for tanks, wet wells and channels.
//!
//! The dynamics are intentionally simple — a sinusoidal fill/drain cycle
//! with random perturbation on the period, plus a slow daily temperature
//! swing. The phase accumulator is `tick_count·dt`, not accumulated wall
//! time, which keeps long-run traces reproducible across restarts.

use chrono::Utc;
use rand::Rng;
use serde::Serialize;
use tracing::{debug, info};

use crate::model::space::{NodeId, SpaceError, Variant};
use crate::model::{AddressSpace, SharedSpace};

const TAU: f64 = std::f64::consts::TAU;

/// Nominal fill/drain cycle period, seconds (randomly perturbed ±60 s).
const LEVEL_PERIOD_S: f64 = 600.0;
/// Daily temperature cycle, seconds.
const DAILY_PERIOD_S: f64 = 86_400.0;

#[derive(Debug, Clone, Serialize)]
pub struct ChamberState {
    pub level: f64,
    pub temperature: f64,
    pub tick_count: u64,
}

pub struct ChamberActor {
    pub id: String,
    pub name: String,
    pub root: NodeId,
    pub state: ChamberState,
    level_node: Option<NodeId>,
    temperature_node: Option<NodeId>,
    level_range: Option<(f64, f64)>,
    temperature_range: Option<(f64, f64)>,
    setpoint: f64,
    min_level: f64,
    max_level: f64,
    ambient: f64,
}

impl ChamberActor {
    pub fn new(id: &str, name: &str, root: NodeId) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            root,
            state: ChamberState { level: 4.0, temperature: 20.0, tick_count: 0 },
            level_node: None,
            temperature_node: None,
            level_range: None,
            temperature_range: None,
            setpoint: 4.0,
            min_level: 1.0,
            max_level: 7.0,
            ambient: 18.0,
        }
    }

    /// Resolve the `Level` and `Temperature` nodes and their EURanges.
    pub fn bind(&mut self, space: &AddressSpace) {
        self.level_node = space.child_by_name(self.root, "Level");
        self.temperature_node = space.child_by_name(self.root, "Temperature");
        self.level_range = self.read_range(space, self.level_node);
        self.temperature_range = self.read_range(space, self.temperature_node);
        info!(chamber = %self.name, "Bound chamber actor");
    }

    fn read_range(&self, space: &AddressSpace, node: Option<NodeId>) -> Option<(f64, f64)> {
        let range_node = space.child_by_name(node?, "EURange")?;
        match space.read_value(range_node).ok()?.value {
            Variant::Range { low, high } => Some((low, high)),
            _ => None,
        }
    }

    /// Advance the chamber by `dt` seconds and write both values.
    pub async fn tick(
        &mut self,
        dt: f64,
        rng: &mut impl Rng,
        space: &SharedSpace,
    ) -> Result<(), SpaceError> {
        self.state.tick_count += 1;
        let phase = self.state.tick_count as f64 * dt;

        let period = LEVEL_PERIOD_S + rng.gen_range(-60.0..=60.0);
        let level = self.setpoint
            + 1.5 * (TAU * phase / period).sin()
            + rng.gen_range(-0.05..=0.05);
        self.state.level = level.clamp(self.min_level, self.max_level);

        self.state.temperature = self.ambient
            + 3.0 * (TAU * phase / DAILY_PERIOD_S).sin()
            + rng.gen_range(-0.2..=0.2);

        let now = Utc::now();
        let mut space = space.write().await;
        let writes = [
            (self.level_node, self.state.level, self.level_range),
            (self.temperature_node, self.state.temperature, self.temperature_range),
        ];
        for (node, value, range) in writes {
            let Some(node) = node else { continue };
            let value = match range {
                Some((low, high)) => value.clamp(low, high),
                None => value,
            };
            if let Err(e) = space.write_value(node, Variant::Double(value), now) {
                debug!(chamber = %self.name, error = %e, "Chamber write rejected");
            }
        }
        Ok(())
    }

    pub fn set_level_setpoint(&mut self, setpoint: f64) {
        self.setpoint = setpoint.clamp(self.min_level, self.max_level);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{AccessLevel, ComponentKind};
    use crate::model::space::VariantType;
    use crate::model::{shared, QualifiedName};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn chamber() -> (ChamberActor, SharedSpace) {
        let mut space = AddressSpace::new();
        let objects = space.objects_folder();
        let root = space
            .add_object(objects, QualifiedName::new(2, "IPS_WW_001"), "Wet Well", None)
            .unwrap();
        let level = space
            .add_variable(
                root,
                QualifiedName::new(2, "Level"),
                ComponentKind::AnalogItem,
                VariantType::Double,
                Variant::Double(0.0),
                AccessLevel::Read,
            )
            .unwrap();
        space
            .add_property(
                level,
                QualifiedName::new(2, "EURange"),
                Variant::Range { low: 0.0, high: 8.0 },
            )
            .unwrap();
        space
            .add_variable(
                root,
                QualifiedName::new(2, "Temperature"),
                ComponentKind::AnalogItem,
                VariantType::Double,
                Variant::Double(0.0),
                AccessLevel::Read,
            )
            .unwrap();
        let mut actor = ChamberActor::new("IPS_WW_001", "Wet Well 1", root);
        actor.bind(&space);
        (actor, shared(space))
    }

    #[tokio::test]
    async fn level_stays_inside_band() {
        let (mut actor, space) = chamber();
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..500 {
            actor.tick(1.0, &mut rng, &space).await.unwrap();
            assert!((1.0..=7.0).contains(&actor.state.level), "level {}", actor.state.level);
        }
        assert_eq!(actor.state.tick_count, 500);
    }

    #[tokio::test]
    async fn values_land_in_nodes_with_fresh_timestamps() {
        let (mut actor, space) = chamber();
        let mut rng = StdRng::seed_from_u64(11);
        let before = Utc::now();
        actor.tick(1.0, &mut rng, &space).await.unwrap();

        let space = space.read().await;
        let level_node = actor.level_node.unwrap();
        let dv = space.read_value(level_node).unwrap();
        assert!(dv.source_timestamp >= before);
        assert!(dv.value.as_f64().is_some());
    }

    #[tokio::test]
    async fn temperature_swings_around_ambient() {
        let (mut actor, space) = chamber();
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..100 {
            actor.tick(1.0, &mut rng, &space).await.unwrap();
            assert!((actor.state.temperature - 18.0).abs() <= 3.5);
        }
    }
}
