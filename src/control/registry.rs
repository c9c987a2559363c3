//! Method binder: maps method nodes to kernel operations.
//!
//! Bindings are explicit `(node, verb, target)` entries — no captured
//! closures. The OPC-UA endpoint resolves an incoming call to a node,
//! looks the binding up here, and dispatches through the kernel handle.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::model::builder::{BuiltModel, TargetKind};
use crate::model::space::{AddressSpace, NodeClass, NodeId, Variant};
use crate::sim::modes::{FailureType, SimulationMode};
use super::{ControlHandle, VerbResult};

/// Browse name of the simulation-configuration asset.
pub const SIM_CONFIG_ID: &str = "SimConfig";

/// Control verbs the binder understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlVerb {
    StartPump,
    StopPump,
    SetSpeed,
    ResetFault,
    SetMode,
    TriggerFailure,
    ResetSimulation,
    ApplyAging,
}

impl ControlVerb {
    fn from_browse_name(name: &str) -> Option<Self> {
        match name {
            "StartPump" => Some(Self::StartPump),
            "StopPump" => Some(Self::StopPump),
            "SetSpeed" => Some(Self::SetSpeed),
            "ResetFault" => Some(Self::ResetFault),
            "SetMode" => Some(Self::SetMode),
            "TriggerFailure" => Some(Self::TriggerFailure),
            "ResetSimulation" => Some(Self::ResetSimulation),
            "ApplyAging" => Some(Self::ApplyAging),
            _ => None,
        }
    }
}

/// What a bound method operates on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodTarget {
    Pump(String),
    Kernel,
}

#[derive(Debug, Clone)]
pub struct MethodBinding {
    pub verb: ControlVerb,
    pub target: MethodTarget,
}

/// Registry of method-node bindings.
#[derive(Debug, Default)]
pub struct MethodRegistry {
    bindings: HashMap<NodeId, MethodBinding>,
}

impl MethodRegistry {
    /// Wire every pump instance's verbs and the kernel verbs on the
    /// `SimConfig` object.
    pub fn bind_model(space: &AddressSpace, model: &BuiltModel) -> Self {
        let mut registry = Self::default();

        for target in &model.targets {
            if target.kind != TargetKind::Pump {
                continue;
            }
            for verb_name in ["StartPump", "StopPump", "SetSpeed", "ResetFault"] {
                let Some(node) = space.child_by_name(target.root, verb_name) else {
                    debug!(pump = %target.id, method = verb_name, "Pump method node missing");
                    continue;
                };
                registry.bind(space, node, MethodTarget::Pump(target.id.clone()));
            }
        }

        if let Some(&sim_config) = model.node_map.get(SIM_CONFIG_ID) {
            for verb_name in ["SetMode", "TriggerFailure", "ResetSimulation", "ApplyAging"] {
                let Some(node) = space.child_by_name(sim_config, verb_name) else {
                    debug!(method = verb_name, "SimConfig method node missing");
                    continue;
                };
                registry.bind(space, node, MethodTarget::Kernel);
            }
        }

        info!(count = registry.bindings.len(), "Bound control methods");
        registry
    }

    fn bind(&mut self, space: &AddressSpace, node: NodeId, target: MethodTarget) {
        let Some(n) = space.node(node) else { return };
        if n.class != NodeClass::Method {
            return;
        }
        let Some(verb) = ControlVerb::from_browse_name(&n.browse_name.name) else { return };
        self.bindings.insert(node, MethodBinding { verb, target });
    }

    pub fn binding(&self, node: NodeId) -> Option<&MethodBinding> {
        self.bindings.get(&node)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &MethodBinding)> {
        self.bindings.iter()
    }

    /// Dispatch a method call against a bound node. Argument errors return
    /// the failure tuple without mutating anything.
    pub async fn invoke(
        &self,
        handle: &ControlHandle,
        node: NodeId,
        args: &[Variant],
    ) -> VerbResult {
        let Some(binding) = self.bindings.get(&node) else {
            return (false, format!("no method bound to node {node}"));
        };

        match (&binding.verb, &binding.target) {
            (ControlVerb::StartPump, MethodTarget::Pump(id)) => handle.start_pump(id).await,
            (ControlVerb::StopPump, MethodTarget::Pump(id)) => handle.stop_pump(id).await,
            (ControlVerb::ResetFault, MethodTarget::Pump(id)) => handle.reset_fault(id).await,
            (ControlVerb::SetSpeed, MethodTarget::Pump(id)) => {
                let Some(rpm) = args.first().and_then(Variant::as_f64) else {
                    return (false, "SetSpeed requires a numeric TargetRPM argument".to_string());
                };
                handle.set_speed(id, rpm).await
            }
            (ControlVerb::SetMode, _) => {
                let Some(raw) = args.first().and_then(Variant::as_f64) else {
                    return (false, "SetMode requires an integer mode argument".to_string());
                };
                let Some(mode) = SimulationMode::from_wire(raw as i32) else {
                    return (false, format!("unknown simulation mode {raw}"));
                };
                handle.set_mode(mode).await
            }
            (ControlVerb::TriggerFailure, _) => {
                let Some(raw) = args.first().and_then(Variant::as_f64) else {
                    return (false, "TriggerFailure requires an integer failure type".to_string());
                };
                let Some(failure) = FailureType::from_wire(raw as i32) else {
                    return (false, format!("unknown failure type {raw}"));
                };
                handle.trigger_failure(None, failure).await
            }
            (ControlVerb::ResetSimulation, _) => handle.reset_simulation().await,
            (ControlVerb::ApplyAging, _) => {
                let Some(years) = args.first().and_then(Variant::as_f64) else {
                    return (false, "ApplyAging requires a numeric years argument".to_string());
                };
                handle.apply_aging(years).await
            }
            (verb, target) => (false, format!("verb {verb:?} is not valid for target {target:?}")),
        }
    }
}
