//! Information-model builder: declarative catalogs → populated node graph.
//!
//! Types are materialized first, in topological order over the inheritance
//! graph (with a preferred head sequence so log output stays deterministic),
//! then assets are instantiated in passes until every parent resolves.
//!
//! Instance objects are stamped with their ObjectType but members are not
//! inherited automatically; the builder walks the root-to-leaf merge of the
//! type chain and ensures every property, component and method exists on the
//! instance, reusing nodes that are already present.

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::config::schema::{
    AccessLevel, AssetCatalog, AssetDef, ComponentDef, ComponentKind, DataTypeRef, DesignSpecs,
    ScalarType, TypeCatalog, TypeDef, BASE_OBJECT_TYPE, OBJECTS_FOLDER_ID,
};
use super::space::{
    AddressSpace, Argument, MethodSignature, NodeId, QualifiedName, SpaceError, Variant,
    VariantType,
};

/// UNECE unit registry namespace carried by every EUInformation structure.
const UNECE_NAMESPACE: &str = "http://www.opcfoundation.org/UA/units/un/cefact";

/// Head sequence for type construction; remaining types follow in
/// dependency order with name-sorted ties.
const PREFERRED_TYPE_ORDER: &[&str] = &[
    "AssetType",
    "PumpType",
    "InfluentPumpType",
    "ChamberType",
    "SimulationConfigType",
];

/// Root type every pump actor binds against.
pub const PUMP_TYPE: &str = "PumpType";

/// Chamber actor type.
pub const CHAMBER_TYPE: &str = "ChamberType";

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("type {name} references unknown base {base}")]
    UnknownBase { name: String, base: String },
    #[error("type inheritance cycle involving: {0}")]
    TypeCycle(String),
    #[error("component {component} references unknown engineering unit {unit}")]
    UnknownUnit { component: String, unit: String },
    #[error("asset {asset} references unknown type {type_name}")]
    UnknownAssetType { asset: String, type_name: String },
    #[error("unresolved asset parents: {0}")]
    UnresolvedParents(String),
    #[error(transparent)]
    Space(#[from] SpaceError),
}

// ============================================================================
// Output
// ============================================================================

/// Simulation binding of a target asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Pump,
    Chamber,
}

/// Descriptor carried to the simulation kernel for every simulated asset.
#[derive(Debug, Clone)]
pub struct SimTarget {
    pub id: String,
    pub name: String,
    pub type_name: String,
    pub kind: TargetKind,
    pub root: NodeId,
    pub specs: DesignSpecs,
    pub alarms: Vec<String>,
}

/// Builder result: the populated graph handles the rest of the system needs.
#[derive(Debug)]
pub struct BuiltModel {
    /// Registered schema namespace index.
    pub ns: u16,
    /// ObjectType name → type node.
    pub type_nodes: BTreeMap<String, NodeId>,
    /// Asset identifier → instance root node (plus the Objects folder entry).
    pub node_map: BTreeMap<String, NodeId>,
    /// Assets marked `simulate: true` with a pump-compatible or chamber type.
    pub targets: Vec<SimTarget>,
}

/// Build the full information model into `space`.
pub fn build_model(
    space: &mut AddressSpace,
    types: &TypeCatalog,
    assets: &AssetCatalog,
) -> Result<BuiltModel, BuildError> {
    let ns = space.register_namespace(&types.namespace_uri);
    info!(namespace = %types.namespace_uri, index = ns, "Registered schema namespace");

    let mut builder = Builder { space, catalog: types, ns, type_nodes: BTreeMap::new() };
    builder.build_types()?;
    let (node_map, targets) = builder.build_assets(assets)?;

    Ok(BuiltModel { ns, type_nodes: builder.type_nodes, node_map, targets })
}

// ============================================================================
// Builder
// ============================================================================

struct Builder<'a> {
    space: &'a mut AddressSpace,
    catalog: &'a TypeCatalog,
    ns: u16,
    type_nodes: BTreeMap<String, NodeId>,
}

impl Builder<'_> {
    // ------------------------------------------------------------------
    // Types
    // ------------------------------------------------------------------

    fn build_types(&mut self) -> Result<(), BuildError> {
        for name in self.type_order()? {
            let def = &self.catalog.types[&name];
            self.build_type(&name, def)?;
        }
        info!(count = self.type_nodes.len(), "Built ObjectTypes");
        Ok(())
    }

    /// Topological order over the inheritance graph. The preferred head
    /// sequence wins ties; a pass that places nothing means a cycle or an
    /// unknown base.
    fn type_order(&self) -> Result<Vec<String>, BuildError> {
        for (name, def) in &self.catalog.types {
            if def.base != BASE_OBJECT_TYPE && !self.catalog.types.contains_key(&def.base) {
                return Err(BuildError::UnknownBase {
                    name: name.clone(),
                    base: def.base.clone(),
                });
            }
        }

        let mut order: Vec<String> = Vec::new();
        let mut pending: Vec<String> = PREFERRED_TYPE_ORDER
            .iter()
            .filter(|n| self.catalog.types.contains_key(**n))
            .map(|n| (*n).to_string())
            .collect();
        pending.extend(
            self.catalog
                .types
                .keys()
                .filter(|n| !PREFERRED_TYPE_ORDER.contains(&n.as_str()))
                .cloned(),
        );

        while !pending.is_empty() {
            let placed: Vec<String> = pending
                .iter()
                .filter(|name| {
                    let base = &self.catalog.types[*name].base;
                    base == BASE_OBJECT_TYPE || order.contains(base)
                })
                .cloned()
                .collect();
            if placed.is_empty() {
                return Err(BuildError::TypeCycle(pending.join(", ")));
            }
            pending.retain(|n| !placed.contains(n));
            order.extend(placed);
        }
        Ok(order)
    }

    fn build_type(&mut self, name: &str, def: &TypeDef) -> Result<(), BuildError> {
        let base_node = self
            .type_nodes
            .get(&def.base)
            .copied()
            .unwrap_or_else(|| self.space.base_object_type());

        let type_node = self.space.add_object_type(
            base_node,
            QualifiedName::new(self.ns, name),
            &def.description,
        )?;
        self.type_nodes.insert(name.to_string(), type_node);
        debug!(type_name = name, base = %def.base, "Created ObjectType");

        for (prop_name, prop_def) in &def.properties {
            self.ensure_member(type_node, prop_name, prop_def)?;
        }
        for (comp_name, comp_def) in &def.components {
            self.ensure_member(type_node, comp_name, comp_def)?;
        }
        for (method_name, method_def) in &def.methods {
            let as_component: ComponentDef = method_def.clone().into();
            self.ensure_member(type_node, method_name, &as_component)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Members
    // ------------------------------------------------------------------

    /// Create one member node under `parent` unless a child of that browse
    /// name already exists; either way, recurse into nested components.
    fn ensure_member(
        &mut self,
        parent: NodeId,
        name: &str,
        comp: &ComponentDef,
    ) -> Result<NodeId, BuildError> {
        if let Some(existing) = self.space.child_by_name(parent, name) {
            if comp.kind == ComponentKind::Object {
                for (nested_name, nested_def) in &comp.components {
                    self.ensure_member(existing, nested_name, nested_def)?;
                }
            }
            return Ok(existing);
        }

        let browse = QualifiedName::new(self.ns, name);
        let vtype = resolve_variant_type(comp.data_type.as_ref());
        let initial = comp
            .value
            .as_ref()
            .and_then(|v| Variant::from_json(v, vtype))
            .unwrap_or_else(|| Variant::default_for(vtype));

        let node = match comp.kind {
            ComponentKind::Property => self.space.add_variable(
                parent,
                browse,
                ComponentKind::Property,
                vtype,
                initial,
                comp.access_level,
            )?,
            ComponentKind::Object => {
                let obj = self.space.add_object(parent, browse, name, None)?;
                for (nested_name, nested_def) in &comp.components {
                    self.ensure_member(obj, nested_name, nested_def)?;
                }
                obj
            }
            ComponentKind::AnalogItem | ComponentKind::DataItem => {
                let var = self.space.add_variable(
                    parent,
                    browse,
                    comp.kind,
                    vtype,
                    initial,
                    comp.access_level,
                )?;
                self.attach_analog_properties(var, name, comp)?;
                var
            }
            ComponentKind::TwoStateDiscrete => {
                let value = comp
                    .value
                    .as_ref()
                    .and_then(serde_json::Value::as_bool)
                    .unwrap_or(false);
                let var = self.space.add_variable(
                    parent,
                    browse,
                    ComponentKind::TwoStateDiscrete,
                    VariantType::Boolean,
                    Variant::Boolean(value),
                    comp.access_level,
                )?;
                if let Some(true_state) = &comp.true_state {
                    self.space.add_property(
                        var,
                        QualifiedName::new(self.ns, "TrueState"),
                        Variant::LocalizedText(true_state.clone()),
                    )?;
                }
                if let Some(false_state) = &comp.false_state {
                    self.space.add_property(
                        var,
                        QualifiedName::new(self.ns, "FalseState"),
                        Variant::LocalizedText(false_state.clone()),
                    )?;
                }
                var
            }
            ComponentKind::Method => {
                let signature = MethodSignature {
                    input: comp.input_arguments.iter().map(resolve_argument).collect(),
                    output: comp.output_arguments.iter().map(resolve_argument).collect(),
                };
                self.space.add_method(parent, browse, &comp.description, signature)?
            }
        };
        Ok(node)
    }

    /// EURange, InstrumentRange and EngineeringUnits properties of an
    /// AnalogItem variable. An unknown unit reference is a fatal
    /// configuration error.
    fn attach_analog_properties(
        &mut self,
        var: NodeId,
        name: &str,
        comp: &ComponentDef,
    ) -> Result<(), BuildError> {
        if let Some(range) = comp.eu_range {
            self.space.add_property(
                var,
                QualifiedName::new(self.ns, "EURange"),
                Variant::Range { low: range.low, high: range.high },
            )?;
        }
        if let Some(range) = comp.instrument_range {
            self.space.add_property(
                var,
                QualifiedName::new(self.ns, "InstrumentRange"),
                Variant::Range { low: range.low, high: range.high },
            )?;
        }
        if let Some(unit_name) = &comp.engineering_units {
            let unit = self.catalog.engineering_units.get(unit_name).ok_or_else(|| {
                BuildError::UnknownUnit { component: name.to_string(), unit: unit_name.clone() }
            })?;
            self.space.add_property(
                var,
                QualifiedName::new(self.ns, "EngineeringUnits"),
                Variant::EuInformation {
                    namespace_uri: UNECE_NAMESPACE.to_string(),
                    unit_id: unit.unit_id,
                    display_name: unit.display_name.clone(),
                    description: unit.description.clone(),
                },
            )?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Assets
    // ------------------------------------------------------------------

    fn build_assets(
        &mut self,
        assets: &AssetCatalog,
    ) -> Result<(BTreeMap<String, NodeId>, Vec<SimTarget>), BuildError> {
        let mut node_map = BTreeMap::new();
        node_map.insert(OBJECTS_FOLDER_ID.to_string(), self.space.objects_folder());
        let mut targets = Vec::new();

        let mut pending: Vec<&AssetDef> = assets.assets.iter().collect();
        let mut passes = 0usize;

        while !pending.is_empty() {
            let mut remaining = Vec::new();
            let mut progress = false;

            for asset in pending {
                if let Some(&parent) = node_map.get(&asset.parent) {
                    let node = self.build_asset(asset, parent, &mut targets)?;
                    node_map.insert(asset.id.clone(), node);
                    progress = true;
                } else {
                    remaining.push(asset);
                }
            }

            passes += 1;
            if !progress && !remaining.is_empty() {
                let missing = remaining
                    .iter()
                    .map(|a| format!("{} -> {}", a.id, a.parent))
                    .collect::<Vec<_>>()
                    .join(", ");
                return Err(BuildError::UnresolvedParents(missing));
            }
            pending = remaining;
        }

        info!(count = node_map.len() - 1, passes, "Built asset instances");
        Ok((node_map, targets))
    }

    fn build_asset(
        &mut self,
        asset: &AssetDef,
        parent: NodeId,
        targets: &mut Vec<SimTarget>,
    ) -> Result<NodeId, BuildError> {
        if asset.is_folder() {
            let node = self.space.add_folder(
                parent,
                QualifiedName::new(self.ns, &asset.name),
                asset.display_name(),
            )?;
            debug!(asset = %asset.id, "Created folder");
            return Ok(node);
        }

        let Some(&type_node) = self.type_nodes.get(&asset.asset_type) else {
            return Err(BuildError::UnknownAssetType {
                asset: asset.id.clone(),
                type_name: asset.asset_type.clone(),
            });
        };

        let node = self.space.add_object(
            parent,
            QualifiedName::new(self.ns, &asset.name),
            asset.display_name(),
            Some(type_node),
        )?;

        // The server does not materialize inherited members on its own:
        // walk the composed member set and create what is missing.
        for (name, comp) in self.merged_members(&asset.asset_type) {
            self.ensure_member(node, &name, &comp)?;
        }

        self.apply_properties(node, asset);
        self.apply_design_specs(node, asset);

        if asset.simulate {
            let kind = if self.is_subtype_of(&asset.asset_type, PUMP_TYPE) {
                Some(TargetKind::Pump)
            } else if self.is_subtype_of(&asset.asset_type, CHAMBER_TYPE) {
                Some(TargetKind::Chamber)
            } else {
                None
            };
            if let Some(kind) = kind {
                targets.push(SimTarget {
                    id: asset.id.clone(),
                    name: asset.name.clone(),
                    type_name: asset.asset_type.clone(),
                    kind,
                    root: node,
                    specs: DesignSpecs::from_overrides(&asset.design_specs),
                    alarms: asset.alarms.clone(),
                });
            } else {
                info!(
                    asset = %asset.id,
                    type_name = %asset.asset_type,
                    "Asset marked simulate but type has no simulation binding; skipping"
                );
            }
        }

        debug!(asset = %asset.id, type_name = %asset.asset_type, "Created instance");
        Ok(node)
    }

    /// Root-to-leaf merge of the inheritance chain; descendant names
    /// override ancestor names.
    fn merged_members(&self, type_name: &str) -> BTreeMap<String, ComponentDef> {
        let mut chain = Vec::new();
        let mut current = Some(type_name.to_string());
        while let Some(name) = current {
            let Some(def) = self.catalog.types.get(&name) else { break };
            chain.push(name.clone());
            current = (def.base != BASE_OBJECT_TYPE).then(|| def.base.clone());
        }
        chain.reverse();

        let mut merged: BTreeMap<String, ComponentDef> = BTreeMap::new();
        for name in chain {
            let def = &self.catalog.types[&name];
            for (prop_name, prop_def) in &def.properties {
                merged.insert(prop_name.clone(), prop_def.clone());
            }
            for (comp_name, comp_def) in &def.components {
                merged.insert(comp_name.clone(), comp_def.clone());
            }
            for (method_name, method_def) in &def.methods {
                merged.insert(method_name.clone(), method_def.clone().into());
            }
        }
        merged
    }

    fn is_subtype_of(&self, type_name: &str, ancestor: &str) -> bool {
        let mut current = Some(type_name.to_string());
        while let Some(name) = current {
            if name == ancestor {
                return true;
            }
            let Some(def) = self.catalog.types.get(&name) else { return false };
            current = (def.base != BASE_OBJECT_TYPE).then(|| def.base.clone());
        }
        false
    }

    // ------------------------------------------------------------------
    // Overrides
    // ------------------------------------------------------------------

    fn apply_properties(&mut self, node: NodeId, asset: &AssetDef) {
        let now = chrono::Utc::now();
        for (key, value) in &asset.properties {
            let Some(child) = self.space.child_by_name(node, key) else {
                debug!(asset = %asset.id, property = %key, "No matching node for property override");
                continue;
            };
            let vtype = self
                .space
                .node(child)
                .and_then(|n| n.variant_type)
                .unwrap_or(VariantType::String);
            let Some(variant) = Variant::from_json(value, vtype) else {
                debug!(asset = %asset.id, property = %key, "Property override value shape mismatch");
                continue;
            };
            if let Err(e) = self.space.write_value(child, variant, now) {
                debug!(asset = %asset.id, property = %key, error = %e, "Property override rejected");
            }
        }
    }

    /// Design-spec overrides land on the `DesignSpecs` child; integers are
    /// written as UInt32, everything else as Double.
    fn apply_design_specs(&mut self, node: NodeId, asset: &AssetDef) {
        if asset.design_specs.is_empty() {
            return;
        }
        let Some(specs_node) = self.space.child_by_name(node, "DesignSpecs") else {
            debug!(asset = %asset.id, "Asset declares designSpecs but has no DesignSpecs child");
            return;
        };
        let now = chrono::Utc::now();
        for (key, value) in &asset.design_specs {
            let Some(child) = self.space.child_by_name(specs_node, key) else {
                debug!(asset = %asset.id, spec = %key, "No matching node for design spec");
                continue;
            };
            let variant = if value.is_u64() || value.is_i64() {
                Variant::UInt32(value.as_u64().unwrap_or(0) as u32)
            } else if let Some(v) = value.as_f64() {
                Variant::Double(v)
            } else {
                debug!(asset = %asset.id, spec = %key, "Design spec value is not numeric");
                continue;
            };
            if let Err(e) = self.space.write_value(child, variant, now) {
                debug!(asset = %asset.id, spec = %key, error = %e, "Design spec write rejected");
            }
        }
    }
}

/// Resolve a schema data-type reference to a wire type. `Float` is widened
/// to Double; named enumerations are served as Int32.
pub fn resolve_variant_type(data_type: Option<&DataTypeRef>) -> VariantType {
    match data_type {
        Some(DataTypeRef::Scalar(scalar)) => match scalar {
            ScalarType::Double | ScalarType::Float => VariantType::Double,
            ScalarType::Int32 => VariantType::Int32,
            ScalarType::Int16 => VariantType::Int16,
            ScalarType::UInt32 => VariantType::UInt32,
            ScalarType::UInt16 => VariantType::UInt16,
            ScalarType::Boolean => VariantType::Boolean,
            ScalarType::DateTime => VariantType::DateTime,
            ScalarType::String => VariantType::String,
        },
        Some(DataTypeRef::Named(_)) => VariantType::Int32,
        None => VariantType::String,
    }
}

fn resolve_argument(arg: &crate::config::schema::ArgumentDef) -> Argument {
    Argument {
        name: arg.name.clone(),
        data_type: resolve_variant_type(Some(&arg.data_type)),
        description: arg.description.clone(),
    }
}
