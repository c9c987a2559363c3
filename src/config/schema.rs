//! Declarative information-model schema.
//!
//! Two documents describe the served address space:
//! - the **type catalog** (`types.yaml`): engineering units, custom data
//!   types, alarm definitions and ObjectType definitions
//! - the **asset catalog** (`assets.json`): the instance hierarchy with
//!   property and design-spec overrides
//!
//! Unknown component kinds and data types are rejected at parse time; the
//! builder never sees an open-vocabulary tag.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ============================================================================
// Scalar / component vocabulary
// ============================================================================

/// Meta-model kind of one node inside a type or instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum ComponentKind {
    Property,
    Object,
    #[serde(rename = "AnalogItemType", alias = "AnalogItem")]
    AnalogItem,
    #[serde(rename = "TwoStateDiscreteType", alias = "TwoStateDiscrete")]
    TwoStateDiscrete,
    #[serde(rename = "DataItemType", alias = "DataItem")]
    DataItem,
    Method,
}

/// Built-in scalar data types understood by the node graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum ScalarType {
    Double,
    Float,
    Int32,
    Int16,
    UInt32,
    UInt16,
    Boolean,
    DateTime,
    String,
}

/// A data-type reference: either a built-in scalar or the name of a custom
/// enumeration declared under `dataTypes` (served as Int32 on the wire).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum DataTypeRef {
    Scalar(ScalarType),
    Named(String),
}

impl Default for DataTypeRef {
    fn default() -> Self {
        DataTypeRef::Scalar(ScalarType::String)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
pub enum ModellingRule {
    #[default]
    Mandatory,
    Optional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
pub enum AccessLevel {
    #[default]
    Read,
    ReadWrite,
}

// ============================================================================
// Units, ranges, alarms
// ============================================================================

/// UNECE engineering unit registry entry.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineeringUnit {
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    pub unit_id: i32,
}

/// Inclusive numeric interval used for EURange and InstrumentRange.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct ValueRange {
    pub low: f64,
    pub high: f64,
}

/// Limit-alarm definition, bound per pump against `input_node` (a browse
/// path relative to the pump root).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlarmDef {
    #[serde(rename = "type", default = "default_alarm_type")]
    pub alarm_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_severity")]
    pub severity: u16,
    pub input_node: String,
    #[serde(default)]
    pub high_high_limit: Option<f64>,
    #[serde(default)]
    pub high_limit: Option<f64>,
    #[serde(default)]
    pub low_limit: Option<f64>,
    #[serde(default)]
    pub low_low_limit: Option<f64>,
    #[serde(default)]
    pub hysteresis: f64,
    #[serde(default)]
    pub message: String,
}

fn default_alarm_type() -> String {
    "LimitAlarmType".to_string()
}

fn default_severity() -> u16 {
    500
}

// ============================================================================
// Type catalog
// ============================================================================

/// Method argument descriptor.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArgumentDef {
    pub name: String,
    #[serde(default)]
    pub data_type: DataTypeRef,
    #[serde(default)]
    pub description: String,
}

/// Recursive description of one node inside a type or instance.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentDef {
    #[serde(rename = "type")]
    pub kind: ComponentKind,
    #[serde(default)]
    pub data_type: Option<DataTypeRef>,
    #[serde(default)]
    pub modelling_rule: ModellingRule,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub access_level: AccessLevel,
    #[serde(default)]
    pub engineering_units: Option<String>,
    #[serde(default)]
    pub eu_range: Option<ValueRange>,
    #[serde(default)]
    pub instrument_range: Option<ValueRange>,
    #[serde(default)]
    pub true_state: Option<String>,
    #[serde(default)]
    pub false_state: Option<String>,
    #[serde(default)]
    pub value: Option<serde_json::Value>,
    #[serde(default)]
    pub components: BTreeMap<String, ComponentDef>,
    #[serde(default)]
    pub input_arguments: Vec<ArgumentDef>,
    #[serde(default)]
    pub output_arguments: Vec<ArgumentDef>,
}

/// Method entries in the catalog omit the `type` tag; this mirror of
/// [`ComponentDef`] supplies it during conversion.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodDef {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub input_arguments: Vec<ArgumentDef>,
    #[serde(default)]
    pub output_arguments: Vec<ArgumentDef>,
}

impl From<MethodDef> for ComponentDef {
    fn from(m: MethodDef) -> Self {
        ComponentDef {
            kind: ComponentKind::Method,
            data_type: None,
            modelling_rule: ModellingRule::Mandatory,
            description: m.description,
            access_level: AccessLevel::Read,
            engineering_units: None,
            eu_range: None,
            instrument_range: None,
            true_state: None,
            false_state: None,
            value: None,
            components: BTreeMap::new(),
            input_arguments: m.input_arguments,
            output_arguments: m.output_arguments,
        }
    }
}

/// A named ObjectType with single inheritance rooted at `BaseObjectType`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeDef {
    #[serde(default = "default_base")]
    pub base: String,
    #[serde(default)]
    pub is_abstract: bool,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub properties: BTreeMap<String, ComponentDef>,
    #[serde(default)]
    pub components: BTreeMap<String, ComponentDef>,
    #[serde(default)]
    pub methods: BTreeMap<String, MethodDef>,
}

fn default_base() -> String {
    BASE_OBJECT_TYPE.to_string()
}

/// Name of the universal base type; types with this base sit at the root of
/// the inheritance graph.
pub const BASE_OBJECT_TYPE: &str = "BaseObjectType";

/// Custom data-type declaration (enumerations are the only shape the
/// simulator serves; structures are carried through untyped).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataTypeDef {
    #[serde(rename = "type", default)]
    pub type_class: String,
    #[serde(default)]
    pub values: BTreeMap<i32, String>,
}

/// The full type document (`types.yaml`).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeCatalog {
    pub namespace_uri: String,
    #[serde(default)]
    pub engineering_units: BTreeMap<String, EngineeringUnit>,
    #[serde(default)]
    pub data_types: BTreeMap<String, DataTypeDef>,
    #[serde(default)]
    pub alarm_types: BTreeMap<String, AlarmDef>,
    #[serde(default)]
    pub types: BTreeMap<String, TypeDef>,
}

// ============================================================================
// Asset catalog
// ============================================================================

/// Position of an asset in the plant hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
pub enum HierarchyLevel {
    Plant,
    Process,
    System,
    Asset,
    #[default]
    Other,
}

/// Type name used by folder assets instead of an ObjectType reference.
pub const FOLDER_TYPE: &str = "Folder";

/// Parent identifier used by top-level assets.
pub const OBJECTS_FOLDER_ID: &str = "ObjectsFolder";

/// One asset instance. Entries in the on-disk list without an `id` (such as
/// `$comment` markers) are dropped by the loader before this type is built.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetDef {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub asset_type: String,
    pub parent: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub hierarchy_level: HierarchyLevel,
    #[serde(default)]
    pub simulate: bool,
    #[serde(default)]
    pub properties: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub design_specs: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub alarms: Vec<String>,
}

impl AssetDef {
    pub fn is_folder(&self) -> bool {
        self.asset_type == FOLDER_TYPE
    }

    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }
}

/// The full asset document (`assets.json`).
#[derive(Debug, Clone)]
pub struct AssetCatalog {
    pub assets: Vec<AssetDef>,
}

// ============================================================================
// Design specs
// ============================================================================

/// Manufacturer design point for a pump. Read-only after construction; the
/// physics coefficients are derived from it once.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DesignSpecs {
    /// Flow at BEP, m³/h.
    #[serde(rename = "DesignFlow")]
    pub design_flow: f64,
    /// Total dynamic head at BEP, m.
    #[serde(rename = "DesignHead")]
    pub design_head: f64,
    /// Motor rated power, kW.
    #[serde(rename = "DesignPower")]
    pub design_power: f64,
    /// Pump efficiency at BEP, percent.
    #[serde(rename = "ManufacturerBEP_Efficiency")]
    pub bep_efficiency: f64,
    /// Motor efficiency, percent.
    #[serde(rename = "MotorEfficiency")]
    pub motor_efficiency: f64,
    #[serde(rename = "MaxRPM")]
    pub max_rpm: f64,
    #[serde(rename = "MinRPM")]
    pub min_rpm: f64,
    /// Impeller diameter, mm.
    #[serde(rename = "ImpellerDiameter")]
    pub impeller_diameter: f64,
    /// Required net positive suction head, m.
    #[serde(rename = "NPSHRequired")]
    pub npsh_required: f64,
    #[serde(rename = "FullLoadAmps")]
    pub full_load_amps: f64,
    #[serde(rename = "RatedVoltage")]
    pub rated_voltage: f64,
}

impl Default for DesignSpecs {
    fn default() -> Self {
        Self {
            design_flow: 2500.0,
            design_head: 15.0,
            design_power: 150.0,
            bep_efficiency: 84.0,
            motor_efficiency: 95.4,
            max_rpm: 1180.0,
            min_rpm: 600.0,
            impeller_diameter: 450.0,
            npsh_required: 4.5,
            full_load_amps: 225.0,
            rated_voltage: 480.0,
        }
    }
}

impl DesignSpecs {
    /// Build specs from a partial override map, falling back to defaults for
    /// keys the asset does not declare.
    pub fn from_overrides(overrides: &BTreeMap<String, serde_json::Value>) -> Self {
        let mut specs = Self::default();
        for (key, value) in overrides {
            let Some(v) = value.as_f64() else { continue };
            match key.as_str() {
                "DesignFlow" => specs.design_flow = v,
                "DesignHead" => specs.design_head = v,
                "DesignPower" => specs.design_power = v,
                "ManufacturerBEP_Efficiency" => specs.bep_efficiency = v,
                "MotorEfficiency" => specs.motor_efficiency = v,
                "MaxRPM" => specs.max_rpm = v,
                "MinRPM" => specs.min_rpm = v,
                "ImpellerDiameter" => specs.impeller_diameter = v,
                "NPSHRequired" => specs.npsh_required = v,
                "FullLoadAmps" => specs.full_load_amps = v,
                "RatedVoltage" => specs.rated_voltage = v,
                _ => {}
            }
        }
        specs
    }
}
