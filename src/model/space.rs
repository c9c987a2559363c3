//! In-process address space: the node graph served to every endpoint.
//!
//! The graph is a tree rooted at the well-known `Objects` folder, with type
//! nodes under a sibling `Types` folder. Every node is owned by its parent;
//! parent/child links are navigational only. Mutation happens at exactly two
//! points: the model builder at bootstrap, and the owning actor's tick.
//!
//! Committed writes are fanned to subscribers (the OPC-UA mirror, the
//! simulation-config watcher) over a broadcast channel, which gives external
//! observers last-committed-value semantics with no intra-tick visibility.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::config::schema::{AccessLevel, ComponentKind};

// ============================================================================
// Identifiers
// ============================================================================

/// Index-based node identifier, unique within one address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(pub u32);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Namespace-scoped browse name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualifiedName {
    pub ns: u16,
    pub name: String,
}

impl QualifiedName {
    pub fn new(ns: u16, name: impl Into<String>) -> Self {
        Self { ns, name: name.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeClass {
    Object,
    ObjectType,
    Variable,
    Method,
}

// ============================================================================
// Values
// ============================================================================

/// Wire type of a variable node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariantType {
    Boolean,
    Int16,
    Int32,
    UInt16,
    UInt32,
    Float,
    Double,
    String,
    DateTime,
}

/// A single typed value.
#[derive(Debug, Clone, PartialEq)]
pub enum Variant {
    Null,
    Boolean(bool),
    Int16(i16),
    Int32(i32),
    UInt16(u16),
    UInt32(u32),
    Float(f32),
    Double(f64),
    String(String),
    DateTime(DateTime<Utc>),
    LocalizedText(String),
    /// Inclusive numeric interval (EURange / InstrumentRange property value).
    Range { low: f64, high: f64 },
    /// EUInformation structure for AnalogItem engineering units.
    EuInformation {
        namespace_uri: String,
        unit_id: i32,
        display_name: String,
        description: String,
    },
}

impl Variant {
    /// Default value for a freshly created variable of the given type.
    pub fn default_for(vtype: VariantType) -> Self {
        match vtype {
            VariantType::Boolean => Variant::Boolean(false),
            VariantType::Int16 => Variant::Int16(0),
            VariantType::Int32 => Variant::Int32(0),
            VariantType::UInt16 => Variant::UInt16(0),
            VariantType::UInt32 => Variant::UInt32(0),
            VariantType::Float => Variant::Float(0.0),
            VariantType::Double => Variant::Double(0.0),
            VariantType::String => Variant::String(String::new()),
            VariantType::DateTime => Variant::Null,
        }
    }

    /// Convert a JSON scalar into a variant of the requested type.
    ///
    /// Numeric widths are coerced; a shape that cannot be represented at all
    /// yields `None`.
    pub fn from_json(value: &serde_json::Value, vtype: VariantType) -> Option<Self> {
        match vtype {
            VariantType::Boolean => value.as_bool().map(Variant::Boolean),
            VariantType::Int16 => value.as_i64().map(|v| Variant::Int16(v as i16)),
            VariantType::Int32 => value.as_i64().map(|v| Variant::Int32(v as i32)),
            VariantType::UInt16 => value.as_u64().map(|v| Variant::UInt16(v as u16)),
            VariantType::UInt32 => value.as_u64().map(|v| Variant::UInt32(v as u32)),
            VariantType::Float => value.as_f64().map(|v| Variant::Float(v as f32)),
            VariantType::Double => value.as_f64().map(Variant::Double),
            VariantType::String => value.as_str().map(|s| Variant::String(s.to_string())),
            VariantType::DateTime => None,
        }
    }

    /// Numeric view of the variant, when it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Variant::Int16(v) => Some(f64::from(v)),
            Variant::Int32(v) => Some(f64::from(v)),
            Variant::UInt16(v) => Some(f64::from(v)),
            Variant::UInt32(v) => Some(f64::from(v)),
            Variant::Float(v) => Some(f64::from(v)),
            Variant::Double(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Variant::Boolean(v) => Some(v),
            _ => None,
        }
    }
}

/// Timestamped value slot of a variable node.
#[derive(Debug, Clone, PartialEq)]
pub struct DataValue {
    pub value: Variant,
    pub source_timestamp: DateTime<Utc>,
    pub server_timestamp: DateTime<Utc>,
}

impl DataValue {
    pub fn new(value: Variant, at: DateTime<Utc>) -> Self {
        Self { value, source_timestamp: at, server_timestamp: at }
    }
}

// ============================================================================
// Methods
// ============================================================================

/// Method argument with its resolved wire type.
#[derive(Debug, Clone)]
pub struct Argument {
    pub name: String,
    pub data_type: VariantType,
    pub description: String,
}

/// Ordered input/output argument lists of a method node.
#[derive(Debug, Clone, Default)]
pub struct MethodSignature {
    pub input: Vec<Argument>,
    pub output: Vec<Argument>,
}

// ============================================================================
// Nodes
// ============================================================================

/// One node of the graph.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub class: NodeClass,
    pub browse_name: QualifiedName,
    pub display_name: String,
    pub description: String,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    /// For instance objects: the ObjectType node they were stamped from.
    pub type_definition: Option<NodeId>,
    /// Meta-model kind for variable nodes (AnalogItem, TwoStateDiscrete, …).
    pub kind: Option<ComponentKind>,
    pub variant_type: Option<VariantType>,
    pub value: Option<DataValue>,
    pub access: AccessLevel,
    pub method: Option<MethodSignature>,
}

/// Committed-write notification delivered to subscribers.
#[derive(Debug, Clone)]
pub struct DataChange {
    pub node: NodeId,
    pub value: Variant,
    pub source_timestamp: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum SpaceError {
    #[error("node {0} does not exist")]
    NodeNotFound(NodeId),
    #[error("node {0} is not a variable")]
    NotAVariable(NodeId),
    #[error("node {0} is read-only")]
    NotWritable(NodeId),
    #[error("{parent} already has a child named {name}")]
    DuplicateBrowseName { parent: NodeId, name: String },
}

// ============================================================================
// Address space
// ============================================================================

/// Capacity of the data-change broadcast ring. Laggy subscribers miss
/// intermediate values, never the latest committed one.
const DATA_CHANGE_CAPACITY: usize = 4096;

pub struct AddressSpace {
    nodes: Vec<Node>,
    namespaces: Vec<String>,
    objects_folder: NodeId,
    types_folder: NodeId,
    base_object_type: NodeId,
    folder_type: NodeId,
    changes: broadcast::Sender<DataChange>,
}

impl AddressSpace {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(DATA_CHANGE_CAPACITY);
        let mut space = Self {
            nodes: Vec::new(),
            namespaces: vec![
                "http://opcfoundation.org/UA/".to_string(),
                "urn:ips-sim:server".to_string(),
            ],
            objects_folder: NodeId(0),
            types_folder: NodeId(0),
            base_object_type: NodeId(0),
            folder_type: NodeId(0),
            changes,
        };

        space.objects_folder = space.push_node(Node {
            id: NodeId(0),
            class: NodeClass::Object,
            browse_name: QualifiedName::new(0, "Objects"),
            display_name: "Objects".to_string(),
            description: String::new(),
            parent: None,
            children: Vec::new(),
            type_definition: None,
            kind: None,
            variant_type: None,
            value: None,
            access: AccessLevel::Read,
            method: None,
        });
        space.types_folder = space.push_node(Node {
            id: NodeId(0),
            class: NodeClass::Object,
            browse_name: QualifiedName::new(0, "Types"),
            display_name: "Types".to_string(),
            description: String::new(),
            parent: None,
            children: Vec::new(),
            type_definition: None,
            kind: None,
            variant_type: None,
            value: None,
            access: AccessLevel::Read,
            method: None,
        });

        let types_folder = space.types_folder;
        space.base_object_type = space.push_child(types_folder, Node {
            id: NodeId(0),
            class: NodeClass::ObjectType,
            browse_name: QualifiedName::new(0, "BaseObjectType"),
            display_name: "BaseObjectType".to_string(),
            description: String::new(),
            parent: Some(types_folder),
            children: Vec::new(),
            type_definition: None,
            kind: None,
            variant_type: None,
            value: None,
            access: AccessLevel::Read,
            method: None,
        });
        space.folder_type = space.push_child(types_folder, Node {
            id: NodeId(0),
            class: NodeClass::ObjectType,
            browse_name: QualifiedName::new(0, "FolderType"),
            display_name: "FolderType".to_string(),
            description: String::new(),
            parent: Some(types_folder),
            children: Vec::new(),
            type_definition: None,
            kind: None,
            variant_type: None,
            value: None,
            access: AccessLevel::Read,
            method: None,
        });

        space
    }

    // ------------------------------------------------------------------
    // Well-known nodes & namespaces
    // ------------------------------------------------------------------

    pub fn objects_folder(&self) -> NodeId {
        self.objects_folder
    }

    pub fn base_object_type(&self) -> NodeId {
        self.base_object_type
    }

    /// Register a namespace URI, returning its index. Re-registering an
    /// existing URI returns the original index.
    pub fn register_namespace(&mut self, uri: &str) -> u16 {
        if let Some(idx) = self.namespaces.iter().position(|n| n == uri) {
            return idx as u16;
        }
        self.namespaces.push(uri.to_string());
        (self.namespaces.len() - 1) as u16
    }

    pub fn namespaces(&self) -> &[String] {
        &self.namespaces
    }

    // ------------------------------------------------------------------
    // Node creation
    // ------------------------------------------------------------------

    fn push_node(&mut self, mut node: Node) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        node.id = id;
        self.nodes.push(node);
        id
    }

    fn push_child(&mut self, parent: NodeId, node: Node) -> NodeId {
        let id = self.push_node(node);
        if let Some(p) = self.nodes.get_mut(parent.0 as usize) {
            p.children.push(id);
        }
        id
    }

    fn check_new_child(&self, parent: NodeId, name: &str) -> Result<(), SpaceError> {
        if self.nodes.get(parent.0 as usize).is_none() {
            return Err(SpaceError::NodeNotFound(parent));
        }
        if self.child_by_name(parent, name).is_some() {
            return Err(SpaceError::DuplicateBrowseName { parent, name: name.to_string() });
        }
        Ok(())
    }

    /// Create an ObjectType node under a base type.
    pub fn add_object_type(
        &mut self,
        base: NodeId,
        browse_name: QualifiedName,
        description: &str,
    ) -> Result<NodeId, SpaceError> {
        self.check_new_child(base, &browse_name.name)?;
        let display_name = browse_name.name.clone();
        Ok(self.push_child(base, Node {
            id: NodeId(0),
            class: NodeClass::ObjectType,
            display_name,
            description: description.to_string(),
            browse_name,
            parent: Some(base),
            children: Vec::new(),
            type_definition: None,
            kind: None,
            variant_type: None,
            value: None,
            access: AccessLevel::Read,
            method: None,
        }))
    }

    /// Create an instance object, optionally stamped with a type definition.
    pub fn add_object(
        &mut self,
        parent: NodeId,
        browse_name: QualifiedName,
        display_name: &str,
        type_definition: Option<NodeId>,
    ) -> Result<NodeId, SpaceError> {
        self.check_new_child(parent, &browse_name.name)?;
        Ok(self.push_child(parent, Node {
            id: NodeId(0),
            class: NodeClass::Object,
            display_name: display_name.to_string(),
            description: String::new(),
            browse_name,
            parent: Some(parent),
            children: Vec::new(),
            type_definition,
            kind: None,
            variant_type: None,
            value: None,
            access: AccessLevel::Read,
            method: None,
        }))
    }

    /// Create a folder object.
    pub fn add_folder(
        &mut self,
        parent: NodeId,
        browse_name: QualifiedName,
        display_name: &str,
    ) -> Result<NodeId, SpaceError> {
        let folder_type = self.folder_type;
        self.add_object(parent, browse_name, display_name, Some(folder_type))
    }

    /// Create a variable node of the given meta-model kind.
    #[allow(clippy::too_many_arguments)]
    pub fn add_variable(
        &mut self,
        parent: NodeId,
        browse_name: QualifiedName,
        kind: ComponentKind,
        variant_type: VariantType,
        initial: Variant,
        access: AccessLevel,
    ) -> Result<NodeId, SpaceError> {
        self.check_new_child(parent, &browse_name.name)?;
        let display_name = browse_name.name.clone();
        Ok(self.push_child(parent, Node {
            id: NodeId(0),
            class: NodeClass::Variable,
            display_name,
            description: String::new(),
            browse_name,
            parent: Some(parent),
            children: Vec::new(),
            type_definition: None,
            kind: Some(kind),
            variant_type: Some(variant_type),
            value: Some(DataValue::new(initial, Utc::now())),
            access,
            method: None,
        }))
    }

    /// Create a property node holding a fixed structural value (EURange,
    /// TrueState, EngineeringUnits, …).
    pub fn add_property(
        &mut self,
        parent: NodeId,
        browse_name: QualifiedName,
        value: Variant,
    ) -> Result<NodeId, SpaceError> {
        self.check_new_child(parent, &browse_name.name)?;
        let display_name = browse_name.name.clone();
        let variant_type = match value {
            Variant::Boolean(_) => Some(VariantType::Boolean),
            Variant::Int32(_) => Some(VariantType::Int32),
            Variant::UInt32(_) => Some(VariantType::UInt32),
            Variant::Double(_) => Some(VariantType::Double),
            Variant::String(_) => Some(VariantType::String),
            _ => None,
        };
        Ok(self.push_child(parent, Node {
            id: NodeId(0),
            class: NodeClass::Variable,
            display_name,
            description: String::new(),
            browse_name,
            parent: Some(parent),
            children: Vec::new(),
            type_definition: None,
            kind: Some(ComponentKind::Property),
            variant_type,
            value: Some(DataValue::new(value, Utc::now())),
            access: AccessLevel::Read,
            method: None,
        }))
    }

    /// Create a method node with its argument signature.
    pub fn add_method(
        &mut self,
        parent: NodeId,
        browse_name: QualifiedName,
        description: &str,
        signature: MethodSignature,
    ) -> Result<NodeId, SpaceError> {
        self.check_new_child(parent, &browse_name.name)?;
        let display_name = browse_name.name.clone();
        Ok(self.push_child(parent, Node {
            id: NodeId(0),
            class: NodeClass::Method,
            display_name,
            description: description.to_string(),
            browse_name,
            parent: Some(parent),
            children: Vec::new(),
            type_definition: None,
            kind: Some(ComponentKind::Method),
            variant_type: None,
            value: None,
            access: AccessLevel::Read,
            method: Some(signature),
        }))
    }

    // ------------------------------------------------------------------
    // Navigation
    // ------------------------------------------------------------------

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0 as usize)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.node(id).map_or(&[], |n| n.children.as_slice())
    }

    /// Find a direct child by browse name (namespace-insensitive, as browse
    /// names within one asset subtree always share a namespace).
    pub fn child_by_name(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.node(parent)?
            .children
            .iter()
            .copied()
            .find(|&c| self.node(c).is_some_and(|n| n.browse_name.name == name))
    }

    /// Resolve a dotted relative path (`DesignSpecs.MaxRPM`) from a node.
    pub fn find_by_path(&self, start: NodeId, path: &str) -> Option<NodeId> {
        let mut current = start;
        for segment in path.split('.') {
            current = self.child_by_name(current, segment)?;
        }
        Some(current)
    }

    /// Absolute slash-joined browse path, used for logging and alarm keys.
    pub fn browse_path(&self, id: NodeId) -> String {
        let mut segments = Vec::new();
        let mut current = Some(id);
        while let Some(node_id) = current {
            let Some(node) = self.node(node_id) else { break };
            segments.push(node.browse_name.name.clone());
            current = node.parent;
        }
        segments.reverse();
        segments.join("/")
    }

    // ------------------------------------------------------------------
    // Values
    // ------------------------------------------------------------------

    pub fn read_value(&self, id: NodeId) -> Result<&DataValue, SpaceError> {
        let node = self.node(id).ok_or(SpaceError::NodeNotFound(id))?;
        node.value.as_ref().ok_or(SpaceError::NotAVariable(id))
    }

    /// Commit a value with the given source timestamp. This is the owner
    /// path: access level is not consulted.
    pub fn write_value(
        &mut self,
        id: NodeId,
        value: Variant,
        at: DateTime<Utc>,
    ) -> Result<(), SpaceError> {
        let node = self.nodes.get_mut(id.0 as usize).ok_or(SpaceError::NodeNotFound(id))?;
        if node.class != NodeClass::Variable {
            return Err(SpaceError::NotAVariable(id));
        }
        node.value = Some(DataValue::new(value.clone(), at));
        // No receivers is fine; subscribers attach lazily.
        let _ = self.changes.send(DataChange { node: id, value, source_timestamp: at });
        Ok(())
    }

    /// Commit a value on behalf of an external client; rejected unless the
    /// node is ReadWrite.
    pub fn write_external(
        &mut self,
        id: NodeId,
        value: Variant,
        at: DateTime<Utc>,
    ) -> Result<(), SpaceError> {
        let access = self.node(id).ok_or(SpaceError::NodeNotFound(id))?.access;
        if access != AccessLevel::ReadWrite {
            return Err(SpaceError::NotWritable(id));
        }
        self.write_value(id, value, at)
    }

    /// Subscribe to committed writes.
    pub fn subscribe(&self) -> broadcast::Receiver<DataChange> {
        self.changes.subscribe()
    }
}

impl Default for AddressSpace {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn space_with_pump() -> (AddressSpace, NodeId, NodeId) {
        let mut space = AddressSpace::new();
        let ns = space.register_namespace("urn:test");
        let objects = space.objects_folder();
        let pump = space
            .add_object(objects, QualifiedName::new(ns, "IPS_PMP_001"), "Pump 1", None)
            .unwrap();
        let flow = space
            .add_variable(
                pump,
                QualifiedName::new(ns, "FlowRate"),
                ComponentKind::AnalogItem,
                VariantType::Double,
                Variant::Double(0.0),
                AccessLevel::Read,
            )
            .unwrap();
        (space, pump, flow)
    }

    #[test]
    fn register_namespace_is_idempotent() {
        let mut space = AddressSpace::new();
        let a = space.register_namespace("urn:test");
        let b = space.register_namespace("urn:test");
        assert_eq!(a, b);
        assert_eq!(a, 2);
    }

    #[test]
    fn duplicate_browse_name_is_rejected() {
        let (mut space, pump, _) = space_with_pump();
        let err = space
            .add_variable(
                pump,
                QualifiedName::new(2, "FlowRate"),
                ComponentKind::AnalogItem,
                VariantType::Double,
                Variant::Double(0.0),
                AccessLevel::Read,
            )
            .unwrap_err();
        assert!(matches!(err, SpaceError::DuplicateBrowseName { .. }));
    }

    #[test]
    fn browse_path_walks_to_root() {
        let (space, _, flow) = space_with_pump();
        assert_eq!(space.browse_path(flow), "Objects/IPS_PMP_001/FlowRate");
    }

    #[test]
    fn dotted_path_resolution() {
        let (mut space, pump, flow) = space_with_pump();
        let specs = space
            .add_object(pump, QualifiedName::new(2, "DesignSpecs"), "DesignSpecs", None)
            .unwrap();
        space
            .add_property(specs, QualifiedName::new(2, "MaxRPM"), Variant::UInt32(1180))
            .unwrap();

        let found = space.find_by_path(pump, "DesignSpecs.MaxRPM").unwrap();
        assert_eq!(space.read_value(found).unwrap().value, Variant::UInt32(1180));
        assert_eq!(space.find_by_path(pump, "FlowRate"), Some(flow));
        assert_eq!(space.find_by_path(pump, "DesignSpecs.Nope"), None);
    }

    #[test]
    fn write_records_timestamp_and_notifies() {
        let (mut space, _, flow) = space_with_pump();
        let mut rx = space.subscribe();
        let at = Utc::now();
        space.write_value(flow, Variant::Double(2500.0), at).unwrap();

        let dv = space.read_value(flow).unwrap();
        assert_eq!(dv.value, Variant::Double(2500.0));
        assert_eq!(dv.source_timestamp, at);
        assert_eq!(dv.server_timestamp, at);

        let change = rx.try_recv().unwrap();
        assert_eq!(change.node, flow);
        assert_eq!(change.value, Variant::Double(2500.0));
    }

    #[test]
    fn external_write_respects_access_level() {
        let (mut space, pump, flow) = space_with_pump();
        let at = Utc::now();
        let err = space.write_external(flow, Variant::Double(1.0), at).unwrap_err();
        assert!(matches!(err, SpaceError::NotWritable(_)));

        let cmd = space
            .add_variable(
                pump,
                QualifiedName::new(2, "RunCommand"),
                ComponentKind::TwoStateDiscrete,
                VariantType::Boolean,
                Variant::Boolean(false),
                AccessLevel::ReadWrite,
            )
            .unwrap();
        space.write_external(cmd, Variant::Boolean(true), at).unwrap();
        assert_eq!(space.read_value(cmd).unwrap().value.as_bool(), Some(true));
    }
}
