//! OPC-UA endpoint: mirrors the in-process address space into an embedded
//! open62541 server and dispatches incoming method calls to the kernel.
//!
//! The mirror is one-directional for values — actors commit into the
//! in-process space, and committed writes are forwarded to the wire server
//! from a dedicated writer thread. Methods flow the other way: open62541
//! callbacks resolve the called node against the method registry and
//! dispatch through the kernel handle.

mod methods;
mod values;

use std::collections::HashMap;
use std::sync::Arc;

use open62541::{ua, Node, Server};
use open62541_sys::{
    UA_NS0ID_BASEDATAVARIABLETYPE, UA_NS0ID_BASEOBJECTTYPE, UA_NS0ID_FOLDERTYPE,
    UA_NS0ID_HASCOMPONENT, UA_NS0ID_HASPROPERTY, UA_NS0ID_HASSUBTYPE, UA_NS0ID_OBJECTSFOLDER,
    UA_NS0ID_OBJECTTYPEATTRIBUTES, UA_NS0ID_ORGANIZES,
};
use tracing::{debug, info, warn};

use crate::config::schema::ComponentKind;
use crate::control::{ControlHandle, MethodRegistry};
use crate::model::space::{NodeClass, NodeId};
use crate::model::{AddressSpace, SharedSpace};

/// Numeric node-id offset for mirrored nodes in namespace 1.
const NODE_ID_BASE: u32 = 1000;

/// Endpoint path served by the wire server, kept for client compatibility
/// with the freeopcua URL shape.
pub const ENDPOINT_PATH: &str = "/freeopcua/server/";

/// Wire endpoint URL for the given host and port.
pub fn endpoint_url(host: &str, port: u16) -> String {
    format!("opc.tcp://{host}:{port}{ENDPOINT_PATH}")
}

/// Handle to the running wire server.
pub struct OpcUaEndpoint {
    /// Writer-thread join handle; runs until the value bridge closes.
    _writer: std::thread::JoinHandle<()>,
    /// Runner-thread join handle; serves client connections.
    _runner: std::thread::JoinHandle<()>,
}

/// Build the wire server from the populated space and start serving.
///
/// `registry` and `handle` wire the pump and kernel control verbs; `space`
/// supplies the node graph and the stream of committed writes.
pub async fn serve(
    space: SharedSpace,
    registry: Arc<MethodRegistry>,
    handle: ControlHandle,
    port: u16,
) -> anyhow::Result<OpcUaEndpoint> {
    if port != 4840 {
        warn!(port, "wire server binds the library default port 4840");
    }
    let (server, runner) = Server::new();
    let runtime = tokio::runtime::Handle::current();

    let node_map = {
        let space = space.read().await;
        let mut mirror = Mirror {
            server: &server,
            space: &space,
            registry: &registry,
            handle: handle.clone(),
            runtime,
            node_map: HashMap::new(),
        };
        mirror.mirror_all();
        mirror.node_map
    };
    info!(nodes = node_map.len(), port, "Mirrored address space into OPC-UA server");

    let changes = space.read().await.subscribe();
    let writer = values::spawn_value_writer(server, node_map, changes);

    let runner_thread = std::thread::Builder::new()
        .name("opcua-runner".to_string())
        .spawn(move || {
            if let Err(e) = runner.run() {
                warn!(error = %e, "OPC-UA server runner exited");
            }
        })?;

    info!(endpoint = %endpoint_url("0.0.0.0", port), "OPC-UA endpoint serving");
    Ok(OpcUaEndpoint { _writer: writer, _runner: runner_thread })
}

// ============================================================================
// Structural mirroring
// ============================================================================

struct Mirror<'a> {
    server: &'a Server,
    space: &'a AddressSpace,
    registry: &'a Arc<MethodRegistry>,
    handle: ControlHandle,
    runtime: tokio::runtime::Handle,
    node_map: HashMap<NodeId, ua::NodeId>,
}

impl Mirror<'_> {
    /// Stable wire node id for a model node.
    fn wire_id(id: NodeId) -> ua::NodeId {
        ua::NodeId::numeric(1, NODE_ID_BASE + id.0)
    }

    fn mirror_all(&mut self) {
        // Well-known roots map onto ns0.
        self.node_map
            .insert(self.space.objects_folder(), ua::NodeId::numeric(0, UA_NS0ID_OBJECTSFOLDER));
        self.node_map
            .insert(self.space.base_object_type(), ua::NodeId::numeric(0, UA_NS0ID_BASEOBJECTTYPE));

        // Nodes are stored in creation order, so parents always precede
        // children and a single pass suffices.
        let space = self.space;
        for node in space.iter() {
            if self.node_map.contains_key(&node.id) {
                continue;
            }
            let Some(parent) = node.parent else { continue };
            let Some(parent_id) = self.node_map.get(&parent).cloned() else {
                // Parent outside the mirrored set (e.g. the Types folder).
                continue;
            };
            match node.class {
                NodeClass::ObjectType => self.mirror_object_type(node, &parent_id),
                NodeClass::Object => self.mirror_object(node, &parent_id),
                NodeClass::Variable => self.mirror_variable(node, &parent_id),
                NodeClass::Method => {
                    methods::mirror_method(self, node, &parent_id);
                }
            }
        }
    }

    fn mirror_object_type(&mut self, node: &crate::model::Node, parent_id: &ua::NodeId) {
        let mut attr = ua::Attributes::ObjectType(ua::ObjectTypeAttributes::default());
        attr.display_name("en-US", &node.display_name);
        let mut type_node = Node {
            node_id: Self::wire_id(node.id),
            parent_node_id: parent_id.clone(),
            reference_type_id: ua::NodeId::numeric(0, UA_NS0ID_HASSUBTYPE),
            browse_name: ua::QualifiedName::new(1, &node.browse_name.name),
            type_definition: Some(ua::NodeId::ns0(UA_NS0ID_OBJECTTYPEATTRIBUTES)),
            node_context: None,
            attributes: attr,
        };
        self.add(node.id, &mut type_node);
    }

    fn mirror_object(&mut self, node: &crate::model::Node, parent_id: &ua::NodeId) {
        let type_definition = node
            .type_definition
            .and_then(|t| self.node_map.get(&t).cloned())
            .unwrap_or_else(|| ua::NodeId::numeric(0, UA_NS0ID_FOLDERTYPE));
        // Instances under the Objects folder hang off Organizes; nested
        // components use HasComponent.
        let reference = if node.parent == Some(self.space.objects_folder()) {
            UA_NS0ID_ORGANIZES
        } else {
            UA_NS0ID_HASCOMPONENT
        };
        let mut attr = ua::Attributes::Object(ua::ObjectAttributes::default());
        attr.display_name("en-US", &node.display_name);
        let mut object_node = Node {
            node_id: Self::wire_id(node.id),
            parent_node_id: parent_id.clone(),
            reference_type_id: ua::NodeId::numeric(0, reference),
            browse_name: ua::QualifiedName::new(1, &node.browse_name.name),
            type_definition: Some(type_definition),
            node_context: None,
            attributes: attr,
        };
        self.add(node.id, &mut object_node);
    }

    fn mirror_variable(&mut self, node: &crate::model::Node, parent_id: &ua::NodeId) {
        let reference = if node.kind == Some(ComponentKind::Property) {
            UA_NS0ID_HASPROPERTY
        } else {
            UA_NS0ID_HASCOMPONENT
        };
        let mut attr = ua::Attributes::Variable(ua::VariableAttributes::default());
        attr.display_name("en-US", &node.display_name);
        let mut variable_node = Node {
            node_id: Self::wire_id(node.id),
            parent_node_id: parent_id.clone(),
            reference_type_id: ua::NodeId::numeric(0, reference),
            browse_name: ua::QualifiedName::new(1, &node.browse_name.name),
            type_definition: Some(ua::NodeId::ns0(UA_NS0ID_BASEDATAVARIABLETYPE)),
            node_context: None,
            attributes: attr,
        };
        if self.add(node.id, &mut variable_node) {
            if let Some(dv) = &node.value {
                if let Some(variant) = values::to_ua_variant(&dv.value) {
                    self.server.write_variable(&Self::wire_id(node.id), &variant).ok();
                }
            }
        }
    }

    fn add(&mut self, model_id: NodeId, node: &mut Node) -> bool {
        match self.server.add_node(node) {
            Ok(()) => {
                self.node_map.insert(model_id, Self::wire_id(model_id));
                true
            }
            Err(e) => {
                debug!(node = %model_id, error = %e, "Failed to mirror node");
                false
            }
        }
    }
}
