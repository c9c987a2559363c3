//! Method mirroring: wire method nodes bound to the control registry.
//!
//! Callbacks run on the server thread; dispatch into the kernel goes
//! through the tokio runtime handle captured at mirror time. Every control
//! method returns the `(Boolean, String)` verb tuple.

use open62541::{ua, MethodCallback, MethodCallbackContext, MethodNode};
use open62541_sys::UA_NS0ID_HASCOMPONENT;
use tracing::{debug, warn};

use crate::model::space::{NodeId, Variant, VariantType};
use super::Mirror;

/// Mirror one method node and bind its callback.
pub(super) fn mirror_method(
    mirror: &mut Mirror<'_>,
    node: &crate::model::Node,
    parent_id: &ua::NodeId,
) {
    let Some(signature) = &node.method else { return };
    // Only registry-bound methods get a live callback; unbound methods are
    // not mirrored at all (nothing would answer them).
    if mirror.registry.binding(node.id).is_none() {
        debug!(method = %node.browse_name.name, "Method has no binding; not mirrored");
        return;
    }

    let mut attributes = ua::MethodAttributes::default();
    attributes.display_name("en-US", &node.display_name);

    let method_node = MethodNode {
        node_id: Mirror::wire_id(node.id),
        parent_node_id: parent_id.clone(),
        reference_type_id: ua::NodeId::numeric(0, UA_NS0ID_HASCOMPONENT),
        browse_name: ua::QualifiedName::new(1, &node.browse_name.name),
        attributes,
        input_arguments: signature.input.iter().map(to_ua_argument).collect(),
        output_arguments: signature.output.iter().map(to_ua_argument).collect(),
    };

    let callback = BoundMethod {
        model_node: node.id,
        registry: mirror.registry.clone(),
        handle: mirror.handle.clone(),
        runtime: mirror.runtime.clone(),
    };

    match mirror.server.add_method_node(method_node, callback) {
        Ok(_) => {
            mirror.node_map.insert(node.id, Mirror::wire_id(node.id));
        }
        Err(e) => {
            warn!(method = %node.browse_name.name, error = %e, "Failed to mirror method");
        }
    }
}

fn to_ua_argument(arg: &crate::model::Argument) -> ua::Argument {
    let mut out = ua::Argument::default();
    out.name(&arg.name);
    out.data_type(&data_type_id(arg.data_type));
    out.value_rank(-1);
    out.description("en-US", &arg.description);
    out
}

/// ns0 data-type node id for a wire type.
fn data_type_id(vtype: VariantType) -> ua::NodeId {
    use open62541_sys::{
        UA_NS0ID_BOOLEAN, UA_NS0ID_DATETIME, UA_NS0ID_DOUBLE, UA_NS0ID_FLOAT, UA_NS0ID_INT16,
        UA_NS0ID_INT32, UA_NS0ID_STRING, UA_NS0ID_UINT16, UA_NS0ID_UINT32,
    };
    let id = match vtype {
        VariantType::Boolean => UA_NS0ID_BOOLEAN,
        VariantType::Int16 => UA_NS0ID_INT16,
        VariantType::Int32 => UA_NS0ID_INT32,
        VariantType::UInt16 => UA_NS0ID_UINT16,
        VariantType::UInt32 => UA_NS0ID_UINT32,
        VariantType::Float => UA_NS0ID_FLOAT,
        VariantType::Double => UA_NS0ID_DOUBLE,
        VariantType::String => UA_NS0ID_STRING,
        VariantType::DateTime => UA_NS0ID_DATETIME,
    };
    ua::NodeId::numeric(0, id)
}

/// Wire variant → model variant for method arguments.
fn from_ua_variant(variant: &ua::Variant) -> Variant {
    if let Some(v) = variant.as_scalar::<ua::Double>() {
        Variant::Double(v.value())
    } else if let Some(v) = variant.as_scalar::<ua::Float>() {
        Variant::Double(f64::from(v.value()))
    } else if let Some(v) = variant.as_scalar::<ua::Int32>() {
        Variant::Int32(v.value())
    } else if let Some(v) = variant.as_scalar::<ua::UInt32>() {
        Variant::UInt32(v.value())
    } else if let Some(v) = variant.as_scalar::<ua::Boolean>() {
        Variant::Boolean(v.value())
    } else {
        Variant::Null
    }
}

/// Callback dispatching one bound method into the kernel.
struct BoundMethod {
    model_node: NodeId,
    registry: std::sync::Arc<crate::control::MethodRegistry>,
    handle: crate::control::ControlHandle,
    runtime: tokio::runtime::Handle,
}

impl MethodCallback for BoundMethod {
    fn callback(&mut self, context: &mut MethodCallbackContext) -> Result<(), ua::StatusCode> {
        let args: Vec<Variant> =
            context.input_arguments().iter().map(from_ua_variant).collect();

        let registry = self.registry.clone();
        let handle = self.handle.clone();
        let node = self.model_node;
        let (ok, message) =
            self.runtime.block_on(async move { registry.invoke(&handle, node, &args).await });

        let outputs = context.output_arguments_mut();
        if let Some(slot) = outputs.get_mut(0) {
            *slot = ua::Variant::scalar(ua::Boolean::new(ok));
        }
        if let Some(slot) = outputs.get_mut(1) {
            if let Ok(text) = ua::String::new(&message) {
                *slot = ua::Variant::scalar(text);
            }
        }
        Ok(())
    }
}
