//! OPC-UA-style information model: address space and builder.

pub mod builder;
pub mod space;

pub use builder::{
    build_model, BuildError, BuiltModel, SimTarget, TargetKind, CHAMBER_TYPE, PUMP_TYPE,
};
pub use space::{
    AddressSpace, Argument, DataChange, DataValue, MethodSignature, Node, NodeClass, NodeId,
    QualifiedName, SpaceError, Variant, VariantType,
};

use std::sync::Arc;
use tokio::sync::RwLock;

/// Shared handle to the address space. One writer at a time: the builder at
/// bootstrap, then the owning actor during its tick.
pub type SharedSpace = Arc<RwLock<AddressSpace>>;

/// Wrap a freshly built space for sharing.
pub fn shared(space: AddressSpace) -> SharedSpace {
    Arc::new(RwLock::new(space))
}
