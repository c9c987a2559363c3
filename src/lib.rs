//! ips-sim: influent pump station simulator.
//!
//! Serves realistic, physically plausible telemetry for a wastewater
//! treatment influent pump station over three surfaces:
//!
//! - **OPC-UA**: a browsable information model built from a declarative
//!   type/asset schema, with control methods on pump instances
//! - **MQTT**: an embedded broker publishing telemetry, maintenance and
//!   analytics topics
//! - **WebSocket**: live bulk and per-topic pushes for dashboards
//!
//! ## Architecture
//!
//! - **Information model** (`model`): address space + builder
//! - **Simulation kernel** (`sim`): affinity-law pump physics, wear and
//!   failure modes, the cooperative tick loop
//! - **Alarm engine** (`alarms`): limit checking with hysteresis
//! - **Fan-out plane** (`fanout`): node writes, broker publication,
//!   WebSocket push under one scheduling discipline

pub mod alarms;
pub mod api;
pub mod config;
pub mod control;
pub mod fanout;
pub mod model;
#[cfg(feature = "opcua")]
pub mod server;
pub mod sim;

// Re-export the bootstrap surface used by the binary and integration tests.
pub use config::{load_assets, load_types, ConfigError};
pub use control::{ControlHandle, KernelStatus, MethodRegistry};
pub use model::{build_model, AddressSpace, BuildError, BuiltModel, SharedSpace};
pub use sim::{
    FailureType, ModeParameters, PumpSnapshot, SimulationKernel, SimulationMode,
};
