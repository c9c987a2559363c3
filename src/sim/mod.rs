//! Simulation kernel and actors.

pub mod chamber;
pub mod engine;
pub mod modes;
pub mod physics;
pub mod pump;

pub use chamber::ChamberActor;
pub use engine::{KernelError, SimulationKernel};
pub use modes::{
    diurnal_multiplier, FailureType, FlowProfile, ModeFactors, ModeParameters, ModeUpdate,
    SimulationMode,
};
pub use physics::PumpPhysics;
pub use pump::{PumpActor, PumpSnapshot, PumpState};
