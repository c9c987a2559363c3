//! Control surface: the kernel mailbox, its public handle, and the
//! process-wide bridge the REST collaborator obtains the handle from.
//!
//! All mutation of kernel-owned state goes through [`ControlCommand`]
//! messages with oneshot replies; the kernel drains the mailbox between
//! ticks, so callers never observe a half-applied tick.

pub mod registry;
pub mod watcher;

use std::collections::BTreeMap;
use std::sync::OnceLock;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use crate::alarms::{AlarmEvent, AlarmStatus};
use crate::sim::modes::{FailureType, ModeParameters, ModeUpdate, SimulationMode};
use crate::sim::pump::PumpSnapshot;

pub use registry::{ControlVerb, MethodBinding, MethodRegistry, MethodTarget};

/// Depth of the kernel mailbox; control traffic is light.
const MAILBOX_DEPTH: usize = 64;

/// Verb result: success flag plus a human-readable reason.
pub type VerbResult = (bool, String);

/// Kernel status snapshot for the control surface.
#[derive(Debug, Clone, Serialize)]
pub struct KernelStatus {
    pub is_running: bool,
    pub mode: String,
    pub interval_ms: f64,
    pub time_acceleration: f64,
    pub pump_count: usize,
    pub chamber_count: usize,
    pub pumps_running: usize,
    pub failure_progression: f64,
}

/// Commands accepted by the simulation kernel.
#[derive(Debug)]
pub enum ControlCommand {
    StartPump { id: String, reply: oneshot::Sender<VerbResult> },
    StopPump { id: String, reply: oneshot::Sender<VerbResult> },
    SetSpeed { id: String, rpm: f64, reply: oneshot::Sender<VerbResult> },
    ResetFault { id: String, reply: oneshot::Sender<VerbResult> },
    StartAll { reply: oneshot::Sender<VerbResult> },
    StopAll { reply: oneshot::Sender<VerbResult> },
    SetMode { mode: SimulationMode, reply: oneshot::Sender<VerbResult> },
    TriggerFailure {
        asset: Option<String>,
        failure: FailureType,
        reply: oneshot::Sender<VerbResult>,
    },
    ResetSimulation { reply: oneshot::Sender<VerbResult> },
    ApplyAging { years: f64, reply: oneshot::Sender<VerbResult> },
    SetInterval { interval_ms: f64 },
    SetTimeAcceleration { factor: f64 },
    Status { reply: oneshot::Sender<KernelStatus> },
    ModeParams { reply: oneshot::Sender<ModeParameters> },
    UpdateModeParams { update: ModeUpdate, reply: oneshot::Sender<VerbResult> },
    Snapshots { reply: oneshot::Sender<BTreeMap<String, PumpSnapshot>> },
    AcknowledgeAlarm { key: String, reply: oneshot::Sender<bool> },
    ActiveAlarms { reply: oneshot::Sender<Vec<AlarmStatus>> },
    AlarmHistory { limit: usize, reply: oneshot::Sender<Vec<AlarmEvent>> },
    Shutdown,
}

/// Cloneable handle to the kernel mailbox.
#[derive(Debug, Clone)]
pub struct ControlHandle {
    tx: mpsc::Sender<ControlCommand>,
}

impl ControlHandle {
    /// Create a handle/mailbox pair; the receiver goes to the kernel.
    pub fn channel() -> (Self, mpsc::Receiver<ControlCommand>) {
        let (tx, rx) = mpsc::channel(MAILBOX_DEPTH);
        (Self { tx }, rx)
    }

    async fn verb<F>(&self, make: F) -> VerbResult
    where
        F: FnOnce(oneshot::Sender<VerbResult>) -> ControlCommand,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send(make(reply_tx)).await.is_err() {
            return (false, "simulation kernel is not running".to_string());
        }
        reply_rx
            .await
            .unwrap_or_else(|_| (false, "simulation kernel dropped the request".to_string()))
    }

    async fn query<T, F>(&self, make: F) -> Option<T>
    where
        F: FnOnce(oneshot::Sender<T>) -> ControlCommand,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx.send(make(reply_tx)).await.ok()?;
        reply_rx.await.ok()
    }

    pub async fn start_pump(&self, id: &str) -> VerbResult {
        let id = id.to_string();
        self.verb(|reply| ControlCommand::StartPump { id, reply }).await
    }

    pub async fn stop_pump(&self, id: &str) -> VerbResult {
        let id = id.to_string();
        self.verb(|reply| ControlCommand::StopPump { id, reply }).await
    }

    pub async fn set_speed(&self, id: &str, rpm: f64) -> VerbResult {
        let id = id.to_string();
        self.verb(|reply| ControlCommand::SetSpeed { id, rpm, reply }).await
    }

    pub async fn reset_fault(&self, id: &str) -> VerbResult {
        let id = id.to_string();
        self.verb(|reply| ControlCommand::ResetFault { id, reply }).await
    }

    pub async fn start_all(&self) -> VerbResult {
        self.verb(|reply| ControlCommand::StartAll { reply }).await
    }

    pub async fn stop_all(&self) -> VerbResult {
        self.verb(|reply| ControlCommand::StopAll { reply }).await
    }

    pub async fn set_mode(&self, mode: SimulationMode) -> VerbResult {
        self.verb(|reply| ControlCommand::SetMode { mode, reply }).await
    }

    pub async fn trigger_failure(&self, asset: Option<&str>, failure: FailureType) -> VerbResult {
        let asset = asset.map(str::to_string);
        self.verb(|reply| ControlCommand::TriggerFailure { asset, failure, reply }).await
    }

    pub async fn reset_simulation(&self) -> VerbResult {
        self.verb(|reply| ControlCommand::ResetSimulation { reply }).await
    }

    pub async fn apply_aging(&self, years: f64) -> VerbResult {
        self.verb(|reply| ControlCommand::ApplyAging { years, reply }).await
    }

    pub async fn set_interval(&self, interval_ms: f64) {
        let _ = self.tx.send(ControlCommand::SetInterval { interval_ms }).await;
    }

    pub async fn set_time_acceleration(&self, factor: f64) {
        let _ = self.tx.send(ControlCommand::SetTimeAcceleration { factor }).await;
    }

    pub async fn status(&self) -> Option<KernelStatus> {
        self.query(|reply| ControlCommand::Status { reply }).await
    }

    /// Current mode parameters; the persistence collaborator's getter.
    pub async fn mode_params(&self) -> Option<ModeParameters> {
        self.query(|reply| ControlCommand::ModeParams { reply }).await
    }

    /// Partial mode-parameter update; the persistence collaborator's setter.
    pub async fn apply_mode_update(&self, update: ModeUpdate) -> VerbResult {
        self.verb(|reply| ControlCommand::UpdateModeParams { update, reply }).await
    }

    pub async fn snapshots(&self) -> BTreeMap<String, PumpSnapshot> {
        self.query(|reply| ControlCommand::Snapshots { reply }).await.unwrap_or_default()
    }

    pub async fn acknowledge_alarm(&self, key: &str) -> bool {
        let key = key.to_string();
        self.query(|reply| ControlCommand::AcknowledgeAlarm { key, reply })
            .await
            .unwrap_or(false)
    }

    pub async fn active_alarms(&self) -> Vec<AlarmStatus> {
        self.query(|reply| ControlCommand::ActiveAlarms { reply }).await.unwrap_or_default()
    }

    pub async fn alarm_history(&self, limit: usize) -> Vec<AlarmEvent> {
        self.query(|reply| ControlCommand::AlarmHistory { limit, reply })
            .await
            .unwrap_or_default()
    }

    /// Ask the kernel to finish the current tick and stop.
    pub async fn shutdown(&self) {
        let _ = self.tx.send(ControlCommand::Shutdown).await;
    }
}

// ============================================================================
// Bridge
// ============================================================================

static BRIDGE: OnceLock<ControlHandle> = OnceLock::new();

/// Publish the kernel handle for external collaborators. One write at kernel
/// construction; later calls are ignored with a warning.
pub fn register(handle: ControlHandle) {
    if BRIDGE.set(handle).is_err() {
        warn!("control bridge registered more than once; keeping the first handle");
    }
}

/// Obtain the kernel handle, if a kernel has been constructed.
pub fn bridge() -> Option<ControlHandle> {
    BRIDGE.get().cloned()
}
