//! Simulation kernel: owns every actor, the mode parameters and the tick
//! loop; drains the control mailbox between ticks and feeds the fan-out
//! plane after every tick.
//!
//! One failing actor never stalls the loop — its error is logged and its
//! state is preserved for the next tick. The kernel never retries a tick;
//! the next tick is the retry.

use std::collections::BTreeMap;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::alarms::{AlarmEngine, PumpAlarmBindings};
use crate::config::schema::TypeCatalog;
use crate::control::{ControlCommand, ControlHandle, KernelStatus};
use crate::fanout::FanoutPlane;
use crate::model::{BuiltModel, SharedSpace, TargetKind};
use super::chamber::ChamberActor;
use super::modes::{FailureType, ModeParameters, SimulationMode};
use super::pump::{PumpActor, PumpSnapshot};

/// Tick interval clamp, ms.
const MIN_INTERVAL_MS: f64 = 10.0;
const MAX_INTERVAL_MS: f64 = 10_000.0;

#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    #[error("asset {asset} references unknown alarm {alarm}")]
    UnknownAlarm { asset: String, alarm: String },
    #[error("alarm {alarm} on {asset} references unknown input node {path}")]
    UnknownAlarmInput { asset: String, alarm: String, path: String },
}

pub struct SimulationKernel {
    space: SharedSpace,
    pumps: BTreeMap<String, PumpActor>,
    chambers: BTreeMap<String, ChamberActor>,
    params: ModeParameters,
    interval_ms: f64,
    rng: StdRng,
    alarms: AlarmEngine,
    alarm_bindings: BTreeMap<String, PumpAlarmBindings>,
    fanout: FanoutPlane,
    commands: mpsc::Receiver<ControlCommand>,
    cancel: CancellationToken,
    is_running: bool,
    failure_complete_logged: bool,
}

impl SimulationKernel {
    /// Create a kernel and its control handle. The RNG stream is seedable
    /// for reproducible tests; `None` seeds from entropy.
    pub fn new(space: SharedSpace, seed: Option<u64>, cancel: CancellationToken) -> (Self, ControlHandle) {
        let (handle, commands) = ControlHandle::channel();
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let kernel = Self {
            space,
            pumps: BTreeMap::new(),
            chambers: BTreeMap::new(),
            params: ModeParameters::default(),
            interval_ms: 1000.0,
            rng,
            alarms: AlarmEngine::new(),
            alarm_bindings: BTreeMap::new(),
            fanout: FanoutPlane::new(),
            commands,
            cancel,
            is_running: false,
            failure_complete_logged: false,
        };
        (kernel, handle)
    }

    pub fn set_fanout(&mut self, fanout: FanoutPlane) {
        self.fanout = fanout;
    }

    pub fn pump_count(&self) -> usize {
        self.pumps.len()
    }

    pub fn chamber_count(&self) -> usize {
        self.chambers.len()
    }

    /// Instantiate actors for every simulation target and register their
    /// alarms. Unknown alarm names or input paths are fatal.
    pub async fn bind_model(
        &mut self,
        model: &BuiltModel,
        catalog: &TypeCatalog,
    ) -> Result<(), KernelError> {
        let space = self.space.clone();
        let space = space.read().await;

        for target in &model.targets {
            match target.kind {
                TargetKind::Pump => {
                    let mut actor =
                        PumpActor::new(&target.id, &target.name, target.root, target.specs.clone());
                    actor.bind(&space);

                    let mut bindings = PumpAlarmBindings::new(&target.id);
                    for alarm_name in &target.alarms {
                        let def = catalog.alarm_types.get(alarm_name).ok_or_else(|| {
                            KernelError::UnknownAlarm {
                                asset: target.id.clone(),
                                alarm: alarm_name.clone(),
                            }
                        })?;
                        let input = space.find_by_path(target.root, &def.input_node).ok_or_else(
                            || KernelError::UnknownAlarmInput {
                                asset: target.id.clone(),
                                alarm: alarm_name.clone(),
                                path: def.input_node.clone(),
                            },
                        )?;
                        let source = space.browse_path(input);
                        self.alarms.register(
                            &mut bindings,
                            &def.input_node,
                            alarm_name,
                            def,
                            &source,
                        );
                    }
                    self.alarm_bindings.insert(target.id.clone(), bindings);
                    self.pumps.insert(target.id.clone(), actor);
                }
                TargetKind::Chamber => {
                    let mut actor = ChamberActor::new(&target.id, &target.name, target.root);
                    actor.bind(&space);
                    self.chambers.insert(target.id.clone(), actor);
                }
            }
        }

        info!(
            pumps = self.pumps.len(),
            chambers = self.chambers.len(),
            "Bound simulation actors"
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // Main loop
    // ------------------------------------------------------------------

    /// Run until shutdown or cancellation. The current tick always
    /// completes; fan-out drains before the run ends.
    pub async fn run(mut self) {
        self.is_running = true;
        let mut last_wall = Utc::now();
        info!(
            pumps = self.pumps.len(),
            chambers = self.chambers.len(),
            interval_ms = self.interval_ms,
            "Simulation kernel started"
        );

        while self.is_running && !self.cancel.is_cancelled() {
            let now = Utc::now();
            let dt = ((now - last_wall).num_milliseconds().max(0) as f64) / 1000.0;
            last_wall = now;

            if self.params.mode == SimulationMode::Failure {
                self.advance_failure(dt);
            }

            let snapshots = self.tick_actors(dt).await;
            self.fanout.broadcast(&snapshots).await;

            // Sleep until the next tick; control operations are applied
            // here, between ticks. The deadline is recomputed per iteration
            // so an interval change takes effect within the current gap.
            let tick_finished = tokio::time::Instant::now();
            loop {
                let deadline =
                    tick_finished + tokio::time::Duration::from_millis(self.interval_ms as u64);
                tokio::select! {
                    () = tokio::time::sleep_until(deadline) => break,
                    () = self.cancel.cancelled() => break,
                    command = self.commands.recv() => match command {
                        Some(command) => self.handle_command(command).await,
                        None => {
                            self.is_running = false;
                            break;
                        }
                    },
                }
                if !self.is_running {
                    break;
                }
            }
        }

        self.fanout.shutdown().await;
        info!("Simulation kernel stopped");
    }

    async fn tick_actors(&mut self, dt: f64) -> BTreeMap<String, PumpSnapshot> {
        let mut snapshots = BTreeMap::new();

        for (id, pump) in &mut self.pumps {
            match pump.tick(dt, &self.params, &mut self.rng, &self.space).await {
                Ok(snapshot) => {
                    if let Some(bindings) = self.alarm_bindings.get(id) {
                        for event in self.alarms.check_snapshot(bindings, &snapshot) {
                            info!(
                                alarm = %event.alarm_key,
                                state = ?event.state,
                                value = event.value,
                                severity = event.severity,
                                "{}",
                                event.message
                            );
                        }
                    }
                    snapshots.insert(id.clone(), snapshot);
                }
                Err(e) => warn!(pump = %id, error = %e, "Pump tick failed; state preserved"),
            }
        }

        for (id, chamber) in &mut self.chambers {
            if let Err(e) = chamber.tick(dt, &mut self.rng, &self.space).await {
                warn!(chamber = %id, error = %e, "Chamber tick failed; state preserved");
            }
        }

        snapshots
    }

    /// Advance failure progression:
    /// `(100 / time_to_failure_h) · (dt/3600) · time_acceleration · 3600`.
    fn advance_failure(&mut self, dt: f64) {
        let config = &mut self.params.failure;
        if config.time_to_failure <= 0.0 {
            return;
        }
        let rate = 100.0 / config.time_to_failure;
        let hours = (dt / 3600.0) * self.params.time_acceleration;
        config.progression = (config.progression + rate * hours * 3600.0).min(100.0);

        if config.progression >= 100.0 && !self.failure_complete_logged {
            warn!(failure = config.failure_type.name(), "Failure simulation complete - pump has failed");
            self.failure_complete_logged = true;
        }
    }

    // ------------------------------------------------------------------
    // Control operations
    // ------------------------------------------------------------------

    async fn handle_command(&mut self, command: ControlCommand) {
        match command {
            ControlCommand::StartPump { id, reply } => {
                let result = match self.pumps.get_mut(&id) {
                    Some(pump) => pump.start(&self.space).await,
                    None => (false, format!("unknown pump {id}")),
                };
                let _ = reply.send(result);
            }
            ControlCommand::StopPump { id, reply } => {
                let result = match self.pumps.get_mut(&id) {
                    Some(pump) => pump.stop(&self.space).await,
                    None => (false, format!("unknown pump {id}")),
                };
                let _ = reply.send(result);
            }
            ControlCommand::SetSpeed { id, rpm, reply } => {
                let result = match self.pumps.get_mut(&id) {
                    Some(pump) => pump.set_speed(rpm),
                    None => (false, format!("unknown pump {id}")),
                };
                let _ = reply.send(result);
            }
            ControlCommand::ResetFault { id, reply } => {
                let result = match self.pumps.get_mut(&id) {
                    Some(pump) => pump.reset_fault(),
                    None => (false, format!("unknown pump {id}")),
                };
                let _ = reply.send(result);
            }
            ControlCommand::StartAll { reply } => {
                let mut started = 0usize;
                for pump in self.pumps.values_mut() {
                    if pump.start(&self.space).await.0 {
                        started += 1;
                    }
                }
                let _ = reply.send((true, format!("Started {started} pumps")));
            }
            ControlCommand::StopAll { reply } => {
                for pump in self.pumps.values_mut() {
                    pump.stop(&self.space).await;
                }
                let _ = reply.send((true, format!("Stopped {} pumps", self.pumps.len())));
            }
            ControlCommand::SetMode { mode, reply } => {
                self.params.mode = mode;
                self.failure_complete_logged = false;
                info!(mode = mode.name(), "Simulation mode changed");
                let _ = reply.send((true, format!("Mode set to {}", mode.name())));
            }
            ControlCommand::TriggerFailure { asset, failure, reply } => {
                let _ = reply.send(self.trigger_failure(asset, failure));
            }
            ControlCommand::ResetSimulation { reply } => {
                self.reset_simulation();
                let _ = reply.send((true, "Simulation reset to OPTIMAL".to_string()));
            }
            ControlCommand::ApplyAging { years, reply } => {
                let result = if (0.0..=50.0).contains(&years) {
                    self.params.mode = SimulationMode::Aged;
                    self.params.aged.years_of_operation = years;
                    info!(years, "Applied aging");
                    (true, format!("Applied {years} years of aging"))
                } else {
                    (false, format!("aging years {years} outside [0, 50]"))
                };
                let _ = reply.send(result);
            }
            ControlCommand::SetInterval { interval_ms } => {
                self.interval_ms = interval_ms.clamp(MIN_INTERVAL_MS, MAX_INTERVAL_MS);
                self.params.simulation_interval = self.interval_ms;
                info!(interval_ms = self.interval_ms, "Simulation interval set");
            }
            ControlCommand::SetTimeAcceleration { factor } => {
                self.params.time_acceleration = factor.clamp(0.1, 100.0);
                info!(factor = self.params.time_acceleration, "Time acceleration set");
            }
            ControlCommand::Status { reply } => {
                let _ = reply.send(self.status());
            }
            ControlCommand::ModeParams { reply } => {
                let _ = reply.send(self.params.clone());
            }
            ControlCommand::UpdateModeParams { update, reply } => {
                update.apply_to(&mut self.params);
                self.interval_ms = self.params.simulation_interval;
                let _ = reply.send((true, "Mode parameters updated".to_string()));
            }
            ControlCommand::Snapshots { reply } => {
                let snapshots = self
                    .pumps
                    .iter()
                    .filter_map(|(id, p)| p.snapshot().map(|s| (id.clone(), s.clone())))
                    .collect();
                let _ = reply.send(snapshots);
            }
            ControlCommand::AcknowledgeAlarm { key, reply } => {
                let _ = reply.send(self.alarms.acknowledge(&key));
            }
            ControlCommand::ActiveAlarms { reply } => {
                let _ = reply.send(self.alarms.active_alarms());
            }
            ControlCommand::AlarmHistory { limit, reply } => {
                let _ = reply.send(self.alarms.history(limit));
            }
            ControlCommand::Shutdown => {
                debug!("Shutdown requested");
                self.is_running = false;
            }
        }
    }

    fn trigger_failure(&mut self, asset: Option<String>, failure: FailureType) -> (bool, String) {
        let target = match asset {
            Some(id) if self.pumps.contains_key(&id) => Some(id),
            Some(id) => return (false, format!("unknown pump {id}")),
            // No explicit target: prefer a running pump, else the first.
            None => self
                .pumps
                .values()
                .find(|p| p.state.is_running)
                .map(|p| p.id.clone())
                .or_else(|| self.pumps.keys().next().cloned()),
        };
        let Some(target) = target else {
            return (false, "no pumps registered".to_string());
        };

        self.params.mode = SimulationMode::Failure;
        self.params.failure.failure_type = failure;
        self.params.failure.progression = 0.0;
        self.failure_complete_logged = false;
        info!(pump = %target, failure = failure.name(), "Triggered failure");
        (true, format!("Triggered {} failure on {target}", failure.name()))
    }

    fn reset_simulation(&mut self) {
        self.params = ModeParameters::default();
        self.params.simulation_interval = self.interval_ms;
        self.failure_complete_logged = false;
        for pump in self.pumps.values_mut() {
            pump.state.runtime_hours = 0.0;
            pump.state.start_count = 0;
            pump.state.is_faulted = false;
        }
        self.fanout.reset_cadence();
        info!("Simulation reset to OPTIMAL state");
    }

    fn status(&self) -> KernelStatus {
        KernelStatus {
            is_running: self.is_running,
            mode: self.params.mode.name().to_string(),
            interval_ms: self.interval_ms,
            time_acceleration: self.params.time_acceleration,
            pump_count: self.pumps.len(),
            chamber_count: self.chambers.len(),
            pumps_running: self.pumps.values().filter(|p| p.state.is_running).count(),
            failure_progression: self.params.failure.progression,
        }
    }
}
