//! Limit-alarm engine: threshold checking with hysteresis, event
//! generation, and a bounded event history.
//!
//! Alarms are registered per pump from the catalog's alarm definitions and
//! keyed `{pump_id}_{variable}_{alarm_name}`. Every tick the kernel feeds
//! the pump sample vector through [`AlarmEngine::check_snapshot`].

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::config::schema::AlarmDef;
use crate::sim::pump::PumpSnapshot;

/// Events kept in the history ring; older entries are dropped.
const MAX_HISTORY: usize = 1000;

// ============================================================================
// States and events
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlarmState {
    #[default]
    Normal,
    Low,
    LowLow,
    High,
    HighHigh,
}

impl AlarmState {
    pub fn is_active(self) -> bool {
        self != AlarmState::Normal
    }

    fn description(self) -> &'static str {
        match self {
            AlarmState::Normal => "returned to normal",
            AlarmState::High => "high limit exceeded",
            AlarmState::HighHigh => "high-high limit exceeded",
            AlarmState::Low => "low limit exceeded",
            AlarmState::LowLow => "low-low limit exceeded",
        }
    }
}

/// Event emitted on every alarm state change.
#[derive(Debug, Clone, Serialize)]
pub struct AlarmEvent {
    pub alarm_key: String,
    pub state: AlarmState,
    pub value: f64,
    /// Limit that was crossed (0 for a return to normal).
    pub limit: f64,
    pub severity: u16,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub source_node: String,
    pub acknowledged: bool,
}

/// Point-in-time status of one alarm, for the control surface.
#[derive(Debug, Clone, Serialize)]
pub struct AlarmStatus {
    pub key: String,
    pub state: AlarmState,
    pub is_active: bool,
    pub acknowledged: bool,
    pub last_value: f64,
    pub severity: u16,
    pub message: String,
    pub activated_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Limit alarm
// ============================================================================

/// One registered limit alarm: configuration plus live state.
#[derive(Debug, Clone)]
pub struct LimitAlarm {
    pub name: String,
    pub severity: u16,
    /// Browse path of the monitored variable, relative to the pump root.
    pub input_node_path: String,
    pub high_high_limit: Option<f64>,
    pub high_limit: Option<f64>,
    pub low_limit: Option<f64>,
    pub low_low_limit: Option<f64>,
    /// Deadband applied before a return to normal.
    pub hysteresis: f64,
    pub message: String,
    pub state: AlarmState,
    pub is_active: bool,
    pub acknowledged: bool,
    pub last_value: f64,
    pub activated_at: Option<DateTime<Utc>>,
}

impl LimitAlarm {
    pub fn from_def(name: &str, def: &AlarmDef) -> Self {
        Self {
            name: name.to_string(),
            severity: def.severity,
            input_node_path: def.input_node.clone(),
            high_high_limit: def.high_high_limit,
            high_limit: def.high_limit,
            low_limit: def.low_limit,
            low_low_limit: def.low_low_limit,
            hysteresis: def.hysteresis,
            message: if def.message.is_empty() {
                format!("Alarm: {name}")
            } else {
                def.message.clone()
            },
            state: AlarmState::Normal,
            is_active: false,
            acknowledged: true,
            last_value: 0.0,
            activated_at: None,
        }
    }

    /// Raw limit evaluation, highest priority first.
    fn evaluate(&self, value: f64) -> AlarmState {
        if self.high_high_limit.is_some_and(|hh| value >= hh) {
            AlarmState::HighHigh
        } else if self.high_limit.is_some_and(|h| value >= h) {
            AlarmState::High
        } else if self.low_low_limit.is_some_and(|ll| value <= ll) {
            AlarmState::LowLow
        } else if self.low_limit.is_some_and(|l| value <= l) {
            AlarmState::Low
        } else {
            AlarmState::Normal
        }
    }

    /// Hold the old state while the value sits inside the hysteresis band.
    /// Clearing requires strictly passing `limit − hysteresis` (high side)
    /// or `limit + hysteresis` (low side).
    fn with_hysteresis(&self, value: f64, new_state: AlarmState) -> AlarmState {
        if !self.state.is_active() || new_state != AlarmState::Normal || self.hysteresis <= 0.0 {
            return new_state;
        }
        match self.state {
            AlarmState::High | AlarmState::HighHigh => {
                let limit = self.high_limit.or(self.high_high_limit);
                match limit {
                    Some(l) if value > l - self.hysteresis => self.state,
                    _ => new_state,
                }
            }
            AlarmState::Low | AlarmState::LowLow => {
                let limit = self.low_limit.or(self.low_low_limit);
                match limit {
                    Some(l) if value < l + self.hysteresis => self.state,
                    _ => new_state,
                }
            }
            AlarmState::Normal => new_state,
        }
    }

    fn crossed_limit(&self, state: AlarmState) -> f64 {
        match state {
            AlarmState::HighHigh => self.high_high_limit,
            AlarmState::High => self.high_limit,
            AlarmState::Low => self.low_limit,
            AlarmState::LowLow => self.low_low_limit,
            AlarmState::Normal => None,
        }
        .unwrap_or(0.0)
    }

    /// Effective severity: HighHigh/LowLow are boosted by 100, capped at the
    /// protocol maximum of 1000.
    fn severity_for(&self, state: AlarmState) -> u16 {
        match state {
            AlarmState::HighHigh | AlarmState::LowLow => (self.severity + 100).min(1000),
            AlarmState::High | AlarmState::Low => self.severity,
            AlarmState::Normal => 0,
        }
    }

    fn format_message(&self, state: AlarmState, value: f64) -> String {
        format!("{} - {} (value: {:.2})", self.message, state.description(), value)
    }
}

// ============================================================================
// Per-pump bindings
// ============================================================================

/// Variable-name → alarm-key mappings for one pump.
#[derive(Debug, Clone, Default)]
pub struct PumpAlarmBindings {
    pub pump_id: String,
    mappings: Vec<(String, String)>,
}

impl PumpAlarmBindings {
    pub fn new(pump_id: &str) -> Self {
        Self { pump_id: pump_id.to_string(), mappings: Vec::new() }
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Owns every registered alarm and the shared event history ring.
#[derive(Debug, Default)]
pub struct AlarmEngine {
    alarms: BTreeMap<String, LimitAlarm>,
    history: VecDeque<AlarmEvent>,
}

impl AlarmEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one alarm for a pump variable; returns the alarm key.
    pub fn register(
        &mut self,
        bindings: &mut PumpAlarmBindings,
        variable: &str,
        name: &str,
        def: &AlarmDef,
        source_node: &str,
    ) -> String {
        let key = format!("{}_{}_{}", bindings.pump_id, variable, name);
        let mut alarm = LimitAlarm::from_def(name, def);
        alarm.input_node_path = source_node.to_string();
        self.alarms.insert(key.clone(), alarm);
        bindings.mappings.push((variable.to_string(), key.clone()));
        debug!(key = %key, variable, "Registered limit alarm");
        key
    }

    /// Check one value against one alarm; returns an event when the state
    /// changed. Feeding the same value twice without crossing a limit never
    /// produces a second event.
    pub fn check_value(&mut self, alarm_key: &str, value: f64) -> Option<AlarmEvent> {
        let alarm = self.alarms.get_mut(alarm_key)?;
        let old_state = alarm.state;
        let new_state = {
            let raw = alarm.evaluate(value);
            alarm.with_hysteresis(value, raw)
        };

        alarm.last_value = value;
        alarm.state = new_state;

        if new_state == old_state {
            return None;
        }

        alarm.is_active = new_state.is_active();
        alarm.acknowledged = !new_state.is_active();
        if alarm.is_active {
            alarm.activated_at = Some(Utc::now());
        }

        let event = AlarmEvent {
            alarm_key: alarm_key.to_string(),
            state: new_state,
            value,
            limit: alarm.crossed_limit(new_state),
            severity: alarm.severity_for(new_state),
            message: alarm.format_message(new_state, value),
            timestamp: Utc::now(),
            source_node: alarm.input_node_path.clone(),
            acknowledged: false,
        };
        self.push_history(event.clone());
        Some(event)
    }

    /// Run every alarm bound to a pump against a fresh sample vector.
    pub fn check_snapshot(
        &mut self,
        bindings: &PumpAlarmBindings,
        snapshot: &PumpSnapshot,
    ) -> Vec<AlarmEvent> {
        let mut events = Vec::new();
        for (variable, key) in &bindings.mappings {
            let Some(value) = snapshot.value_of(variable) else { continue };
            if let Some(event) = self.check_value(key, value) {
                events.push(event);
            }
        }
        events
    }

    fn push_history(&mut self, event: AlarmEvent) {
        if self.history.len() == MAX_HISTORY {
            self.history.pop_front();
        }
        self.history.push_back(event);
    }

    /// Mark an alarm acknowledged; the alarm state itself is untouched.
    pub fn acknowledge(&mut self, alarm_key: &str) -> bool {
        match self.alarms.get_mut(alarm_key) {
            Some(alarm) => {
                alarm.acknowledged = true;
                true
            }
            None => false,
        }
    }

    pub fn active_alarms(&self) -> Vec<AlarmStatus> {
        self.alarms
            .iter()
            .filter(|(_, a)| a.is_active)
            .map(|(key, a)| AlarmStatus {
                key: key.clone(),
                state: a.state,
                is_active: a.is_active,
                acknowledged: a.acknowledged,
                last_value: a.last_value,
                severity: a.severity_for(a.state),
                message: a.format_message(a.state, a.last_value),
                activated_at: a.activated_at,
            })
            .collect()
    }

    /// Most recent events, newest first.
    pub fn history(&self, limit: usize) -> Vec<AlarmEvent> {
        self.history.iter().rev().take(limit).cloned().collect()
    }

    pub fn alarm(&self, key: &str) -> Option<&LimitAlarm> {
        self.alarms.get(key)
    }
}
