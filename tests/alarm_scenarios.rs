//! Alarm scenarios against the catalog-defined limit alarms.

use ips_sim::alarms::{AlarmEngine, AlarmState, PumpAlarmBindings};
use ips_sim::config::loader::DEFAULT_TYPES_YAML;
use ips_sim::config::parse_types;

fn vibration_alarm() -> (AlarmEngine, String) {
    let types = parse_types(DEFAULT_TYPES_YAML).unwrap();
    let def = &types.alarm_types["HighVibrationAlarm"];
    assert_eq!(def.high_limit, Some(7.1));
    assert_eq!(def.high_high_limit, Some(11.2));
    assert_eq!(def.hysteresis, 0.5);

    let mut engine = AlarmEngine::new();
    let mut bindings = PumpAlarmBindings::new("IPS_PMP_001");
    let key = engine.register(
        &mut bindings,
        &def.input_node,
        "HighVibrationAlarm",
        def,
        "Objects/IPS_PMP_001/Vibration_DE_H",
    );
    (engine, key)
}

#[test]
fn vibration_trajectory_produces_exactly_two_events() {
    let (mut engine, key) = vibration_alarm();

    let mut events = Vec::new();
    for value in [6.9, 7.2, 7.0, 6.8] {
        events.extend(engine.check_value(&key, value));
    }

    assert_eq!(events.len(), 2);
    assert_eq!(events[0].state, AlarmState::High);
    assert_eq!(events[0].limit, 7.1);
    assert_eq!(events[1].state, AlarmState::Normal);
    assert!(events[0].message.contains("High vibration on drive-end bearing"));
}

#[test]
fn trajectory_held_inside_the_band_stays_active() {
    let (mut engine, key) = vibration_alarm();

    engine.check_value(&key, 6.9);
    engine.check_value(&key, 7.2);
    engine.check_value(&key, 7.0);
    // 6.7 > 7.1 − 0.5 keeps the alarm active.
    assert!(engine.check_value(&key, 6.7).is_none());

    let active = engine.active_alarms();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].state, AlarmState::High);
}

#[test]
fn escalation_to_high_high_boosts_severity() {
    let (mut engine, key) = vibration_alarm();

    let high = engine.check_value(&key, 8.0).unwrap();
    assert_eq!(high.state, AlarmState::High);
    assert_eq!(high.severity, 700);

    let high_high = engine.check_value(&key, 11.5).unwrap();
    assert_eq!(high_high.state, AlarmState::HighHigh);
    assert_eq!(high_high.severity, 800);
    assert_eq!(high_high.limit, 11.2);
}

#[test]
fn cavitation_alarm_watches_the_low_side() {
    let types = parse_types(DEFAULT_TYPES_YAML).unwrap();
    let def = &types.alarm_types["CavitationAlarm"];

    let mut engine = AlarmEngine::new();
    let mut bindings = PumpAlarmBindings::new("IPS_PMP_001");
    let key = engine.register(&mut bindings, &def.input_node, "CavitationAlarm", def, "x");

    assert!(engine.check_value(&key, 0.5).is_none());
    let low = engine.check_value(&key, 0.15).unwrap();
    assert_eq!(low.state, AlarmState::Low);
    let low_low = engine.check_value(&key, 0.02).unwrap();
    assert_eq!(low_low.state, AlarmState::LowLow);
    assert_eq!(low_low.severity, 1000); // 900 + 100, at the cap

    // History is newest-first.
    let history = engine.history(10);
    assert_eq!(history[0].state, AlarmState::LowLow);
    assert_eq!(history[1].state, AlarmState::Low);
}
