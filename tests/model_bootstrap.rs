//! Bootstrap regression: catalogs → node graph.
//!
//! Exercises the builder against both a minimal hand-written catalog and
//! the embedded defaults, and checks the instance-completeness invariant:
//! every member merged from root to leaf of the inheritance chain exists on
//! the instance.

use ips_sim::config::loader::{DEFAULT_ASSETS_JSON, DEFAULT_TYPES_YAML};
use ips_sim::config::{parse_assets, parse_types};
use ips_sim::model::{build_model, AddressSpace, TargetKind};

const MINIMAL_TYPES: &str = r#"
namespaceUri: "urn:test:station"
types:
  AssetType:
    base: BaseObjectType
    isAbstract: true
    properties:
      AssetId: { type: Property, dataType: String }
  PumpType:
    base: AssetType
    components:
      FlowRate:
        type: AnalogItemType
        dataType: Double
        euRange: { low: 0.0, high: 6000.0 }
      RunCommand:
        type: TwoStateDiscreteType
        accessLevel: ReadWrite
        trueState: "Running"
        falseState: "Stopped"
      DesignSpecs:
        type: Object
        components:
          MaxRPM: { type: Property, dataType: UInt32 }
    methods:
      SetSpeed:
        inputArguments:
          - { name: TargetRPM, dataType: Double, description: "Requested speed" }
        outputArguments:
          - { name: Success, dataType: Boolean }
"#;

const MINIMAL_ASSETS: &str = r#"{
  "assets": [
    {"id": "IPS_PMP_001", "name": "IPS_PMP_001", "type": "PumpType",
     "parent": "ObjectsFolder", "simulate": true}
  ]
}"#;

#[test]
fn minimal_pump_instance_has_expected_children() {
    let types = parse_types(MINIMAL_TYPES).unwrap();
    let assets = parse_assets(MINIMAL_ASSETS).unwrap();
    let mut space = AddressSpace::new();
    let model = build_model(&mut space, &types, &assets).unwrap();

    let pump = model.node_map["IPS_PMP_001"];
    assert!(space.browse_path(pump).ends_with("IPS_PMP_001"));

    for child in ["FlowRate", "RunCommand", "DesignSpecs", "SetSpeed", "AssetId"] {
        assert!(space.child_by_name(pump, child).is_some(), "missing child {child}");
    }

    // AnalogItem decorations survive instantiation.
    let flow = space.child_by_name(pump, "FlowRate").unwrap();
    let range = space.child_by_name(flow, "EURange").unwrap();
    match space.read_value(range).unwrap().value {
        ips_sim::model::Variant::Range { low, high } => {
            assert_eq!(low, 0.0);
            assert_eq!(high, 6000.0);
        }
        ref other => panic!("EURange holds {other:?}"),
    }

    // TwoStateDiscrete labels.
    let run_command = space.child_by_name(pump, "RunCommand").unwrap();
    assert!(space.child_by_name(run_command, "TrueState").is_some());
    assert!(space.child_by_name(run_command, "FalseState").is_some());
}

#[test]
fn default_catalogs_build_and_emit_targets() {
    let types = parse_types(DEFAULT_TYPES_YAML).unwrap();
    let assets = parse_assets(DEFAULT_ASSETS_JSON).unwrap();
    let mut space = AddressSpace::new();
    let model = build_model(&mut space, &types, &assets).unwrap();

    let pumps: Vec<_> =
        model.targets.iter().filter(|t| t.kind == TargetKind::Pump).collect();
    let chambers: Vec<_> =
        model.targets.iter().filter(|t| t.kind == TargetKind::Chamber).collect();
    assert_eq!(pumps.len(), 3);
    assert_eq!(chambers.len(), 1);

    // Design-spec overrides reached the targets.
    let p3 = pumps.iter().find(|t| t.id == "IPS_PMP_003").unwrap();
    assert_eq!(p3.specs.design_flow, 1200.0);
    assert_eq!(p3.specs.full_load_amps, 110.0);
}

#[test]
fn pump_instances_are_member_complete() {
    let types = parse_types(DEFAULT_TYPES_YAML).unwrap();
    let assets = parse_assets(DEFAULT_ASSETS_JSON).unwrap();
    let mut space = AddressSpace::new();
    let model = build_model(&mut space, &types, &assets).unwrap();

    // Everything PumpType + InfluentPumpType + AssetType contribute.
    let expected = [
        // AssetType properties
        "AssetId",
        "Manufacturer",
        "Model",
        "InstallDate",
        "HierarchyLevel",
        // PumpType analog vector
        "FlowRate",
        "SuctionPressure",
        "DischargePressure",
        "RPM",
        "MotorCurrent",
        "Voltage",
        "PowerConsumption",
        "PowerFactor",
        "VFDFrequency",
        "MotorWindingTemp",
        "BearingTemp_DE",
        "BearingTemp_NDE",
        "SealChamberTemp",
        "AmbientTemp",
        "Vibration_DE_H",
        "Vibration_DE_V",
        "Vibration_DE_A",
        "Vibration_NDE_H",
        "Vibration_NDE_V",
        "Vibration_NDE_A",
        "RuntimeHours",
        "StartCount",
        // discrete statuses
        "RunCommand",
        "RunFeedback",
        "FaultStatus",
        "ReadyStatus",
        "LocalRemote",
        // nested object + methods
        "DesignSpecs",
        "StartPump",
        "StopPump",
        "SetSpeed",
        "ResetFault",
        // InfluentPumpType extension
        "WetWellLevel",
    ];

    for target in model.targets.iter().filter(|t| t.kind == TargetKind::Pump) {
        for member in expected {
            assert!(
                space.child_by_name(target.root, member).is_some(),
                "{} missing member {member}",
                target.id
            );
        }
        // Nested DesignSpecs members exist and carry the overrides.
        let max_rpm = space.find_by_path(target.root, "DesignSpecs.MaxRPM").unwrap();
        assert!(space.read_value(max_rpm).unwrap().value.as_f64().unwrap() > 0.0);
    }
}

#[test]
fn sim_config_instance_exposes_kernel_methods() {
    let types = parse_types(DEFAULT_TYPES_YAML).unwrap();
    let assets = parse_assets(DEFAULT_ASSETS_JSON).unwrap();
    let mut space = AddressSpace::new();
    let model = build_model(&mut space, &types, &assets).unwrap();

    let sim_config = model.node_map["SimConfig"];
    for member in ["Mode", "SimulationInterval", "TimeAcceleration", "SetMode", "TriggerFailure", "ResetSimulation", "ApplyAging"] {
        assert!(space.child_by_name(sim_config, member).is_some(), "missing {member}");
    }
}
