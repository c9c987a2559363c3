//! End-to-end kernel test: boot the model, run the tick loop with a short
//! interval, and drive it through the control handle.

use std::sync::Arc;
use std::time::Duration;

use ips_sim::config::loader::{DEFAULT_ASSETS_JSON, DEFAULT_TYPES_YAML};
use ips_sim::config::{parse_assets, parse_types};
use ips_sim::control::{registry::SIM_CONFIG_ID, ControlHandle, MethodRegistry};
use ips_sim::model::{build_model, shared, AddressSpace, Variant};
use ips_sim::sim::modes::{FailureConfig, FailureType, ModeUpdate};
use ips_sim::sim::{SimulationKernel, SimulationMode};
use tokio_util::sync::CancellationToken;

async fn boot() -> (
    ips_sim::model::SharedSpace,
    ips_sim::model::BuiltModel,
    ControlHandle,
    tokio::task::JoinHandle<()>,
    CancellationToken,
) {
    let types = parse_types(DEFAULT_TYPES_YAML).unwrap();
    let assets = parse_assets(DEFAULT_ASSETS_JSON).unwrap();
    let mut space = AddressSpace::new();
    let model = build_model(&mut space, &types, &assets).unwrap();
    let space = shared(space);

    let cancel = CancellationToken::new();
    let (mut kernel, handle) = SimulationKernel::new(space.clone(), Some(42), cancel.clone());
    kernel.bind_model(&model, &types).await.unwrap();

    handle.set_interval(10.0).await;
    let task = tokio::spawn(kernel.run());
    (space, model, handle, task, cancel)
}

#[tokio::test]
async fn control_verbs_round_trip_through_the_mailbox() {
    let (_space, _model, handle, task, _cancel) = boot().await;

    let (ok, _) = handle.start_pump("IPS_PMP_001").await;
    assert!(ok);
    let (ok, reason) = handle.start_pump("NO_SUCH_PUMP").await;
    assert!(!ok);
    assert!(reason.contains("unknown pump"));

    // Speed below the band is rejected without mutating the target.
    let (ok, _) = handle.set_speed("IPS_PMP_001", 100.0).await;
    assert!(!ok);
    let (ok, _) = handle.set_speed("IPS_PMP_001", 900.0).await;
    assert!(ok);

    tokio::time::sleep(Duration::from_millis(100)).await;
    let status = handle.status().await.unwrap();
    assert_eq!(status.pump_count, 3);
    assert_eq!(status.pumps_running, 1);

    handle.shutdown().await;
    task.await.unwrap();
}

#[tokio::test]
async fn failure_progression_races_to_complete_under_acceleration() {
    let (_space, _model, handle, task, _cancel) = boot().await;

    let (ok, _) = handle.trigger_failure(Some("IPS_PMP_001"), FailureType::Bearing).await;
    assert!(ok);
    let (ok, _) = handle
        .apply_mode_update(ModeUpdate {
            failure: Some(FailureConfig {
                failure_type: FailureType::Bearing,
                progression: 0.0,
                time_to_failure: 1.0,
            }),
            time_acceleration: Some(3600.0),
            ..ModeUpdate::default()
        })
        .await;
    assert!(ok);

    tokio::time::sleep(Duration::from_millis(500)).await;
    let status = handle.status().await.unwrap();
    assert_eq!(status.mode, "FAILURE");
    assert!(status.failure_progression >= 99.0, "progression {}", status.failure_progression);

    handle.shutdown().await;
    task.await.unwrap();
}

#[tokio::test]
async fn reset_simulation_restores_optimal_and_zeroes_counters() {
    let (_space, _model, handle, task, _cancel) = boot().await;

    handle.start_all().await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    handle.trigger_failure(None, FailureType::Seal).await;

    let (ok, _) = handle.reset_simulation().await;
    assert!(ok);
    let params = handle.mode_params().await.unwrap();
    assert_eq!(params.mode, SimulationMode::Optimal);

    let snapshots = handle.snapshots().await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    let snapshots_after = handle.snapshots().await;
    assert_eq!(snapshots.len(), snapshots_after.len());
    for snapshot in snapshots_after.values() {
        assert_eq!(snapshot.start_count, 0);
    }

    handle.shutdown().await;
    task.await.unwrap();
}

#[tokio::test]
async fn ticks_write_into_the_node_graph() {
    let (space, model, handle, task, _cancel) = boot().await;

    handle.start_pump("IPS_PMP_001").await;
    // The 150 RPM/s ramp needs ~0.7 s of wall time to pass the 100 RPM
    // feedback threshold.
    tokio::time::sleep(Duration::from_millis(1500)).await;

    {
        let space = space.read().await;
        let pump = model.node_map["IPS_PMP_001"];
        let rpm = space.find_by_path(pump, "RPM").unwrap();
        assert!(space.read_value(rpm).unwrap().value.as_f64().unwrap() > 100.0);

        let feedback = space.find_by_path(pump, "RunFeedback").unwrap();
        assert_eq!(space.read_value(feedback).unwrap().value.as_bool(), Some(true));
    }

    handle.shutdown().await;
    task.await.unwrap();
}

#[tokio::test]
async fn method_registry_dispatches_wire_calls() {
    let types = parse_types(DEFAULT_TYPES_YAML).unwrap();
    let assets = parse_assets(DEFAULT_ASSETS_JSON).unwrap();
    let mut space = AddressSpace::new();
    let model = build_model(&mut space, &types, &assets).unwrap();
    let registry = Arc::new(MethodRegistry::bind_model(&space, &model));

    let start_node = space.child_by_name(model.node_map["IPS_PMP_001"], "StartPump").unwrap();
    let set_mode_node = space.child_by_name(model.node_map[SIM_CONFIG_ID], "SetMode").unwrap();
    let space = shared(space);

    let cancel = CancellationToken::new();
    let (mut kernel, handle) = SimulationKernel::new(space, Some(42), cancel);
    kernel.bind_model(&model, &types).await.unwrap();
    handle.set_interval(10.0).await;
    let task = tokio::spawn(kernel.run());

    let (ok, message) = registry.invoke(&handle, start_node, &[]).await;
    assert!(ok, "{message}");

    // Unknown enumeration value fails without mutating the mode.
    let (ok, _) = registry.invoke(&handle, set_mode_node, &[Variant::Int32(17)]).await;
    assert!(!ok);
    assert_eq!(handle.mode_params().await.unwrap().mode, SimulationMode::Optimal);

    let (ok, _) = registry.invoke(&handle, set_mode_node, &[Variant::Int32(1)]).await;
    assert!(ok);
    assert_eq!(handle.mode_params().await.unwrap().mode, SimulationMode::Aged);

    handle.shutdown().await;
    task.await.unwrap();
}

#[tokio::test]
async fn config_watcher_applies_external_interval_writes() {
    let (space, model, handle, task, _cancel) = boot().await;

    let sim_config = model.node_map[SIM_CONFIG_ID];
    let watcher = ips_sim::control::watcher::spawn_config_watcher(
        space.clone(),
        sim_config,
        handle.clone(),
    )
    .await
    .unwrap();

    {
        let mut space = space.write().await;
        let interval = space.child_by_name(sim_config, "SimulationInterval").unwrap();
        space
            .write_external(interval, Variant::Double(5000.0), chrono::Utc::now())
            .unwrap();
    }

    tokio::time::sleep(Duration::from_millis(200)).await;
    let status = handle.status().await.unwrap();
    assert_eq!(status.interval_ms, 5000.0);

    watcher.abort();
    handle.shutdown().await;
    task.await.unwrap();
}
