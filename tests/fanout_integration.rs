//! Fan-out integration: one tick of real actors through the plane, counted
//! at a WebSocket subscriber.

use std::collections::BTreeMap;

use ips_sim::config::loader::{DEFAULT_ASSETS_JSON, DEFAULT_TYPES_YAML};
use ips_sim::config::{parse_assets, parse_types};
use ips_sim::fanout::{FanoutPlane, WsHub};
use ips_sim::model::{build_model, shared, AddressSpace, TargetKind};
use ips_sim::sim::modes::ModeParameters;
use ips_sim::sim::pump::PumpActor;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::Value;
use tokio::sync::mpsc;

#[tokio::test]
async fn one_tick_fans_out_bulk_telemetry_and_analytics() {
    let types = parse_types(DEFAULT_TYPES_YAML).unwrap();
    let assets = parse_assets(DEFAULT_ASSETS_JSON).unwrap();
    let mut space = AddressSpace::new();
    let model = build_model(&mut space, &types, &assets).unwrap();
    let space = shared(space);

    let mut params = ModeParameters::default();
    params.flow_profile.diurnal_enabled = false;
    let mut rng = StdRng::seed_from_u64(3);

    // Bind the three pumps; start two of them.
    let mut actors: Vec<PumpActor> = Vec::new();
    {
        let space_read = space.read().await;
        for target in model.targets.iter().filter(|t| t.kind == TargetKind::Pump) {
            let mut actor =
                PumpActor::new(&target.id, &target.name, target.root, target.specs.clone());
            actor.bind(&space_read);
            actors.push(actor);
        }
    }
    actors[0].start(&space).await;
    actors[1].start(&space).await;

    let mut snapshots = BTreeMap::new();
    for actor in &mut actors {
        let snapshot = actor.tick(1.0, &params, &mut rng, &space).await.unwrap();
        snapshots.insert(actor.id.clone(), snapshot);
    }

    let hub = WsHub::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    hub.register(tx).await;
    rx.recv().await; // initial_state

    let mut plane = FanoutPlane::new().with_ws(hub);
    plane.broadcast(&snapshots).await;

    let mut messages: Vec<Value> = Vec::new();
    while let Ok(text) = rx.try_recv() {
        messages.push(serde_json::from_str(&text).unwrap());
    }

    let bulk: Vec<_> = messages.iter().filter(|m| m["type"] == "bulk_update").collect();
    assert_eq!(bulk.len(), 1);
    assert_eq!(bulk[0]["data"].as_object().unwrap().len(), 3);

    let telemetry_count = messages
        .iter()
        .filter(|m| {
            m["type"] == "pubsub_update"
                && m["topic"].as_str().is_some_and(|t| t.ends_with("/telemetry"))
        })
        .count();
    assert_eq!(telemetry_count, 3);

    let analytics: Vec<_> = messages
        .iter()
        .filter(|m| m["topic"] == "plant/system/analytics")
        .collect();
    assert_eq!(analytics.len(), 1);
    assert_eq!(analytics[0]["payload"]["active_pumps"], 2);
    assert!(analytics[0]["payload"]["total_flow"].as_f64().unwrap() > 0.0);
    assert!(analytics[0]["payload"]["system_efficiency"].as_f64().unwrap() > 0.0);
}
