//! ips-sim server binary.
//!
//! Boots the information model from the declarative catalogs, binds the
//! simulation kernel, and serves telemetry over OPC-UA, MQTT and
//! WebSocket.
//!
//! # Usage
//!
//! ```bash
//! # Run with the embedded default catalogs
//! cargo run --release
//!
//! # Custom catalogs, faster ticks, auto-started pumps
//! cargo run --release -- --types config/types.yaml --assets config/assets.json \
//!     --interval-ms 250 --auto-start
//! ```
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: logging filter (default: info)

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use ips_sim::api::{create_app, ApiState};
use ips_sim::control::{self, watcher::spawn_config_watcher, MethodRegistry};
use ips_sim::fanout::{broker, FanoutPlane, WsHub};
use ips_sim::model::{build_model, shared, AddressSpace};
use ips_sim::sim::SimulationKernel;
use ips_sim::{load_assets, load_types};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "ips-sim")]
#[command(about = "Influent pump station simulator")]
#[command(version)]
struct CliArgs {
    /// Type catalog (YAML); embedded default when omitted
    #[arg(long, value_name = "PATH")]
    types: Option<PathBuf>,

    /// Asset catalog (JSON); embedded default when omitted
    #[arg(long, value_name = "PATH")]
    assets: Option<PathBuf>,

    /// OPC-UA endpoint port
    #[arg(long, default_value_t = 4840)]
    opcua_port: u16,

    /// Embedded MQTT broker port
    #[arg(long, default_value_t = 1883)]
    mqtt_port: u16,

    /// Disable the embedded MQTT broker
    #[arg(long)]
    no_mqtt: bool,

    /// HTTP/WebSocket listen address
    #[arg(long, default_value = "0.0.0.0:8080")]
    api_addr: String,

    /// Simulation tick interval in milliseconds
    #[arg(long, default_value_t = 1000.0)]
    interval_ms: f64,

    /// Seed for the simulation RNG stream (entropy when omitted)
    #[arg(long)]
    seed: Option<u64>,

    /// Start every pump once the kernel is up
    #[arg(long)]
    auto_start: bool,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    let default_filter = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .init();

    info!("Starting influent pump station simulator...");

    // Catalogs → populated node graph.
    let types = load_types(args.types.as_deref()).context("loading type catalog")?;
    let assets = load_assets(args.assets.as_deref()).context("loading asset catalog")?;
    let mut space = AddressSpace::new();
    let model = build_model(&mut space, &types, &assets).context("building information model")?;
    let registry = Arc::new(MethodRegistry::bind_model(&space, &model));
    let space = shared(space);

    // Kernel and control surface.
    let cancel = CancellationToken::new();
    let (mut kernel, handle) = SimulationKernel::new(space.clone(), args.seed, cancel.clone());
    kernel.bind_model(&model, &types).await.context("binding simulation actors")?;
    control::register(handle.clone());

    // Fan-out sinks.
    let hub = WsHub::new();
    let mut fanout = FanoutPlane::new().with_ws(hub.clone());
    if args.no_mqtt {
        info!("Embedded MQTT broker disabled");
    } else {
        match broker::start(args.mqtt_port) {
            Ok(publisher) => fanout = fanout.with_broker(publisher),
            Err(e) => {
                warn!(error = %e, "Could not start MQTT broker; continuing without it");
            }
        }
    }
    kernel.set_fanout(fanout);

    // Writable simulation-config nodes.
    let _config_watcher = match model.node_map.get(control::registry::SIM_CONFIG_ID) {
        Some(&sim_config) => spawn_config_watcher(space.clone(), sim_config, handle.clone()).await,
        None => None,
    };

    // OPC-UA endpoint.
    #[cfg(feature = "opcua")]
    let _endpoint =
        ips_sim::server::serve(space.clone(), registry.clone(), handle.clone(), args.opcua_port)
            .await
            .context("starting OPC-UA endpoint")?;

    // HTTP/WebSocket surface.
    let app = create_app(ApiState { hub: hub.clone(), control: handle.clone() });
    let listener = tokio::net::TcpListener::bind(&args.api_addr)
        .await
        .with_context(|| format!("binding {}", args.api_addr))?;
    let api_cancel = cancel.clone();
    tokio::spawn(async move {
        let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
            api_cancel.cancelled().await;
        });
        if let Err(e) = serve.await {
            warn!(error = %e, "HTTP server error");
        }
    });

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    #[cfg(feature = "opcua")]
    info!("OPC-UA endpoint: {}", ips_sim::server::endpoint_url("0.0.0.0", args.opcua_port));
    if !args.no_mqtt {
        info!("MQTT broker:     mqtt://0.0.0.0:{}", args.mqtt_port);
    }
    info!("WebSocket:       ws://{}/ws/pumps", args.api_addr);
    info!("Press Ctrl+C to stop");
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    // Run the kernel until Ctrl+C; the current tick completes and fan-out
    // drains before the run ends.
    let kernel_task = tokio::spawn(kernel.run());

    handle.set_interval(args.interval_ms).await;
    if args.auto_start {
        let (_, message) = handle.start_all().await;
        info!(%message, "Auto-start");
    }

    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
    info!("Shutdown signal received");
    handle.shutdown().await;
    cancel.cancel();
    kernel_task.await.context("joining simulation kernel")?;

    Ok(())
}
