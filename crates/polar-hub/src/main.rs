mod handlers;
mod state;

use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use axum::routing::{get, post};
use clap::Parser;
use polar_hub_core::config::{StoreBackend, StoreConfig};
use polar_hub_core::device::DeviceMap;
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::state::release_memory_to_os;
use crate::state::{AppStateInner, StatusSnapshot};

#[derive(Parser)]
#[command(name = "polar-hub", about = "wearable HRV ingestion service", version = polar_hub_core::VERSION)]
struct Args {
    /// Listen port.
    #[arg(long, default_value_t = 3000, env = "POLAR_PORT")]
    port: u16,

    /// Store backend: "memory" or "influx".
    #[arg(long, default_value = "memory", env = "POLAR_STORE")]
    store: String,

    /// InfluxDB host (influx backend only).
    #[arg(long, default_value = "localhost", env = "POLAR_INFLUX_HOST")]
    influx_host: String,

    /// InfluxDB HTTP port (influx backend only).
    #[arg(long, default_value_t = 8086, env = "POLAR_INFLUX_PORT")]
    influx_port: u16,

    /// InfluxDB database name (influx backend only).
    #[arg(long, default_value = "polar_hub", env = "POLAR_INFLUX_DATABASE")]
    influx_database: String,

    /// Post-processor polling cadence, in milliseconds. The 120s buffer and
    /// five-minute summary window are fixed by the algorithm; this only
    /// controls how often the tick checks for newly-eligible beats.
    #[arg(long, default_value_t = 300_000, env = "POLAR_HRV_SUMMARY_INTERVAL_MS")]
    hrv_summary_interval_ms: u64,
}

fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "polar_hub=info,polar_hub_core=info".parse().unwrap()),
        )
        .init();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build tokio runtime")
        .block_on(async_main(args));
}

async fn async_main(args: Args) {
    let backend = match args.store.as_str() {
        "memory" => StoreBackend::Memory,
        "influx" => StoreBackend::Influx,
        other => {
            panic!("unknown --store backend: {other} (expected \"memory\" or \"influx\")");
        }
    };

    let store_config = StoreConfig {
        backend,
        influx_host: args.influx_host,
        influx_port: args.influx_port,
        influx_database: args.influx_database,
    };

    info!(
        ?backend,
        hrv_summary_interval_ms = args.hrv_summary_interval_ms,
        "starting polar-hub"
    );

    let store = store_config.build();
    let devices = DeviceMap::new();

    let (tx, _rx) = broadcast::channel::<StatusSnapshot>(64);

    let shared = std::sync::Arc::new(AppStateInner { devices, store });

    let tick_state = shared.clone();
    let tick_tx = tx.clone();
    tokio::spawn(async move {
        postprocess_tick_loop(tick_state, tick_tx).await;
    });

    let app = Router::new()
        .route("/beats", post(handlers::handle_beats))
        .route("/beats/batch", post(handlers::handle_beats_batch))
        .route("/posture", post(handlers::handle_posture))
        .route("/status", post(handlers::handle_status))
        .route("/events", get(handlers::handle_events))
        .route("/health", get(handlers::handle_health))
        .with_state((shared, tx))
        .layer(CorsLayer::permissive());

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));

    info!(%addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind");

    axum::serve(listener, app).await.expect("server error");
}

/// Drives the 60s-cadence post-processor tick (component F) and broadcasts a
/// status snapshot per device after each pass, mirroring the teacher's
/// `tick_loop` structure.
async fn postprocess_tick_loop(state: std::sync::Arc<AppStateInner>, tx: broadcast::Sender<StatusSnapshot>) {
    let mut tick = tokio::time::interval(Duration::from_secs(
        polar_hub_core::postprocess::TICK_INTERVAL_SECS,
    ));
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tick.tick().await;

        let t0 = std::time::Instant::now();
        polar_hub_core::postprocess::run_tick(&state.devices, &state.store).await;
        let elapsed = t0.elapsed();

        tracing::debug!(duration_ms = elapsed.as_millis() as u64, "post-processor tick completed");

        for device in state.devices.device_ids() {
            let handle = state.devices.handle(&device);
            let guard = handle.lock().await;
            let window: Vec<f64> = guard.rr_window.iter().copied().collect();
            let window_hrv = polar_hub_core::hrv::compute_hrv(&window);
            let window_hr = polar_hub_core::hrv::mean_rr(&window).map(|m| (60_000.0 / m).round());
            let snapshot = StatusSnapshot {
                device,
                timestamp: polar_hub_core::now_ms(),
                total_beats: guard.total_beats,
                last_posture: guard.last_posture.clone(),
                window_hrv,
                window_hr,
            };
            drop(guard);
            let _ = tx.send(snapshot);
        }

        release_memory_to_os();
    }
}
