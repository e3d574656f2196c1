mod directory;
mod service;
mod store;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use myst_protocol::{HeartbeatRequest, RegisterNodeRequest};
use tokio::sync::RwLock;
use tracing::info;

use directory::DirectoryClient;
use service::AppState;
use store::{load_or_create_node_id, FragmentStore};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const INTEGRITY_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);
const SPACE_LOG_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[derive(Parser, Debug)]
#[command(name = "myst-node", version, about = "Volunteer fragment storage node")]
struct Args {
    #[arg(long, default_value = "./node-data")]
    storage_path: String,

    #[arg(long, default_value_t = 9100)]
    port: u16,

    /// Storage capacity offered to the network.
    #[arg(long, default_value_t = 50)]
    capacity_gb: u64,

    /// Directory service base URL; omit to run standalone.
    #[arg(long)]
    directory_url: Option<String>,

    /// Address advertised to clients (defaults to 127.0.0.1:<port>).
    #[arg(long)]
    public_addr: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let args = Args::parse();
    let storage_root = std::path::PathBuf::from(&args.storage_path);
    let fragment_store = FragmentStore::open(&storage_root, args.capacity_gb)
        .with_context(|| format!("failed to open fragment store at {}", args.storage_path))?;
    let node_id = load_or_create_node_id(&storage_root)?;
    let public_addr = args
        .public_addr
        .clone()
        .unwrap_or_else(|| format!("127.0.0.1:{}", args.port));

    let directory_url = args
        .directory_url
        .clone()
        .or_else(|| std::env::var("MYST_DIRECTORY_URL").ok());
    let directory = directory_url.as_deref().map(DirectoryClient::new);

    let state = Arc::new(AppState {
        store: RwLock::new(fragment_store),
        node_id: node_id.clone(),
        public_addr: public_addr.clone(),
        directory: directory.clone(),
        started_at: Instant::now(),
    });

    info!(node_id = %node_id, public_addr = %public_addr, "node identity loaded");

    if let Some(directory) = &directory {
        register(directory, &state, args.port).await;
        tokio::spawn(heartbeat_loop(directory.clone(), Arc::clone(&state), args.port));
    }
    tokio::spawn(integrity_sweep_loop(Arc::clone(&state)));
    tokio::spawn(space_log_loop(Arc::clone(&state)));

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "fragment service listening");

    axum::serve(listener, service::router(Arc::clone(&state)))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    if let Some(directory) = &directory {
        directory.unregister(&node_id).await;
    }
    Ok(())
}

async fn register(directory: &DirectoryClient, state: &Arc<AppState>, port: u16) {
    let (available, total) = {
        let store = state.store.read().await;
        (store.available(), store.capacity())
    };
    let request = RegisterNodeRequest {
        node_id: state.node_id.clone(),
        address: host_of(&state.public_addr),
        port,
        available_space: available,
        total_space: total,
    };
    match directory.register(&request).await {
        Ok(()) => info!("registered with directory"),
        Err(err) => tracing::warn!(%err, "directory registration failed"),
    }
}

/// Heartbeat every 30 s; a 404 means the directory forgot us, so
/// re-register.
async fn heartbeat_loop(directory: DirectoryClient, state: Arc<AppState>, port: u16) {
    let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let request = {
            let store = state.store.read().await;
            HeartbeatRequest {
                available_space: store.available(),
                fragment_count: store.fragment_count(),
            }
        };
        match directory.heartbeat(&state.node_id, &request).await {
            Ok(status) if status == reqwest::StatusCode::NOT_FOUND => {
                tracing::warn!("directory lost our registration, re-registering");
                register(&directory, &state, port).await;
            }
            Ok(status) if !status.is_success() => {
                tracing::warn!(%status, "heartbeat rejected");
            }
            Ok(_) => {}
            Err(err) => tracing::warn!(%err, "heartbeat failed"),
        }
    }
}

async fn integrity_sweep_loop(state: Arc<AppState>) {
    let mut ticker = tokio::time::interval(INTEGRITY_SWEEP_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick fires immediately; skip it so startup (which just
    // re-hashed everything) is not followed by a redundant sweep.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let (healthy, dropped) = {
            let mut store = state.store.write().await;
            store.sweep()
        };
        info!(healthy, dropped, "integrity sweep complete");
    }
}

async fn space_log_loop(state: Arc<AppState>) {
    let mut ticker = tokio::time::interval(SPACE_LOG_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let store = state.store.read().await;
        info!(
            used = store.used(),
            available = store.available(),
            fragments = store.fragment_count(),
            "storage usage"
        );
    }
}

fn host_of(public_addr: &str) -> String {
    public_addr
        .rsplit_once(':')
        .map(|(host, _)| host.to_string())
        .unwrap_or_else(|| public_addr.to_string())
}
