use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{info, warn};

use slotkeeper::compactor::run_compactor;
use slotkeeper::config::Config;
use slotkeeper::directory::InMemoryDirectory;
use slotkeeper::dispatch::{run_dispatcher, LogNotifier};
use slotkeeper::lifecycle::BookingController;
use slotkeeper::notify::NotifyHub;
use slotkeeper::store::BookingStore;
use slotkeeper::wire;

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!("SIGTERM handler unavailable ({e}), waiting on ctrl-c only");
                ctrl_c.await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    slotkeeper::observability::init(config.metrics_port)?;

    std::fs::create_dir_all(&config.data_dir)?;

    let directory = match &config.directory {
        Some(path) => Arc::new(InMemoryDirectory::load_json(path)?),
        None => {
            warn!("SLOTKEEPER_DIRECTORY not set: the identity directory is empty and every request will fail role checks");
            Arc::new(InMemoryDirectory::new())
        }
    };
    let store = Arc::new(BookingStore::open(config.wal_path()).await?);

    let notify = Arc::new(NotifyHub::new());
    if config.notifications {
        tokio::spawn(run_dispatcher(
            notify.subscribe(),
            directory.clone(),
            Arc::new(LogNotifier),
        ));
    }
    tokio::spawn(run_compactor(store.clone(), config.compact_threshold));

    let identities = directory.len();
    let controller = Arc::new(BookingController::new(store, directory, notify));

    let addr = config.addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("slotkeeper listening on {addr}");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  identities: {identities}");
    info!("  max_connections: {}", config.max_connections);
    info!("  notifications: {}", if config.notifications { "enabled" } else { "disabled" });
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    wire::serve(listener, controller, config.max_connections, shutdown_signal()).await;

    info!("slotkeeper stopped");
    Ok(())
}
