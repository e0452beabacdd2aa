use crate::config::GatewayConfig;
use crate::proxy::Downstream;
use crate::server;
use anyhow::Result;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::Notify;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// CLI arguments forwarded from `main()`.
pub struct BootstrapArgs {
    pub config_path: std::path::PathBuf,
    pub listen: String,
    pub admin_listen: String,
}

/// Gateway lifecycle: init → load → watch → serve → shutdown.
pub async fn run<D: Downstream>(args: BootstrapArgs, downstream: Arc<D>) -> Result<()> {
    init_tracing();

    // Phase 1: load + compile config — validation failures are fatal here,
    // non-fatal at reload.
    let config = GatewayConfig::load(&args.config_path)?;
    let state = server::AppState::new(config, args.config_path.clone())?;

    // Phase 2: background loops — reload watcher, admin server.
    let shutdown = Arc::new(Notify::new());
    start_config_watcher(&state, &shutdown);
    start_admin_server(&state, &args);

    tracing::info!("server: starting gateway, listen={}", args.listen);

    let gateway_handle = tokio::spawn({
        let listen = args.listen.clone();
        let state = state.clone();
        let shutdown = shutdown.clone();
        async move { server::run_gateway_server(&listen, state, downstream, shutdown).await }
    });

    // Phase 3: block until signal, then drain.
    wait_for_shutdown(&shutdown).await;

    if let Err(e) = gateway_handle.await {
        tracing::error!("server: gateway task error: {}", e);
    }

    tracing::info!("server: shutdown complete");
    Ok(())
}

fn init_tracing() {
    let (non_blocking, _guard) = tracing_appender::non_blocking::NonBlockingBuilder::default()
        .buffered_lines_limit(128_000)
        .lossy(true)
        .finish(std::io::stdout());

    // LOG_LEVEL takes precedence, then RUST_LOG, then "info".
    let filter = std::env::var("LOG_LEVEL")
        .map(EnvFilter::new)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(false)
                .json(),
        )
        .init();

    std::mem::forget(_guard);
}

/// Sleep for `duration`, but return `true` immediately if shutdown is signalled.
/// Returns `false` if the full duration elapsed normally.
async fn sleep_or_shutdown(duration: Duration, shutdown: &Notify) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        _ = shutdown.notified() => true,
    }
}

/// Periodic config reload check: re-read the file when its mtime changes.
/// On-demand reloads go through `POST /admin/config/reload`; both paths are
/// serialized inside `AppState::reload`.
fn start_config_watcher(state: &server::AppState, shutdown: &Arc<Notify>) {
    const POLL_INTERVAL: Duration = Duration::from_secs(10);

    let state = state.clone();
    let shutdown = shutdown.clone();

    tokio::spawn(async move {
        let mut last_modified = file_mtime(state.config_path());
        loop {
            if sleep_or_shutdown(POLL_INTERVAL, &shutdown).await {
                return;
            }
            let current = file_mtime(state.config_path());
            if current != last_modified {
                last_modified = current;
                // A failed reload keeps the prior snapshot; reload() logs it.
                let _ = state.reload("watcher").await;
            }
        }
    });
}

fn file_mtime(path: &std::path::Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

fn start_admin_server(state: &server::AppState, args: &BootstrapArgs) {
    let s = state.clone();
    let admin_addr = args.admin_listen.clone();
    tokio::spawn(async move {
        if let Err(e) = server::run_admin_server(&admin_addr, s).await {
            tracing::error!("server: admin failed, error={}", e);
        }
    });
}

async fn wait_for_shutdown(shutdown: &Arc<Notify>) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("server: received SIGINT, shutting down"),
        _ = terminate => tracing::info!("server: received SIGTERM, shutting down"),
    }

    // Signal all background loops to stop.
    shutdown.notify_waiters();
}
