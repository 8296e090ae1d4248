//! Process entrypoint: logging, configuration, daemon construction, and
//! graceful shutdown on SIGINT/SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use pscue_core::config::Config;
use pscue_core::daemon::Daemon;

const SOCKET_FILE_NAME: &str = "pscued.sock";

fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pscued=info"));

    let result = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_level(true)
        .try_init();

    if let Err(err) = result {
        eprintln!("log system initialization failed: {err}");
    }
}

/// Resolve the per-user application directory used for the sqlite database,
/// sql migration scripts, and the unix socket. Not a recognized `PSCUE_*`
/// environment variable: overriding it is an internal/test concern, not a
/// documented external interface.
fn resolve_app_dir() -> PathBuf {
    if let Ok(raw) = std::env::var("PSCUED_APP_DIR") {
        return PathBuf::from(raw);
    }
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("pscued")
}

#[tokio::main]
async fn main() {
    init_logging();

    let config = Config::from_env();
    let app_dir = resolve_app_dir();
    let socket_path = app_dir.join(SOCKET_FILE_NAME);

    info!(app_dir = %app_dir.display(), socket = %socket_path.display(), "starting daemon");

    let daemon = match Daemon::new(config, app_dir, socket_path).await {
        Ok(daemon) => Arc::new(daemon),
        Err(err) => {
            error!(%err, "failed to construct daemon");
            std::process::exit(1);
        }
    };

    let run_handle = {
        let daemon = Arc::clone(&daemon);
        tokio::spawn(daemon.run())
    };

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, draining in-flight requests");
    daemon.shutdown().await;
    run_handle.abort();
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
