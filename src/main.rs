use cachewarden::config::ControllerConfig;
use cachewarden::controller::Controller;
use cachewarden::render::TextRenderer;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const PKG_NAME: &str = env!("CARGO_PKG_NAME");

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("cachewarden=debug".parse().expect("valid log directive")),
        )
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("cachewarden.toml"));

    let config = ControllerConfig::load(&config_path).map_err(|e| {
        error!(path = %config_path.display(), error = %e, "Failed to load configuration");
        e
    })?;

    info!(path = %config_path.display(), "Configuration loaded");
    print_startup_banner(&config);

    let config = Arc::new(config);
    let controller = Controller::new(Arc::clone(&config), Arc::new(TextRenderer));

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut run_handle = tokio::spawn(controller.run(shutdown_rx));

    // Wait for the run to complete or a shutdown signal (Ctrl+C or SIGTERM)
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm =
            signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");

        tokio::select! {
            result = &mut run_handle => {
                return result?;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT (Ctrl+C), shutting down...");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::select! {
            result = &mut run_handle => {
                return result?;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }

    // Signal shutdown; the engine is terminated and the run resolves
    // through its exit signal.
    let _ = shutdown_tx.send(true);
    let result = run_handle.await?;

    info!("Shutdown complete");
    result
}

fn print_startup_banner(config: &ControllerConfig) {
    info!(name = PKG_NAME, version = VERSION, "Starting controller");
    info!(
        engine = %config.engine_binary,
        config_file = %config.config_file.display(),
        frontend = %format!("{}:{}", config.frontend_addr, config.frontend_port),
        admin = %config.admin_endpoint(),
        "Engine configuration"
    );
    info!(
        storage = %config.storage,
        transient_storage = %config.transient_storage,
        working_dir = config.working_dir.as_deref(),
        "Storage settings"
    );
    info!(
        max_retries = config.max_retries,
        retry_backoff_secs = config.retry_backoff_secs,
        admin_timeout_secs = config.admin_timeout_secs,
        "Recovery settings"
    );
}
