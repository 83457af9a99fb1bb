//! picvault -- image upload service.
//!
//! Loads configuration (YAML file, `.env`, environment), connects the
//! metadata store and object storage, and serves the HTTP API until
//! SIGTERM/SIGINT.

use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

use picvault::config::LoggingConfig;

/// Command-line arguments for the picvault server.
#[derive(Parser, Debug)]
#[command(name = "picvault", version, about = "Image upload service")]
struct Cli {
    /// Path to the YAML configuration file (optional; defaults apply when absent).
    #[arg(short, long, default_value = "picvault.yaml")]
    config: String,

    /// Override the bind address (host:port).
    #[arg(short, long)]
    bind: Option<String>,
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine; real deployments set the environment.
    let dotenv = dotenvy::dotenv();

    let cli = Cli::parse();
    let source = picvault::config::describe_source(&cli.config);
    let config = picvault::config::load_with_env(&cli.config)?;

    init_tracing(&config.logging);
    info!("{}", source);
    if let Ok(path) = dotenv {
        info!("Loaded environment from {}", path.display());
    }
    for (name, set) in config.presence() {
        info!(setting = name, set, "Configuration presence");
    }
    config.validate()?;

    let bind_addr = cli
        .bind
        .unwrap_or_else(|| format!("{}:{}", config.server.host, config.server.port));

    if config.observability.metrics {
        picvault::metrics::init_metrics()?;
        picvault::metrics::describe_metrics();
        info!("Prometheus metrics initialized");
    }

    let metadata = picvault::metadata::from_config(&config.metadata).await?;
    info!(engine = %config.metadata.engine, "Metadata store ready");

    let backends = picvault::storage::from_config(&config.storage).await?;
    info!(
        backend = %config.storage.backend,
        compressed = backends.compressed.is_some(),
        "Storage backend ready"
    );

    std::fs::create_dir_all(&config.server.upload_dir)?;
    info!("Spooling uploads in {}", config.server.upload_dir);

    let shutdown_timeout = Duration::from_secs(config.server.shutdown_timeout);
    let state = Arc::new(picvault::AppState {
        config,
        metadata,
        storage: backends.primary,
        compressed: backends.compressed,
        local_buckets: backends.local,
    });

    let app = picvault::server::app(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("picvault listening on {}", bind_addr);

    // Graceful shutdown: stop accepting connections on SIGTERM/SIGINT and
    // give in-flight requests `shutdown_timeout` to finish.
    let (signalled_tx, mut signalled_rx) = tokio::sync::watch::channel(false);
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = signalled_tx.send(true);
        })
        .into_future();

    tokio::select! {
        result = server => result?,
        _ = async {
            let _ = signalled_rx.wait_for(|signalled| *signalled).await;
            tokio::time::sleep(shutdown_timeout).await;
        } => {
            warn!("Shutdown timeout elapsed with requests still in flight");
        }
    }

    info!("picvault shut down");

    Ok(())
}

/// Wait for SIGTERM or SIGINT (Ctrl+C), then return to trigger graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

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
        _ = ctrl_c => {
            info!("Received SIGINT, shutting down");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down");
        },
    }
}
