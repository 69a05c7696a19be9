//! s3gate -- S3-compatible gateway server.
//!
//! SIGTERM/SIGINT stop accepting connections and wait for in-flight
//! requests, bounded by `server.shutdown_timeout`.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

use s3gate::config::{Config, LoggingConfig};

/// Command-line arguments for the s3gate server.
#[derive(Parser, Debug)]
#[command(name = "s3gate", version, about = "S3-compatible gateway")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "s3gate.yaml")]
    config: String,

    /// Override the bind address (host:port).
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // A missing file means defaults; a broken one is fatal.
    let config = if Path::new(&cli.config).exists() {
        s3gate::config::load_config(&cli.config)?
    } else {
        Config::default()
    };

    init_tracing(&config.logging);
    if !Path::new(&cli.config).exists() {
        warn!(path = %cli.config, "configuration file not found, using defaults");
    } else {
        info!(path = %cli.config, "configuration loaded");
    }

    let bind_addr = cli
        .bind
        .unwrap_or_else(|| format!("{}:{}", config.server.host, config.server.port));

    if config.observability.metrics && s3gate::metrics::init_metrics().is_some() {
        s3gate::metrics::describe_metrics();
        info!("Prometheus metrics initialized");
    }

    let shutdown_timeout = Duration::from_secs(config.server.shutdown_timeout);
    info!(
        credentials = config.auth.credentials.len(),
        region = %config.server.region,
        "building gateway"
    );
    let state = Arc::new(s3gate::AppState::from_config(config)?);
    let app = s3gate::server::app(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("s3gate listening on {}", bind_addr);

    // The drain timeout starts once a shutdown signal has been received.
    let (signalled_tx, mut signalled_rx) = tokio::sync::watch::channel(false);
    let signal = async move {
        shutdown_signal().await;
        let _ = signalled_tx.send(true);
    };
    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(signal);

    tokio::select! {
        result = async { server.await } => result?,
        _ = async {
            let _ = signalled_rx.wait_for(|signalled| *signalled).await;
            tokio::time::sleep(shutdown_timeout).await;
        } => {
            warn!("shutdown timeout elapsed with requests in flight");
        }
    }

    info!("s3gate shut down");
    Ok(())
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

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
