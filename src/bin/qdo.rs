use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use dotenvy::dotenv;
use tracing::info;
use tracing_subscriber::EnvFilter;

use qdo_core::{Controller, ServiceConfig, SledStore};

#[derive(Parser)]
#[command(author, version, about = "Persistent HTTP task-dispatch service", long_about = None)]
struct Args {
    /// HTTP port for the admin API
    #[arg(short = 'p', long)]
    port: Option<u16>,

    /// Database directory path
    #[arg(short = 'f', long)]
    db_path: Option<String>,

    /// Explicit configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let args = Args::parse();

    let mut config = ServiceConfig::load_from_path(args.config.as_deref())?;
    if let Some(port) = args.port {
        config.http_port = port;
    }
    if let Some(db_path) = args.db_path {
        config.db_path = db_path;
    }
    if args.log_json {
        config.log_json = true;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if config.log_json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    info!(version = qdo_core::VERSION, db = %config.db_path, "starting qdo");

    let store = Arc::new(SledStore::open(&config.db_path)?);
    let controller = Controller::start(store).await?;

    let app = qdo_core::http::router(controller.clone());
    let addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(port = config.http_port, "admin api listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("stopping queues");
    controller.stop().await;
    Ok(())
}

/// Resolves on ctrl-c or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
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
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
