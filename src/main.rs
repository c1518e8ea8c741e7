//! Resilient Gateway
//!
//! An HTTP gateway built with Tokio and Axum that guards every call to a
//! downstream dependency.
//!
//! # Architecture Overview
//!
//! ```text
//!                         ┌───────────────────────────────────────────────────────┐
//!                         │                  RESILIENT GATEWAY                     │
//!                         │                                                        │
//!    Client Request       │  ┌─────────┐    ┌──────────────────────────────────┐  │
//!    ─────────────────────┼─▶│  http   │───▶│        dispatch pipeline          │  │
//!                         │  │ server  │    │                                    │  │
//!                         │  └─────────┘    │ bulkhead → circuit breaker →       │  │
//!                         │                 │ rate limiter → time limiter(retry) │  │
//!                         │                 └────────────────┬─────────────────┘  │
//!                         │                                  │                     │
//!                         │                                  ▼                     │
//!    Client Response      │  ┌──────────┐           ┌──────────────┐              │
//!    ◀────────────────────┼──│ response │◀──────────│  downstream  │◀─────────────┼──── Dependency
//!                         │  │ mapping  │           │ http client  │              │
//!                         │  └──────────┘           └──────────────┘              │
//!                         │                                                        │
//!                         │  ┌──────────────────────────────────────────────────┐ │
//!                         │  │              Cross-Cutting Concerns               │ │
//!                         │  │  ┌─────────┐ ┌──────────┐ ┌─────────┐ ┌────────┐ │ │
//!                         │  │  │ config  │ │observa-  │ │  admin  │ │lifecycle│ │ │
//!                         │  │  │+ reload │ │ bility   │ │   API   │ │shutdown│ │ │
//!                         │  │  └─────────┘ └──────────┘ └─────────┘ └────────┘ │ │
//!                         │  └──────────────────────────────────────────────────┘ │
//!                         └───────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use resilient_gateway::config::{load_config, ConfigWatcher, GatewayConfig};
use resilient_gateway::http::HttpServer;
use resilient_gateway::lifecycle::{signals, Shutdown};
use resilient_gateway::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "resilient-gateway", version, about = "Resilient request-dispatch gateway")]
struct Args {
    /// Path to the TOML configuration file; watched for changes.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };

    logging::init_logging(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "resilient-gateway starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        request_timeout_secs = config.timeouts.request_secs,
        dependencies = config.dependencies.len(),
        config_file = ?args.config,
        "Configuration loaded"
    );

    // The watcher must stay alive for reloads to keep flowing.
    let (_watcher, config_updates) = match &args.config {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            (Some(watcher.run()?), updates)
        }
        None => {
            let (_, updates) = mpsc::unbounded_channel();
            (None, updates)
        }
    };

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    signals::spawn_signal_handler(shutdown);

    HttpServer::new(config)
        .run(listener, config_updates, server_shutdown)
        .await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
