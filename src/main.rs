//! dronelink - Drone coordinator
//!
//! A WebSocket coordinator that authenticates drone agents, issues
//! short-lived credentials and executes their commands.

use dronelink_server::metrics::run_metrics_server;
use dronelink_server::{Config, Metrics, Server};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration (from file if DRONELINK_CONFIG is set, then env overrides)
    let config_path = std::env::var("DRONELINK_CONFIG").ok();
    let mut config = match Config::load() {
        Ok(c) => {
            if let Some(ref path) = config_path {
                tracing::info!("Loaded config from {}", path);
            }
            c
        }
        Err(e) => {
            // If a config file was explicitly specified, fail on error
            if config_path.is_some() {
                tracing::error!("Failed to load config: {}", e);
                return Err(e.into());
            }
            tracing::info!("Using default configuration");
            Config::default()
        }
    };

    // Load drone secrets from external file if configured
    if let Err(e) = config.load_secrets() {
        tracing::error!("Failed to load drone secrets: {}", e);
        return Err(e.into());
    }

    if let Err(e) = config.validate() {
        tracing::error!("Invalid configuration: {}", e);
        return Err(e.into());
    }

    tracing::info!("Starting dronelink coordinator");
    tracing::info!("  Bind address: ws://{}", config.network.bind_addr);
    tracing::info!("  Credential lifetime: {}s", config.auth.token_ttl_secs);
    if config.auth.uses_default_secret() {
        tracing::warn!("  Signing key: built-in default, set DRONELINK_JWT_SECRET");
    }
    if config.auth.required {
        tracing::info!(
            "  Authentication: enabled ({} drone(s))",
            config.auth.drones.len()
        );
    } else {
        tracing::info!("  Authentication: disabled (secrets accepted as presented)");
    }
    tracing::info!(
        "  Session expiry: {}",
        if config.session.enforce_expiry {
            "enforced"
        } else {
            "not enforced"
        }
    );

    // Metrics
    let (metrics_shutdown, _) = broadcast::channel::<()>(1);
    let metrics = if config.metrics.enabled {
        let metrics = Arc::new(Metrics::new()?);
        let addr = config.metrics.bind_addr;
        let handle = metrics.clone();
        let shutdown_rx = metrics_shutdown.subscribe();
        tokio::spawn(async move {
            if let Err(e) = run_metrics_server(addr, handle, shutdown_rx).await {
                tracing::error!("Metrics server error: {}", e);
            }
        });
        Some(metrics)
    } else {
        tracing::info!("  Metrics: disabled");
        None
    };

    let server = Arc::new(Server::from_config(&config, metrics)?);

    // Spawn shutdown signal handler
    let shutdown_server = server.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received shutdown signal, stopping server...");
        shutdown_server.shutdown();
        let _ = metrics_shutdown.send(());
    });

    // Run server (blocks until shutdown)
    server.run().await?;

    tracing::info!(
        "Server stopped ({} command(s) executed)",
        server.context().dispatcher().history_len()
    );
    Ok(())
}
