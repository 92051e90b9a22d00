//! Fanout Hub - Entry Point
//!
//! Starts the hub and the API server with graceful shutdown support.

use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use fanout::api::ApiServer;
use fanout::config::{Config, LogConfig};
use fanout::{bus, Hub};

#[tokio::main]
async fn main() -> fanout::Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    init_tracing(&config.log);

    info!("Starting Fanout Hub");
    info!(
        bus = config.bus.backend.as_str(),
        broadcast_channel = %config.hub.broadcast_channel,
        "Configuration loaded"
    );

    // Connect to the message bus
    let bus = bus::connect(&config.bus).await?;
    info!("Using {} bus", config.bus.backend.as_str());

    // Create the hub and subscribe it to the node channels
    let hub = Hub::new(bus, config.hub.clone());
    if let Err(e) = hub.start().await {
        warn!(
            "Bus subscription failed: {} (serving local connections, retrying in background)",
            e
        );
    }
    info!(node_id = %hub.node_id(), "Hub started");

    // Create shutdown channel
    let (shutdown_tx, _) = watch::channel(false);

    // Create API server
    let api_server = ApiServer::new(config.clone(), hub.clone());
    let api_shutdown = shutdown_tx.subscribe();

    let api_task = tokio::spawn(async move {
        if let Err(e) = api_server.run(api_shutdown).await {
            error!("API server error: {}", e);
        }
    });

    info!("Server started - API: {}", config.api_addr());

    // Wait for shutdown signal
    shutdown_signal().await;
    info!("Shutdown signal received");

    // Close every connection before the listener goes away
    hub.shutdown().await;
    let _ = shutdown_tx.send(true);

    let _ = api_task.await;

    info!("Fanout Hub stopped");
    Ok(())
}

fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("fanout={},tower_http=debug", log.level)))
        .unwrap_or_else(|_| "fanout=info,tower_http=debug".into());

    let registry = tracing_subscriber::registry().with(filter);

    if log.format.eq_ignore_ascii_case("json") {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
