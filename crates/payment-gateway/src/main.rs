//! Payment Gateway - Main entry point.

use anyhow::Context;
use payment_gateway::{build_app, serve, AppResult, Config};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> AppResult<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_logging(&config.log.level, config.log.json);

    info!("Starting payment gateway...");

    let (app, state) = build_app(&config)?;

    if state.manager.provider_healthy().await {
        info!("Payment provider healthy at {}", config.payments.provider.base_url);
    } else {
        warn!("Payment provider health check failed - will retry on requests");
    }

    if config.payments.storage.persist {
        info!("Persisting sessions under {}", config.payments.storage.path.display());
    } else {
        info!("Persistence disabled, using in-memory session storage");
    }
    info!(
        "Card checkout {}, notifications {}",
        if state.card.is_some() { "enabled" } else { "disabled" },
        if config.payments.notifications.enabled { "enabled" } else { "disabled" }
    );

    let addr = config.server.socket_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("Listening on {}", addr);

    serve(listener, app, state, async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => {
                warn!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
        }
    })
    .await?;

    info!("Shutting down...");
    Ok(())
}

fn init_logging(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
