//! Realmshop Service - HTTP API for the game commerce ledger
//!
//! This is the main entry point for the realmshop service.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use realmshop_service::delivery::worker;
use realmshop_service::{create_router, AppState, ServiceConfig};
use realmshop_store::{MemoryStore, PgStore, Store};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,realmshop=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Realmshop Service");

    let config = ServiceConfig::from_env();

    tracing::info!(
        listen_addr = %config.listen_addr,
        database_configured = %config.database_url.is_some(),
        paypal_configured = %config.paypal.client_id.is_some(),
        bold_configured = %config.bold.api_key.is_some(),
        soap_configured = %config.delivery.soap_endpoint.is_some(),
        "Service configuration loaded"
    );

    let store: Arc<dyn Store> = match &config.database_url {
        Some(url) => {
            tracing::info!(max_connections = config.database_max_connections, "Connecting to PostgreSQL");
            let store = PgStore::connect(url, config.database_max_connections).await?;
            store.migrate().await?;
            Arc::new(store)
        }
        None => {
            tracing::warn!("DATABASE_URL not set - using in-memory store, data will not survive a restart");
            Arc::new(MemoryStore::new())
        }
    };

    let state = AppState::new(store, config.clone());

    let delivery_worker = worker::spawn(Arc::clone(&state.delivery));
    tracing::info!(
        poll_seconds = config.delivery.poll_seconds,
        "Delivery worker started"
    );

    let app = create_router(state);
    tracing::info!("Router configured with all API endpoints");

    tracing::info!(listen_addr = %config.listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    axum::serve(listener, app).await?;

    delivery_worker.abort();
    Ok(())
}
