// =============================================================================
// okx-microstructure — market-data ingestion, analytics and broadcast hub
// =============================================================================

mod analytics;
mod cache;
mod client;
mod config;
mod error;
mod hub;
mod orderbook;
mod scheduler;
mod server;
mod subscription_controller;
mod time_window;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use analytics::AnalyticsEngine;
use cache::RedisCache;
use client::MarketDataClient;
use config::Config;
use hub::Hub;
use orderbook::OrderBookStore;
use scheduler::AnalyticsScheduler;
use subscription_controller::SubscriptionController;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    info!("okx-microstructure starting up");

    let config = Config::from_env();
    info!(
        public_ws_url = %config.public_ws_url,
        cache_url = %config.cache_url,
        hub_bind_addr = %config.hub_bind_addr,
        "configuration loaded"
    );

    let store = Arc::new(OrderBookStore::new());
    let engine = Arc::new(AnalyticsEngine::new(config.analytics.clone()));
    let cache = Arc::new(
        RedisCache::new(&config.cache_url).context("failed to build cache client")?,
    );
    let hub = Hub::new();

    let client = MarketDataClient::new(
        config.public_ws_url.clone(),
        vec!["books", "tickers"],
        config.clone(),
        store.clone(),
    );

    // Broadcast cancellation: every long-lived task holds its own receiver
    // and selects against it so a single ctrl-c drains the whole tree.
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    tokio::spawn(client.clone().run(shutdown_tx.subscribe()));

    let controller = SubscriptionController::new(client.clone(), cache.clone(), &config);
    tokio::spawn(controller.run(config.clone(), shutdown_tx.subscribe()));

    let scheduler = Arc::new(AnalyticsScheduler::new(
        store.clone(),
        engine.clone(),
        client.clone(),
        cache.clone(),
        hub.clone(),
        &config,
    ));
    tokio::spawn(scheduler.run(config.clone(), shutdown_tx.subscribe()));

    tokio::spawn(hub.clone().run_heartbeat(shutdown_tx.subscribe()));

    let addr: std::net::SocketAddr = config
        .hub_bind_addr
        .parse()
        .context("invalid hub bind address")?;
    info!(addr = %addr, "binding browser-facing WebSocket server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("failed to bind hub listener")?;
    axum::serve(listener, server::router(hub))
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("ctrl-c received, signalling shutdown to all tasks");
            let _ = shutdown_tx.send(());
        })
        .await
        .context("hub server exited")?;

    Ok(())
}
