mod catalog;
mod config;
mod detector;
mod dispatch;
mod enrich;
mod error;
mod filter;
mod state;
mod types;
mod wallet;
mod ws;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::catalog::Catalog;
use crate::config::{Config, CHANNEL_CAPACITY, DISPATCH_DRAIN_DEADLINE_SECS};
use crate::detector::DetectionEngine;
use crate::dispatch::{Dispatcher, DiscordSink, TelegramSink};
use crate::enrich::Enricher;
use crate::error::{AppError, Result};
use crate::state::WalletCache;
use crate::wallet::WalletClient;
use crate::ws::StreamClient;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Catalog bootstrap: the subscription set, or nothing ---
    let (markets, stats) = catalog::load_catalog(&cfg).await?;
    let catalog = Arc::new(Catalog::build(markets, &cfg.exclude_market_keywords));
    catalog::log_catalog_report(&stats, &catalog);
    if catalog.asset_ids().is_empty() {
        return Err(AppError::Bootstrap(
            "catalog returned no usable markets".to_string(),
        ));
    }

    // --- Shared read paths ---
    let wallet_cache = Arc::new(WalletCache::new(Duration::from_secs(
        cfg.wallet_cache_ttl_secs,
    )));
    let wallet_client = Arc::new(WalletClient::new(cfg.rpc_url.clone())?);

    // --- Channels ---
    let (trade_tx, trade_rx) = broadcast::channel(CHANNEL_CAPACITY);
    let (wallet_tx, wallet_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (candidate_tx, candidate_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (alert_tx, alert_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (discord_tx, discord_rx) = mpsc::channel(64);
    let (telegram_tx, telegram_rx) = mpsc::channel(64);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // --- Spawn tasks ---

    // Streaming client: upstream connection, reconnect, trade emission.
    let stream = StreamClient::new(
        cfg.ws_url.clone(),
        catalog.asset_ids(),
        trade_tx,
        shutdown_rx.clone(),
    );
    tokio::spawn(async move { stream.run().await });

    // Detection: filter chain + signal engine (hot path, no I/O).
    let engine = DetectionEngine::new(
        &cfg,
        Arc::clone(&catalog),
        Arc::clone(&wallet_cache),
        wallet_client,
        trade_rx,
        wallet_tx,
        wallet_rx,
        candidate_tx,
    );
    tokio::spawn(async move { engine.run().await });

    // Enrichment: catalog context, best-effort midpoint, wallet summary.
    let enricher = Enricher::new(
        &cfg,
        Arc::clone(&catalog),
        Arc::clone(&wallet_cache),
        candidate_rx,
        alert_tx,
    )?;
    tokio::spawn(async move { enricher.run().await });

    // Dispatcher + one worker per sink.
    let dispatcher = Dispatcher::new(cfg.alert_rate_per_sec, alert_rx, discord_tx, telegram_tx);
    let dispatcher_handle = tokio::spawn(async move { dispatcher.run().await });

    let discord = DiscordSink::new(&cfg, discord_rx)?;
    tokio::spawn(async move { discord.run().await });

    let telegram = TelegramSink::new(&cfg, telegram_rx)?;
    tokio::spawn(async move { telegram.run().await });

    info!(
        markets = catalog.market_count(),
        "pipeline running: {} markets subscribed, alert rate {:.1}/s",
        catalog.market_count(),
        cfg.alert_rate_per_sec,
    );

    // --- Shutdown: signal the stream, then let channel closure cascade
    // stream → detect → enrich → dispatch → sinks. ---
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    let drain_budget = Duration::from_secs(DISPATCH_DRAIN_DEADLINE_SECS + 5);
    if tokio::time::timeout(drain_budget, dispatcher_handle)
        .await
        .is_err()
    {
        warn!("dispatcher did not drain within its deadline");
    }
    info!("shutdown complete");
    Ok(())
}
