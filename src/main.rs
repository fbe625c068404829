//! Shipment tracker - courier status reconciliation service
//!
//! Polls Sequel247 for every open shipment on a fixed interval, appends new
//! status history to the stored tracking documents, and serves manual
//! trigger / health / metrics over HTTP.
//!
//! Module structure:
//! - `domain/` - Order, status and error types
//! - `io/` - External interfaces (courier client, order store, HTTP)
//! - `services/` - Business logic (Normalizer, Reconciler, Scheduler)
//! - `infra/` - Infrastructure (Config, Metrics)

use anyhow::Context;
use clap::Parser;
use shipment_tracker::infra::{Config, Metrics};
use shipment_tracker::io::{start_http_server, HttpState, OrderStore, RocksOrderStore, Sequel247Client};
use shipment_tracker::services::{Reconciler, Scheduler};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// How often the metrics summary is written to the log
const METRICS_LOG_INTERVAL: Duration = Duration::from_secs(60);

/// Shipment tracker - Sequel247 status reconciliation
#[derive(Parser, Debug)]
#[command(name = "shipment-tracker", version, about)]
struct Args {
    /// Path to TOML configuration file (falls back to CONFIG_FILE, then config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Default: INFO, use RUST_LOG=debug for per-order visibility
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false);
    if args.json_logs {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!(version = env!("CARGO_PKG_VERSION"), git_hash = env!("GIT_HASH"), "shipment-tracker starting");

    let config_path = args.config.unwrap_or_else(|| Config::resolve_config_path(&[]));
    let config = Config::load_from_path(&config_path);

    info!(
        config_file = %config.config_file(),
        courier_env = %config.courier_environment().as_str(),
        courier_endpoint = %config.courier().endpoint,
        store_code = %config.courier().store_code,
        timeout_ms = %config.courier_timeout().as_millis(),
        poll_interval_secs = %config.poll_interval().as_secs(),
        poll_concurrency = %config.poll_concurrency(),
        run_on_start = %config.run_on_start(),
        http_port = %config.http_port(),
        store_path = %config.store_path(),
        "config_loaded"
    );
    if config.courier().token.is_empty() {
        warn!(courier_env = %config.courier_environment().as_str(), "courier_token_missing");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Shared components
    let store = RocksOrderStore::open(config.store_path())
        .with_context(|| format!("Failed to open order store {}", config.store_path()))?;
    let store: Arc<dyn OrderStore> = Arc::new(store);
    let gateway = Arc::new(Sequel247Client::new(config.courier(), config.courier_timeout())?);
    let metrics = Arc::new(Metrics::new());

    let reconciler =
        Arc::new(Reconciler::new(gateway, store.clone(), metrics.clone(), config.poll_concurrency()));
    let scheduler = Arc::new(Scheduler::new(
        reconciler,
        metrics.clone(),
        config.poll_interval(),
        config.run_on_start(),
    ));

    // Start HTTP server (if port > 0)
    let http_port = config.http_port();
    if http_port > 0 {
        let state = Arc::new(HttpState {
            scheduler: scheduler.clone(),
            store: store.clone(),
            metrics: metrics.clone(),
            environment: config.courier_environment().as_str().to_string(),
        });
        let http_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = start_http_server(http_port, state, http_shutdown).await {
                error!(error = %e, "http_server_error");
            }
        });
    }

    // Start metrics reporter
    let metrics_clone = metrics.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(METRICS_LOG_INTERVAL);
        loop {
            interval.tick().await;
            metrics_clone.report().log();
        }
    });

    // Handle shutdown on Ctrl+C
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_tx.send(true);
    });

    // Run scheduler until shutdown; an in-flight cycle finishes first
    if let Err(e) = tokio::spawn(scheduler.run(shutdown_rx)).await {
        error!(error = %e, "scheduler_task_failed");
    }

    metrics.report().log();
    info!("shipment-tracker shutdown complete");
    Ok(())
}
