//! Ticker Stream Binary
//!
//! Starts the ticker registry, broadcast hub, synthetic feed, and the HTTP
//! surfaces in front of them.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin ticker-stream
//! ```
//!
//! # Environment Variables
//!
//! - `TICKER_STREAM_HTTP_PORT`: API port (default: 8080)
//! - `TICKER_STREAM_HEALTH_PORT`: Health check HTTP port (default: 8082)
//! - `TICKER_STREAM_MAILBOX_CAPACITY`: Per-session mailbox bound, 0 = unbounded (default: 10000)
//! - `TICKER_STREAM_FEED_MIN_INTERVAL_MS` / `TICKER_STREAM_FEED_MAX_INTERVAL_MS`: Tick period range (default: 2000 / 5000)
//! - `TICKER_STREAM_FEED_MAX_CHANGE_PCT`: Max relative move per tick (default: 0.02)
//! - `TICKER_STREAM_EXCHANGE`: Exchange label (default: BINANCE)
//! - `TICKER_STREAM_CORS_ORIGIN`: Allowed browser origin (default: <http://localhost:3000>)
//! - `TICKER_STREAM_INITIAL_TICKERS`: Comma-separated tickers tracked at startup
//! - `OTEL_ENABLED`: Export spans over OTLP (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name (default: ticker-stream)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use ticker_stream::application::ports::PriceSink;
use ticker_stream::application::services::{PriceService, TickerRegistry};
use ticker_stream::domain::registry::TickerSet;
use ticker_stream::infrastructure::broadcast::{BroadcastConfig, BroadcastHub, TrackedTickerSink};
use ticker_stream::infrastructure::feed::SyntheticFeed;
use ticker_stream::infrastructure::health::{HealthServer, HealthServerState};
use ticker_stream::infrastructure::http::ApiServer;
use ticker_stream::infrastructure::telemetry;
use ticker_stream::{StreamConfig, init_metrics};
use tokio::signal;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    // Initialize telemetry (tracing + optional OTLP)
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting ticker stream");

    // Initialize Prometheus metrics
    let _metrics_handle = init_metrics();

    let config = StreamConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // hub -> gate -> feed -> registry -> service
    let broadcast_hub = Arc::new(BroadcastHub::new(BroadcastConfig::from(config.broadcast)));
    let tickers = TickerSet::new();
    let gate: Arc<dyn PriceSink> = Arc::new(TrackedTickerSink::new(
        tickers.clone(),
        Arc::clone(&broadcast_hub),
    ));
    let feed = Arc::new(SyntheticFeed::new(gate, config.feed.clone()));
    let registry = Arc::new(TickerRegistry::new(tickers, feed.clone()));
    let service = PriceService::new(registry, Arc::clone(&broadcast_hub));

    for raw in &config.initial_tickers {
        match service.add_ticker(raw).await {
            Ok(response) if response.success => {}
            Ok(response) => tracing::warn!(ticker = %raw, message = %response.message, "Initial ticker not added"),
            Err(e) => tracing::warn!(ticker = %raw, error = %e, "Skipping invalid initial ticker"),
        }
    }

    // Spawn health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        service.clone(),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    let health_task = tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    // Spawn API server
    let api_server = ApiServer::new(
        config.server.http_port,
        service,
        &config.cors_origin,
        shutdown_token.clone(),
    );
    let api_task = tokio::spawn(async move {
        if let Err(e) = api_server.run().await {
            tracing::error!(error = %e, "API server error");
        }
    });

    tracing::info!("Ticker stream ready");

    await_shutdown(shutdown_token).await;

    // Open SSE streams keep connections alive until their sessions end.
    feed.close();
    broadcast_hub.close();

    let drained = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        let (health, api) = tokio::join!(health_task, api_task);
        report_server_exit("health", health);
        report_server_exit("api", api);
    })
    .await;
    if drained.is_err() {
        tracing::warn!("Servers did not stop within the shutdown timeout");
    }

    tracing::info!("Ticker stream stopped");
    Ok(())
}

/// Log a server task that panicked or was cancelled. Returns whether it failed.
fn report_server_exit(server: &str, joined: Result<(), JoinError>) -> bool {
    match joined {
        Ok(()) => false,
        Err(e) => {
            tracing::error!(server, error = %e, panicked = e.is_panic(), "Server task failed");
            true
        }
    }
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &StreamConfig) {
    tracing::info!(
        http_port = config.server.http_port,
        health_port = config.server.health_port,
        mailbox_capacity = config.broadcast.mailbox_capacity,
        exchange = %config.feed.exchange,
        initial_tickers = config.initial_tickers.len(),
        "Configuration loaded"
    );
    tracing::debug!(
        min_interval_ms = u64::try_from(config.feed.min_interval.as_millis()).unwrap_or(u64::MAX),
        max_interval_ms = u64::try_from(config.feed.max_interval.as_millis()).unwrap_or(u64::MAX),
        max_change_pct = config.feed.max_change_pct,
        cors_origin = %config.cors_origin,
        "Feed and CORS settings"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn server_exit_reports_panicked_task() {
        let clean = tokio::spawn(async {}).await;
        assert!(!report_server_exit("health", clean));

        let panicked = tokio::spawn(async { panic!("listener crashed"); }).await;
        assert!(report_server_exit("api", panicked));
    }
}
