//! tickbridge-producer: Upbit ticker collection binary
//!
//! Subscribes to the Upbit WebSocket ticker stream and forwards normalized
//! ticks to a JetStream-backed tick log.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tickbridge_lib::{
    BackoffConfig, BackoffPolicy, BridgeMetrics, Config, DeliveryTracker, Pipeline, Runner,
    ServerState, TracingObserver, UpbitFeed,
};
use tickbridge_middleware::JetStreamLog;

#[derive(Parser, Debug)]
#[command(name = "tickbridge-producer")]
#[command(about = "Upbit ticker to JetStream bridge")]
struct Args {
    /// Health server bind address
    #[arg(long, default_value = "0.0.0.0:8080")]
    health_addr: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            std::process::exit(1);
        }
    };
    info!(
        url = %config.upbit_ws_url,
        stream = %config.stream_name,
        codes = ?config.market_codes,
        "starting tickbridge producer"
    );

    let log = match JetStreamLog::connect(
        &config.nats_url,
        &config.subject_prefix,
        &config.stream_name,
    )
    .await
    {
        Ok(log) => log,
        Err(e) => {
            error!(error = %e, url = %config.nats_url, "failed to connect to NATS");
            std::process::exit(1);
        }
    };
    if let Err(e) = log.ensure_stream().await {
        error!(error = %e, "failed to ensure tick stream");
        std::process::exit(1);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("received shutdown signal");
        shutdown_tx_clone.send(true).ok();
    });

    let (pipeline, completions) =
        Pipeline::new(Arc::new(log), config.max_in_flight, config.submit_wait);
    let tracker = DeliveryTracker::new(
        completions,
        Box::new(TracingObserver),
        BridgeMetrics::new("upbit"),
    );
    let feed = UpbitFeed::new(
        config.upbit_ws_url.clone(),
        config.ticket.clone(),
        config.market_codes.clone(),
        config.stale_after,
    );
    let backoff = BackoffPolicy::new(BackoffConfig {
        initial_delay: config.reconnect_initial_delay,
        max_delay: config.reconnect_max_delay,
        jitter_factor: 0.2,
        max_attempts: config.reconnect_max_attempts,
    });

    let runner = Runner::new(feed, pipeline, tracker, backoff, shutdown_rx)
        .with_intervals(config.drain_interval, config.flush_timeout);

    let health_addr: SocketAddr = args.health_addr.parse()?;
    let server_state = ServerState::new("upbit", runner.connected_handle());
    tokio::spawn(async move {
        if let Err(e) = tickbridge_lib::run_server(health_addr, server_state).await {
            error!(error = %e, "health server exited");
        }
    });

    if let Err(e) = runner.run().await {
        error!(error = %e, "bridge failed");
        std::process::exit(1);
    }

    info!("clean shutdown");
    Ok(())
}
