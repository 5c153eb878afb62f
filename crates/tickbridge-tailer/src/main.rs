//! tickbridge-tailer: durable tick log consumer
//!
//! Tails the JetStream tick log under a named consumer group and logs each
//! tick. Offsets are committed after processing.

use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tickbridge_middleware::{JetStreamLog, TickLog};
use tickbridge_tailer::{
    config::Config,
    consumer::{LoggingSink, Tailer},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;
    info!(
        nats_url = %config.nats_url,
        stream = %config.stream_name,
        group = %config.group,
        start = ?config.start,
        "starting tickbridge tailer"
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

    let consumer = match log.consumer(&config.group, config.start).await {
        Ok(consumer) => consumer,
        Err(e) => {
            error!(error = %e, group = %config.group, "failed to create consumer");
            std::process::exit(1);
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("received shutdown signal");
        shutdown_tx.send(true).ok();
    });

    let tailer = Tailer::new(
        consumer,
        Box::new(LoggingSink),
        config.poll_timeout,
        shutdown_rx,
    );
    if let Err(e) = tailer.run().await {
        error!(error = %e, "tailer failed");
        std::process::exit(1);
    }

    info!("clean shutdown");
    Ok(())
}
