//! Tick log tailer.
//!
//! Polls a durable consumer group and hands each tick to a sink. Offsets are
//! committed only after the sink has seen the record, so a crash between
//! handoff and commit redelivers rather than loses (at-least-once; the sink
//! may see duplicates).

use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use tickbridge_lib::{parse, Tick};
use tickbridge_middleware::{LogConsumer, LogRecord};

use crate::Result;

pub trait TickSink: Send {
    fn on_tick(&mut self, record: &LogRecord, tick: &Tick);
}

/// Default sink: one log line per tick, the consumer-side mirror of what the
/// producer publishes.
pub struct LoggingSink;

impl TickSink for LoggingSink {
    fn on_tick(&mut self, record: &LogRecord, tick: &Tick) {
        info!(
            market = %tick.market_code,
            price = tick.trade_price,
            volume = tick.trade_volume,
            offset = record.offset,
            "tick"
        );
    }
}

pub struct Tailer {
    consumer: Box<dyn LogConsumer>,
    sink: Box<dyn TickSink>,
    poll_timeout: Duration,
    shutdown: watch::Receiver<bool>,
}

impl Tailer {
    pub fn new(
        consumer: Box<dyn LogConsumer>,
        sink: Box<dyn TickSink>,
        poll_timeout: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            consumer,
            sink,
            poll_timeout,
            shutdown,
        }
    }

    pub async fn run(mut self) -> Result<()> {
        info!("tailer started");
        loop {
            if *self.shutdown.borrow() {
                break;
            }

            let polled = tokio::select! {
                _ = self.shutdown.changed() => break,
                res = self.consumer.poll(self.poll_timeout) => res,
            };

            match polled {
                // No data in this window, keep polling
                Ok(None) => continue,
                Ok(Some(record)) => {
                    match parse(&record.payload) {
                        Ok(tick) => self.sink.on_tick(&record, &tick),
                        Err(e) => {
                            warn!(offset = record.offset, error = %e, "skipping unparsable record");
                        }
                    }
                    if let Err(e) = self.consumer.commit().await {
                        if e.is_fatal() {
                            return Err(e.into());
                        }
                        // Uncommitted records get redelivered
                        warn!(offset = record.offset, error = %e, "commit failed");
                    }
                }
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    warn!(error = %e, "poll failed, retrying");
                    tokio::time::sleep(Duration::from_millis(500)).await;
                }
            }
        }
        info!("tailer stopped");
        Ok(())
    }
}
