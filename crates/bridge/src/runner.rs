//! Bridge orchestration loop.
//!
//! One task owns the feed, the pipeline, and the tracker, so delivery state
//! needs no locking. The loop interleaves frame intake with periodic
//! completion drains, reconnects through the backoff policy when the feed
//! drops or goes stale, and flushes on shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::backoff::BackoffPolicy;
use crate::error::{BridgeError, FeedError, PipelineError};
use crate::feed::FeedSource;
use crate::metrics::BridgeMetrics;
use crate::parser;
use crate::pipeline::Pipeline;
use crate::tracker::DeliveryTracker;

pub struct Runner<F: FeedSource> {
    feed: F,
    pipeline: Pipeline,
    tracker: DeliveryTracker,
    backoff: BackoffPolicy,
    metrics: BridgeMetrics,
    connected: Arc<AtomicBool>,
    shutdown: watch::Receiver<bool>,
    drain_interval: Duration,
    flush_timeout: Duration,
}

impl<F: FeedSource> Runner<F> {
    pub fn new(
        feed: F,
        pipeline: Pipeline,
        tracker: DeliveryTracker,
        backoff: BackoffPolicy,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            feed,
            pipeline,
            tracker,
            backoff,
            metrics: BridgeMetrics::new("upbit"),
            connected: Arc::new(AtomicBool::new(false)),
            shutdown,
            drain_interval: Duration::from_millis(100),
            flush_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_intervals(mut self, drain_interval: Duration, flush_timeout: Duration) -> Self {
        self.drain_interval = drain_interval;
        self.flush_timeout = flush_timeout;
        self
    }

    /// Shared flag for the health server's ready endpoint.
    pub fn connected_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.connected)
    }

    pub async fn run(mut self) -> Result<(), BridgeError> {
        'session: loop {
            if *self.shutdown.borrow() {
                break;
            }
            self.connect_with_backoff().await?;
            if *self.shutdown.borrow() {
                break;
            }

            let mut drain_tick = tokio::time::interval(self.drain_interval);
            drain_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                enum Event {
                    Shutdown,
                    Drain,
                    Frame(Bytes),
                    Feed(FeedError),
                }

                let event = tokio::select! {
                    _ = self.shutdown.changed() => Event::Shutdown,
                    _ = drain_tick.tick() => Event::Drain,
                    res = self.feed.receive() => match res {
                        Ok(frame) => Event::Frame(frame),
                        Err(e) => Event::Feed(e),
                    },
                };

                match event {
                    Event::Shutdown => break 'session,
                    Event::Drain => {
                        self.tracker.drain(&self.pipeline).await;
                        self.metrics.set_in_flight(self.tracker.pending());
                    }
                    Event::Frame(frame) => {
                        self.metrics.inc_tick_received();
                        match parser::parse(&frame) {
                            Ok(tick) => self.submit_tick(tick).await,
                            Err(e) => {
                                self.metrics.inc_parse_error();
                                warn!(error = %e, "dropping unparsable frame");
                            }
                        }
                    }
                    Event::Feed(e) => {
                        warn!(error = %e, "feed interrupted");
                        self.connected.store(false, Ordering::SeqCst);
                        self.metrics.set_connected(false);
                        self.metrics.inc_reconnect();
                        continue 'session;
                    }
                }
            }
        }

        info!(pending = self.tracker.pending(), "shutting down, flushing in-flight records");
        self.tracker.drain(&self.pipeline).await;
        let abandoned = self.tracker.flush(&self.pipeline, self.flush_timeout).await;
        if abandoned > 0 {
            warn!(abandoned, "records had no delivery outcome at shutdown");
        }
        self.feed.close().await;
        self.connected.store(false, Ordering::SeqCst);
        self.metrics.set_connected(false);
        info!(
            acked = self.tracker.acked(),
            failed = self.tracker.failed(),
            "bridge stopped"
        );
        Ok(())
    }

    /// Submit one tick, pausing frame intake while the window is full. Each
    /// rejected attempt drains completions so capacity can come back.
    async fn submit_tick(&mut self, tick: parser::Tick) {
        loop {
            match self.pipeline.submit(&tick).await {
                Ok((seq, entry)) => {
                    self.tracker.track(seq, entry);
                    self.metrics.set_in_flight(self.tracker.pending());
                    return;
                }
                Err(PipelineError::BufferExhausted) => {
                    self.metrics.inc_buffer_exhausted();
                    warn!(key = %tick.market_code, "in-flight window full, pausing intake");
                    self.tracker.drain(&self.pipeline).await;
                    if *self.shutdown.borrow() {
                        return;
                    }
                }
                Err(e) => {
                    warn!(key = %tick.market_code, error = %e, "dropping tick");
                    return;
                }
            }
        }
    }

    async fn connect_with_backoff(&mut self) -> Result<(), BridgeError> {
        loop {
            if *self.shutdown.borrow() {
                return Ok(());
            }
            match self.feed.connect().await {
                Ok(()) => {
                    self.backoff.reset();
                    self.connected.store(true, Ordering::SeqCst);
                    self.metrics.set_connected(true);
                    info!("feed subscribed");
                    return Ok(());
                }
                Err(e) => {
                    warn!(error = %e, "feed connect failed");
                    match self.backoff.next_delay() {
                        Some(delay) => {
                            tokio::select! {
                                _ = tokio::time::sleep(delay) => {}
                                _ = self.shutdown.changed() => return Ok(()),
                            }
                        }
                        None => {
                            let attempts = self.backoff.attempt_count();
                            error!(attempts, "reconnect budget exhausted");
                            return Err(FeedError::RetriesExhausted { attempts }.into());
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::BackoffConfig;
    use crate::feed::{ScriptedEvent, ScriptedFeed};
    use crate::tracker::TracingObserver;
    use std::sync::Arc;
    use tickbridge_middleware::InMemoryLog;

    fn ticker_frame(code: &str, price: f64) -> ScriptedEvent {
        ScriptedEvent::Frame(Bytes::from(format!(
            r#"{{"type":"ticker","code":"{}","trade_price":{},"trade_volume":0.01,"timestamp":1756500000000}}"#,
            code, price
        )))
    }

    fn fast_backoff(max_attempts: u32) -> BackoffPolicy {
        BackoffPolicy::new(BackoffConfig {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            jitter_factor: 0.0,
            max_attempts,
        })
    }

    fn build_runner(
        feed: ScriptedFeed,
        log: &InMemoryLog,
    ) -> (Runner<ScriptedFeed>, watch::Sender<bool>) {
        let (pipeline, rx) = Pipeline::new(Arc::new(log.clone()), 16, Duration::from_millis(50));
        let tracker =
            DeliveryTracker::new(rx, Box::new(TracingObserver), BridgeMetrics::new("upbit"));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let runner = Runner::new(feed, pipeline, tracker, fast_backoff(3), shutdown_rx)
            .with_intervals(Duration::from_millis(10), Duration::from_secs(1));
        (runner, shutdown_tx)
    }

    async fn wait_for(log: &InMemoryLog, count: usize) {
        for _ in 0..200 {
            if log.len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("log never reached {} records (have {})", count, log.len());
    }

    #[tokio::test]
    async fn test_ticks_flow_to_log() {
        let log = InMemoryLog::new("ticks");
        let feed = ScriptedFeed::new(vec![
            ticker_frame("KRW-BTC", 100.0),
            ticker_frame("KRW-ETH", 10.0),
        ]);
        let (runner, shutdown_tx) = build_runner(feed, &log);

        let handle = tokio::spawn(runner.run());
        wait_for(&log, 2).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap().unwrap();

        assert_eq!(log.len(), 2);
    }

    #[tokio::test]
    async fn test_malformed_frame_does_not_stop_stream() {
        let log = InMemoryLog::new("ticks");
        let feed = ScriptedFeed::new(vec![
            ticker_frame("KRW-BTC", 100.0),
            ScriptedEvent::Frame(Bytes::from_static(b"{b0rked")),
            ticker_frame("KRW-BTC", 101.0),
        ]);
        let (runner, shutdown_tx) = build_runner(feed, &log);

        let handle = tokio::spawn(runner.run());
        wait_for(&log, 2).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap().unwrap();

        assert_eq!(log.len(), 2);
        // Both good frames made it, in order, despite the junk between them
        assert_eq!(log.payloads_for("KRW-BTC").len(), 2);
    }

    #[tokio::test]
    async fn test_reconnects_after_disconnect() {
        let log = InMemoryLog::new("ticks");
        let feed = ScriptedFeed::new(vec![
            ticker_frame("KRW-BTC", 100.0),
            ScriptedEvent::Disconnect,
            ticker_frame("KRW-BTC", 101.0),
        ]);
        let (runner, shutdown_tx) = build_runner(feed, &log);

        let handle = tokio::spawn(runner.run());
        wait_for(&log, 2).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_connect_retries_exhaust() {
        let log = InMemoryLog::new("ticks");
        let feed = ScriptedFeed::new(vec![]).failing_connects(100);
        let (runner, _shutdown_tx) = build_runner(feed, &log);

        let result = runner.run().await;
        assert!(matches!(
            result,
            Err(BridgeError::Feed(FeedError::RetriesExhausted { attempts: 3 }))
        ));
    }

    #[tokio::test]
    async fn test_shutdown_flushes_held_acks() {
        let log = InMemoryLog::new("ticks");
        log.hold_acks();
        let feed = ScriptedFeed::new(vec![ticker_frame("KRW-BTC", 100.0)]);
        let (runner, shutdown_tx) = build_runner(feed, &log);

        let handle = tokio::spawn(runner.run());
        wait_for(&log, 1).await;
        shutdown_tx.send(true).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        log.release_acks();
        handle.await.unwrap().unwrap();
    }
}
