//! Delivery tracker.
//!
//! Owns the in-flight map and the completion channel receiver. All mutation
//! happens on the runner task. A transient failure gets exactly one retry
//! under the original sequence id; a second failure of any kind is terminal
//! and goes to the observer.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use tickbridge_middleware::{Ack, DeliveryError};

use crate::metrics::BridgeMetrics;
use crate::pipeline::{Completion, InFlight, Pipeline, SequenceId};

/// First attempt plus one retry.
const MAX_ATTEMPTS: u32 = 2;

/// Hook for terminal delivery failures.
pub trait DeliveryObserver: Send + Sync {
    fn on_failure(&self, seq: SequenceId, key: &str, error: &DeliveryError);
}

/// Default observer: log and move on.
pub struct TracingObserver;

impl DeliveryObserver for TracingObserver {
    fn on_failure(&self, seq: SequenceId, key: &str, error: &DeliveryError) {
        error!(seq, key, error = %error, "record dropped after delivery failure");
    }
}

pub struct DeliveryTracker {
    in_flight: HashMap<SequenceId, InFlight>,
    completions: mpsc::UnboundedReceiver<Completion>,
    observer: Box<dyn DeliveryObserver>,
    metrics: BridgeMetrics,
    /// Highest acked log offset per market code.
    last_acked: HashMap<String, u64>,
    acked: u64,
    retried: u64,
    failed: u64,
}

impl DeliveryTracker {
    pub fn new(
        completions: mpsc::UnboundedReceiver<Completion>,
        observer: Box<dyn DeliveryObserver>,
        metrics: BridgeMetrics,
    ) -> Self {
        Self {
            in_flight: HashMap::new(),
            completions,
            observer,
            metrics,
            last_acked: HashMap::new(),
            acked: 0,
            retried: 0,
            failed: 0,
        }
    }

    pub fn track(&mut self, seq: SequenceId, entry: InFlight) {
        self.in_flight.insert(seq, entry);
    }

    pub fn pending(&self) -> usize {
        self.in_flight.len()
    }

    pub fn acked(&self) -> u64 {
        self.acked
    }

    pub fn retried(&self) -> u64 {
        self.retried
    }

    pub fn failed(&self) -> u64 {
        self.failed
    }

    pub fn last_acked_offset(&self, key: &str) -> Option<u64> {
        self.last_acked.get(key).copied()
    }

    /// Consume every completion that is already waiting, without blocking.
    pub async fn drain(&mut self, pipeline: &Pipeline) {
        while let Ok((seq, outcome)) = self.completions.try_recv() {
            self.handle(pipeline, seq, outcome).await;
        }
    }

    /// Block for outstanding completions until the map empties or the
    /// deadline passes. Returns how many records were abandoned.
    pub async fn flush(&mut self, pipeline: &Pipeline, timeout: Duration) -> usize {
        let deadline = tokio::time::Instant::now() + timeout;
        while !self.in_flight.is_empty() {
            match tokio::time::timeout_at(deadline, self.completions.recv()).await {
                Err(_) | Ok(None) => break,
                Ok(Some((seq, outcome))) => self.handle(pipeline, seq, outcome).await,
            }
        }
        self.in_flight.len()
    }

    async fn handle(&mut self, pipeline: &Pipeline, seq: SequenceId, outcome: Result<Ack, DeliveryError>) {
        let Some(mut entry) = self.in_flight.remove(&seq) else {
            debug!(seq, "completion for untracked sequence");
            return;
        };

        match outcome {
            Ok(ack) => {
                self.acked += 1;
                self.metrics.inc_acked();
                debug!(seq, key = %entry.key, offset = ack.offset, "delivery confirmed");
                self.last_acked.insert(entry.key, ack.offset);
            }
            Err(e) if e.is_transient() && entry.attempts < MAX_ATTEMPTS => {
                self.retried += 1;
                self.metrics.inc_retry();
                warn!(seq, key = %entry.key, error = %e, "transient delivery failure, retrying once");
                pipeline.resubmit(seq, &mut entry).await;
                self.in_flight.insert(seq, entry);
            }
            Err(e) => {
                self.failed += 1;
                self.metrics.inc_failure();
                self.observer.on_failure(seq, &entry.key, &e);
                // Dropping the entry releases its window permit.
            }
        }
    }
}
