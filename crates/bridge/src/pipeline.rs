//! Publish pipeline.
//!
//! Assigns sequence ids at submit, bounds the number of unacknowledged
//! records with a semaphore window, and starts every publish on the caller's
//! task so per-market submission order is preserved. Delivery outcomes flow
//! back through an unbounded completion channel keyed by sequence id.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::warn;

use tickbridge_middleware::{Ack, DeliveryError, TickLog};

use crate::error::PipelineError;
use crate::parser::Tick;

pub type SequenceId = u64;

/// Delivery outcome for one publish attempt, keyed by sequence id.
pub type Completion = (SequenceId, Result<Ack, DeliveryError>);

/// State retained for a record until its terminal outcome. Dropping the entry
/// releases its window permit.
#[derive(Debug)]
pub struct InFlight {
    pub key: String,
    pub payload: Bytes,
    pub attempts: u32,
    _permit: OwnedSemaphorePermit,
}

pub struct Pipeline {
    log: Arc<dyn TickLog>,
    window: Arc<Semaphore>,
    submit_wait: Duration,
    next_seq: AtomicU64,
    completions: mpsc::UnboundedSender<Completion>,
}

impl Pipeline {
    pub fn new(
        log: Arc<dyn TickLog>,
        max_in_flight: usize,
        submit_wait: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<Completion>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                log,
                window: Arc::new(Semaphore::new(max_in_flight)),
                submit_wait,
                next_seq: AtomicU64::new(1),
                completions: tx,
            },
            rx,
        )
    }

    /// Submit a tick for publication. Blocks up to `submit_wait` for window
    /// capacity, then fails with `BufferExhausted` so the caller can pause
    /// feed consumption and drain.
    pub async fn submit(&self, tick: &Tick) -> Result<(SequenceId, InFlight), PipelineError> {
        let payload = tick
            .to_payload()
            .map_err(|e| PipelineError::Serialize(e.to_string()))?;

        let permit =
            match tokio::time::timeout(self.submit_wait, self.window.clone().acquire_owned()).await
            {
                Ok(Ok(permit)) => permit,
                _ => return Err(PipelineError::BufferExhausted),
            };

        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        self.start_publish(seq, &tick.market_code, payload.clone())
            .await;

        Ok((
            seq,
            InFlight {
                key: tick.market_code.clone(),
                payload,
                attempts: 1,
                _permit: permit,
            },
        ))
    }

    /// Re-publish a retained payload under its original sequence id. Used by
    /// the tracker for the single bounded retry.
    pub async fn resubmit(&self, seq: SequenceId, entry: &mut InFlight) {
        entry.attempts += 1;
        self.start_publish(seq, &entry.key, entry.payload.clone())
            .await;
    }

    /// Hand the record to the log and forward its eventual outcome into the
    /// completion channel. A failure to even start the publish becomes a
    /// transient completion, so every tracked sequence reaches a terminal
    /// state through the same path.
    async fn start_publish(&self, seq: SequenceId, key: &str, payload: Bytes) {
        match self.log.publish(key, payload).await {
            Ok(handle) => {
                let tx = self.completions.clone();
                tokio::spawn(async move {
                    let _ = tx.send((seq, handle.wait().await));
                });
            }
            Err(e) => {
                warn!(seq, key, error = %e, "publish did not start");
                let _ = self
                    .completions
                    .send((seq, Err(DeliveryError::Transient(e.to_string()))));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tickbridge_middleware::InMemoryLog;

    fn tick(code: &str) -> Tick {
        Tick {
            market_code: code.to_string(),
            trade_price: 100.0,
            trade_volume: 1.0,
            timestamp: 1_756_500_000_000,
        }
    }

    #[tokio::test]
    async fn test_submit_assigns_increasing_sequence_ids() {
        let log = InMemoryLog::new("ticks");
        let (pipeline, _rx) = Pipeline::new(Arc::new(log), 10, Duration::from_millis(100));

        let (a, _inf_a) = pipeline.submit(&tick("KRW-BTC")).await.unwrap();
        let (b, _inf_b) = pipeline.submit(&tick("KRW-ETH")).await.unwrap();
        assert!(b > a);
    }

    #[tokio::test]
    async fn test_completion_carries_ack() {
        let log = InMemoryLog::new("ticks");
        let (pipeline, mut rx) = Pipeline::new(Arc::new(log), 10, Duration::from_millis(100));

        let (seq, _inflight) = pipeline.submit(&tick("KRW-BTC")).await.unwrap();
        let (completed_seq, outcome) = rx.recv().await.unwrap();
        assert_eq!(completed_seq, seq);
        assert_eq!(outcome.unwrap().topic, "ticks");
    }

    #[tokio::test]
    async fn test_full_window_exhausts_then_recovers() {
        let log = InMemoryLog::new("ticks");
        let (pipeline, _rx) = Pipeline::new(Arc::new(log), 2, Duration::from_millis(50));

        let (_s1, inf1) = pipeline.submit(&tick("KRW-BTC")).await.unwrap();
        let (_s2, _inf2) = pipeline.submit(&tick("KRW-BTC")).await.unwrap();

        let err = pipeline.submit(&tick("KRW-BTC")).await.unwrap_err();
        assert!(matches!(err, PipelineError::BufferExhausted));

        // Terminal outcome frees the permit
        drop(inf1);
        assert!(pipeline.submit(&tick("KRW-BTC")).await.is_ok());
    }

    #[tokio::test]
    async fn test_injected_failure_surfaces_as_completion() {
        let log = InMemoryLog::new("ticks");
        log.fail_next_publish(DeliveryError::Transient("broker unavailable".into()));
        let (pipeline, mut rx) = Pipeline::new(Arc::new(log), 10, Duration::from_millis(100));

        let (seq, _inflight) = pipeline.submit(&tick("KRW-BTC")).await.unwrap();
        let (completed_seq, outcome) = rx.recv().await.unwrap();
        assert_eq!(completed_seq, seq);
        assert!(matches!(outcome, Err(DeliveryError::Transient(_))));
    }
}
