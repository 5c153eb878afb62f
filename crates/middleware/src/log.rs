use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::oneshot;

use crate::error::{DeliveryError, LogError};

/// Delivery confirmation metadata for one published record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub topic: String,
    /// Log offset assigned by the broker, strictly increasing per topic.
    pub offset: u64,
}

/// Resolves asynchronously to the terminal delivery outcome of one publish.
///
/// Replaces the global delivery-callback pattern: each submitted record gets
/// its own completion handle, resolved by the log client.
pub struct AckHandle {
    rx: oneshot::Receiver<Result<Ack, DeliveryError>>,
}

impl AckHandle {
    pub fn channel() -> (oneshot::Sender<Result<Ack, DeliveryError>>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx })
    }

    /// Wait for the delivery outcome. A dropped sender counts as a transient
    /// failure rather than silently losing the record.
    pub async fn wait(self) -> Result<Ack, DeliveryError> {
        match self.rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(DeliveryError::Transient(
                "delivery outcome channel dropped".to_string(),
            )),
        }
    }
}

/// One record read back from the log.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub topic: String,
    /// Partition key the record was routed by (the market code).
    pub key: String,
    pub payload: Bytes,
    pub offset: u64,
    /// Epoch milliseconds captured at receipt.
    pub timestamp: u64,
}

/// Start-offset policy for a new consumer group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartPosition {
    Earliest,
    Latest,
}

impl FromStr for StartPosition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "earliest" => Ok(StartPosition::Earliest),
            "latest" => Ok(StartPosition::Latest),
            other => Err(format!("unknown start position: {}", other)),
        }
    }
}

/// Consumer handle bound to a durable group.
///
/// Offsets are committed only after the caller has processed a record, so
/// delivery is at-least-once: duplicates are possible after a crash between
/// processing and commit, loss is not.
#[async_trait]
pub trait LogConsumer: Send {
    /// Next available record, or `None` if nothing arrived within `timeout`.
    async fn poll(&mut self, timeout: Duration) -> Result<Option<LogRecord>, LogError>;

    /// Commit the read offset of the most recently polled record.
    async fn commit(&mut self) -> Result<(), LogError>;
}

/// Log abstraction for publishing keyed records and tailing them back.
#[async_trait]
pub trait TickLog: Send + Sync {
    /// Start an asynchronous publish of `payload` routed by `key`.
    ///
    /// Returns once the record has been handed to the client in submission
    /// order; the returned handle resolves to the delivery outcome.
    async fn publish(&self, key: &str, payload: Bytes) -> Result<AckHandle, LogError>;

    /// Subscribe as `group`, starting from `start` for a new group or from
    /// the committed offset for an existing one.
    async fn consumer(
        &self,
        group: &str,
        start: StartPosition,
    ) -> Result<Box<dyn LogConsumer>, LogError>;
}

pub(crate) fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
