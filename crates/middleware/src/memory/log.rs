//! In-memory tick log for testing
//!
//! Mirrors the JetStream log closely enough to run the full producer and
//! tailer paths without a broker: monotonic offsets, durable group cursors,
//! and per-record ack handles. Fault injection hooks let tests exercise the
//! delivery retry and backpressure paths.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::watch;

use crate::error::{DeliveryError, LogError};
use crate::log::{epoch_millis, Ack, AckHandle, LogConsumer, LogRecord, StartPosition, TickLog};

#[derive(Clone)]
struct StoredRecord {
    key: String,
    payload: Bytes,
    offset: u64,
    timestamp: u64,
}

struct Shared {
    records: Mutex<Vec<StoredRecord>>,
    /// Committed read cursor per durable group (index into records).
    groups: Mutex<HashMap<String, usize>>,
    /// Delivery failures to inject on upcoming publishes, in order.
    fail_queue: Mutex<VecDeque<DeliveryError>>,
    publish_attempts: AtomicU64,
    next_offset: AtomicU64,
    /// Bumped on every append so pollers wake without missed notifications.
    version: watch::Sender<u64>,
    /// While true, acks are withheld until release_acks.
    hold: watch::Sender<bool>,
    topic: String,
}

/// In-memory tick log, cheap to clone.
#[derive(Clone)]
pub struct InMemoryLog {
    shared: Arc<Shared>,
}

impl InMemoryLog {
    pub fn new(topic: &str) -> Self {
        let (version, _) = watch::channel(0u64);
        let (hold, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                records: Mutex::new(Vec::new()),
                groups: Mutex::new(HashMap::new()),
                fail_queue: Mutex::new(VecDeque::new()),
                publish_attempts: AtomicU64::new(0),
                next_offset: AtomicU64::new(1),
                version,
                hold,
                topic: topic.to_string(),
            }),
        }
    }

    /// Number of records currently stored.
    pub fn len(&self) -> usize {
        self.shared.records.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total publish calls seen, including failed ones.
    pub fn publish_attempts(&self) -> u64 {
        self.shared.publish_attempts.load(Ordering::SeqCst)
    }

    /// Fail the next publish with the given delivery error. Queued failures
    /// apply in order, one per publish.
    pub fn fail_next_publish(&self, err: DeliveryError) {
        self.shared.fail_queue.lock().unwrap().push_back(err);
    }

    /// Withhold acks for subsequent publishes until [`release_acks`].
    ///
    /// [`release_acks`]: InMemoryLog::release_acks
    pub fn hold_acks(&self) {
        self.shared.hold.send_replace(true);
    }

    pub fn release_acks(&self) {
        self.shared.hold.send_replace(false);
    }

    /// Stored payloads for a key, in append order.
    pub fn payloads_for(&self, key: &str) -> Vec<Bytes> {
        self.shared
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.key == key)
            .map(|r| r.payload.clone())
            .collect()
    }
}

#[async_trait]
impl TickLog for InMemoryLog {
    async fn publish(&self, key: &str, payload: Bytes) -> Result<AckHandle, LogError> {
        self.shared.publish_attempts.fetch_add(1, Ordering::SeqCst);
        let (tx, handle) = AckHandle::channel();

        if let Some(err) = self.shared.fail_queue.lock().unwrap().pop_front() {
            let _ = tx.send(Err(err));
            return Ok(handle);
        }

        let offset = self.shared.next_offset.fetch_add(1, Ordering::SeqCst);
        {
            let mut records = self.shared.records.lock().unwrap();
            records.push(StoredRecord {
                key: key.to_string(),
                payload,
                offset,
                timestamp: epoch_millis(),
            });
        }
        self.shared.version.send_modify(|v| *v += 1);

        let ack = Ack {
            topic: self.shared.topic.clone(),
            offset,
        };
        let mut hold = self.shared.hold.subscribe();
        if *hold.borrow() {
            tokio::spawn(async move {
                while *hold.borrow_and_update() {
                    if hold.changed().await.is_err() {
                        return;
                    }
                }
                let _ = tx.send(Ok(ack));
            });
        } else {
            let _ = tx.send(Ok(ack));
        }

        Ok(handle)
    }

    async fn consumer(
        &self,
        group: &str,
        start: StartPosition,
    ) -> Result<Box<dyn LogConsumer>, LogError> {
        let committed = {
            let groups = self.shared.groups.lock().unwrap();
            groups.get(group).copied()
        };
        let cursor = match committed {
            Some(pos) => pos,
            None => match start {
                StartPosition::Earliest => 0,
                StartPosition::Latest => self.shared.records.lock().unwrap().len(),
            },
        };

        Ok(Box::new(InMemoryConsumer {
            shared: Arc::clone(&self.shared),
            group: group.to_string(),
            cursor,
        }))
    }
}

struct InMemoryConsumer {
    shared: Arc<Shared>,
    group: String,
    /// Read position, persisted to the group map only on commit.
    cursor: usize,
}

impl InMemoryConsumer {
    fn take_next(&mut self) -> Option<LogRecord> {
        let records = self.shared.records.lock().unwrap();
        let stored = records.get(self.cursor)?;
        let record = LogRecord {
            topic: self.shared.topic.clone(),
            key: stored.key.clone(),
            payload: stored.payload.clone(),
            offset: stored.offset,
            timestamp: stored.timestamp,
        };
        self.cursor += 1;
        Some(record)
    }
}

#[async_trait]
impl LogConsumer for InMemoryConsumer {
    async fn poll(&mut self, timeout: Duration) -> Result<Option<LogRecord>, LogError> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut version = self.shared.version.subscribe();
        version.borrow_and_update();

        loop {
            if let Some(record) = self.take_next() {
                return Ok(Some(record));
            }
            match tokio::time::timeout_at(deadline, version.changed()).await {
                Err(_) => return Ok(None),
                Ok(Err(_)) => {
                    return Err(LogError::ConsumeFailed("log dropped".to_string()))
                }
                Ok(Ok(())) => {}
            }
        }
    }

    async fn commit(&mut self) -> Result<(), LogError> {
        let mut groups = self.shared.groups.lock().unwrap();
        groups.insert(self.group.clone(), self.cursor);
        Ok(())
    }
}
