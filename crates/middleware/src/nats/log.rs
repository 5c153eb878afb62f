//! NATS JetStream tick log
//!
//! Records are routed to one subject per market code under a shared prefix,
//! which is what preserves per-key ordering for a single in-order publisher.
//! Publish acks come back from the JetStream PubAck and are surfaced through
//! per-record [`AckHandle`]s.

use std::time::Duration;

use async_nats::jetstream::consumer::pull;
use async_nats::jetstream::consumer::DeliverPolicy;
use async_nats::jetstream::stream::{Config, RetentionPolicy, StorageType};
use async_nats::jetstream::{self, Context};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use tracing::{debug, info};

use crate::error::{DeliveryError, LogError};
use crate::log::{epoch_millis, Ack, AckHandle, LogConsumer, LogRecord, StartPosition, TickLog};
use crate::nats::subjects::SubjectBuilder;

/// Retention for the tick stream
const STREAM_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Authorization problems cannot be fixed by retrying, so they surface as
/// fatal; everything else maps to the retryable variant built by `retryable`.
fn classify_fatal(message: String, retryable: fn(String) -> LogError) -> LogError {
    let lower = message.to_lowercase();
    if lower.contains("authorization") || lower.contains("authentication") || lower.contains("permissions") {
        LogError::Fatal(message)
    } else {
        retryable(message)
    }
}

/// JetStream-backed tick log
pub struct JetStreamLog {
    js: Context,
    subjects: SubjectBuilder,
}

impl JetStreamLog {
    /// Connect to the NATS server and bind the subject space.
    pub async fn connect(
        url: &str,
        subject_prefix: &str,
        stream_name: &str,
    ) -> Result<Self, LogError> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| classify_fatal(e.to_string(), LogError::ConnectionFailed))?;
        info!(url, stream = stream_name, "connected to NATS");
        Ok(Self {
            js: jetstream::new(client),
            subjects: SubjectBuilder::new(subject_prefix, stream_name),
        })
    }

    /// Create or get the backing stream for {prefix}.>
    ///
    /// A creation failure means the broker rejects our configuration, which
    /// the producer treats as fatal rather than something to retry into.
    pub async fn ensure_stream(&self) -> Result<(), LogError> {
        let config = Config {
            name: self.subjects.stream_name().to_string(),
            subjects: vec![self.subjects.all().to_string()],
            retention: RetentionPolicy::Limits,
            storage: StorageType::File,
            max_age: STREAM_MAX_AGE,
            ..Default::default()
        };

        self.js
            .get_or_create_stream(config)
            .await
            .map_err(|e| LogError::Fatal(format!("stream creation failed: {}", e)))?;
        debug!(stream = self.subjects.stream_name(), "tick stream ready");

        Ok(())
    }
}

#[async_trait]
impl TickLog for JetStreamLog {
    async fn publish(&self, key: &str, payload: Bytes) -> Result<AckHandle, LogError> {
        let subject = self.subjects.tick(key);

        // The first await hands the record to the client in submission order;
        // the returned future resolves when the broker acks it.
        let ack_fut = self
            .js
            .publish(subject.to_string(), payload)
            .await
            .map_err(|e| LogError::PublishFailed(e.to_string()))?;

        let topic = self.subjects.stream_name().to_string();
        let (tx, handle) = AckHandle::channel();
        tokio::spawn(async move {
            let outcome = match ack_fut.await {
                Ok(pub_ack) => Ok(Ack {
                    topic,
                    offset: pub_ack.sequence,
                }),
                Err(e) => Err(DeliveryError::classify(e.to_string())),
            };
            let _ = tx.send(outcome);
        });

        Ok(handle)
    }

    async fn consumer(
        &self,
        group: &str,
        start: StartPosition,
    ) -> Result<Box<dyn LogConsumer>, LogError> {
        let stream = self
            .js
            .get_stream(self.subjects.stream_name())
            .await
            .map_err(|e| classify_fatal(e.to_string(), LogError::SubscribeFailed))?;

        let deliver_policy = match start {
            StartPosition::Earliest => DeliverPolicy::All,
            StartPosition::Latest => DeliverPolicy::New,
        };

        let consumer = stream
            .get_or_create_consumer(
                group,
                pull::Config {
                    durable_name: Some(group.to_string()),
                    filter_subject: self.subjects.all().to_string(),
                    deliver_policy,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| classify_fatal(e.to_string(), LogError::SubscribeFailed))?;

        let messages = consumer
            .messages()
            .await
            .map_err(|e| LogError::SubscribeFailed(e.to_string()))?;

        Ok(Box::new(JetStreamConsumer {
            topic: self.subjects.stream_name().to_string(),
            messages,
            pending: None,
        }))
    }
}

struct JetStreamConsumer {
    topic: String,
    messages: pull::Stream,
    /// Last polled, not yet committed message.
    pending: Option<jetstream::Message>,
}

#[async_trait]
impl LogConsumer for JetStreamConsumer {
    async fn poll(&mut self, timeout: Duration) -> Result<Option<LogRecord>, LogError> {
        let next = match tokio::time::timeout(timeout, self.messages.next()).await {
            Err(_) => return Ok(None),
            Ok(None) => {
                return Err(LogError::ConsumeFailed("consumer stream closed".to_string()))
            }
            Ok(Some(Err(e))) => {
                return Err(classify_fatal(e.to_string(), LogError::ConsumeFailed))
            }
            Ok(Some(Ok(msg))) => msg,
        };

        let offset = next
            .info()
            .map(|info| info.stream_sequence)
            .map_err(|e| LogError::ConsumeFailed(e.to_string()))?;
        let subject = next.subject.to_string();

        let record = LogRecord {
            topic: self.topic.clone(),
            key: SubjectBuilder::key_of(&subject).to_string(),
            payload: next.payload.clone(),
            offset,
            timestamp: epoch_millis(),
        };
        self.pending = Some(next);

        Ok(Some(record))
    }

    async fn commit(&mut self) -> Result<(), LogError> {
        if let Some(msg) = self.pending.take() {
            msg.ack()
                .await
                .map_err(|e| LogError::ConsumeFailed(format!("ack failed: {}", e)))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Connection tests require a running NATS server with JetStream:
    // docker run -p 4222:4222 nats:latest -js

    #[tokio::test]
    #[ignore] // Requires NATS server
    async fn test_publish_and_ack() {
        let log = JetStreamLog::connect("nats://localhost:4222", "ticks", "UPBIT_TICKS")
            .await
            .unwrap();
        log.ensure_stream().await.unwrap();
        let handle = log
            .publish("KRW-BTC", Bytes::from(r#"{"trade_price":100}"#))
            .await
            .unwrap();
        let ack = handle.wait().await.unwrap();
        assert!(ack.offset > 0);
    }

    #[test]
    fn test_classify_fatal_on_authorization() {
        let err = classify_fatal(
            "authorization violation".to_string(),
            LogError::ConnectionFailed,
        );
        assert!(err.is_fatal());
    }

    #[test]
    fn test_classify_fatal_passthrough() {
        let err = classify_fatal("connection refused".to_string(), LogError::ConnectionFailed);
        assert!(matches!(err, LogError::ConnectionFailed(_)));
    }
}
