use std::time::Duration;

use tickbridge_middleware::StartPosition;

use crate::Error;

#[derive(Debug, Clone)]
pub struct Config {
    pub nats_url: String,
    pub stream_name: String,
    pub subject_prefix: String,
    pub group: String,
    pub start: StartPosition,
    pub poll_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, Error> {
        let nats_url =
            std::env::var("NATS_URL").unwrap_or_else(|_| "nats://localhost:4222".into());

        let stream_name = std::env::var("TICK_STREAM").unwrap_or_else(|_| "UPBIT_TICKS".into());

        let subject_prefix =
            std::env::var("TICK_SUBJECT_PREFIX").unwrap_or_else(|_| "ticks".into());

        let group = std::env::var("CONSUMER_GROUP").unwrap_or_else(|_| "upbit-tailer".into());

        let start = std::env::var("START_POSITION")
            .unwrap_or_else(|_| "earliest".into())
            .parse()
            .map_err(Error::Config)?;

        let poll_timeout_ms: u64 = std::env::var("POLL_TIMEOUT_MS")
            .unwrap_or_else(|_| "1000".into())
            .parse()
            .map_err(|_| Error::Config("POLL_TIMEOUT_MS must be an integer".into()))?;

        Ok(Self {
            nats_url,
            stream_name,
            subject_prefix,
            group,
            start,
            poll_timeout: Duration::from_millis(poll_timeout_ms),
        })
    }
}
