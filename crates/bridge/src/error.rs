use thiserror::Error;
use tickbridge_middleware::LogError;

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("subscribe failed: {0}")]
    SubscribeFailed(String),
    #[error("stream closed: {0}")]
    StreamClosed(String),
    #[error("feed stale after {idle_secs}s without activity")]
    Stale { idle_secs: u64 },
    #[error("reconnect retries exhausted after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },
}

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("malformed payload: {0}")]
    Malformed(String),
    #[error("missing field: {0}")]
    MissingField(&'static str),
    #[error("invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("in-flight window full")]
    BufferExhausted,
    #[error("serialize failed: {0}")]
    Serialize(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} not set")]
    Missing(&'static str),
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Top-level error for the bridge loop. Anything surfacing here is fatal;
/// retryable conditions are handled inside the runner.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("feed error: {0}")]
    Feed(#[from] FeedError),
    #[error("log error: {0}")]
    Log(#[from] LogError),
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}
