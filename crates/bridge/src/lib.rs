//! tickbridge-lib: Upbit WebSocket to JetStream forwarding pipeline.
//!
//! The library is split along the lifecycle of a tick: the feed pulls raw
//! frames, the parser normalizes them, the pipeline publishes them under a
//! bounded in-flight window, and the tracker resolves each record to a
//! terminal outcome. The runner ties those together on a single task.

pub mod backoff;
pub mod config;
pub mod error;
pub mod feed;
pub mod metrics;
pub mod parser;
pub mod pipeline;
pub mod runner;
pub mod server;
pub mod tracker;

pub use backoff::{BackoffConfig, BackoffPolicy};
pub use config::Config;
pub use error::{BridgeError, ConfigError, FeedError, ParseError, PipelineError};
pub use feed::{ConnectionState, FeedSource, ScriptedEvent, ScriptedFeed, UpbitFeed};
pub use metrics::{encode_metrics, BridgeMetrics};
pub use parser::{parse, Tick};
pub use pipeline::{Completion, InFlight, Pipeline, SequenceId};
pub use runner::Runner;
pub use server::{create_router, run_server, ServerState};
pub use tracker::{DeliveryObserver, DeliveryTracker, TracingObserver};
