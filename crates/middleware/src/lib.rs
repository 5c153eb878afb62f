//! tickbridge-middleware: Pluggable tick-log abstractions
//!
//! Provides a trait-based abstraction over a durable, partitioned tick log
//! with a NATS JetStream implementation and an in-memory implementation for
//! testing.

pub mod error;
pub mod log;
pub mod memory;
pub mod nats;

pub use error::{DeliveryError, LogError};
pub use log::{Ack, AckHandle, LogConsumer, LogRecord, StartPosition, TickLog};
pub use memory::InMemoryLog;
pub use nats::{JetStreamLog, SubjectBuilder};
