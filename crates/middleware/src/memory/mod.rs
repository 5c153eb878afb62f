//! In-memory implementations for testing

pub mod log;

pub use log::InMemoryLog;
