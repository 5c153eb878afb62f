pub mod log;
pub mod subjects;

pub use log::JetStreamLog;
pub use subjects::SubjectBuilder;
