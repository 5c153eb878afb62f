use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Log error: {0}")]
    Log(#[from] tickbridge_middleware::LogError),

    #[error("Configuration error: {0}")]
    Config(String),
}
