use thiserror::Error;

/// Errors from the log transport itself (connect, subscribe, consume).
#[derive(Error, Debug)]
pub enum LogError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("publish failed: {0}")]
    PublishFailed(String),
    #[error("subscribe failed: {0}")]
    SubscribeFailed(String),
    #[error("consume failed: {0}")]
    ConsumeFailed(String),
    #[error("fatal configuration error: {0}")]
    Fatal(String),
}

impl LogError {
    /// Fatal errors (bad credentials, unknown stream) terminate the process;
    /// everything else is retryable at some level.
    pub fn is_fatal(&self) -> bool {
        matches!(self, LogError::Fatal(_))
    }
}

/// Per-record delivery outcome errors, correlated back through an [`crate::AckHandle`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// Broker hiccup, timeout, no responders. Worth one bounded retry.
    #[error("transient delivery failure: {0}")]
    Transient(String),
    /// Oversized message, missing stream, invalid subject. Never retried.
    #[error("permanent delivery failure: {0}")]
    Permanent(String),
}

impl DeliveryError {
    pub fn is_transient(&self) -> bool {
        matches!(self, DeliveryError::Transient(_))
    }

    /// Classify a broker error message into transient vs permanent.
    ///
    /// The async-nats publish error does not expose a stable kind for every
    /// failure mode, so classification is by message. Unknown errors default
    /// to transient so they get exactly one retry before going terminal.
    pub fn classify(message: String) -> Self {
        const PERMANENT_MARKERS: [&str; 4] = [
            "maximum payload",
            "message size exceeds",
            "stream not found",
            "invalid subject",
        ];
        let lower = message.to_lowercase();
        if PERMANENT_MARKERS.iter().any(|m| lower.contains(m)) {
            DeliveryError::Permanent(message)
        } else {
            DeliveryError::Transient(message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_permanent() {
        let err = DeliveryError::classify("message size exceeds maximum".to_string());
        assert!(!err.is_transient());

        let err = DeliveryError::classify("stream not found".to_string());
        assert!(!err.is_transient());
    }

    #[test]
    fn test_classify_unknown_defaults_to_transient() {
        let err = DeliveryError::classify("no responders available".to_string());
        assert!(err.is_transient());
    }

    #[test]
    fn test_fatal_detection() {
        assert!(LogError::Fatal("bad credentials".into()).is_fatal());
        assert!(!LogError::ConnectionFailed("refused".into()).is_fatal());
    }
}
