use std::sync::Arc;

use dashmap::DashMap;

/// Helper for tick subject formatting.
/// Caches formatted subjects to avoid repeated allocations in the hot path.
pub struct SubjectBuilder {
    /// Pre-computed prefix: "{prefix}."
    base_prefix: Arc<str>,
    /// Pre-computed wildcard subject: "{prefix}.>"
    wildcard: Arc<str>,
    /// Stream name backing the subject space
    stream_name: Arc<str>,
    /// Cache of market code -> full tick subject
    tick_cache: DashMap<Arc<str>, Arc<str>>,
}

impl SubjectBuilder {
    pub fn new(prefix: impl Into<String>, stream_name: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let base_prefix: Arc<str> = format!("{}.", prefix).into();
        let wildcard: Arc<str> = format!("{}.>", prefix).into();
        Self {
            base_prefix,
            wildcard,
            stream_name: stream_name.into().into(),
            tick_cache: DashMap::new(),
        }
    }

    /// Build subject for tick records: {prefix}.{market_code}
    /// Cached - first call allocates, subsequent calls return Arc clone (cheap).
    #[inline]
    pub fn tick(&self, market_code: &str) -> Arc<str> {
        if let Some(cached) = self.tick_cache.get(market_code) {
            return Arc::clone(cached.value());
        }

        let code_arc: Arc<str> = market_code.into();
        let subject: Arc<str> = format!("{}{}", self.base_prefix, market_code).into();
        self.tick_cache.insert(code_arc, Arc::clone(&subject));
        subject
    }

    /// Wildcard subject covering all market codes: {prefix}.>
    #[inline]
    pub fn all(&self) -> &str {
        &self.wildcard
    }

    #[inline]
    pub fn stream_name(&self) -> &str {
        &self.stream_name
    }

    /// Extract the market code (partition key) from a full tick subject.
    pub fn key_of(subject: &str) -> &str {
        subject.rsplit('.').next().unwrap_or(subject)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_subject() {
        let builder = SubjectBuilder::new("ticks", "UPBIT_TICKS");
        assert_eq!(builder.tick("KRW-BTC").as_ref(), "ticks.KRW-BTC");
    }

    #[test]
    fn test_tick_subject_cached() {
        let builder = SubjectBuilder::new("ticks", "UPBIT_TICKS");
        let first = builder.tick("KRW-BTC");
        let second = builder.tick("KRW-BTC");
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_wildcard_subject() {
        let builder = SubjectBuilder::new("ticks", "UPBIT_TICKS");
        assert_eq!(builder.all(), "ticks.>");
    }

    #[test]
    fn test_stream_name() {
        let builder = SubjectBuilder::new("ticks", "UPBIT_TICKS");
        assert_eq!(builder.stream_name(), "UPBIT_TICKS");
    }

    #[test]
    fn test_key_of() {
        assert_eq!(SubjectBuilder::key_of("ticks.KRW-BTC"), "KRW-BTC");
        assert_eq!(SubjectBuilder::key_of("KRW-ETH"), "KRW-ETH");
    }
}
