//! Prometheus metrics for the bridge.

use once_cell::sync::Lazy;
use prometheus::{
    register_int_counter_vec, register_int_gauge_vec, Encoder, IntCounterVec, IntGaugeVec,
    TextEncoder,
};

const LABEL_FEED: &str = "feed";

static TICKS_RECEIVED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "tickbridge_ticks_received_total",
        "Ticker frames received from the feed",
        &[LABEL_FEED]
    )
    .expect("Failed to register ticks_received metric")
});

static PARSE_ERRORS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "tickbridge_parse_errors_total",
        "Frames dropped because they failed validation",
        &[LABEL_FEED]
    )
    .expect("Failed to register parse_errors metric")
});

static PUBLISH_ACKED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "tickbridge_publish_acked_total",
        "Records acknowledged by the log",
        &[LABEL_FEED]
    )
    .expect("Failed to register publish_acked metric")
});

static DELIVERY_RETRIES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "tickbridge_delivery_retries_total",
        "Transient delivery failures that were retried",
        &[LABEL_FEED]
    )
    .expect("Failed to register delivery_retries metric")
});

static DELIVERY_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "tickbridge_delivery_failures_total",
        "Records that reached a terminal failure",
        &[LABEL_FEED]
    )
    .expect("Failed to register delivery_failures metric")
});

static RECONNECTS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "tickbridge_reconnects_total",
        "Feed reconnect cycles",
        &[LABEL_FEED]
    )
    .expect("Failed to register reconnects metric")
});

static BUFFER_EXHAUSTED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "tickbridge_buffer_exhausted_total",
        "Submissions rejected because the in-flight window was full",
        &[LABEL_FEED]
    )
    .expect("Failed to register buffer_exhausted metric")
});

static IN_FLIGHT: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "tickbridge_in_flight",
        "Records awaiting a delivery outcome",
        &[LABEL_FEED]
    )
    .expect("Failed to register in_flight metric")
});

static FEED_CONNECTED: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "tickbridge_feed_connected",
        "Feed connection status (1=subscribed, 0=down)",
        &[LABEL_FEED]
    )
    .expect("Failed to register feed_connected metric")
});

/// Handle for recording metrics for one feed.
#[derive(Clone)]
pub struct BridgeMetrics {
    feed: String,
}

impl BridgeMetrics {
    pub fn new(feed: impl Into<String>) -> Self {
        Self { feed: feed.into() }
    }

    pub fn inc_tick_received(&self) {
        TICKS_RECEIVED.with_label_values(&[&self.feed]).inc();
    }

    pub fn inc_parse_error(&self) {
        PARSE_ERRORS.with_label_values(&[&self.feed]).inc();
    }

    pub fn inc_acked(&self) {
        PUBLISH_ACKED.with_label_values(&[&self.feed]).inc();
    }

    pub fn inc_retry(&self) {
        DELIVERY_RETRIES.with_label_values(&[&self.feed]).inc();
    }

    pub fn inc_failure(&self) {
        DELIVERY_FAILURES.with_label_values(&[&self.feed]).inc();
    }

    pub fn inc_reconnect(&self) {
        RECONNECTS.with_label_values(&[&self.feed]).inc();
    }

    pub fn inc_buffer_exhausted(&self) {
        BUFFER_EXHAUSTED.with_label_values(&[&self.feed]).inc();
    }

    pub fn set_in_flight(&self, count: usize) {
        IN_FLIGHT
            .with_label_values(&[&self.feed])
            .set(count as i64);
    }

    pub fn set_connected(&self, connected: bool) {
        FEED_CONNECTED
            .with_label_values(&[&self.feed])
            .set(if connected { 1 } else { 0 });
    }
}

/// Encode all registered metrics in Prometheus text format.
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}
