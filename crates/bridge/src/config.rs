//! Producer configuration, environment-backed with defaults.

use std::time::Duration;

use crate::error::ConfigError;

#[derive(Debug, Clone)]
pub struct Config {
    pub upbit_ws_url: String,
    pub nats_url: String,
    pub stream_name: String,
    pub subject_prefix: String,
    pub market_codes: Vec<String>,
    /// Ticket field sent in the Upbit subscription frame.
    pub ticket: String,
    pub stale_after: Duration,
    pub max_in_flight: usize,
    pub submit_wait: Duration,
    pub drain_interval: Duration,
    pub flush_timeout: Duration,
    pub reconnect_initial_delay: Duration,
    pub reconnect_max_delay: Duration,
    pub reconnect_max_attempts: u32,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let upbit_ws_url = std::env::var("UPBIT_WS_URL")
            .unwrap_or_else(|_| "wss://api.upbit.com/websocket/v1".into());

        let nats_url =
            std::env::var("NATS_URL").unwrap_or_else(|_| "nats://localhost:4222".into());

        let stream_name = std::env::var("TICK_STREAM").unwrap_or_else(|_| "UPBIT_TICKS".into());

        let subject_prefix =
            std::env::var("TICK_SUBJECT_PREFIX").unwrap_or_else(|_| "ticks".into());

        let market_codes = parse_codes(
            &std::env::var("MARKET_CODES").unwrap_or_else(|_| "KRW-BTC,KRW-ETH,KRW-XRP".into()),
        )?;

        let ticket = std::env::var("UPBIT_TICKET").unwrap_or_else(|_| "tick-stream".into());

        Ok(Self {
            upbit_ws_url,
            nats_url,
            stream_name,
            subject_prefix,
            market_codes,
            ticket,
            stale_after: duration_secs("STALE_AFTER_SECS", 60)?,
            max_in_flight: parse_env("MAX_IN_FLIGHT", 1000)?,
            submit_wait: duration_millis("SUBMIT_WAIT_MS", 250)?,
            drain_interval: duration_millis("DRAIN_INTERVAL_MS", 100)?,
            flush_timeout: duration_secs("FLUSH_TIMEOUT_SECS", 10)?,
            reconnect_initial_delay: duration_millis("RECONNECT_INITIAL_MS", 500)?,
            reconnect_max_delay: duration_millis("RECONNECT_MAX_MS", 30_000)?,
            reconnect_max_attempts: parse_env("RECONNECT_MAX_ATTEMPTS", 10)?,
        })
    }
}

fn parse_codes(raw: &str) -> Result<Vec<String>, ConfigError> {
    let codes: Vec<String> = raw
        .split(',')
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect();
    if codes.is_empty() {
        return Err(ConfigError::Invalid {
            field: "MARKET_CODES",
            reason: "no market codes given".into(),
        });
    }
    Ok(codes)
}

fn parse_env<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Err(_) => Ok(default),
        Ok(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
            field: name,
            reason: e.to_string(),
        }),
    }
}

fn duration_secs(name: &'static str, default: u64) -> Result<Duration, ConfigError> {
    Ok(Duration::from_secs(parse_env(name, default)?))
}

fn duration_millis(name: &'static str, default: u64) -> Result<Duration, ConfigError> {
    Ok(Duration::from_millis(parse_env(name, default)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_codes() {
        let codes = parse_codes("KRW-BTC, KRW-ETH,KRW-XRP").unwrap();
        assert_eq!(codes, vec!["KRW-BTC", "KRW-ETH", "KRW-XRP"]);
    }

    #[test]
    fn test_parse_codes_rejects_empty() {
        assert!(parse_codes("").is_err());
        assert!(parse_codes(" , ,").is_err());
    }

    #[test]
    fn test_parse_env_default_when_unset() {
        let value: u64 = parse_env("TICKBRIDGE_TEST_UNSET_KNOB", 42).unwrap();
        assert_eq!(value, 42);
    }
}
