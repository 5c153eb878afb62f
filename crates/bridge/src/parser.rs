//! Upbit ticker frame parser.
//!
//! Upbit delivers ticker messages as JSON objects (usually in binary WebSocket
//! frames). A malformed frame is dropped and counted by the caller; parsing
//! never takes the stream down.

use bytes::Bytes;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::ParseError;

/// Normalized tick. Wire field names match the Upbit ticker shape so the
/// published payload parses with the same function on the consumer side.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Tick {
    #[serde(rename = "code")]
    pub market_code: String,
    pub trade_price: f64,
    pub trade_volume: f64,
    /// Exchange timestamp, epoch milliseconds. Not monotonic per market.
    pub timestamp: u64,
}

impl Tick {
    /// Canonical JSON payload for the log.
    pub fn to_payload(&self) -> Result<Bytes, serde_json::Error> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }
}

pub fn parse(payload: &[u8]) -> Result<Tick, ParseError> {
    let value: Value =
        serde_json::from_slice(payload).map_err(|e| ParseError::Malformed(e.to_string()))?;
    let obj = value
        .as_object()
        .ok_or_else(|| ParseError::Malformed("not a JSON object".into()))?;

    let market_code = require_str(obj, "code")?;
    if market_code.is_empty() {
        return Err(ParseError::InvalidField {
            field: "code",
            reason: "empty market code".into(),
        });
    }

    let trade_price = require_price(obj, "trade_price")?;
    let trade_volume = require_price(obj, "trade_volume")?;

    let timestamp = require(obj, "timestamp")?
        .as_u64()
        .ok_or_else(|| ParseError::InvalidField {
            field: "timestamp",
            reason: "not a non-negative integer".into(),
        })?;

    Ok(Tick {
        market_code: market_code.to_string(),
        trade_price,
        trade_volume,
        timestamp,
    })
}

fn require<'a>(obj: &'a Map<String, Value>, field: &'static str) -> Result<&'a Value, ParseError> {
    obj.get(field).ok_or(ParseError::MissingField(field))
}

fn require_str<'a>(obj: &'a Map<String, Value>, field: &'static str) -> Result<&'a str, ParseError> {
    require(obj, field)?
        .as_str()
        .ok_or_else(|| ParseError::InvalidField {
            field,
            reason: "not a string".into(),
        })
}

fn require_price(obj: &Map<String, Value>, field: &'static str) -> Result<f64, ParseError> {
    let value = require(obj, field)?
        .as_f64()
        .ok_or_else(|| ParseError::InvalidField {
            field,
            reason: "not a number".into(),
        })?;
    if !value.is_finite() || value < 0.0 {
        return Err(ParseError::InvalidField {
            field,
            reason: format!("out of range: {}", value),
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticker_frame() -> Vec<u8> {
        br#"{"type":"ticker","code":"KRW-BTC","trade_price":161500000.0,"trade_volume":0.0047,"timestamp":1756500000123,"change":"RISE"}"#.to_vec()
    }

    #[test]
    fn test_parse_valid_ticker() {
        let tick = parse(&ticker_frame()).unwrap();
        assert_eq!(tick.market_code, "KRW-BTC");
        assert_eq!(tick.trade_price, 161_500_000.0);
        assert_eq!(tick.trade_volume, 0.0047);
        assert_eq!(tick.timestamp, 1_756_500_000_123);
    }

    #[test]
    fn test_parse_missing_field() {
        let err = parse(br#"{"code":"KRW-BTC","trade_price":1.0,"timestamp":1}"#).unwrap_err();
        assert!(matches!(err, ParseError::MissingField("trade_volume")));
    }

    #[test]
    fn test_parse_negative_price_rejected() {
        let err =
            parse(br#"{"code":"KRW-BTC","trade_price":-1.0,"trade_volume":1.0,"timestamp":1}"#)
                .unwrap_err();
        assert!(matches!(
            err,
            ParseError::InvalidField {
                field: "trade_price",
                ..
            }
        ));
    }

    #[test]
    fn test_parse_empty_code_rejected() {
        let err = parse(br#"{"code":"","trade_price":1.0,"trade_volume":1.0,"timestamp":1}"#)
            .unwrap_err();
        assert!(matches!(err, ParseError::InvalidField { field: "code", .. }));
    }

    #[test]
    fn test_parse_rejects_non_object() {
        assert!(matches!(
            parse(b"[1,2,3]").unwrap_err(),
            ParseError::Malformed(_)
        ));
        assert!(matches!(
            parse(b"not json at all").unwrap_err(),
            ParseError::Malformed(_)
        ));
    }

    #[test]
    fn test_payload_roundtrips_through_parser() {
        let tick = parse(&ticker_frame()).unwrap();
        let payload = tick.to_payload().unwrap();
        let reparsed = parse(&payload).unwrap();
        assert_eq!(reparsed.market_code, tick.market_code);
        assert_eq!(reparsed.trade_price, tick.trade_price);
        assert_eq!(reparsed.timestamp, tick.timestamp);
    }
}
