//! Fyers Frame Codec
//!
//! Decodes inbound data socket text into `FeedFrame`s and encodes outbound
//! subscription requests.
//!
//! Inbound frames are a single JSON object or an array of objects. Objects
//! with an `s` field and no `symbol` are control frames; everything else
//! must be a tick carrying `symbol` and `ltp`. Remaining fields pass through
//! untouched.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::{Map, Number, Value};

use super::messages::{
    FIELD_EXCH_FEED_TIME, FIELD_LAST_TRADED_TIME, FIELD_LTP, FIELD_STATUS, FIELD_SYMBOL,
    SubscriptionRequest,
};
use crate::application::ports::{FeedRequest, ParseError, TickNormalizer};
use crate::domain::streaming::{ControlFrame, FeedFrame, TickRecord};
use crate::domain::subscription::InstrumentSymbol;

/// JSON codec for the Fyers data socket.
#[derive(Debug, Default, Clone)]
pub struct FyersCodec;

impl FyersCodec {
    /// Create a new codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Encode a subscription request as a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn encode(&self, request: &FeedRequest) -> Result<String, serde_json::Error> {
        serde_json::to_string(&SubscriptionRequest::from(request))
    }

    /// Decode a text frame, stamping ticks without an exchange time with
    /// `received_at`.
    ///
    /// # Errors
    ///
    /// Returns `ParseError` if the frame or any element in it is malformed.
    pub fn decode(&self, text: &str, received_at: DateTime<Utc>) -> Result<Vec<FeedFrame>, ParseError> {
        let value: Value =
            serde_json::from_str(text.trim()).map_err(|e| ParseError::Json(e.to_string()))?;

        match value {
            Value::Object(map) => Ok(vec![decode_object(map, received_at)?]),
            Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::Object(map) => decode_object(map, received_at),
                    other => Err(ParseError::Shape(format!(
                        "expected object in array, got {}",
                        type_name(&other)
                    ))),
                })
                .collect(),
            other => Err(ParseError::Shape(format!(
                "expected JSON object or array, got {}",
                type_name(&other)
            ))),
        }
    }
}

impl TickNormalizer for FyersCodec {
    fn normalize(&self, raw: &str) -> Result<Vec<FeedFrame>, ParseError> {
        self.decode(raw, Utc::now())
    }
}

// =============================================================================
// Decoding
// =============================================================================

fn decode_object(mut map: Map<String, Value>, received_at: DateTime<Utc>) -> Result<FeedFrame, ParseError> {
    if map.contains_key(FIELD_STATUS) && !map.contains_key(FIELD_SYMBOL) {
        let control: ControlFrame = serde_json::from_value(Value::Object(map))
            .map_err(|e| ParseError::Shape(format!("invalid control frame: {e}")))?;
        return Ok(FeedFrame::Control(control));
    }

    let symbol = match map.remove(FIELD_SYMBOL) {
        Some(Value::String(raw)) => {
            InstrumentSymbol::parse(&raw).map_err(|e| ParseError::InvalidField {
                field: FIELD_SYMBOL,
                reason: e.to_string(),
            })?
        }
        None | Some(Value::Null) => return Err(ParseError::MissingField(FIELD_SYMBOL)),
        Some(other) => {
            return Err(ParseError::InvalidField {
                field: FIELD_SYMBOL,
                reason: format!("expected string, got {}", type_name(&other)),
            });
        }
    };

    let last_price = match map.remove(FIELD_LTP) {
        Some(Value::Number(n)) => decimal_from_number(&n)?,
        Some(Value::String(s)) => Decimal::from_str(s.trim()).map_err(|e| ParseError::InvalidField {
            field: FIELD_LTP,
            reason: e.to_string(),
        })?,
        None | Some(Value::Null) => return Err(ParseError::MissingField(FIELD_LTP)),
        Some(other) => {
            return Err(ParseError::InvalidField {
                field: FIELD_LTP,
                reason: format!("expected number, got {}", type_name(&other)),
            });
        }
    };

    let timestamp = map
        .remove(FIELD_EXCH_FEED_TIME)
        .as_ref()
        .and_then(epoch_seconds)
        .or_else(|| map.get(FIELD_LAST_TRADED_TIME).and_then(epoch_seconds))
        .unwrap_or(received_at);

    Ok(FeedFrame::Tick(
        TickRecord::new(symbol, last_price, timestamp).with_extra(map),
    ))
}

fn decimal_from_number(n: &Number) -> Result<Decimal, ParseError> {
    if let Some(i) = n.as_i64() {
        return Ok(Decimal::from(i));
    }

    let text = n.to_string();
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map_err(|e| ParseError::InvalidField {
            field: FIELD_LTP,
            reason: e.to_string(),
        })
}

fn epoch_seconds(value: &Value) -> Option<DateTime<Utc>> {
    let secs = match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            #[allow(clippy::cast_possible_truncation)]
            n.as_f64().filter(|f| f.is_finite()).map(|f| f as i64)
        })?,
        Value::String(s) => s.trim().parse::<i64>().ok()?,
        _ => return None,
    };
    if secs <= 0 {
        return None;
    }
    DateTime::from_timestamp(secs, 0)
}

const fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
