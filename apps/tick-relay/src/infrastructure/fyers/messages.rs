//! Fyers Data Socket Message Types
//!
//! Wire format for the JSON data socket.
//!
//! # Outbound
//!
//! ```json
//! {"T": "SUB_DATA", "SLIST": ["NSE:SBIN-EQ"], "SUB_T": 1}
//! {"T": "SUB_DATA", "SLIST": ["NSE:SBIN-EQ"], "SUB_T": 0}
//! ```
//!
//! # Inbound
//!
//! Control frames carry an `s` status field:
//! ```json
//! {"s": "ok", "code": 200, "message": "Connected", "type": "cn"}
//! ```
//!
//! Ticks carry `symbol` and `ltp` plus any number of market fields:
//! ```json
//! {"symbol": "NSE:SBIN-EQ", "ltp": 812.5, "exch_feed_time": 1700000000, "vol_traded_today": 120000}
//! ```

use serde::{Deserialize, Serialize};

use crate::application::ports::FeedRequest;

/// Message type tag for subscription requests.
pub const SUB_DATA: &str = "SUB_DATA";

/// `SUB_T` value requesting a subscription.
pub const SUB_T_SUBSCRIBE: u8 = 1;

/// `SUB_T` value cancelling a subscription.
pub const SUB_T_UNSUBSCRIBE: u8 = 0;

/// Field carrying the instrument of a tick.
pub const FIELD_SYMBOL: &str = "symbol";

/// Field carrying the last traded price.
pub const FIELD_LTP: &str = "ltp";

/// Exchange feed time (epoch seconds).
pub const FIELD_EXCH_FEED_TIME: &str = "exch_feed_time";

/// Last traded time (epoch seconds), used when the feed time is absent.
pub const FIELD_LAST_TRADED_TIME: &str = "last_traded_time";

/// Field present on control frames only.
pub const FIELD_STATUS: &str = "s";

/// Control frame type for the connection handshake.
pub const CONTROL_CONNECTION: &str = "cn";

/// Subscribe/unsubscribe request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRequest {
    /// Always `SUB_DATA`.
    #[serde(rename = "T")]
    pub msg_type: String,

    /// Instruments.
    #[serde(rename = "SLIST")]
    pub symbols: Vec<String>,

    /// 1 to subscribe, 0 to unsubscribe.
    #[serde(rename = "SUB_T")]
    pub sub_type: u8,
}

impl SubscriptionRequest {
    /// Subscribe request.
    #[must_use]
    pub fn subscribe(symbols: Vec<String>) -> Self {
        Self {
            msg_type: SUB_DATA.to_string(),
            symbols,
            sub_type: SUB_T_SUBSCRIBE,
        }
    }

    /// Unsubscribe request.
    #[must_use]
    pub fn unsubscribe(symbols: Vec<String>) -> Self {
        Self {
            msg_type: SUB_DATA.to_string(),
            symbols,
            sub_type: SUB_T_UNSUBSCRIBE,
        }
    }

    /// Check whether this request subscribes.
    #[must_use]
    pub const fn is_subscribe(&self) -> bool {
        self.sub_type == SUB_T_SUBSCRIBE
    }
}

impl From<&FeedRequest> for SubscriptionRequest {
    fn from(request: &FeedRequest) -> Self {
        let symbols = request
            .symbols()
            .iter()
            .map(|symbol| symbol.as_str().to_string())
            .collect();

        match request {
            FeedRequest::Subscribe(_) => Self::subscribe(symbols),
            FeedRequest::Unsubscribe(_) => Self::unsubscribe(symbols),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::domain::subscription::InstrumentSymbol;

    #[test]
    fn subscribe_wire_format() {
        let request = SubscriptionRequest::subscribe(vec!["NSE:SBIN-EQ".into()]);
        let value = serde_json::to_value(&request).unwrap();

        assert_eq!(
            value,
            json!({"T": "SUB_DATA", "SLIST": ["NSE:SBIN-EQ"], "SUB_T": 1})
        );
    }

    #[test]
    fn unsubscribe_from_feed_request() {
        let request = FeedRequest::Unsubscribe(vec![
            InstrumentSymbol::parse("NSE:SBIN-EQ").unwrap(),
            InstrumentSymbol::parse("NSE:TCS-EQ").unwrap(),
        ]);
        let wire = SubscriptionRequest::from(&request);

        assert!(!wire.is_subscribe());
        assert_eq!(wire.symbols, vec!["NSE:SBIN-EQ", "NSE:TCS-EQ"]);
        assert_eq!(
            serde_json::to_value(&wire).unwrap()["SUB_T"],
            json!(0)
        );
    }
}
