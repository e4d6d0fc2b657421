//! Single-symbol ticker feed (lead source).
//!
//! Expects 24h-ticker style objects carrying the last trade price in
//! field `"c"`, as a string or a number. Everything else (subscription
//! acks, heartbeats) is ignored.

use serde::Serialize;
use serde_json::Value;

use super::{FeedError, FeedProtocol};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TickerState {
    pub price: Option<f64>,
    pub prev_price: Option<f64>,
}

impl TickerState {
    /// Percent change between the last two prices.
    pub fn change_pct(&self) -> Option<f64> {
        let price = self.price?;
        let prev = self.prev_price?;
        if prev <= 0.0 {
            return None;
        }
        Some((price - prev) / prev * 100.0)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TickerProtocol;

impl FeedProtocol for TickerProtocol {
    type State = TickerState;

    fn name(&self) -> &'static str {
        "ticker"
    }

    fn apply(&self, text: &str, state: &mut TickerState) -> Result<bool, FeedError> {
        let value: Value = serde_json::from_str(text)?;
        let obj = value
            .as_object()
            .ok_or_else(|| FeedError::Malformed("ticker frame is not an object".into()))?;

        let Some(raw) = obj.get("c") else {
            return Ok(false);
        };
        let price = parse_price(raw)
            .ok_or_else(|| FeedError::Malformed(format!("unexpected price field: {raw}")))?;

        if !(price.is_finite() && price > 0.0) {
            return Ok(false);
        }

        state.prev_price = state.price;
        state.price = Some(price);
        Ok(true)
    }

    fn has_value(state: &TickerState) -> bool {
        state.price.is_some()
    }
}

/// Number or numeric string.
pub(crate) fn parse_price(raw: &Value) -> Option<f64> {
    match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}
