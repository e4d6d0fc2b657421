//! Two-token order-book feed (lag source).
//!
//! Subscribes to both outcome tokens of a venue and tracks best bid,
//! best ask and mid of the YES token. Understands three event types:
//! `best_bid_ask`, `book` and `price_change`. Frames for tokens we did
//! not subscribe to and implausible prices leave the state untouched.

use serde::Serialize;
use serde_json::{json, Value};

use super::ticker::parse_price;
use super::{FeedError, FeedProtocol};

/// Prices at or above this are rejected as garbage.
pub const PRICE_SANITY_CEILING: f64 = 2.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct BookState {
    pub best_bid: Option<f64>,
    pub best_ask: Option<f64>,
    pub mid: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct OrderBookProtocol {
    yes_token: String,
    no_token: String,
}

impl OrderBookProtocol {
    pub fn new(yes_token: impl Into<String>, no_token: impl Into<String>) -> Self {
        Self {
            yes_token: yes_token.into(),
            no_token: no_token.into(),
        }
    }

    pub fn yes_token(&self) -> &str {
        &self.yes_token
    }

    pub fn no_token(&self) -> &str {
        &self.no_token
    }

    fn apply_event(&self, event: &Value, state: &mut BookState) -> Result<bool, FeedError> {
        let obj = event
            .as_object()
            .ok_or_else(|| FeedError::Malformed("book event is not an object".into()))?;

        match obj.get("event_type").and_then(Value::as_str) {
            Some("best_bid_ask") => {
                if !self.is_yes(obj.get("asset_id")) {
                    return Ok(false);
                }
                let bid = obj.get("best_bid").map(price_of).transpose()?;
                let ask = obj.get("best_ask").map(price_of).transpose()?;
                match (bid, ask) {
                    (Some(b), Some(a)) => Ok(update(state, b, a)),
                    _ => Ok(false),
                }
            }
            Some("book") => {
                // Book snapshots must name their token.
                match obj.get("asset_id") {
                    Some(id) if id_matches(id, &self.yes_token) => {}
                    _ => return Ok(false),
                }
                let best_bid = best_level(obj.get("bids"), f64::max)?;
                let best_ask = best_level(obj.get("asks"), f64::min)?;
                match (best_bid, best_ask) {
                    (Some(b), Some(a)) => Ok(update(state, b, a)),
                    _ => Ok(false),
                }
            }
            Some("price_change") => {
                let changes = match obj.get("price_changes") {
                    Some(Value::Array(items)) => items,
                    Some(Value::Null) | None => return Ok(false),
                    Some(other) => {
                        return Err(FeedError::Malformed(format!("price_changes not an array: {other}")))
                    }
                };
                let Some(change) = changes
                    .iter()
                    .find(|c| c.get("asset_id").is_some_and(|id| id_matches(id, &self.yes_token)))
                else {
                    return Ok(false);
                };
                let bid = change.get("best_bid").and_then(parse_price);
                let ask = change.get("best_ask").and_then(parse_price);
                match (bid, ask) {
                    (Some(b), Some(a)) => Ok(update(state, b, a)),
                    _ => Ok(false),
                }
            }
            _ => Ok(false),
        }
    }

    /// Absent id is accepted; a present id must be the YES token.
    fn is_yes(&self, asset_id: Option<&Value>) -> bool {
        match asset_id {
            None | Some(Value::Null) => true,
            Some(id) => id_matches(id, &self.yes_token),
        }
    }
}

impl FeedProtocol for OrderBookProtocol {
    type State = BookState;

    fn name(&self) -> &'static str {
        "order_book"
    }

    fn subscription(&self) -> Option<String> {
        Some(
            json!({
                "assets_ids": [self.yes_token, self.no_token],
                "type": "market",
                "custom_feature_enabled": true,
            })
            .to_string(),
        )
    }

    fn apply(&self, text: &str, state: &mut BookState) -> Result<bool, FeedError> {
        let value: Value = serde_json::from_str(text)?;

        // Initial snapshots can arrive batched in an array.
        if let Value::Array(events) = &value {
            let mut working = *state;
            let mut changed = false;
            for event in events {
                changed |= self.apply_event(event, &mut working)?;
            }
            if changed {
                *state = working;
            }
            return Ok(changed);
        }

        self.apply_event(&value, state)
    }

    fn has_value(state: &BookState) -> bool {
        state.mid.is_some()
    }
}

/// `0 < price < ceiling` on both sides.
pub fn plausible(bid: f64, ask: f64) -> bool {
    let ok = |p: f64| p.is_finite() && p > 0.0 && p < PRICE_SANITY_CEILING;
    ok(bid) && ok(ask)
}

fn update(state: &mut BookState, bid: f64, ask: f64) -> bool {
    if !plausible(bid, ask) {
        return false;
    }
    state.best_bid = Some(bid);
    state.best_ask = Some(ask);
    state.mid = Some((bid + ask) / 2.0);
    true
}

fn price_of(raw: &Value) -> Result<f64, FeedError> {
    parse_price(raw).ok_or_else(|| FeedError::Malformed(format!("unexpected price: {raw}")))
}

fn id_matches(raw: &Value, token: &str) -> bool {
    match raw {
        Value::String(s) => s == token,
        Value::Number(n) => n.to_string() == token,
        _ => false,
    }
}

/// Best price across a side of the book, picking with `better`.
fn best_level(levels: Option<&Value>, better: fn(f64, f64) -> f64) -> Result<Option<f64>, FeedError> {
    let levels = match levels {
        Some(Value::Array(items)) => items,
        Some(Value::Null) | None => return Ok(None),
        Some(other) => return Err(FeedError::Malformed(format!("book side not an array: {other}"))),
    };
    let mut best: Option<f64> = None;
    for level in levels {
        let price = level
            .get("price")
            .and_then(parse_price)
            .ok_or_else(|| FeedError::Malformed(format!("book level without price: {level}")))?;
        best = Some(match best {
            Some(b) => better(b, price),
            None => price,
        });
    }
    Ok(best)
}
