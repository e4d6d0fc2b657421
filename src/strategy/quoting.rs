//! Symmetrical quote-pair strategy.
//!
//! Rests a bid on both outcomes around the mid: YES at `mid - spread`,
//! NO at `(1 - mid) - spread`. A side is skipped when its inventory is
//! full or its price falls outside the tradable range.

use crate::config::QuotingConfig;
use crate::strategy::{Intent, MarketState, QuoteSignal, Strategy};
use crate::types::{round_to, Outcome};

const MIN_PRICE: f64 = 0.01;
const MAX_PRICE: f64 = 0.99;
const MIN_SHARES: f64 = 1.0;

/// Quote prices for both outcomes, `None` unless `0 < mid < 1`.
pub fn quote_prices(mid: f64, spread: f64) -> Option<(f64, f64)> {
    if !(mid > 0.0 && mid < 1.0) {
        return None;
    }
    let yes = round_to(mid - spread, 3);
    let no = round_to((1.0 - mid) - spread, 3);
    Some((yes, no))
}

pub struct QuotePair {
    config: QuotingConfig,
}

impl QuotePair {
    pub fn new(config: QuotingConfig) -> Self {
        Self { config }
    }
}

impl Strategy for QuotePair {
    fn name(&self) -> &'static str {
        "quote_pair"
    }

    fn evaluate(&self, state: &MarketState) -> Vec<Intent> {
        let Some((yes, no)) = state
            .lag_price
            .and_then(|mid| quote_prices(mid, self.config.target_spread))
        else {
            return Vec::new();
        };

        let size = self.config.share_size;
        [(Outcome::Yes, yes), (Outcome::No, no)]
            .into_iter()
            .filter(|(outcome, price)| {
                state.can_quote(*outcome)
                    && (MIN_PRICE..=MAX_PRICE).contains(price)
                    && size >= MIN_SHARES
            })
            .map(|(outcome, price)| Intent::Quote(QuoteSignal { outcome, price, size }))
            .collect()
    }

    fn is_quoting(&self) -> bool {
        true
    }

    fn needs_lead_feed(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strat() -> QuotePair {
        QuotePair::new(QuotingConfig { target_spread: 0.03, share_size: 20.0 })
    }

    fn state(mid: f64, yes: bool, no: bool) -> MarketState {
        MarketState {
            lag_price: Some(mid),
            can_quote_yes: yes,
            can_quote_no: no,
            ..MarketState::default()
        }
    }

    fn prices(intents: &[Intent]) -> Vec<(Outcome, f64)> {
        intents
            .iter()
            .map(|i| match i {
                Intent::Quote(q) => (q.outcome, q.price),
                Intent::Trade(_) => panic!("quote strategy emitted a trade"),
            })
            .collect()
    }

    #[test]
    fn test_two_sided_quote() {
        let out = prices(&strat().evaluate(&state(0.52, true, true)));
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].0, Outcome::Yes);
        assert!((out[0].1 - 0.490).abs() < 1e-12);
        assert_eq!(out[1].0, Outcome::No);
        assert!((out[1].1 - 0.450).abs() < 1e-12);
    }

    #[test]
    fn test_inventory_cap_drops_one_side() {
        let out = prices(&strat().evaluate(&state(0.52, true, false)));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].0, Outcome::Yes);

        let out = prices(&strat().evaluate(&state(0.52, false, true)));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].0, Outcome::No);

        assert!(strat().evaluate(&state(0.52, false, false)).is_empty());
    }

    #[test]
    fn test_price_bounds() {
        // YES bid 0.0 is below the floor; NO bid 0.94 stays.
        let out = prices(&strat().evaluate(&state(0.03, true, true)));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].0, Outcome::No);
        assert!((out[0].1 - 0.94).abs() < 1e-12);
    }

    #[test]
    fn test_mid_out_of_range() {
        assert!(strat().evaluate(&state(0.0, true, true)).is_empty());
        assert!(strat().evaluate(&state(1.0, true, true)).is_empty());
        assert!(strat().evaluate(&MarketState { can_quote_yes: true, can_quote_no: true, ..MarketState::default() }).is_empty());
    }

    #[test]
    fn test_fractional_share_size_rejected() {
        let s = QuotePair::new(QuotingConfig { target_spread: 0.03, share_size: 0.5 });
        assert!(s.evaluate(&state(0.5, true, true)).is_empty());
    }
}
