//! Latency-arbitrage strategy.
//!
//! When the lead source jumps, the lag venue's YES price is assumed to
//! follow. The expected catch-up is a heuristic bump,
//! `min(bump_cap, |pct| / 100 * bump_multiplier)`, not a calibrated model;
//! both knobs are configurable.

use std::fmt;

use tracing::debug;

use crate::config::LatencyConfig;
use crate::strategy::{Intent, MarketState, Strategy, TradeSignal};
use crate::types::{round_to, OrderSide, Outcome};

/// Implied probability never exceeds this.
const MAX_IMPLIED_PROB: f64 = 0.99;

/// Smallest order the venue accepts, in shares.
const MIN_SHARES: f64 = 1.0;

/// Why no signal was produced.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SkipReason {
    LagOutOfRange,
    NoLeadMove,
    BelowJumpThreshold,
    BelowEvThreshold { ev: f64 },
    TooSmall { size: f64 },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LagOutOfRange => write!(f, "lag price outside (0, 1)"),
            Self::NoLeadMove => write!(f, "lead move unknown"),
            Self::BelowJumpThreshold => write!(f, "lead move below jump threshold"),
            Self::BelowEvThreshold { ev } => write!(f, "ev {ev:.4} below threshold"),
            Self::TooSmall { size } => write!(f, "size {size:.2} below one share"),
        }
    }
}

/// Evaluate one latency-arbitrage opportunity.
pub fn check_signal(
    lag_price: f64,
    lead_change_pct: Option<f64>,
    config: &LatencyConfig,
) -> Result<TradeSignal, SkipReason> {
    if !(lag_price > 0.0 && lag_price < 1.0) {
        return Err(SkipReason::LagOutOfRange);
    }
    let pct = lead_change_pct
        .filter(|p| p.is_finite())
        .ok_or(SkipReason::NoLeadMove)?;
    if pct < config.jump_threshold_pct {
        return Err(SkipReason::BelowJumpThreshold);
    }

    let bump = config.bump_cap.min(pct.abs() / 100.0 * config.bump_multiplier);
    let implied = (lag_price + bump).min(MAX_IMPLIED_PROB);
    let ev = implied / lag_price;
    if ev < config.ev_threshold {
        return Err(SkipReason::BelowEvThreshold { ev });
    }

    let size = round_to(config.position_size_usd / lag_price, 2);
    if size < MIN_SHARES {
        return Err(SkipReason::TooSmall { size });
    }

    Ok(TradeSignal {
        outcome: Outcome::Yes,
        side: OrderSide::Buy,
        price: round_to(lag_price, 3),
        size,
        ev,
    })
}

pub struct LatencyArb {
    config: LatencyConfig,
}

impl LatencyArb {
    pub fn new(config: LatencyConfig) -> Self {
        Self { config }
    }
}

impl Strategy for LatencyArb {
    fn name(&self) -> &'static str {
        "latency_arb"
    }

    fn evaluate(&self, state: &MarketState) -> Vec<Intent> {
        let Some(lag) = state.lag_price else {
            return Vec::new();
        };
        match check_signal(lag, state.lead_change_pct, &self.config) {
            Ok(signal) => vec![Intent::Trade(signal)],
            Err(reason) => {
                debug!(lag, pct = ?state.lead_change_pct, reason = %reason, "No latency signal");
                Vec::new()
            }
        }
    }

    fn is_quoting(&self) -> bool {
        false
    }

    fn needs_lead_feed(&self) -> bool {
        true
    }
}
