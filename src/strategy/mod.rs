//! Strategy engine — market state in, order intents out.
//!
//! Strategies are pure: they read a [`MarketState`] snapshot and return
//! zero or more [`Intent`]s. They never touch the network or risk state;
//! the execution layer decides what actually gets sent.

pub mod latency;
pub mod quoting;

use std::fmt;

use serde::Serialize;

use crate::config::{StrategyConfig, StrategyKind};
use crate::types::{OrderSide, Outcome};
use latency::LatencyArb;
use quoting::QuotePair;

// ---------------------------------------------------------------------------
// Inputs & outputs
// ---------------------------------------------------------------------------

/// Everything a strategy may look at on one evaluation.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MarketState {
    /// Lead-source last price.
    pub lead_price: Option<f64>,
    pub lead_prev_price: Option<f64>,
    /// Lead-source percent move since the previous price.
    pub lead_change_pct: Option<f64>,
    /// Lag-source YES price (book mid), a probability.
    pub lag_price: Option<f64>,
    /// Inventory headroom per side.
    pub can_quote_yes: bool,
    pub can_quote_no: bool,
}

impl MarketState {
    pub fn can_quote(&self, outcome: Outcome) -> bool {
        match outcome {
            Outcome::Yes => self.can_quote_yes,
            Outcome::No => self.can_quote_no,
        }
    }
}

/// Take a position now.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TradeSignal {
    pub outcome: Outcome,
    pub side: OrderSide,
    pub price: f64,
    pub size: f64,
    /// Expected value ratio (implied probability / price).
    pub ev: f64,
}

/// Rest a bid on one outcome.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QuoteSignal {
    pub outcome: Outcome,
    pub price: f64,
    pub size: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum Intent {
    Trade(TradeSignal),
    Quote(QuoteSignal),
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Intent::Trade(t) => write!(
                f,
                "{} {} @ {:.3} x {:.2} (ev {:.3})",
                t.side, t.outcome, t.price, t.size, t.ev
            ),
            Intent::Quote(q) => write!(f, "quote {} @ {:.3} x {:.2}", q.outcome, q.price, q.size),
        }
    }
}

// ---------------------------------------------------------------------------
// Strategy seam
// ---------------------------------------------------------------------------

pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn evaluate(&self, state: &MarketState) -> Vec<Intent>;

    /// Quoting strategies keep resting orders and re-quote on mid drift.
    fn is_quoting(&self) -> bool;

    /// Whether the lead-source ticker feed must run.
    fn needs_lead_feed(&self) -> bool;
}

/// Build the configured strategy.
pub fn from_config(config: &StrategyConfig) -> Box<dyn Strategy> {
    match config.kind {
        StrategyKind::LatencyArb => Box::new(LatencyArb::new(config.latency.clone())),
        StrategyKind::QuotePair => Box::new(QuotePair::new(config.quoting.clone())),
    }
}
