//! Shared types for the RATCHET engine.
//!
//! These types form the data model used across feeds, discovery,
//! strategy, and execution. Venues are immutable once built; everything
//! that changes over time lives in the component that owns it.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Venue
// ---------------------------------------------------------------------------

/// One tradable market window with two binary outcomes.
///
/// Superseded on rotation, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Venue {
    pub venue_id: String,
    pub group_id: String,
    pub group_slug: String,
    /// Human-readable question / title.
    pub label: String,
    /// Close time as reported upstream (ISO-8601). `None` if unparseable.
    pub close_time: Option<DateTime<Utc>>,
    pub yes_token: String,
    pub no_token: String,
    pub accepting_orders: bool,
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.close_time {
            Some(t) => write!(f, "[{}] {} (closes {})", self.venue_id, self.label, t.format("%H:%M:%SZ")),
            None => write!(f, "[{}] {}", self.venue_id, self.label),
        }
    }
}

impl Venue {
    /// Token identifier for one outcome side.
    pub fn token(&self, outcome: Outcome) -> &str {
        match outcome {
            Outcome::Yes => &self.yes_token,
            Outcome::No => &self.no_token,
        }
    }

    /// Time left until close, or `None` when the close time is unknown.
    pub fn time_remaining(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.close_time.map(|t| t - now)
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Outcome side of a binary venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    Yes,
    No,
}

impl Outcome {
    pub const BOTH: [Outcome; 2] = [Outcome::Yes, Outcome::No];

    /// The opposite side.
    pub fn opposite(&self) -> Self {
        match self {
            Outcome::Yes => Outcome::No,
            Outcome::No => Outcome::Yes,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Yes => write!(f, "YES"),
            Outcome::No => write!(f, "NO"),
        }
    }
}

/// Order direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Settlement state of a venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    YesWon,
    NoWon,
    /// Not closed yet, or the lookup failed.
    Unresolved,
}

impl Resolution {
    /// `Some(true)` if YES won, `Some(false)` if NO won.
    pub fn yes_won(&self) -> Option<bool> {
        match self {
            Resolution::YesWon => Some(true),
            Resolution::NoWon => Some(false),
            Resolution::Unresolved => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        !matches!(self, Resolution::Unresolved)
    }

    /// Whether the given outcome side paid out.
    pub fn won(&self, outcome: Outcome) -> Option<bool> {
        self.yes_won().map(|yes| match outcome {
            Outcome::Yes => yes,
            Outcome::No => !yes,
        })
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::YesWon => write!(f, "YES won"),
            Resolution::NoWon => write!(f, "NO won"),
            Resolution::Unresolved => write!(f, "UNRESOLVED"),
        }
    }
}

// ---------------------------------------------------------------------------
// Positions & orders
// ---------------------------------------------------------------------------

/// A position opened on a venue, waiting for that venue to settle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingPosition {
    pub venue_id: String,
    pub outcome: Outcome,
    pub entry_price: Decimal,
    pub size: Decimal,
    /// Expected value computed at submission (1.0 when not applicable).
    pub ev: f64,
}

impl PendingPosition {
    /// Realised P&L once the venue has settled.
    ///
    /// Win pays `size * (1 - price)`, loss costs `size * price`,
    /// an unresolved venue books zero.
    pub fn realised_pnl(&self, resolution: Resolution) -> Decimal {
        match resolution.won(self.outcome) {
            Some(true) => self.size * (Decimal::ONE - self.entry_price),
            Some(false) => -(self.size * self.entry_price),
            None => Decimal::ZERO,
        }
    }
}

/// A resting post-only order as tracked locally.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RestingQuote {
    pub price: f64,
    pub size: f64,
}

/// Order request handed to the order gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub token_id: String,
    pub side: OrderSide,
    pub price: f64,
    pub size: f64,
}

/// Acknowledgement of a confirmed submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: String,
    pub submitted_at: DateTime<Utc>,
}

/// Outcome of a bulk cancel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CancelReport {
    pub canceled: Vec<String>,
    /// Order id → reason reported by the exchange.
    pub not_canceled: Vec<(String, String)>,
}

/// A fill reported by the order gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub token_id: String,
    pub side: OrderSide,
    pub price: f64,
    pub size: f64,
}

// ---------------------------------------------------------------------------
// Engine snapshot
// ---------------------------------------------------------------------------

/// Read-only view of the engine handed to renderers and the status API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub strategy: String,
    pub venue: Option<Venue>,
    pub lead_price: Option<f64>,
    pub lead_change_pct: Option<f64>,
    pub best_bid: Option<f64>,
    pub best_ask: Option<f64>,
    pub mid_price: Option<f64>,
    pub session_pnl: Decimal,
    pub daily_pnl: Decimal,
    pub circuit_breaker: bool,
    pub resting_yes: Option<RestingQuote>,
    pub resting_no: Option<RestingQuote>,
    pub inventory_yes: f64,
    pub inventory_no: f64,
    pub pending_positions: usize,
    pub collateral_balance: Option<f64>,
    pub pnl_history: Vec<Decimal>,
    pub updated_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Round to `places` decimal places.
pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// Convert a price/size float into a money decimal (6 dp).
pub fn to_decimal(value: f64) -> Decimal {
    use rust_decimal::prelude::FromPrimitive;
    Decimal::from_f64(value)
        .map(|d| d.round_dp(6))
        .unwrap_or(Decimal::ZERO)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
