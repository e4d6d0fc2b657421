//! External collaborators.
//!
//! Defines the two seams the engine talks through and their implementations:
//! - `DiscoveryApi` — venue discovery and settlement lookups ([`gamma`])
//! - `OrderGateway` — order submission, bulk cancel, fills, balance
//!   ([`clob`] for live trading through the signing relay, [`paper`] for
//!   dry runs)

pub mod clob;
pub mod gamma;
pub mod paper;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::types::{CancelReport, Fill, OrderAck, OrderRequest};
use gamma::{GammaEvent, GammaMarket};

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

/// Filters for one events query. Unset fields are not sent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventQuery {
    pub slug: Option<String>,
    pub tag_slug: Option<String>,
    pub slug_contains: Option<String>,
    /// Order by trailing 24h volume, highest first.
    pub by_volume: bool,
    pub limit: u32,
}

impl EventQuery {
    pub fn by_slug(slug: &str, limit: u32) -> Self {
        Self {
            slug: Some(slug.to_string()),
            limit,
            ..Self::default()
        }
    }

    pub fn by_tag(tag_slug: &str, limit: u32) -> Self {
        Self {
            tag_slug: Some(tag_slug.to_string()),
            limit,
            ..Self::default()
        }
    }

    pub fn slug_contains(fragment: &str, limit: u32) -> Self {
        Self {
            slug_contains: Some(fragment.to_string()),
            limit,
            ..Self::default()
        }
    }

    pub fn top_volume(limit: u32) -> Self {
        Self {
            by_volume: true,
            limit,
            ..Self::default()
        }
    }
}

/// Read-only venue discovery service.
///
/// Only active, non-closed groups are returned by `fetch_events`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DiscoveryApi: Send + Sync {
    async fn fetch_events(&self, query: &EventQuery) -> Result<Vec<GammaEvent>>;

    /// One market by id, closed or not.
    async fn fetch_market(&self, market_id: &str) -> Result<GammaMarket>;
}

// ---------------------------------------------------------------------------
// Order gateway
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum GatewayError {
    /// The exchange refused the order (e.g. a post-only order that would cross).
    #[error("Order rejected: {0}")]
    Rejected(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Unexpected response: {0}")]
    Malformed(String),
}

impl From<serde_json::Error> for GatewayError {
    fn from(e: serde_json::Error) -> Self {
        GatewayError::Malformed(e.to_string())
    }
}

/// Order submission and account queries.
///
/// Orders are post-only, good-till-cancelled limit orders. Construction and
/// wallet signing happen behind this boundary.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderGateway: Send + Sync {
    async fn post_order(&self, order: &OrderRequest) -> Result<OrderAck, GatewayError>;

    /// Cancel every resting order on the account.
    async fn cancel_all(&self) -> Result<CancelReport, GatewayError>;

    /// REST midpoint for a token, `None` if the book is empty.
    async fn midpoint(&self, token_id: &str) -> Result<Option<f64>, GatewayError>;

    /// Collateral balance in USD, `None` if the response shape is unknown.
    async fn collateral_balance(&self) -> Result<Option<f64>, GatewayError>;

    /// Fills not reported by a previous call.
    async fn fills(&self) -> Result<Vec<Fill>, GatewayError>;

    /// Whether orders reach a real exchange.
    fn is_live(&self) -> bool;

    fn name(&self) -> &'static str;
}

// ---------------------------------------------------------------------------
// Tolerant response parsing
// ---------------------------------------------------------------------------

/// Number or numeric string.
pub fn lenient_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|v| v.is_finite())
}

/// Currencies accepted as collateral in a `balances` list.
const COLLATERAL_CURRENCIES: [&str; 2] = ["USD", "USDC"];

/// Extract a collateral balance from a balance response.
///
/// Shapes are tried in this order, first hit wins:
/// 1. `balance`
/// 2. `available`
/// 3. `allowance`
/// 4. `balanceAllowance`
/// 5. `balances[]` entry whose `currency`/`asset` is USD or USDC:
///    `currentBalance`, then `balance`
///
/// Anything else is unknown.
pub fn parse_balance(value: &Value) -> Option<f64> {
    for key in ["balance", "available", "allowance", "balanceAllowance"] {
        if let Some(v) = value.get(key).and_then(lenient_f64) {
            return Some(v);
        }
    }

    let entries = value.get("balances")?.as_array()?;
    entries
        .iter()
        .filter(|entry| {
            entry
                .get("currency")
                .or_else(|| entry.get("asset"))
                .and_then(Value::as_str)
                .is_some_and(|c| COLLATERAL_CURRENCIES.iter().any(|k| k.eq_ignore_ascii_case(c)))
        })
        .find_map(|entry| {
            entry
                .get("currentBalance")
                .and_then(lenient_f64)
                .or_else(|| entry.get("balance").and_then(lenient_f64))
        })
}
