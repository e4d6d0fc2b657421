//! In-memory collaborators for driving the engine end to end.
//!
//! `RecordingGateway` accepts every order (unless told to fail posts),
//! answers a fixed midpoint and hands out fills queued by the test. `ScriptedDiscovery` serves a single
//! rotating group whose markets the test can close and replace between
//! ticks. Both count calls so tests can assert on side effects.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use uuid::Uuid;

use ratchet::config::{DiscoveryConfig, EngineConfig, QuotingConfig, RiskConfig, StrategyConfig, StrategyKind};
use ratchet::engine::{EngineLoop, ExecutionRiskManager, VenueScanner};
use ratchet::feeds::ticker::TickerProtocol;
use ratchet::feeds::{FeedSettings, StreamingFeed};
use ratchet::platforms::gamma::{GammaEvent, GammaMarket};
use ratchet::platforms::{DiscoveryApi, EventQuery, GatewayError, OrderGateway};
use ratchet::strategy;
use ratchet::types::{CancelReport, Fill, OrderAck, OrderRequest, OrderSide};

pub const GROUP_SLUG: &str = "btc-updown-15m";

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingGateway {
    mid: Mutex<Option<f64>>,
    orders: Mutex<Vec<OrderRequest>>,
    open: Mutex<Vec<String>>,
    fills: Mutex<VecDeque<Fill>>,
    fail_posts: Mutex<bool>,
    cancel_calls: AtomicUsize,
}

impl RecordingGateway {
    pub fn with_mid(mid: f64) -> Self {
        Self {
            mid: Mutex::new(Some(mid)),
            ..Self::default()
        }
    }

    pub fn set_mid(&self, mid: Option<f64>) {
        *self.mid.lock().unwrap() = mid;
    }

    /// Answer every subsequent post with a 503.
    pub fn set_failing_posts(&self, fail: bool) {
        *self.fail_posts.lock().unwrap() = fail;
    }

    pub fn push_fill(&self, token_id: &str, side: OrderSide, price: f64, size: f64) {
        self.fills.lock().unwrap().push_back(Fill {
            token_id: token_id.to_string(),
            side,
            price,
            size,
        });
    }

    pub fn orders(&self) -> Vec<OrderRequest> {
        self.orders.lock().unwrap().clone()
    }

    pub fn cancel_calls(&self) -> usize {
        self.cancel_calls.load(Ordering::SeqCst)
    }

    pub fn open_orders(&self) -> usize {
        self.open.lock().unwrap().len()
    }
}

#[async_trait]
impl OrderGateway for RecordingGateway {
    async fn post_order(&self, order: &OrderRequest) -> Result<OrderAck, GatewayError> {
        if *self.fail_posts.lock().unwrap() {
            return Err(GatewayError::Http {
                status: 503,
                body: "unavailable".to_string(),
            });
        }
        let order_id = format!("mock-{}", Uuid::new_v4());
        self.orders.lock().unwrap().push(order.clone());
        self.open.lock().unwrap().push(order_id.clone());
        Ok(OrderAck {
            order_id,
            submitted_at: Utc::now(),
        })
    }

    async fn cancel_all(&self) -> Result<CancelReport, GatewayError> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        let canceled = std::mem::take(&mut *self.open.lock().unwrap());
        Ok(CancelReport {
            canceled,
            not_canceled: Vec::new(),
        })
    }

    async fn midpoint(&self, _token_id: &str) -> Result<Option<f64>, GatewayError> {
        Ok(*self.mid.lock().unwrap())
    }

    async fn collateral_balance(&self) -> Result<Option<f64>, GatewayError> {
        Ok(Some(500.0))
    }

    async fn fills(&self) -> Result<Vec<Fill>, GatewayError> {
        Ok(self.fills.lock().unwrap().drain(..).collect())
    }

    fn is_live(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

pub struct ScriptedDiscovery {
    markets: Mutex<Vec<GammaMarket>>,
    market_lookups: AtomicUsize,
    fail: Mutex<bool>,
}

impl ScriptedDiscovery {
    pub fn new(markets: Vec<GammaMarket>) -> Self {
        Self {
            markets: Mutex::new(markets),
            market_lookups: AtomicUsize::new(0),
            fail: Mutex::new(false),
        }
    }

    pub fn set_markets(&self, markets: Vec<GammaMarket>) {
        *self.markets.lock().unwrap() = markets;
    }

    /// Make every subsequent request fail.
    pub fn set_failing(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }

    pub fn market_lookups(&self) -> usize {
        self.market_lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DiscoveryApi for ScriptedDiscovery {
    async fn fetch_events(&self, query: &EventQuery) -> Result<Vec<GammaEvent>> {
        if *self.fail.lock().unwrap() {
            return Err(anyhow!("discovery unavailable"));
        }
        if query.slug.as_deref() != Some(GROUP_SLUG) {
            return Ok(Vec::new());
        }
        Ok(vec![GammaEvent {
            id: "group-1".to_string(),
            slug: GROUP_SLUG.to_string(),
            title: "Bitcoin Up or Down 15-minute".to_string(),
            markets: self.markets.lock().unwrap().clone(),
            ..GammaEvent::default()
        }])
    }

    async fn fetch_market(&self, market_id: &str) -> Result<GammaMarket> {
        self.market_lookups.fetch_add(1, Ordering::SeqCst);
        if *self.fail.lock().unwrap() {
            return Err(anyhow!("discovery unavailable"));
        }
        self.markets
            .lock()
            .unwrap()
            .iter()
            .find(|m| m.id == market_id)
            .cloned()
            .ok_or_else(|| anyhow!("market {market_id} not found"))
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// An open window closing `minutes` from now, decoded the way upstream
/// encodes it (token ids as a JSON string).
pub fn open_market(id: &str, minutes: i64) -> GammaMarket {
    let close = (Utc::now() + ChronoDuration::minutes(minutes)).to_rfc3339();
    serde_json::from_value(json!({
        "id": id,
        "question": format!("BTC up or down, window {id}"),
        "endDate": close,
        "closed": false,
        "acceptingOrders": true,
        "clobTokenIds": format!("[\"yes-{id}\", \"no-{id}\"]"),
    }))
    .unwrap()
}

/// A settled window. `yes_price` of "1" means YES won.
pub fn settled_market(id: &str, yes_price: &str) -> GammaMarket {
    let no_price = if yes_price == "1" { "0" } else { "1" };
    serde_json::from_value(json!({
        "id": id,
        "question": format!("BTC up or down, window {id}"),
        "endDate": (Utc::now() - ChronoDuration::minutes(1)).to_rfc3339(),
        "closed": true,
        "acceptingOrders": false,
        "clobTokenIds": format!("[\"yes-{id}\", \"no-{id}\"]"),
        "outcomePrices": format!("[\"{yes_price}\", \"{no_price}\"]"),
    }))
    .unwrap()
}

/// Every cadence at zero so each tick scans, evaluates and samples.
pub fn eager_engine_config() -> EngineConfig {
    EngineConfig {
        tick_ms: 10,
        strategy_interval_ms: 0,
        scan_interval_secs: 0,
        balance_interval_secs: 0,
        pnl_sample_interval_secs: 0,
        pnl_history_len: 4,
        resolution_attempts: 2,
        resolution_retry_ms: 1,
        ..EngineConfig::default()
    }
}

pub fn discovery_config() -> DiscoveryConfig {
    DiscoveryConfig {
        group_slug: GROUP_SLUG.to_string(),
        ..DiscoveryConfig::default()
    }
}

pub fn quoting_config() -> StrategyConfig {
    StrategyConfig {
        kind: StrategyKind::QuotePair,
        quoting: QuotingConfig {
            target_spread: 0.03,
            share_size: 20.0,
        },
        ..StrategyConfig::default()
    }
}

pub fn risk_config(daily_loss_limit_usd: f64) -> RiskConfig {
    RiskConfig {
        daily_loss_limit_usd,
        ..RiskConfig::default()
    }
}

/// A quoting engine wired to the in-memory collaborators, no feeds.
pub fn quoting_engine(
    gateway: Arc<RecordingGateway>,
    discovery: Arc<ScriptedDiscovery>,
    risk: RiskConfig,
) -> EngineLoop {
    let scanner = VenueScanner::new(discovery, discovery_config());
    let erm = ExecutionRiskManager::new(gateway, &risk);
    EngineLoop::new(
        eager_engine_config(),
        scanner,
        strategy::from_config(&quoting_config()),
        erm,
    )
}

/// A latency-arbitrage engine whose lead feed points at `lead_url`.
pub fn latency_engine(
    gateway: Arc<RecordingGateway>,
    discovery: Arc<ScriptedDiscovery>,
    lead_url: String,
) -> EngineLoop {
    let scanner = VenueScanner::new(discovery, discovery_config());
    let erm = ExecutionRiskManager::new(gateway, &risk_config(50.0));
    let lead = StreamingFeed::new(TickerProtocol, fast_feed_settings(lead_url));
    EngineLoop::new(
        eager_engine_config(),
        scanner,
        strategy::from_config(&StrategyConfig::default()),
        erm,
    )
    .with_lead_feed(lead)
}

/// Feed tuning short enough for tests.
pub fn fast_feed_settings(url: String) -> FeedSettings {
    FeedSettings {
        url,
        backoff_base: Duration::from_millis(20),
        backoff_max: Duration::from_millis(200),
        connect_timeout: Duration::from_millis(500),
        ping_interval: Duration::from_secs(5),
        first_value_timeout: Duration::from_secs(2),
        stop_timeout: Duration::from_secs(1),
    }
}
