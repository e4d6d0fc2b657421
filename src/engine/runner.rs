//! Engine loop — the fixed-cadence scheduler.
//!
//! Each tick:
//! 1. halt if the circuit breaker has tripped
//! 2. refresh lead price and lag mid from the feeds (REST midpoint fallback)
//! 3. on the scan cadence, poll the scanner and rotate on a venue change
//! 4. on the strategy cadence, evaluate and forward intents
//! 5. poll fills, refresh the balance, sample P&L and publish a snapshot
//!
//! Rotation settles every pending position of the outgoing venue and
//! cancels resting orders before the incoming venue becomes current, so
//! nothing evaluated afterwards can be attributed to the expired venue.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::engine::executor::ExecutionRiskManager;
use crate::engine::scanner::VenueScanner;
use crate::feeds::order_book::{BookState, OrderBookProtocol};
use crate::feeds::ticker::{TickerProtocol, TickerState};
use crate::feeds::{FeedSettings, StreamingFeed};
use crate::strategy::{Intent, MarketState, Strategy};
use crate::types::{to_decimal, EngineSnapshot, OrderSide, Outcome, PendingPosition, Venue};

/// Read-only engine view shared with renderers and the status API.
pub type SharedSnapshot = Arc<RwLock<EngineSnapshot>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Continue,
    /// Breaker tripped; trading is over for this process.
    Halted,
}

pub struct EngineLoop {
    config: EngineConfig,
    scanner: VenueScanner,
    strategy: Box<dyn Strategy>,
    erm: ExecutionRiskManager,
    lead_feed: Option<StreamingFeed<TickerProtocol>>,
    book_settings: Option<FeedSettings>,
    book_feed: Option<StreamingFeed<OrderBookProtocol>>,
    venue: Option<Venue>,
    lead: TickerState,
    book: BookState,
    lag_price: Option<f64>,
    balance: Option<f64>,
    pnl_history: VecDeque<Decimal>,
    last_scan: Option<Instant>,
    last_eval: Option<Instant>,
    last_balance: Option<Instant>,
    last_sample: Option<Instant>,
    snapshot: SharedSnapshot,
}

impl EngineLoop {
    pub fn new(
        config: EngineConfig,
        scanner: VenueScanner,
        strategy: Box<dyn Strategy>,
        erm: ExecutionRiskManager,
    ) -> Self {
        let snapshot = Arc::new(RwLock::new(EngineSnapshot {
            strategy: strategy.name().to_string(),
            ..EngineSnapshot::default()
        }));
        Self {
            config,
            scanner,
            strategy,
            erm,
            lead_feed: None,
            book_settings: None,
            book_feed: None,
            venue: None,
            lead: TickerState::default(),
            book: BookState::default(),
            lag_price: None,
            balance: None,
            pnl_history: VecDeque::new(),
            last_scan: None,
            last_eval: None,
            last_balance: None,
            last_sample: None,
            snapshot,
        }
    }

    /// Lead-source ticker feed, started in `start()`.
    pub fn with_lead_feed(mut self, feed: StreamingFeed<TickerProtocol>) -> Self {
        self.lead_feed = Some(feed);
        self
    }

    /// Order-book feed settings; a feed is opened per venue.
    pub fn with_book_feed(mut self, settings: FeedSettings) -> Self {
        self.book_settings = Some(settings);
        self
    }

    pub fn snapshot_handle(&self) -> SharedSnapshot {
        Arc::clone(&self.snapshot)
    }

    pub fn current_venue(&self) -> Option<&Venue> {
        self.venue.as_ref()
    }

    pub fn risk(&self) -> &ExecutionRiskManager {
        &self.erm
    }

    pub fn risk_mut(&mut self) -> &mut ExecutionRiskManager {
        &mut self.erm
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Startup hygiene and first scan: cancel stale orders, refresh the
    /// balance, start the lead feed, look for a venue.
    pub async fn start(&mut self) {
        let stale = self.erm.cancel_all().await;
        info!(canceled = stale, "Stale orders cleared");
        self.refresh_balance(Instant::now()).await;

        if self.strategy.needs_lead_feed() {
            if let Some(feed) = self.lead_feed.as_mut() {
                if !feed.start().await {
                    warn!("Lead feed has no price yet, continuing");
                }
            }
        }

        self.scan(Instant::now()).await;
        if self.venue.is_none() {
            warn!("No active venue yet, will keep scanning");
        }
        self.publish().await;
    }

    /// Tick until `shutdown` resolves or the breaker trips, then clean up.
    pub async fn run<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = interval(self.config.tick());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        info!(
            strategy = self.strategy.name(),
            tick_ms = self.config.tick_ms,
            "Entering main loop. Press Ctrl+C to stop."
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.tick().await == TickOutcome::Halted {
                        break;
                    }
                }
                _ = &mut shutdown => {
                    info!("Shutdown signal received.");
                    break;
                }
            }
        }

        self.shutdown().await;
    }

    /// Stop feeds and cancel resting orders. Errors are logged only.
    pub async fn shutdown(&mut self) {
        if let Some(feed) = self.lead_feed.as_mut() {
            feed.stop().await;
        }
        if let Some(feed) = self.book_feed.as_mut() {
            feed.stop().await;
        }
        self.erm.cancel_all().await;
        self.publish().await;
        info!(
            session_pnl = %self.erm.session_pnl(),
            pending = self.erm.pending_count(),
            "Engine stopped"
        );
    }

    // -----------------------------------------------------------------------
    // Tick
    // -----------------------------------------------------------------------

    pub async fn tick(&mut self) -> TickOutcome {
        let now = Instant::now();

        if self.erm.is_tripped() {
            self.publish().await;
            error!(
                daily_pnl = %self.erm.daily_pnl(),
                "CIRCUIT BREAKER: trading halted, operator restart required"
            );
            return TickOutcome::Halted;
        }

        self.refresh_prices().await;

        if due(self.last_scan, self.config.scan_interval(), now) {
            self.scan(now).await;
        }

        if due(self.last_eval, self.config.strategy_interval(), now) {
            self.last_eval = Some(now);
            self.evaluate().await;
        }

        if self.strategy.is_quoting() {
            self.poll_fills().await;
        }

        if due(self.last_balance, self.config.balance_interval(), now) {
            self.refresh_balance(now).await;
        }

        if due(self.last_sample, self.config.pnl_sample_interval(), now) {
            self.last_sample = Some(now);
            self.pnl_history.push_back(self.erm.session_pnl());
            while self.pnl_history.len() > self.config.pnl_history_len {
                self.pnl_history.pop_front();
            }
        }

        self.publish().await;
        TickOutcome::Continue
    }

    async fn refresh_prices(&mut self) {
        if let Some(feed) = &self.lead_feed {
            self.lead = feed.value();
        }

        self.book = match &self.book_feed {
            Some(feed) => feed.value(),
            None => BookState::default(),
        };

        let Some(venue) = self.venue.as_ref().filter(|v| v.accepting_orders) else {
            self.lag_price = None;
            return;
        };

        self.lag_price = match self.book.mid {
            Some(mid) => Some(mid),
            None => match self.erm.gateway().midpoint(&venue.yes_token).await {
                Ok(mid) => mid,
                Err(e) => {
                    debug!(error = %e, "REST midpoint unavailable");
                    None
                }
            },
        };
    }

    // -----------------------------------------------------------------------
    // Rotation
    // -----------------------------------------------------------------------

    async fn scan(&mut self, now: Instant) {
        self.last_scan = Some(now);
        let Some(next) = self.scanner.get_active_venue().await else {
            return;
        };

        let changed = self
            .venue
            .as_ref()
            .map_or(true, |current| current.venue_id != next.venue_id);
        if changed {
            self.rotate(next).await;
        }
    }

    /// Settle the outgoing venue, cancel its orders, then swap.
    async fn rotate(&mut self, next: Venue) {
        if let Some(previous) = self.venue.take() {
            if !self.erm.pending_for(&previous.venue_id).is_empty() {
                let resolution = self
                    .scanner
                    .get_resolution_with_retry(
                        &previous.venue_id,
                        self.config.resolution_attempts,
                        self.config.resolution_retry(),
                    )
                    .await;
                self.erm.settle_venue(&previous.venue_id, resolution);
            }
            self.erm.cancel_all().await;
            self.erm.reset_inventory();
            info!(from = %previous.venue_id, to = %next.venue_id, "Rotating venue");
        }

        if let Some(mut feed) = self.book_feed.take() {
            feed.stop().await;
        }
        self.book = BookState::default();
        self.lag_price = None;

        info!(venue = %next, "Active venue");
        let tokens = (next.yes_token.clone(), next.no_token.clone());
        self.venue = Some(next);

        if let Some(settings) = &self.book_settings {
            let mut feed = StreamingFeed::new(OrderBookProtocol::new(tokens.0, tokens.1), settings.clone());
            if !feed.start().await {
                warn!("Order book has no mid yet, using REST midpoint meanwhile");
            }
            self.book_feed = Some(feed);
        }
    }

    // -----------------------------------------------------------------------
    // Strategy
    // -----------------------------------------------------------------------

    async fn evaluate(&mut self) {
        let Some(venue) = self.venue.clone().filter(|v| v.accepting_orders) else {
            return;
        };

        let state = MarketState {
            lead_price: self.lead.price,
            lead_prev_price: self.lead.prev_price,
            lead_change_pct: self.lead.change_pct(),
            lag_price: self.lag_price,
            can_quote_yes: self.erm.can_quote(Outcome::Yes),
            can_quote_no: self.erm.can_quote(Outcome::No),
        };

        if self.strategy.is_quoting() {
            self.requote(&venue, &state).await;
            return;
        }

        for intent in self.strategy.evaluate(&state) {
            let Intent::Trade(signal) = intent else {
                continue;
            };
            info!(intent = %intent, venue = %venue.venue_id, "Signal");
            let token = venue.token(signal.outcome);
            if self
                .erm
                .place_order(token, signal.side, signal.price, signal.size, None)
                .await
            {
                self.erm.record_position(PendingPosition {
                    venue_id: venue.venue_id.clone(),
                    outcome: signal.outcome,
                    entry_price: to_decimal(signal.price),
                    size: to_decimal(signal.size),
                    ev: signal.ev,
                });
            }
        }
    }

    /// Cancel-and-replace when the mid drifted past the threshold.
    async fn requote(&mut self, venue: &Venue, state: &MarketState) {
        let Some(mid) = state.lag_price else {
            return;
        };
        if !self.erm.should_requote(mid) {
            return;
        }

        self.erm.cancel_all().await;
        let mut placed = 0;
        for intent in self.strategy.evaluate(state) {
            let Intent::Quote(quote) = intent else {
                continue;
            };
            let posted = self
                .erm
                .place_order(
                    venue.token(quote.outcome),
                    OrderSide::Buy,
                    quote.price,
                    quote.size,
                    Some(quote.outcome),
                )
                .await;
            if posted {
                placed += 1;
            }
        }

        // Without a confirmed quote the next tick retries at the same mid.
        if placed == 0 {
            debug!(mid, "No quote placed, will retry");
            return;
        }
        self.erm.set_last_mid(mid);
        debug!(mid, placed, "Re-quoted");
    }

    async fn poll_fills(&mut self) {
        let Some(venue) = self.venue.clone() else {
            return;
        };
        match self.erm.gateway().fills().await {
            Ok(fills) if !fills.is_empty() => self.erm.apply_fills(&venue, &fills),
            Ok(_) => {}
            Err(e) => debug!(error = %e, "Fill poll failed"),
        }
    }

    // -----------------------------------------------------------------------
    // Display state
    // -----------------------------------------------------------------------

    async fn refresh_balance(&mut self, now: Instant) {
        self.last_balance = Some(now);
        match self.erm.gateway().collateral_balance().await {
            Ok(balance) => {
                self.balance = balance;
                debug!(?balance, "Balance refreshed");
            }
            Err(e) => warn!(error = %e, "Balance refresh failed"),
        }
    }

    async fn publish(&mut self) {
        let snapshot = EngineSnapshot {
            strategy: self.strategy.name().to_string(),
            venue: self.venue.clone(),
            lead_price: self.lead.price,
            lead_change_pct: self.lead.change_pct(),
            best_bid: self.book.best_bid,
            best_ask: self.book.best_ask,
            mid_price: self.lag_price,
            session_pnl: self.erm.session_pnl(),
            daily_pnl: self.erm.daily_pnl(),
            circuit_breaker: self.erm.is_tripped(),
            resting_yes: self.erm.resting(Outcome::Yes),
            resting_no: self.erm.resting(Outcome::No),
            inventory_yes: self.erm.inventory(Outcome::Yes),
            inventory_no: self.erm.inventory(Outcome::No),
            pending_positions: self.erm.pending_count(),
            collateral_balance: self.balance,
            pnl_history: self.pnl_history.iter().copied().collect(),
            updated_at: Some(Utc::now()),
        };
        *self.snapshot.write().await = snapshot;
    }
}

fn due(last: Option<Instant>, every: Duration, now: Instant) -> bool {
    last.map_or(true, |t| now.duration_since(t) >= every)
}
