//! Execution and risk manager.
//!
//! Sole owner of risk state: the P&L ledger and its breaker, per-outcome
//! inventory, one resting quote per outcome, the last quoted mid and the
//! positions awaiting settlement. Every mutation goes through `&mut self`,
//! so P&L recording and the breaker check can never interleave.
//!
//! Gateway failures are logged and reported as `false`/empty results;
//! nothing here propagates an error to the engine loop.

use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::config::RiskConfig;
use crate::engine::accountant::PnlLedger;
use crate::platforms::{GatewayError, OrderGateway};
use crate::types::{
    to_decimal, Fill, OrderRequest, OrderSide, Outcome, PendingPosition, Resolution, RestingQuote,
    Venue,
};

pub struct ExecutionRiskManager {
    gateway: Arc<dyn OrderGateway>,
    ledger: PnlLedger,
    max_inventory_yes: f64,
    max_inventory_no: f64,
    mid_drift_threshold: f64,
    inventory_yes: f64,
    inventory_no: f64,
    resting_yes: Option<RestingQuote>,
    resting_no: Option<RestingQuote>,
    last_mid: Option<f64>,
    pending: HashMap<String, Vec<PendingPosition>>,
}

impl ExecutionRiskManager {
    pub fn new(gateway: Arc<dyn OrderGateway>, risk: &RiskConfig) -> Self {
        Self {
            gateway,
            ledger: PnlLedger::new(to_decimal(risk.daily_loss_limit_usd)),
            max_inventory_yes: risk.max_inventory_yes,
            max_inventory_no: risk.max_inventory_no,
            mid_drift_threshold: risk.mid_drift_threshold,
            inventory_yes: 0.0,
            inventory_no: 0.0,
            resting_yes: None,
            resting_no: None,
            last_mid: None,
            pending: HashMap::new(),
        }
    }

    pub fn gateway(&self) -> &Arc<dyn OrderGateway> {
        &self.gateway
    }

    // -----------------------------------------------------------------------
    // P&L and breaker
    // -----------------------------------------------------------------------

    /// Record realised P&L. The only way the breaker trips.
    pub fn record_pnl(&mut self, delta: Decimal) {
        self.ledger.record(delta);
    }

    pub fn is_tripped(&self) -> bool {
        self.ledger.is_tripped()
    }

    pub fn session_pnl(&self) -> Decimal {
        self.ledger.session_pnl()
    }

    pub fn daily_pnl(&mut self) -> Decimal {
        self.ledger.daily_pnl()
    }

    pub fn ledger_mut(&mut self) -> &mut PnlLedger {
        &mut self.ledger
    }

    // -----------------------------------------------------------------------
    // Orders
    // -----------------------------------------------------------------------

    /// Submit a post-only GTC limit order.
    ///
    /// Returns `false` without touching the gateway once the breaker has
    /// tripped. A rejection (including a post-only order that would cross)
    /// is a normal `false`. On confirmed submission the order becomes the
    /// resting quote for `outcome`, if one is given.
    pub async fn place_order(
        &mut self,
        token_id: &str,
        side: OrderSide,
        price: f64,
        size: f64,
        outcome: Option<Outcome>,
    ) -> bool {
        if self.is_tripped() {
            debug!(token = token_id, "Breaker tripped, order not placed");
            return false;
        }

        let request = OrderRequest {
            token_id: token_id.to_string(),
            side,
            price,
            size,
        };

        match self.gateway.post_order(&request).await {
            Ok(ack) => {
                if let Some(outcome) = outcome {
                    *self.resting_mut(outcome) = Some(RestingQuote { price, size });
                }
                info!(
                    order_id = %ack.order_id,
                    side = %side,
                    outcome = ?outcome,
                    price = format!("{price:.3}"),
                    size = format!("{size:.2}"),
                    "Posted post-only order"
                );
                true
            }
            Err(GatewayError::Rejected(reason)) => {
                info!(token = token_id, price, reason = %reason, "Order rejected");
                false
            }
            Err(e) => {
                warn!(token = token_id, price, error = %e, "Order submission failed");
                false
            }
        }
    }

    /// Best-effort bulk cancel. Local resting state is cleared whatever
    /// the exchange reports. Returns how many orders were canceled.
    pub async fn cancel_all(&mut self) -> usize {
        self.resting_yes = None;
        self.resting_no = None;

        match self.gateway.cancel_all().await {
            Ok(report) => {
                for (order_id, reason) in &report.not_canceled {
                    warn!(order_id = %order_id, reason = %reason, "Order not canceled");
                }
                if !report.canceled.is_empty() {
                    info!(count = report.canceled.len(), "Canceled orders");
                }
                report.canceled.len()
            }
            Err(e) => {
                warn!(error = %e, "cancel_all failed");
                0
            }
        }
    }

    // -----------------------------------------------------------------------
    // Quoting gates
    // -----------------------------------------------------------------------

    /// True with no recorded mid, or when the mid moved more than the
    /// drift threshold since the last quote.
    pub fn should_requote(&self, current_mid: f64) -> bool {
        match self.last_mid {
            None => true,
            Some(last) => (current_mid - last).abs() > self.mid_drift_threshold,
        }
    }

    pub fn set_last_mid(&mut self, mid: f64) {
        self.last_mid = Some(mid);
    }

    pub fn last_mid(&self) -> Option<f64> {
        self.last_mid
    }

    /// Whether `outcome` still has inventory headroom.
    pub fn can_quote(&self, outcome: Outcome) -> bool {
        self.inventory(outcome) < self.max_inventory(outcome)
    }

    pub fn inventory(&self, outcome: Outcome) -> f64 {
        match outcome {
            Outcome::Yes => self.inventory_yes,
            Outcome::No => self.inventory_no,
        }
    }

    pub fn resting(&self, outcome: Outcome) -> Option<RestingQuote> {
        match outcome {
            Outcome::Yes => self.resting_yes,
            Outcome::No => self.resting_no,
        }
    }

    fn max_inventory(&self, outcome: Outcome) -> f64 {
        match outcome {
            Outcome::Yes => self.max_inventory_yes,
            Outcome::No => self.max_inventory_no,
        }
    }

    fn resting_mut(&mut self, outcome: Outcome) -> &mut Option<RestingQuote> {
        match outcome {
            Outcome::Yes => &mut self.resting_yes,
            Outcome::No => &mut self.resting_no,
        }
    }

    // -----------------------------------------------------------------------
    // Fills and positions
    // -----------------------------------------------------------------------

    /// Adjust inventory by a signed size, kept within `[0, max]`.
    pub fn record_fill(&mut self, outcome: Outcome, signed_size: f64) {
        let max = self.max_inventory(outcome);
        let slot = match outcome {
            Outcome::Yes => &mut self.inventory_yes,
            Outcome::No => &mut self.inventory_no,
        };
        *slot = (*slot + signed_size).clamp(0.0, max);
    }

    /// Apply gateway fills for the current venue.
    ///
    /// Buys add inventory and open a pending position; sells reduce
    /// inventory. Fills for other tokens are ignored.
    pub fn apply_fills(&mut self, venue: &Venue, fills: &[Fill]) {
        for fill in fills {
            let outcome = if fill.token_id == venue.yes_token {
                Outcome::Yes
            } else if fill.token_id == venue.no_token {
                Outcome::No
            } else {
                debug!(token = %fill.token_id, "Fill for a token outside the current venue");
                continue;
            };

            match fill.side {
                OrderSide::Buy => {
                    self.record_fill(outcome, fill.size);
                    self.record_position(PendingPosition {
                        venue_id: venue.venue_id.clone(),
                        outcome,
                        entry_price: to_decimal(fill.price),
                        size: to_decimal(fill.size),
                        ev: 1.0,
                    });
                    if let Some(mut quote) = self.resting(outcome) {
                        quote.size -= fill.size;
                        *self.resting_mut(outcome) = (quote.size > 0.0).then_some(quote);
                    }
                }
                OrderSide::Sell => self.record_fill(outcome, -fill.size),
            }
            info!(
                outcome = %outcome,
                side = %fill.side,
                price = format!("{:.3}", fill.price),
                size = format!("{:.2}", fill.size),
                inventory = self.inventory(outcome),
                "Fill"
            );
        }
    }

    pub fn record_position(&mut self, position: PendingPosition) {
        self.pending
            .entry(position.venue_id.clone())
            .or_default()
            .push(position);
    }

    pub fn pending_count(&self) -> usize {
        self.pending.values().map(Vec::len).sum()
    }

    pub fn pending_for(&self, venue_id: &str) -> &[PendingPosition] {
        self.pending.get(venue_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Settle every pending position of a venue exactly once.
    ///
    /// Positions are removed before their P&L is booked, so a venue can
    /// never be settled twice. Returns the total realised P&L.
    pub fn settle_venue(&mut self, venue_id: &str, resolution: Resolution) -> Decimal {
        let Some(positions) = self.pending.remove(venue_id) else {
            return Decimal::ZERO;
        };

        let mut total = Decimal::ZERO;
        for position in &positions {
            let pnl = position.realised_pnl(resolution);
            self.record_pnl(pnl);
            total += pnl;
        }

        info!(
            venue_id,
            resolution = %resolution,
            positions = positions.len(),
            pnl = %total,
            "Venue settled"
        );
        total
    }

    /// Inventory belongs to the venue being rotated out.
    pub fn reset_inventory(&mut self) {
        self.inventory_yes = 0.0;
        self.inventory_no = 0.0;
        self.last_mid = None;
    }
}
