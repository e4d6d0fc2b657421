//! Accountant — realised P&L and the daily-loss circuit breaker.
//!
//! Tracks session and UTC-day P&L. The daily accumulator resets on the
//! first access after midnight UTC. Once the day's P&L reaches
//! `-daily_loss_limit` the breaker latches and stays latched for the life
//! of the process.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use tracing::{debug, error};

#[derive(Debug, Clone)]
pub struct PnlLedger {
    daily_loss_limit: Decimal,
    session_pnl: Decimal,
    daily_pnl: Decimal,
    day: Option<NaiveDate>,
    tripped: bool,
}

impl PnlLedger {
    /// `daily_loss_limit` is a positive USD amount.
    pub fn new(daily_loss_limit: Decimal) -> Self {
        Self {
            daily_loss_limit: daily_loss_limit.abs(),
            session_pnl: Decimal::ZERO,
            daily_pnl: Decimal::ZERO,
            day: None,
            tripped: false,
        }
    }

    pub fn record(&mut self, delta: Decimal) {
        self.record_at(delta, Utc::now());
    }

    /// Add realised P&L; returns whether this call tripped the breaker.
    pub fn record_at(&mut self, delta: Decimal, now: DateTime<Utc>) -> bool {
        self.roll_day(now);
        self.session_pnl += delta;
        self.daily_pnl += delta;
        debug!(delta = %delta, session = %self.session_pnl, daily = %self.daily_pnl, "P&L recorded");

        if !self.tripped && self.daily_pnl <= -self.daily_loss_limit {
            self.tripped = true;
            error!(
                daily_pnl = %self.daily_pnl,
                limit = %self.daily_loss_limit,
                "CIRCUIT BREAKER TRIPPED: daily loss limit reached, trading halted until restart"
            );
            return true;
        }
        false
    }

    pub fn session_pnl(&self) -> Decimal {
        self.session_pnl
    }

    pub fn daily_pnl(&mut self) -> Decimal {
        self.daily_pnl_at(Utc::now())
    }

    pub fn daily_pnl_at(&mut self, now: DateTime<Utc>) -> Decimal {
        self.roll_day(now);
        self.daily_pnl
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped
    }

    pub fn daily_loss_limit(&self) -> Decimal {
        self.daily_loss_limit
    }

    fn roll_day(&mut self, now: DateTime<Utc>) {
        let today = now.date_naive();
        if self.day != Some(today) {
            if self.day.is_some() {
                debug!(previous = %self.daily_pnl, "UTC day rolled, daily P&L reset");
            }
            self.daily_pnl = Decimal::ZERO;
            self.day = Some(today);
        }
    }
}
