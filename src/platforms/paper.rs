//! Paper-trading gateway.
//!
//! Accepts every order with a fresh uuid and never fills it, cancels
//! whatever it accepted, and reports a fixed starting balance. Midpoints
//! are real: they come from the public order-book endpoint when a host is
//! configured.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::platforms::clob::public_midpoint;
use crate::platforms::{GatewayError, OrderGateway};
use crate::types::{CancelReport, Fill, OrderAck, OrderRequest};

pub struct PaperGateway {
    http: Option<Client>,
    clob_url: String,
    balance: f64,
    open_orders: Mutex<Vec<String>>,
}

impl PaperGateway {
    /// Paper gateway reading midpoints from `clob_url`.
    pub fn new(clob_url: &str, timeout: Duration, balance: f64) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build paper gateway HTTP client")?;
        Ok(Self {
            http: Some(http),
            clob_url: clob_url.trim_end_matches('/').to_string(),
            balance,
            open_orders: Mutex::new(Vec::new()),
        })
    }

    /// Fully offline: no midpoints.
    pub fn offline(balance: f64) -> Self {
        Self {
            http: None,
            clob_url: String::new(),
            balance,
            open_orders: Mutex::new(Vec::new()),
        }
    }

    pub async fn open_order_count(&self) -> usize {
        self.open_orders.lock().await.len()
    }
}

#[async_trait]
impl OrderGateway for PaperGateway {
    async fn post_order(&self, order: &OrderRequest) -> Result<OrderAck, GatewayError> {
        let order_id = format!("paper-{}", Uuid::new_v4());
        info!(
            order_id = %order_id,
            token = %order.token_id,
            side = %order.side,
            price = format!("{:.3}", order.price),
            size = format!("{:.2}", order.size),
            "[PAPER] Would post post-only order"
        );
        self.open_orders.lock().await.push(order_id.clone());
        Ok(OrderAck {
            order_id,
            submitted_at: Utc::now(),
        })
    }

    async fn cancel_all(&self) -> Result<CancelReport, GatewayError> {
        let canceled = std::mem::take(&mut *self.open_orders.lock().await);
        if !canceled.is_empty() {
            info!(count = canceled.len(), "[PAPER] Canceled orders");
        }
        Ok(CancelReport {
            canceled,
            not_canceled: Vec::new(),
        })
    }

    async fn midpoint(&self, token_id: &str) -> Result<Option<f64>, GatewayError> {
        match &self.http {
            Some(http) => public_midpoint(http, &self.clob_url, token_id).await,
            None => Ok(None),
        }
    }

    async fn collateral_balance(&self) -> Result<Option<f64>, GatewayError> {
        Ok(Some(self.balance))
    }

    async fn fills(&self) -> Result<Vec<Fill>, GatewayError> {
        Ok(Vec::new())
    }

    fn is_live(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "paper"
    }
}
