//! Live order gateway.
//!
//! Orders go to a signing relay that builds, wallet-signs and submits them
//! to the exchange. Every relay request carries the API key, a timestamp,
//! the passphrase and an HMAC-SHA256 signature over
//! `timestamp + METHOD + path + body` (hex-encoded).
//!
//! Midpoints come straight from the public order-book REST endpoint.

use std::collections::{HashSet, VecDeque};

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method};
use secrecy::ExposeSecret;
use serde_json::{json, Value};
use sha2::Sha256;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{Credentials, ExecutionConfig};
use crate::platforms::{lenient_f64, parse_balance, GatewayError, OrderGateway};
use crate::types::{CancelReport, Fill, OrderAck, OrderRequest, OrderSide};

type HmacSha256 = Hmac<Sha256>;

/// Fill ids remembered for de-duplication before the oldest are forgotten.
const SEEN_FILLS_CAP: usize = 10_000;

pub struct ClobGateway {
    http: Client,
    relay_url: String,
    clob_url: String,
    credentials: Credentials,
    seen_fills: Mutex<SeenFills>,
}

impl ClobGateway {
    pub fn new(config: &ExecutionConfig, credentials: Credentials) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .context("Failed to build order gateway HTTP client")?;

        Ok(Self {
            http,
            relay_url: config.relay_url.trim_end_matches('/').to_string(),
            clob_url: config.clob_url.trim_end_matches('/').to_string(),
            credentials,
            seen_fills: Mutex::new(SeenFills::new(SEEN_FILLS_CAP)),
        })
    }

    async fn signed(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value, GatewayError> {
        let body_text = body.as_ref().map(Value::to_string).unwrap_or_default();
        let timestamp = Utc::now().timestamp();
        let signature = sign_request(
            self.credentials.api_secret.expose_secret(),
            timestamp,
            method.as_str(),
            path,
            &body_text,
        )?;

        let mut req = self
            .http
            .request(method, format!("{}{path}", self.relay_url))
            .header("POLY_API_KEY", &self.credentials.api_key)
            .header("POLY_TIMESTAMP", timestamp.to_string())
            .header("POLY_PASSPHRASE", self.credentials.api_passphrase.expose_secret())
            .header("POLY_SIGNATURE", signature);
        if body.is_some() {
            req = req
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body_text);
        }

        let resp = req.send().await?;
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(GatewayError::Http {
                status: status.as_u16(),
                body: text,
            });
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }
}

#[async_trait]
impl OrderGateway for ClobGateway {
    async fn post_order(&self, order: &OrderRequest) -> Result<OrderAck, GatewayError> {
        let body = json!({
            "token_id": order.token_id,
            "side": order.side,
            "price": order.price,
            "size": order.size,
            "order_type": "GTC",
            "post_only": true,
        });
        let resp = match self.signed(Method::POST, "/orders", Some(body)).await {
            // Post-only orders that would cross come back as client errors.
            Err(GatewayError::Http { status, body }) if (400..500).contains(&status) => {
                return Err(GatewayError::Rejected(body));
            }
            other => other?,
        };
        parse_order_response(&resp)
    }

    async fn cancel_all(&self) -> Result<CancelReport, GatewayError> {
        let resp = self.signed(Method::DELETE, "/orders", None).await?;
        Ok(parse_cancel_report(&resp))
    }

    async fn midpoint(&self, token_id: &str) -> Result<Option<f64>, GatewayError> {
        public_midpoint(&self.http, &self.clob_url, token_id).await
    }

    async fn collateral_balance(&self) -> Result<Option<f64>, GatewayError> {
        let resp = self.signed(Method::GET, "/balance", None).await?;
        let balance = parse_balance(&resp);
        if balance.is_none() {
            warn!(response = %resp, "Unrecognised balance response");
        }
        Ok(balance)
    }

    async fn fills(&self) -> Result<Vec<Fill>, GatewayError> {
        let resp = self.signed(Method::GET, "/fills", None).await?;
        let mut seen = self.seen_fills.lock().await;
        let fresh: Vec<Fill> = parse_fills(&resp)
            .into_iter()
            .filter(|(id, _)| seen.insert(id))
            .map(|(_, fill)| fill)
            .collect();
        if !fresh.is_empty() {
            info!(count = fresh.len(), "New fills reported");
        }
        Ok(fresh)
    }

    fn is_live(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "clob"
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// HMAC-SHA256 over `timestamp + METHOD + path + body`, hex-encoded.
pub fn sign_request(
    secret: &str,
    timestamp: i64,
    method: &str,
    path: &str,
    body: &str,
) -> Result<String, GatewayError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| GatewayError::Malformed(format!("bad signing key: {e}")))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(method.to_ascii_uppercase().as_bytes());
    mac.update(path.as_bytes());
    mac.update(body.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Public `/midpoint` lookup; values outside (0, 1) read as no midpoint.
pub async fn public_midpoint(
    http: &Client,
    clob_url: &str,
    token_id: &str,
) -> Result<Option<f64>, GatewayError> {
    let resp = http
        .get(format!("{clob_url}/midpoint"))
        .query(&[("token_id", token_id)])
        .send()
        .await?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(GatewayError::Http {
            status: status.as_u16(),
            body,
        });
    }
    let value: Value = resp.json().await?;
    let mid = value
        .get("mid")
        .and_then(lenient_f64)
        .filter(|m| *m > 0.0 && *m < 1.0);
    debug!(token = token_id, ?mid, "REST midpoint");
    Ok(mid)
}

fn parse_order_response(value: &Value) -> Result<OrderAck, GatewayError> {
    let error = value
        .get("errorMsg")
        .and_then(Value::as_str)
        .filter(|m| !m.is_empty());
    if value.get("success").and_then(Value::as_bool) == Some(false) || error.is_some() {
        return Err(GatewayError::Rejected(error.unwrap_or("rejected").to_string()));
    }
    let order_id = value
        .get("orderID")
        .or_else(|| value.get("orderId"))
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| GatewayError::Malformed(format!("no order id in {value}")))?;
    Ok(OrderAck {
        order_id: order_id.to_string(),
        submitted_at: Utc::now(),
    })
}

/// `canceled` is a list of ids; `not_canceled` maps id → reason.
fn parse_cancel_report(value: &Value) -> CancelReport {
    let canceled: Vec<String> = value
        .get("canceled")
        .and_then(Value::as_array)
        .map(|ids| ids.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default();
    let not_canceled: Vec<(String, String)> = value
        .get("not_canceled")
        .and_then(Value::as_object)
        .map(|m| {
            m.iter()
                .map(|(id, reason)| {
                    let reason = reason.as_str().map(str::to_string).unwrap_or_else(|| reason.to_string());
                    (id.clone(), reason)
                })
                .collect()
        })
        .unwrap_or_default();
    CancelReport { canceled, not_canceled }
}

/// Insertion-ordered id set that evicts its oldest entry past `cap`.
struct SeenFills {
    ids: HashSet<String>,
    order: VecDeque<String>,
    cap: usize,
}

impl SeenFills {
    fn new(cap: usize) -> Self {
        Self {
            ids: HashSet::new(),
            order: VecDeque::new(),
            cap,
        }
    }

    /// `true` if `id` was not already remembered.
    fn insert(&mut self, id: &str) -> bool {
        if self.ids.contains(id) {
            return false;
        }
        self.ids.insert(id.to_string());
        self.order.push_back(id.to_string());
        while self.order.len() > self.cap {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        true
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.order.len()
    }
}

/// `(fill id, fill)` pairs; entries missing any field are skipped.
fn parse_fills(value: &Value) -> Vec<(String, Fill)> {
    let Some(items) = value.as_array().or_else(|| value.get("fills").and_then(Value::as_array)) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| {
            let id = item.get("id").and_then(Value::as_str)?.to_string();
            let token_id = item
                .get("asset_id")
                .or_else(|| item.get("token_id"))
                .and_then(Value::as_str)?
                .to_string();
            let side = match item.get("side").and_then(Value::as_str)?.to_ascii_uppercase().as_str() {
                "BUY" => OrderSide::Buy,
                "SELL" => OrderSide::Sell,
                _ => return None,
            };
            let price = item.get("price").and_then(lenient_f64)?;
            let size = item.get("size").and_then(lenient_f64)?;
            Some((id, Fill { token_id, side, price, size }))
        })
        .collect()
}
