//! Gamma discovery API client.
//!
//! Unauthenticated. `/events` lists venue groups with their markets nested,
//! `/markets/{id}` returns one market with its settlement prices.
//!
//! Upstream encodes several fields inconsistently (ids as numbers or
//! strings, numbers as strings, arrays as JSON-encoded strings), so every
//! field goes through a lenient deserializer and falls back to empty
//! rather than failing the whole payload.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::Client;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::platforms::{lenient_f64, DiscoveryApi, EventQuery};
use crate::types::Venue;

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Clone, Default)]
pub struct GammaEvent {
    #[serde(default, deserialize_with = "lenient_string")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub slug: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub title: String,
    #[serde(default, rename = "volume24hr", deserialize_with = "lenient_number")]
    pub volume_24hr: Option<f64>,
    #[serde(default, deserialize_with = "lenient_tags")]
    pub tags: Vec<GammaTag>,
    #[serde(default, deserialize_with = "lenient_markets")]
    pub markets: Vec<GammaMarket>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct GammaMarket {
    #[serde(default, deserialize_with = "lenient_string")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub question: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub slug: String,
    #[serde(default, rename = "endDate", deserialize_with = "lenient_string")]
    pub end_date: String,
    #[serde(default, rename = "endDateIso", deserialize_with = "lenient_string")]
    pub end_date_iso: String,
    #[serde(default, deserialize_with = "lenient_flag")]
    pub active: Option<bool>,
    #[serde(default, deserialize_with = "lenient_flag")]
    pub closed: Option<bool>,
    #[serde(default, rename = "acceptingOrders", deserialize_with = "lenient_flag")]
    pub accepting_orders: Option<bool>,
    #[serde(default, rename = "clobTokenIds", deserialize_with = "lenient_list")]
    pub clob_token_ids: Vec<Value>,
    #[serde(default, rename = "outcomePrices", deserialize_with = "lenient_list")]
    pub outcome_prices: Vec<Value>,
    #[serde(default, rename = "volume24hr", deserialize_with = "lenient_number")]
    pub volume_24hr: Option<f64>,
    #[serde(default, rename = "rewardsMinSize", deserialize_with = "lenient_number")]
    pub rewards_min_size: Option<f64>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct GammaTag {
    #[serde(default, deserialize_with = "lenient_string")]
    pub label: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub slug: String,
}

impl GammaEvent {
    /// Whether any tag matches `tag` by slug or label (case-insensitive).
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags
            .iter()
            .any(|t| t.slug.eq_ignore_ascii_case(tag) || t.label.eq_ignore_ascii_case(tag))
    }
}

impl GammaMarket {
    pub fn is_closed(&self) -> bool {
        self.closed.unwrap_or(false)
    }

    /// Missing flag means accepting.
    pub fn is_accepting(&self) -> bool {
        self.accepting_orders.unwrap_or(true)
    }

    /// Missing flag means active.
    pub fn is_active(&self) -> bool {
        self.active.unwrap_or(true)
    }

    /// `(yes, no)` token ids, `None` unless both are present and non-empty.
    pub fn token_ids(&self) -> Option<(String, String)> {
        let mut ids = self.clob_token_ids.iter().filter_map(scalar_to_string);
        let yes = ids.next()?;
        let no = ids.next()?;
        if yes.is_empty() || no.is_empty() {
            return None;
        }
        Some((yes, no))
    }

    /// Raw close timestamp, `endDate` preferred over `endDateIso`.
    pub fn close_raw(&self) -> &str {
        if self.end_date.is_empty() {
            &self.end_date_iso
        } else {
            &self.end_date
        }
    }

    pub fn close_time(&self) -> Option<DateTime<Utc>> {
        parse_close_time(self.close_raw())
    }

    /// First settlement price (the YES outcome).
    pub fn yes_settlement_price(&self) -> Option<f64> {
        if self.outcome_prices.len() < 2 {
            return None;
        }
        lenient_f64(&self.outcome_prices[0])
    }

    /// Build a venue from this market and its group.
    pub fn to_venue(&self, event: &GammaEvent) -> Option<Venue> {
        let (yes_token, no_token) = self.token_ids()?;
        Some(Venue {
            venue_id: self.id.clone(),
            group_id: event.id.clone(),
            group_slug: event.slug.clone(),
            label: self.question.clone(),
            close_time: self.close_time(),
            yes_token,
            no_token,
            accepting_orders: self.is_accepting(),
        })
    }
}

/// RFC 3339, or a bare date (end of that day UTC).
pub fn parse_close_time(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(23, 59, 59))
        .map(|dt| dt.and_utc())
}

// ---------------------------------------------------------------------------
// Lenient deserializers
// ---------------------------------------------------------------------------

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    let value = Value::deserialize(d)?;
    Ok(scalar_to_string(&value).unwrap_or_default())
}

fn lenient_number<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    let value = Value::deserialize(d)?;
    Ok(lenient_f64(&value))
}

fn lenient_flag<'de, D: Deserializer<'de>>(d: D) -> Result<Option<bool>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Bool(b) => Some(b),
        Value::String(s) => match s.to_ascii_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    })
}

/// JSON array, or a string holding a JSON array.
fn lenient_list<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Value>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Array(items) => items,
        Value::String(s) => serde_json::from_str::<Vec<Value>>(&s).unwrap_or_default(),
        _ => Vec::new(),
    })
}

fn lenient_tags<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<GammaTag>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|t| serde_json::from_value(t).ok())
            .collect(),
        _ => Vec::new(),
    })
}

fn lenient_markets<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<GammaMarket>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|m| serde_json::from_value(m).ok())
            .collect(),
        _ => Vec::new(),
    })
}

/// `/events` returns a list, but a slug lookup may return a bare object.
pub fn parse_events(value: Value) -> Vec<GammaEvent> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|e| serde_json::from_value(e).ok())
            .collect(),
        obj @ Value::Object(_) => serde_json::from_value::<GammaEvent>(obj).into_iter().collect(),
        _ => Vec::new(),
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct GammaClient {
    http: Client,
    base_url: String,
}

impl GammaClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build Gamma HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn query_params(query: &EventQuery) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("active", "true".to_string()),
            ("closed", "false".to_string()),
            ("limit", query.limit.to_string()),
        ];
        if let Some(slug) = &query.slug {
            params.push(("slug", slug.clone()));
        }
        if let Some(tag) = &query.tag_slug {
            params.push(("tag_slug", tag.clone()));
        }
        if let Some(fragment) = &query.slug_contains {
            params.push(("slug_contains", fragment.clone()));
        }
        if query.by_volume {
            params.push(("order", "volume24hr".to_string()));
            params.push(("ascending", "false".to_string()));
        }
        params
    }

    async fn get_json(&self, url: &str, params: &[(&'static str, String)]) -> Result<Value> {
        let resp = self
            .http
            .get(url)
            .query(params)
            .send()
            .await
            .context("Gamma API request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Gamma API error {status}: {body}");
        }

        resp.json().await.context("Failed to parse Gamma response")
    }
}

#[async_trait]
impl DiscoveryApi for GammaClient {
    async fn fetch_events(&self, query: &EventQuery) -> Result<Vec<GammaEvent>> {
        let url = format!("{}/events", self.base_url);
        let value = self.get_json(&url, &Self::query_params(query)).await?;
        let events = parse_events(value);
        debug!(count = events.len(), ?query, "Fetched Gamma events");
        Ok(events)
    }

    async fn fetch_market(&self, market_id: &str) -> Result<GammaMarket> {
        let url = format!("{}/markets/{market_id}", self.base_url);
        let value = self.get_json(&url, &[]).await?;
        serde_json::from_value(value)
            .with_context(|| format!("Failed to parse Gamma market {market_id}"))
    }
}
