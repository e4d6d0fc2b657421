//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Every tunable has a default so a minimal file (or an empty one) is
//! valid. Secrets are referenced by env-var name and resolved at startup.

use anyhow::{Context, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::fs;
use std::time::Duration;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub feeds: FeedsConfig,
    pub discovery: DiscoveryConfig,
    pub strategy: StrategyConfig,
    pub risk: RiskConfig,
    pub execution: ExecutionConfig,
    pub credentials: CredentialsConfig,
    pub dashboard: DashboardConfig,
}

// ---------------------------------------------------------------------------
// Engine cadence
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EngineConfig {
    pub name: String,
    /// Main loop tick.
    pub tick_ms: u64,
    /// How often the strategy is evaluated.
    pub strategy_interval_ms: u64,
    /// How often the venue scanner is polled.
    pub scan_interval_secs: u64,
    /// Wallet balance refresh (display only).
    pub balance_interval_secs: u64,
    /// Session P&L sampling for the history sparkline.
    pub pnl_sample_interval_secs: u64,
    pub pnl_history_len: usize,
    /// Resolution lookups attempted during rotation.
    pub resolution_attempts: u32,
    pub resolution_retry_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            name: "RATCHET-001".to_string(),
            tick_ms: 500,
            strategy_interval_ms: 2_000,
            scan_interval_secs: 30,
            balance_interval_secs: 30,
            pnl_sample_interval_secs: 10,
            pnl_history_len: 48,
            resolution_attempts: 3,
            resolution_retry_ms: 2_000,
        }
    }
}

impl EngineConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn strategy_interval(&self) -> Duration {
        Duration::from_millis(self.strategy_interval_ms)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    pub fn balance_interval(&self) -> Duration {
        Duration::from_secs(self.balance_interval_secs)
    }

    pub fn pnl_sample_interval(&self) -> Duration {
        Duration::from_secs(self.pnl_sample_interval_secs)
    }

    pub fn resolution_retry(&self) -> Duration {
        Duration::from_millis(self.resolution_retry_ms)
    }
}

// ---------------------------------------------------------------------------
// Streaming feeds
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FeedsConfig {
    pub ticker_url: String,
    pub ticker: FeedTuning,
    pub order_book_url: String,
    /// Unset keys fall back to the order-book defaults, not the ticker's.
    #[serde(deserialize_with = "order_book_tuning")]
    pub order_book: FeedTuning,
}

/// Reconnect/backoff tuning for one feed.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FeedTuning {
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub connect_timeout_ms: u64,
    pub ping_interval_secs: u64,
    /// How long `start()` waits for a first value.
    pub first_value_timeout_ms: u64,
    pub stop_timeout_ms: u64,
}

impl Default for FeedTuning {
    fn default() -> Self {
        Self {
            backoff_base_ms: 1_000,
            backoff_max_ms: 120_000,
            connect_timeout_ms: 10_000,
            ping_interval_secs: 20,
            first_value_timeout_ms: 5_000,
            stop_timeout_ms: 3_000,
        }
    }
}

impl FeedTuning {
    /// Order-book feed defaults: shorter backoff ceiling and keepalive,
    /// longer wait for the first snapshot.
    pub fn order_book() -> Self {
        Self {
            backoff_max_ms: 60_000,
            ping_interval_secs: 10,
            first_value_timeout_ms: 10_000,
            ..Self::default()
        }
    }
}

/// Partial `[feeds.*]` table, overlaid on a feed's own defaults.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct FeedTuningOverrides {
    backoff_base_ms: Option<u64>,
    backoff_max_ms: Option<u64>,
    connect_timeout_ms: Option<u64>,
    ping_interval_secs: Option<u64>,
    first_value_timeout_ms: Option<u64>,
    stop_timeout_ms: Option<u64>,
}

impl FeedTuningOverrides {
    fn over(self, base: FeedTuning) -> FeedTuning {
        FeedTuning {
            backoff_base_ms: self.backoff_base_ms.unwrap_or(base.backoff_base_ms),
            backoff_max_ms: self.backoff_max_ms.unwrap_or(base.backoff_max_ms),
            connect_timeout_ms: self.connect_timeout_ms.unwrap_or(base.connect_timeout_ms),
            ping_interval_secs: self.ping_interval_secs.unwrap_or(base.ping_interval_secs),
            first_value_timeout_ms: self
                .first_value_timeout_ms
                .unwrap_or(base.first_value_timeout_ms),
            stop_timeout_ms: self.stop_timeout_ms.unwrap_or(base.stop_timeout_ms),
        }
    }
}

fn order_book_tuning<'de, D>(deserializer: D) -> Result<FeedTuning, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(FeedTuningOverrides::deserialize(deserializer)?.over(FeedTuning::order_book()))
}

impl Default for FeedsConfig {
    fn default() -> Self {
        Self {
            ticker_url: "wss://stream.binance.com:9443/ws/btcusdt@ticker".to_string(),
            ticker: FeedTuning::default(),
            order_book_url: "wss://ws-subscriptions-clob.polymarket.com/ws/market".to_string(),
            order_book: FeedTuning::order_book(),
        }
    }
}

// ---------------------------------------------------------------------------
// Venue discovery
// ---------------------------------------------------------------------------

/// Which discovery algorithm the scanner runs.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryMode {
    /// Fixed-cadence rotating windows (earliest future close wins).
    Rotating,
    /// Long-running reward-eligible venues (highest score wins).
    Rewarded,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub mode: DiscoveryMode,
    pub api_url: String,
    pub request_timeout_secs: u64,
    /// Canonical group slug tried first in rotating mode.
    pub group_slug: String,
    /// Tag used by the fallback searches.
    pub tag_slug: String,
    /// Title/slug keywords identifying the rotating group.
    pub title_keywords: Vec<String>,
    /// Rewarded mode: skip venues whose title/slug mentions these.
    pub short_duration_keywords: Vec<String>,
    pub preferred_tag: String,
    pub preferred_tag_bonus: f64,
    pub limit: u32,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            mode: DiscoveryMode::Rotating,
            api_url: "https://gamma-api.polymarket.com".to_string(),
            request_timeout_secs: 15,
            group_slug: "bitcoin-price-15-minute".to_string(),
            tag_slug: "bitcoin".to_string(),
            title_keywords: vec!["15-minute".to_string(), "15 minute".to_string()],
            short_duration_keywords: vec![
                "15-minute".to_string(),
                "15 minute".to_string(),
                "hourly".to_string(),
                "up or down".to_string(),
                "5-minute".to_string(),
            ],
            preferred_tag: "politics".to_string(),
            preferred_tag_bonus: 0.25,
            limit: 100,
        }
    }
}

impl DiscoveryConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// Strategy
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    LatencyArb,
    QuotePair,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StrategyConfig {
    pub kind: StrategyKind,
    pub latency: LatencyConfig,
    pub quoting: QuotingConfig,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            kind: StrategyKind::LatencyArb,
            latency: LatencyConfig::default(),
            quoting: QuotingConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LatencyConfig {
    /// Minimum lead move (percent) before a signal is considered.
    pub jump_threshold_pct: f64,
    pub ev_threshold: f64,
    /// Heuristic probability bump cap.
    pub bump_cap: f64,
    /// Heuristic bump per unit of fractional move.
    pub bump_multiplier: f64,
    /// Target notional per trade (USD).
    pub position_size_usd: f64,
}

impl Default for LatencyConfig {
    fn default() -> Self {
        Self {
            jump_threshold_pct: 0.1,
            ev_threshold: 1.02,
            bump_cap: 0.08,
            bump_multiplier: 2.0,
            position_size_usd: 10.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct QuotingConfig {
    pub target_spread: f64,
    pub share_size: f64,
}

impl Default for QuotingConfig {
    fn default() -> Self {
        Self {
            target_spread: 0.03,
            share_size: 20.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Risk
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RiskConfig {
    /// Daily realised loss (USD, positive) that trips the breaker.
    pub daily_loss_limit_usd: f64,
    pub max_inventory_yes: f64,
    pub max_inventory_no: f64,
    /// Mid drift that forces a cancel-and-replace.
    pub mid_drift_threshold: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            daily_loss_limit_usd: 50.0,
            max_inventory_yes: 200.0,
            max_inventory_no: 200.0,
            mid_drift_threshold: 0.01,
        }
    }
}

// ---------------------------------------------------------------------------
// Execution & credentials
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Paper,
    Live,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ExecutionConfig {
    pub mode: ExecutionMode,
    /// Public order-book REST host (midpoints).
    pub clob_url: String,
    /// Signing relay that builds, signs and submits orders.
    pub relay_url: String,
    pub request_timeout_secs: u64,
    /// Balance reported in paper mode.
    pub paper_balance_usd: f64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Paper,
            clob_url: "https://clob.polymarket.com".to_string(),
            relay_url: "http://127.0.0.1:8787".to_string(),
            request_timeout_secs: 15,
            paper_balance_usd: 1_000.0,
        }
    }
}

impl ExecutionConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Env-var names holding the live trading secrets.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CredentialsConfig {
    pub api_key_env: String,
    pub api_secret_env: String,
    pub api_passphrase_env: String,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            api_key_env: "RATCHET_API_KEY".to_string(),
            api_secret_env: "RATCHET_API_SECRET".to_string(),
            api_passphrase_env: "RATCHET_API_PASSPHRASE".to_string(),
        }
    }
}

/// Resolved live trading secrets.
#[derive(Clone)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: SecretString,
    pub api_passphrase: SecretString,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"[REDACTED]")
            .field("api_passphrase", &"[REDACTED]")
            .finish()
    }
}

impl CredentialsConfig {
    /// Resolve every secret, failing on the first missing or empty one.
    pub fn resolve(&self) -> Result<Credentials> {
        Ok(Credentials {
            api_key: AppConfig::resolve_env(&self.api_key_env)?,
            api_secret: SecretString::new(AppConfig::resolve_env(&self.api_secret_env)?),
            api_passphrase: SecretString::new(AppConfig::resolve_env(&self.api_passphrase_env)?),
        })
    }
}

// ---------------------------------------------------------------------------
// Status surface
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DashboardConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 8080,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    /// Parse configuration from TOML text.
    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the engine misbehave silently.
    pub fn validate(&self) -> Result<()> {
        if self.risk.daily_loss_limit_usd <= 0.0 {
            anyhow::bail!("risk.daily_loss_limit_usd must be positive");
        }
        if self.engine.tick_ms == 0 {
            anyhow::bail!("engine.tick_ms must be positive");
        }
        for tuning in [&self.feeds.ticker, &self.feeds.order_book] {
            if tuning.backoff_base_ms == 0 || tuning.backoff_max_ms < tuning.backoff_base_ms {
                anyhow::bail!("feed backoff must satisfy 0 < base <= max");
            }
        }
        if self.strategy.quoting.target_spread < 0.0 {
            anyhow::bail!("strategy.quoting.target_spread must not be negative");
        }
        Ok(())
    }

    /// Resolve an environment variable name to its value.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        let value = std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))?;
        let value = value.trim().to_string();
        if value.is_empty() {
            anyhow::bail!("Environment variable is empty: {env_name}");
        }
        Ok(value)
    }
}
