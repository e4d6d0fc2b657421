//! RATCHET — always-on prediction venue trading engine
//!
//! Entry point. Initialises structured logging, loads configuration,
//! wires feeds, discovery, strategy and the order gateway, and runs the
//! engine loop until Ctrl+C or the circuit breaker trips.

use anyhow::Result;
use std::sync::Arc;
use tracing::{error, info, warn};

use ratchet::config::{self, ExecutionMode};
use ratchet::dashboard::{self, routes::DashboardState};
use ratchet::engine::{EngineLoop, ExecutionRiskManager, VenueScanner};
use ratchet::feeds::ticker::TickerProtocol;
use ratchet::feeds::{FeedSettings, StreamingFeed};
use ratchet::platforms::clob::ClobGateway;
use ratchet::platforms::gamma::GammaClient;
use ratchet::platforms::paper::PaperGateway;
use ratchet::platforms::OrderGateway;
use ratchet::strategy;

const BANNER: &str = r#"
 ____      _  _____ ____ _   _ _____ _____
|  _ \    / \|_   _/ ___| | | | ____|_   _|
| |_) |  / _ \ | || |   | |_| |  _|   | |
|  _ <  / ___ \| || |___|  _  | |___  | |
|_| \_\/_/   \_\_| \____|_| |_|_____| |_|

  Rotating-venue trading engine
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    // Env-only, so config load errors are logged.
    init_logging();

    let config_path = std::env::var("RATCHET_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
    let cfg = match config::AppConfig::load(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(path = %config_path, error = %format!("{e:#}"), "Failed to load configuration");
            return Err(e);
        }
    };

    println!("{BANNER}");
    info!(
        engine = %cfg.engine.name,
        strategy = ?cfg.strategy.kind,
        discovery = ?cfg.discovery.mode,
        execution = ?cfg.execution.mode,
        daily_loss_limit = cfg.risk.daily_loss_limit_usd,
        "RATCHET starting up"
    );

    // -- Order gateway (credentials fail fast in live mode) --------------

    let gateway: Arc<dyn OrderGateway> = match cfg.execution.mode {
        ExecutionMode::Live => {
            let credentials = cfg.credentials.resolve()?;
            info!(api_key = %credentials.api_key, relay = %cfg.execution.relay_url, "Live order gateway");
            Arc::new(ClobGateway::new(&cfg.execution, credentials)?)
        }
        ExecutionMode::Paper => {
            warn!("Paper mode: orders are logged, never sent");
            Arc::new(PaperGateway::new(
                &cfg.execution.clob_url,
                cfg.execution.request_timeout(),
                cfg.execution.paper_balance_usd,
            )?)
        }
    };

    // -- Components ------------------------------------------------------

    let discovery = GammaClient::new(&cfg.discovery.api_url, cfg.discovery.request_timeout())?;
    let scanner = VenueScanner::new(Arc::new(discovery), cfg.discovery.clone());
    let strategy = strategy::from_config(&cfg.strategy);
    let erm = ExecutionRiskManager::new(gateway, &cfg.risk);

    let mut engine = EngineLoop::new(cfg.engine.clone(), scanner, strategy, erm).with_book_feed(
        FeedSettings::from_tuning(&cfg.feeds.order_book_url, &cfg.feeds.order_book),
    );
    if matches!(cfg.strategy.kind, config::StrategyKind::LatencyArb) {
        let lead = StreamingFeed::new(
            TickerProtocol,
            FeedSettings::from_tuning(&cfg.feeds.ticker_url, &cfg.feeds.ticker),
        );
        engine = engine.with_lead_feed(lead);
    }

    if cfg.dashboard.enabled {
        let state = Arc::new(DashboardState::new(engine.snapshot_handle()));
        dashboard::spawn_dashboard(state, cfg.dashboard.port).await?;
    }

    // -- Main loop -------------------------------------------------------

    engine.start().await;
    engine
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Could not listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        })
        .await;

    let snapshot = engine.snapshot_handle().read().await.clone();
    info!(
        session_pnl = %snapshot.session_pnl,
        circuit_breaker = snapshot.circuit_breaker,
        pending = snapshot.pending_positions,
        "RATCHET shut down cleanly."
    );

    Ok(())
}

/// Initialise the tracing subscriber.
///
/// Uses `RUST_LOG` env var for filtering (default: `ratchet=info`).
/// Set `RATCHET_LOG_JSON=1` for JSON-formatted output.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("ratchet=info"));

    let json_logging = std::env::var("RATCHET_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
