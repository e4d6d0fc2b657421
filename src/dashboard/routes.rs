//! Dashboard API route handlers.
//!
//! All endpoints return JSON. State is shared via `Arc<DashboardState>`.

use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;

use crate::engine::SharedSnapshot;
use crate::types::EngineSnapshot;

/// Shared state accessible by all route handlers.
pub struct DashboardState {
    pub snapshot: SharedSnapshot,
    pub started_at: DateTime<Utc>,
}

impl DashboardState {
    pub fn new(snapshot: SharedSnapshot) -> Self {
        Self {
            snapshot,
            started_at: Utc::now(),
        }
    }
}

pub type AppState = Arc<DashboardState>;

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_secs: i64,
}

/// GET /api/status
pub async fn get_status(State(state): State<AppState>) -> Json<EngineSnapshot> {
    Json(state.snapshot.read().await.clone())
}

/// GET /api/pnl-history
pub async fn get_pnl_history(State(state): State<AppState>) -> Json<Vec<Decimal>> {
    Json(state.snapshot.read().await.pnl_history.clone())
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
    })
}
