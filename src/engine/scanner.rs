//! Venue scanner.
//!
//! Finds the single venue the engine should trade and looks up how a
//! closed venue settled. Two discovery modes:
//!
//! - **Rotating**: one venue group made of fixed-cadence windows. The
//!   group is located by canonical slug, then by tag + title keyword, then
//!   by slug substring. Inside it, the open window with the earliest
//!   future close is the current one.
//! - **Rewarded**: long-running, reward-eligible venues ranked by
//!   normalised 24h volume plus a bonus for a preferred category tag.
//!
//! Both are pure functions of the upstream payload; ties keep input order.
//! Network failures are logged and read as "nothing found".

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::config::{DiscoveryConfig, DiscoveryMode};
use crate::platforms::gamma::{GammaEvent, GammaMarket};
use crate::platforms::{DiscoveryApi, EventQuery};
use crate::types::{Resolution, Venue};

/// Page size for the slug-substring fallback.
const SLUG_CONTAINS_LIMIT: u32 = 50;

/// Settlement price above which the YES outcome is taken as the winner.
const YES_WIN_THRESHOLD: f64 = 0.5;

pub struct VenueScanner {
    api: Arc<dyn DiscoveryApi>,
    config: DiscoveryConfig,
}

impl VenueScanner {
    pub fn new(api: Arc<dyn DiscoveryApi>, config: DiscoveryConfig) -> Self {
        Self { api, config }
    }

    pub fn mode(&self) -> DiscoveryMode {
        self.config.mode
    }

    /// Best current venue, `None` when nothing qualifies right now.
    pub async fn get_active_venue(&self) -> Option<Venue> {
        let now = Utc::now();
        let venue = match self.config.mode {
            DiscoveryMode::Rotating => {
                let group = self.find_rotating_group().await?;
                select_rotating(&group, now)
            }
            DiscoveryMode::Rewarded => {
                let events = self.fetch(&EventQuery::top_volume(self.config.limit)).await;
                select_rewarded(&events, &self.config, now)
            }
        };

        match &venue {
            Some(v) => debug!(venue = %v, "Active venue"),
            None => debug!(mode = ?self.config.mode, "No active venue"),
        }
        venue
    }

    /// How a venue settled. Never fails: errors read as unresolved.
    pub async fn get_resolution(&self, venue_id: &str) -> Resolution {
        match self.api.fetch_market(venue_id).await {
            Ok(market) => resolution_of(&market),
            Err(e) => {
                warn!(venue_id, error = %e, "Could not fetch venue resolution");
                Resolution::Unresolved
            }
        }
    }

    /// `get_resolution` retried up to `attempts` times, `delay` apart,
    /// until the venue reports as settled.
    pub async fn get_resolution_with_retry(
        &self,
        venue_id: &str,
        attempts: u32,
        delay: Duration,
    ) -> Resolution {
        let attempts = attempts.max(1);
        for attempt in 1..=attempts {
            let resolution = self.get_resolution(venue_id).await;
            if resolution.is_resolved() {
                return resolution;
            }
            if attempt < attempts {
                debug!(venue_id, attempt, "Venue not settled yet, retrying");
                tokio::time::sleep(delay).await;
            }
        }
        info!(venue_id, attempts, "Venue still unresolved, settling as unknown");
        Resolution::Unresolved
    }

    // -----------------------------------------------------------------------
    // Rotating group lookup
    // -----------------------------------------------------------------------

    async fn find_rotating_group(&self) -> Option<GammaEvent> {
        let cfg = &self.config;

        let by_slug = self.fetch(&EventQuery::by_slug(&cfg.group_slug, cfg.limit)).await;
        if let Some(event) = by_slug.into_iter().next() {
            return Some(event);
        }

        let by_tag = self.fetch(&EventQuery::by_tag(&cfg.tag_slug, cfg.limit)).await;
        if let Some(event) = by_tag
            .into_iter()
            .find(|e| contains_any(&e.title, &cfg.title_keywords))
        {
            return Some(event);
        }

        let by_fragment = self
            .fetch(&EventQuery::slug_contains(&cfg.tag_slug, SLUG_CONTAINS_LIMIT))
            .await;
        let found = by_fragment.into_iter().find(|e| {
            contains_any(&e.title, &cfg.title_keywords) || contains_any(&e.slug, &cfg.title_keywords)
        });
        if found.is_none() {
            debug!(slug = %cfg.group_slug, "Rotating group not found");
        }
        found
    }

    async fn fetch(&self, query: &EventQuery) -> Vec<GammaEvent> {
        match self.api.fetch_events(query).await {
            Ok(events) => events,
            Err(e) => {
                warn!(error = %e, ?query, "Discovery request failed");
                Vec::new()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

/// The open window of a rotating group with the earliest future close.
///
/// Closed, not-accepting, already-expired and token-less markets are
/// skipped. Markets with an unknown close sort last.
pub fn select_rotating(group: &GammaEvent, now: DateTime<Utc>) -> Option<Venue> {
    let mut candidates: Vec<(Option<DateTime<Utc>>, Venue)> = group
        .markets
        .iter()
        .filter(|m| !m.is_closed() && m.is_accepting())
        .filter(|m| !has_expired(m, now))
        .filter_map(|m| m.to_venue(group).map(|v| (m.close_time(), v)))
        .collect();

    // Stable sort keeps input order among equal closes.
    candidates.sort_by_key(|(close, _)| (close.is_none(), *close));
    candidates.into_iter().next().map(|(_, v)| v)
}

/// Highest-scoring reward-eligible venue across groups.
///
/// Score is `(market vol24 + group vol24) / max over candidates`, plus
/// `preferred_tag_bonus` when the group carries the preferred tag.
pub fn select_rewarded(
    events: &[GammaEvent],
    config: &DiscoveryConfig,
    now: DateTime<Utc>,
) -> Option<Venue> {
    let candidates: Vec<(f64, bool, Venue)> = events
        .iter()
        .flat_map(|event| {
            event
                .markets
                .iter()
                .filter(move |m| is_reward_candidate(m, config, now))
                .filter_map(move |m| {
                    let combined =
                        m.volume_24hr.unwrap_or(0.0).max(0.0) + event.volume_24hr.unwrap_or(0.0).max(0.0);
                    let preferred = event.has_tag(&config.preferred_tag);
                    m.to_venue(event).map(|v| (combined, preferred, v))
                })
        })
        .collect();

    let max_volume = candidates.iter().map(|(vol, _, _)| *vol).fold(0.0_f64, f64::max);

    let mut best: Option<(f64, &Venue)> = None;
    for (volume, preferred, venue) in &candidates {
        let normalised = if max_volume > 0.0 { volume / max_volume } else { 0.0 };
        let score = normalised + if *preferred { config.preferred_tag_bonus } else { 0.0 };
        if best.map_or(true, |(top, _)| score > top) {
            best = Some((score, venue));
        }
    }

    best.map(|(score, venue)| {
        debug!(venue = %venue, score = format!("{score:.3}"), candidates = candidates.len(), "Rewarded venue selected");
        venue.clone()
    })
}

fn is_reward_candidate(market: &GammaMarket, config: &DiscoveryConfig, now: DateTime<Utc>) -> bool {
    market.rewards_min_size.is_some_and(|s| s > 0.0)
        && market.is_active()
        && !market.is_closed()
        && market.is_accepting()
        && !has_expired(market, now)
        && !contains_any(&market.question, &config.short_duration_keywords)
        && !contains_any(&market.slug, &config.short_duration_keywords)
}

/// Settlement of a fetched market.
pub fn resolution_of(market: &GammaMarket) -> Resolution {
    if !market.is_closed() {
        return Resolution::Unresolved;
    }
    match market.yes_settlement_price() {
        Some(p) if p > YES_WIN_THRESHOLD => Resolution::YesWon,
        Some(_) => Resolution::NoWon,
        None => Resolution::Unresolved,
    }
}

fn has_expired(market: &GammaMarket, now: DateTime<Utc>) -> bool {
    market.close_time().is_some_and(|t| t < now)
}

fn contains_any(haystack: &str, needles: &[String]) -> bool {
    let haystack = haystack.to_lowercase();
    needles
        .iter()
        .any(|n| !n.is_empty() && haystack.contains(&n.to_lowercase()))
}
