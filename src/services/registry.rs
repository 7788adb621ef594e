//! C4 — Rule & Limit Registry. Periodically-refreshed, read-mostly snapshot
//! of per-(pts, processing_entity) calculation rules and per-counterparty
//! exposure limits.

use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use tokio::sync::RwLock;
use tokio::time::{interval, Duration};
use tracing::{debug, error, info};

use crate::models::CalculationRule;

#[derive(Debug, Deserialize)]
struct RegistryFeed {
    #[serde(default)]
    rules: Vec<RuleEntry>,
    #[serde(default)]
    limits: Vec<LimitEntry>,
}

#[derive(Debug, Deserialize)]
struct RuleEntry {
    pts: String,
    processing_entity: String,
    included_business_statuses: Vec<String>,
    included_directions: Vec<String>,
    included_settlement_types: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct LimitEntry {
    counterparty_id: String,
    limit_usd: String,
}

#[derive(Default)]
struct Snapshot {
    rules: HashMap<(String, String), CalculationRule>,
    limits: HashMap<String, Decimal>,
}

/// Default exposure limit used when a counterparty has no configured
/// override. Operators can also override the default *rule* per
/// (pts, processing_entity); the default *limit* is configurable via
/// `DEFAULT_EXPOSURE_LIMIT_USD`, see [`RuleRegistry::new`].
#[derive(Clone)]
pub struct RuleRegistry {
    snapshot: Arc<RwLock<Snapshot>>,
    default_limit: Decimal,
    source_url: Option<String>,
    http: reqwest::Client,
}

impl RuleRegistry {
    pub fn new(default_limit: Decimal, source_url: Option<String>) -> Self {
        Self {
            snapshot: Arc::new(RwLock::new(Snapshot::default())),
            default_limit,
            source_url,
            http: reqwest::Client::new(),
        }
    }

    /// Configured rule for `(pts, processing_entity)`, or the hard-coded
    /// default when none is configured.
    pub async fn get_rule(&self, pts: &str, processing_entity: &str) -> CalculationRule {
        let snapshot = self.snapshot.read().await;
        snapshot
            .rules
            .get(&(pts.to_string(), processing_entity.to_string()))
            .cloned()
            .unwrap_or_else(|| CalculationRule::default_rule(pts, processing_entity))
    }

    /// Configured exposure limit for `counterparty_id`, or the configured
    /// default. Limit evaluation fails closed: an unknown counterparty gets
    /// the default limit rather than an unbounded one.
    pub async fn get_limit(&self, counterparty_id: &str) -> Decimal {
        let snapshot = self.snapshot.read().await;
        snapshot
            .limits
            .get(counterparty_id)
            .copied()
            .unwrap_or(self.default_limit)
    }

    pub async fn set_rule(&self, rule: CalculationRule) {
        let mut snapshot = self.snapshot.write().await;
        snapshot
            .rules
            .insert((rule.pts.clone(), rule.processing_entity.clone()), rule);
    }

    pub async fn set_limit(&self, counterparty_id: &str, limit_usd: Decimal) {
        let mut snapshot = self.snapshot.write().await;
        snapshot.limits.insert(counterparty_id.to_string(), limit_usd);
    }

    /// Refreshes the whole snapshot from the configured external source.
    /// As with the FX cache, a failed fetch leaves the previous snapshot in
    /// place rather than propagating: a stalled source should degrade to
    /// stale config, not to no config.
    pub async fn refresh(&self) {
        let Some(url) = &self.source_url else {
            debug!("no rule registry source configured; skipping refresh");
            return;
        };

        let feed = match self.http.get(url).send().await {
            Ok(resp) => match resp.json::<RegistryFeed>().await {
                Ok(feed) => feed,
                Err(e) => {
                    error!("failed to parse rule registry feed: {e}");
                    return;
                }
            },
            Err(e) => {
                error!("failed to fetch rule registry feed: {e}");
                return;
            }
        };

        let mut rules = HashMap::new();
        for entry in feed.rules {
            rules.insert(
                (entry.pts.clone(), entry.processing_entity.clone()),
                CalculationRule {
                    pts: entry.pts,
                    processing_entity: entry.processing_entity,
                    included_business_statuses: entry
                        .included_business_statuses
                        .iter()
                        .filter_map(|s| s.parse().ok())
                        .collect(),
                    included_directions: entry
                        .included_directions
                        .iter()
                        .filter_map(|s| s.parse().ok())
                        .collect(),
                    included_settlement_types: entry
                        .included_settlement_types
                        .iter()
                        .filter_map(|s| s.parse().ok())
                        .collect(),
                },
            );
        }

        let mut limits = HashMap::new();
        for entry in feed.limits {
            if let Ok(limit) = Decimal::from_str(&entry.limit_usd) {
                limits.insert(entry.counterparty_id, limit);
            }
        }

        let mut snapshot = self.snapshot.write().await;
        snapshot.rules = rules;
        snapshot.limits = limits;
        info!(
            rules = snapshot.rules.len(),
            limits = snapshot.limits.len(),
            "refreshed rule/limit registry"
        );
    }

    pub async fn run_refresh_loop(
        self: Arc<Self>,
        period: Duration,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        let mut ticker = interval(period);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.refresh().await,
                _ = shutdown.changed() => {
                    info!("rule registry refresh loop shutting down");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BusinessStatus, Direction, SettlementType};

    #[tokio::test]
    async fn missing_rule_falls_back_to_hard_coded_default() {
        let registry = RuleRegistry::new(Decimal::new(500_000_000_00, 2), None);
        let rule = registry.get_rule("PTS-A", "PE-1").await;
        assert!(rule.is_included(BusinessStatus::Verified, Direction::Pay, SettlementType::Gross));
        assert!(!rule.is_included(BusinessStatus::Verified, Direction::Receive, SettlementType::Gross));
    }

    #[tokio::test]
    async fn missing_limit_falls_back_to_configured_default() {
        let registry = RuleRegistry::new(Decimal::new(500_000_000_00, 2), None);
        let limit = registry.get_limit("CP-UNKNOWN").await;
        assert_eq!(limit, Decimal::new(500_000_000_00, 2));
    }

    #[tokio::test]
    async fn configured_limit_overrides_default() {
        let registry = RuleRegistry::new(Decimal::new(500_000_000_00, 2), None);
        registry.set_limit("CP-A", Decimal::new(150_00, 2)).await;
        assert_eq!(registry.get_limit("CP-A").await, Decimal::new(150_00, 2));
    }
}
