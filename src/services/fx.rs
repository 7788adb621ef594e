//! C2 — FX Converter. Converts a settlement amount in its native currency to
//! USD using a periodically-refreshed in-memory rate cache.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Deserialize;
use tokio::sync::RwLock;
use tokio::time::{interval, Duration};
use tracing::{debug, error, info, warn};

use crate::error::{ApiError, Result};

const STALE_AFTER_HOURS: i64 = 24;

#[derive(Debug, Clone)]
pub struct ExchangeRate {
    pub rate_to_usd: Decimal,
    pub updated_at: DateTime<Utc>,
}

/// External rate source payload, e.g. `{"EUR": 1.10, "GBP": 1.27}`.
#[derive(Debug, Deserialize)]
struct RateFeed(HashMap<String, f64>);

/// Read-mostly snapshot of known rates, replaced wholesale on each refresh
/// tick — the same copy-on-write pattern the teacher uses for its price and
/// rule caches (`services::price_monitor`), so readers never block a writer.
#[derive(Clone)]
pub struct FxConverter {
    rates: Arc<RwLock<HashMap<String, ExchangeRate>>>,
    source_url: Option<String>,
    http: reqwest::Client,
}

impl FxConverter {
    pub fn new(source_url: Option<String>) -> Self {
        Self {
            rates: Arc::new(RwLock::new(HashMap::new())),
            source_url,
            http: reqwest::Client::new(),
        }
    }

    /// C2 `to_usd`. USD is returned unchanged; an unknown currency fails
    /// closed with [`ApiError::Fx`], blocking ingestion of that record
    /// rather than silently treating it as zero exposure.
    pub async fn to_usd(&self, amount: Decimal, currency: &str) -> Result<Decimal> {
        if currency.eq_ignore_ascii_case("USD") {
            return Ok(round_half_even(amount));
        }

        let rates = self.rates.read().await;
        let rate = rates
            .get(currency)
            .ok_or_else(|| ApiError::Fx(format!("no exchange rate known for currency {currency}")))?;

        if Utc::now() - rate.updated_at > ChronoDuration::hours(STALE_AFTER_HOURS) {
            warn!(currency, "exchange rate is stale (>24h); using anyway");
        }

        Ok(round_half_even(amount * rate.rate_to_usd))
    }

    /// Seeds or overwrites a single rate, used by tests and by the manual
    /// admin override path.
    pub async fn set_rate(&self, currency: &str, rate_to_usd: Decimal) {
        let mut rates = self.rates.write().await;
        rates.insert(
            currency.to_ascii_uppercase(),
            ExchangeRate {
                rate_to_usd,
                updated_at: Utc::now(),
            },
        );
    }

    /// Refreshes the whole snapshot from the configured external source.
    /// Errors are logged, not propagated: a failed refresh leaves the
    /// previous (possibly stale) snapshot in place rather than blocking
    /// ingestion. Staleness itself is logged but never blocks conversion.
    pub async fn refresh(&self) {
        let Some(url) = &self.source_url else {
            debug!("no FX rate source configured; skipping refresh");
            return;
        };

        match self.http.get(url).send().await {
            Ok(resp) => match resp.json::<RateFeed>().await {
                Ok(feed) => {
                    let now = Utc::now();
                    let mut rates = self.rates.write().await;
                    for (currency, rate) in feed.0 {
                        if let Some(rate_to_usd) = Decimal::from_f64(rate) {
                            rates.insert(
                                currency.to_ascii_uppercase(),
                                ExchangeRate {
                                    rate_to_usd,
                                    updated_at: now,
                                },
                            );
                        }
                    }
                    info!(count = rates.len(), "refreshed FX rate cache");
                }
                Err(e) => error!("failed to parse FX rate feed: {e}"),
            },
            Err(e) => error!("failed to fetch FX rate feed: {e}"),
        }
    }

    /// Runs the scheduled refresh loop until `shutdown` fires.
    pub async fn run_refresh_loop(self: Arc<Self>, period: Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut ticker = interval(period);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.refresh().await,
                _ = shutdown.changed() => {
                    info!("FX rate refresh loop shutting down");
                    return;
                }
            }
        }
    }
}

fn round_half_even(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointNearestEven)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn usd_passthrough_is_unchanged_but_rounded() {
        let fx = FxConverter::new(None);
        let usd = fx.to_usd(Decimal::new(10050, 2), "usd").await.unwrap();
        assert_eq!(usd, Decimal::new(10050, 2));
    }

    #[tokio::test]
    async fn unknown_currency_fails_closed() {
        let fx = FxConverter::new(None);
        let err = fx.to_usd(Decimal::ONE, "XYZ").await.unwrap_err();
        assert!(matches!(err, ApiError::Fx(_)));
    }

    #[tokio::test]
    async fn known_currency_converts_with_half_even_rounding() {
        let fx = FxConverter::new(None);
        fx.set_rate("EUR", Decimal::new(110, 2)).await; // 1.10
        let usd = fx.to_usd(Decimal::new(10000, 2), "EUR").await.unwrap(); // 100.00 EUR
        assert_eq!(usd, Decimal::new(11000, 2)); // 110.00 USD
    }
}
