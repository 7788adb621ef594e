//! Process configuration, loaded from environment variables (optionally via
//! a `.env` file) at startup. Covers both the domain-level settings (refresh
//! cadences, default limit, downstream endpoints) and the ambient settings
//! (log level, pool sizing) every deployment needs regardless of those.

use config::{Environment, File};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub environment: String,
    pub http_port: u16,
    pub database_url: String,
    pub db_max_connections: u32,
    pub log_level: String,

    /// How often the FX rate cache refreshes from its external source
    /// (default 15 min).
    pub rate_refresh_seconds: u64,
    /// How often the rule/limit registry refreshes (default 30 min).
    pub rule_refresh_seconds: u64,
    /// Notification retry ceiling (default 10).
    pub notification_max_retries: u32,
    /// Fallback exposure limit when a counterparty has no configured one
    /// (default 500,000,000.00).
    pub default_exposure_limit_usd: String,

    /// External source for FX rate refresh.
    pub fx_rate_source_url: Option<String>,
    /// External source for rule/limit registry refresh.
    pub rule_registry_source_url: Option<String>,
    /// Downstream endpoint notified on AUTHORISED transitions.
    pub notification_endpoint_url: Option<String>,
}

impl Config {
    /// Loads configuration from the process environment (optionally backed
    /// by a `.env` file), applying sensible defaults for every optional
    /// setting. Required settings (`DATABASE_URL`) fail startup immediately
    /// if absent.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let raw = config::Config::builder()
            .set_default("environment", "development")?
            .set_default("http_port", 8080)?
            .set_default("db_max_connections", 20)?
            .set_default("log_level", "info")?
            .set_default("rate_refresh_seconds", 900)?
            .set_default("rule_refresh_seconds", 1800)?
            .set_default("notification_max_retries", 10)?
            .set_default("default_exposure_limit_usd", "500000000.00")?
            .add_source(Environment::default().try_parsing(true))
            .add_source(File::with_name("config/settings").required(false))
            .build()?;

        let database_url = raw
            .get_string("db_url")
            .or_else(|_| raw.get_string("database_url"))
            .map_err(|_| anyhow::anyhow!("DB_URL (or DATABASE_URL) environment variable is required"))?;

        Ok(Config {
            environment: raw.get_string("environment")?,
            http_port: raw.get_int("http_port")? as u16,
            database_url,
            db_max_connections: raw.get_int("db_max_connections")? as u32,
            log_level: raw.get_string("log_level")?,
            rate_refresh_seconds: raw.get_int("rate_refresh_seconds")? as u64,
            rule_refresh_seconds: raw.get_int("rule_refresh_seconds")? as u64,
            notification_max_retries: raw.get_int("notification_max_retries")? as u32,
            default_exposure_limit_usd: raw.get_string("default_exposure_limit_usd")?,
            fx_rate_source_url: raw.get_string("fx_rate_source_url").ok(),
            rule_registry_source_url: raw.get_string("rule_registry_source_url").ok(),
            notification_endpoint_url: raw.get_string("notification_endpoint_url").ok(),
        })
    }
}
