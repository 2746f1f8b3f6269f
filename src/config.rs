//! Configuration loader for the `envmon-stats` backend service.
//!
//! All runtime settings are read from environment variables here (the caller
//! loads an optional `.env` first), so no other module calls `env::var`.
//! Values are parsed once into an immutable [`Config`] snapshot.
//!
use std::env;

use anyhow::{anyhow, Result};

/// Parse an optional integer environment variable with a default value.
macro_rules! parse_env_u32 {
    ($var_name:expr, $default:expr) => {
        env::var($var_name)
            .ok()
            .map(|v| v.trim().parse::<u32>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Parse a required string environment variable.
macro_rules! require_env {
    ($var_name:expr) => {
        env::var($var_name)
            .map_err(|_| anyhow!("{} must be set in .env or environment", $var_name))?
    };
}

/// Strongly typed application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    // ---
    /// PostgreSQL connection string.
    pub db_url: String,

    /// Maximum number of database connections in the pool.
    pub db_pool_max: u32,

    /// TCP port the HTTP API binds to.
    pub http_port: u16,

    /// Default look-back, in days, for anomaly listings.
    pub anomaly_window_days: u32,

    /// Default look-back, in days, for trend and air-quality series.
    pub trend_days: u32,
}

/// Load configuration from environment variables with defaults.
///
/// Required:
/// - `DATABASE_URL` – PostgreSQL connection string
///
/// Optional:
/// - `DB_POOL_MAX` – max DB connections (default: 5)
/// - `HTTP_PORT` – listen port (default: 8080)
/// - `ANOMALY_WINDOW_DAYS` – anomaly listing window (default: 30)
/// - `TREND_DAYS` – trend window (default: 7)
pub fn load_from_env() -> Result<Config> {
    // ---
    let db_url = require_env!("DATABASE_URL");
    let db_pool_max = parse_env_u32!("DB_POOL_MAX", 5);
    let http_port = parse_env_u32!("HTTP_PORT", 8080);
    let anomaly_window_days = parse_env_u32!("ANOMALY_WINDOW_DAYS", 30);
    let trend_days = parse_env_u32!("TREND_DAYS", 7);

    build(db_url, db_pool_max, http_port, anomaly_window_days, trend_days)
}

fn build(
    db_url: String,
    db_pool_max: u32,
    http_port: u32,
    anomaly_window_days: u32,
    trend_days: u32,
) -> Result<Config> {
    // ---
    if db_pool_max == 0 {
        return Err(anyhow!("DB_POOL_MAX must be at least 1"));
    }
    let http_port =
        u16::try_from(http_port).map_err(|_| anyhow!("Invalid HTTP_PORT: {}", http_port))?;
    if anomaly_window_days == 0 || trend_days == 0 {
        return Err(anyhow!("ANOMALY_WINDOW_DAYS and TREND_DAYS must be at least 1"));
    }

    Ok(Config {
        db_url,
        db_pool_max,
        http_port,
        anomaly_window_days,
        trend_days,
    })
}

/// `db_url` with the password replaced by `****`.
fn mask_db_url(db_url: &str) -> String {
    // ---
    let authority = db_url.find("://").map_or(0, |pos| pos + 3);
    let rest = &db_url[authority..];
    let Some(at_pos) = rest.rfind('@') else {
        return db_url.to_string();
    };
    // user names cannot contain ':', so the first one starts the password
    match rest[..at_pos].find(':') {
        Some(colon_pos) => format!(
            "{}{}:****{}",
            &db_url[..authority],
            &rest[..colon_pos],
            &rest[at_pos..]
        ),
        None => db_url.to_string(),
    }
}

impl Config {
    /// Log the loaded configuration, masking the database password.
    pub fn log_config(&self) {
        // ---
        tracing::info!("Configuration loaded:");
        tracing::info!("  DATABASE_URL        : {}", mask_db_url(&self.db_url));
        tracing::info!("  DB_POOL_MAX         : {}", self.db_pool_max);
        tracing::info!("  HTTP_PORT           : {}", self.http_port);
        tracing::info!("  ANOMALY_WINDOW_DAYS : {}", self.anomaly_window_days);
        tracing::info!("  TREND_DAYS          : {}", self.trend_days);
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_password_is_masked() {
        // ---
        assert_eq!(
            mask_db_url("postgres://envmon:secret@db:5432/envmon"),
            "postgres://envmon:****@db:5432/envmon"
        );
        assert_eq!(
            mask_db_url("postgres://envmon@db/envmon"),
            "postgres://envmon@db/envmon"
        );
        assert_eq!(mask_db_url("postgres://db/envmon"), "postgres://db/envmon");
    }

    #[test]
    fn test_password_with_separators_is_fully_masked() {
        // ---
        assert_eq!(
            mask_db_url("postgres://envmon:ab:cd@db/envmon"),
            "postgres://envmon:****@db/envmon"
        );
        assert_eq!(
            mask_db_url("postgres://envmon:p@ss:w/rd@db:5432/envmon"),
            "postgres://envmon:****@db:5432/envmon"
        );
        assert_eq!(mask_db_url("postgres://envmon:@db/envmon"), "postgres://envmon:****@db/envmon");
        assert!(!mask_db_url("postgres://envmon:ab:cd@db/envmon").contains("ab"));
    }

    #[test]
    fn test_build_rejects_bad_values() {
        // ---
        let url = || "postgres://db/envmon".to_string();
        assert!(build(url(), 0, 8080, 30, 7).is_err());
        assert!(build(url(), 5, 70_000, 30, 7).is_err());
        assert!(build(url(), 5, 8080, 0, 7).is_err());

        let cfg = build(url(), 5, 8080, 30, 7).unwrap();
        assert_eq!(cfg.http_port, 8080);
        assert_eq!(cfg.trend_days, 7);
    }
}
