//! Application configuration.
//!
//! Resolution order: built-in defaults, then the TOML file (`--config`, or
//! `$FERROTRADE_HOME/config.toml` when present), then `FERROTRADE_*`
//! environment overrides. CLI flags are applied last by the binary.
//!
//! ```toml
//! home = "~/.ferrotrade"
//!
//! [provider]
//! cache_ttl_secs = 86400
//! min_coverage_ratio = 0.5
//! [provider.timeouts]
//! live_ms = 3000
//!
//! [trading]
//! max_lot_size = "10"
//!
//! [logging]
//! level = "info"
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ferrotrade_warehouse::{resolve_ferrotrade_home, WarehouseConfig};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::SourceKind;

pub const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    /// Data directory; `~/` is expanded. `FERROTRADE_HOME` wins over this.
    pub home: Option<PathBuf>,
    pub provider: ProviderConfig,
    pub trading: TradingConfig,
    pub logging: LoggingConfig,
}

/// Unified market-data provider tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProviderConfig {
    pub cache_ttl_secs: u64,
    /// Slice of every non-cache result written back to the cache.
    pub cache_window_hours: u64,
    /// Share of the requested window a result must cover, `0.0..=1.0`.
    pub min_coverage_ratio: f64,
    pub timeouts: SourceTimeouts,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 86_400,
            cache_window_hours: 24,
            min_coverage_ratio: 0.5,
            timeouts: SourceTimeouts::default(),
        }
    }
}

impl ProviderConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn cache_window(&self) -> time::Duration {
        time::Duration::hours(i64::try_from(self.cache_window_hours).unwrap_or(i64::MAX / 3600))
    }

    /// Transport deadline for the web feed, a tenth inside the provider's
    /// fallback timeout so the feed itself observes the expiry.
    pub fn fallback_http_timeout_ms(&self) -> u64 {
        let budget = self.timeouts.fallback_ms;
        (budget - budget / 10).max(1)
    }

    pub fn timeout_for(&self, source: SourceKind) -> Duration {
        Duration::from_millis(match source {
            SourceKind::Cache => self.timeouts.cache_ms,
            SourceKind::Archive => self.timeouts.archive_ms,
            SourceKind::Live => self.timeouts.live_ms,
            SourceKind::Fallback => self.timeouts.fallback_ms,
        })
    }
}

/// Per-source read deadlines in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SourceTimeouts {
    pub cache_ms: u64,
    pub archive_ms: u64,
    pub live_ms: u64,
    pub fallback_ms: u64,
}

impl Default for SourceTimeouts {
    fn default() -> Self {
        Self {
            cache_ms: 250,
            archive_ms: 5_000,
            live_ms: 3_000,
            fallback_ms: 10_000,
        }
    }
}

/// Order pipeline settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TradingConfig {
    pub min_lot_size: Decimal,
    pub max_lot_size: Decimal,
    pub poll_interval_ms: u64,
    pub batch_size: usize,
    pub visibility_timeout_secs: u64,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            min_lot_size: Decimal::new(1, 2),
            max_lot_size: Decimal::from(10),
            poll_interval_ms: 1_000,
            batch_size: 10,
            visibility_timeout_secs: 60,
        }
    }
}

impl TradingConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `info` or `ferrotrade_core=debug`.
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            json: false,
        }
    }
}

impl AppConfig {
    /// Load defaults, the config file, and process environment overrides.
    ///
    /// An explicit `path` must exist; the implicit `home/config.toml` is
    /// optional.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_path(path)?,
            None => {
                let implicit = resolve_ferrotrade_home().join(CONFIG_FILE_NAME);
                if implicit.is_file() {
                    Self::from_path(&implicit)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    /// Apply `FERROTRADE_HOME`, `FERROTRADE_LOG` and `FERROTRADE_MAX_LOT_SIZE`
    /// as returned by `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(home) = lookup("FERROTRADE_HOME").filter(|v| !v.trim().is_empty()) {
            self.home = Some(PathBuf::from(home));
        }
        if let Some(level) = lookup("FERROTRADE_LOG").filter(|v| !v.trim().is_empty()) {
            self.logging.level = level;
        }
        if let Some(raw) = lookup("FERROTRADE_MAX_LOT_SIZE") {
            self.trading.max_lot_size =
                raw.trim()
                    .parse::<Decimal>()
                    .map_err(|error| ConfigError::InvalidValue {
                        key: String::from("FERROTRADE_MAX_LOT_SIZE"),
                        message: error.to_string(),
                    })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key: &str, message: String| {
            Err(ConfigError::InvalidValue {
                key: key.to_owned(),
                message,
            })
        };

        let ratio = self.provider.min_coverage_ratio;
        if !(0.0..=1.0).contains(&ratio) {
            return invalid(
                "provider.min_coverage_ratio",
                format!("{ratio} is outside 0.0..=1.0"),
            );
        }
        for source in SourceKind::ALL {
            if self.provider.timeout_for(source).is_zero() {
                return invalid(
                    &format!("provider.timeouts.{}", timeout_key(source)),
                    String::from("must be greater than zero"),
                );
            }
        }
        if self.trading.min_lot_size <= Decimal::ZERO {
            return invalid(
                "trading.min_lot_size",
                format!("{} must be positive", self.trading.min_lot_size),
            );
        }
        if self.trading.max_lot_size < self.trading.min_lot_size {
            return invalid(
                "trading.max_lot_size",
                format!(
                    "{} is below min_lot_size {}",
                    self.trading.max_lot_size, self.trading.min_lot_size
                ),
            );
        }
        if self.trading.batch_size == 0 {
            return invalid("trading.batch_size", String::from("must be at least 1"));
        }
        Ok(())
    }

    /// Effective data directory.
    pub fn home_dir(&self) -> PathBuf {
        match &self.home {
            Some(home) => expand_tilde(home),
            None => resolve_ferrotrade_home(),
        }
    }

    pub fn warehouse_config(&self) -> WarehouseConfig {
        WarehouseConfig::for_home(self.home_dir())
    }
}

fn timeout_key(source: SourceKind) -> &'static str {
    match source {
        SourceKind::Cache => "cache_ms",
        SourceKind::Archive => "archive_ms",
        SourceKind::Live => "live_ms",
        SourceKind::Fallback => "fallback_ms",
    }
}

fn expand_tilde(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), std::env::var_os("HOME")) {
        (Ok(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn partial_file_keeps_defaults() {
        let config = AppConfig::from_toml_str(
            r#"
            [provider.timeouts]
            live_ms = 1500

            [trading]
            max_lot_size = "2.5"
            "#,
        )
        .expect("parse");

        assert_eq!(config.provider.timeouts.live_ms, 1_500);
        assert_eq!(config.provider.timeouts.cache_ms, 250);
        assert_eq!(config.trading.max_lot_size, dec!(2.5));
        assert_eq!(config.trading.min_lot_size, dec!(0.01));
        assert_eq!(config.provider.timeout_for(SourceKind::Live), Duration::from_millis(1_500));
        assert_eq!(config.provider.fallback_http_timeout_ms(), 9_000);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(AppConfig::from_toml_str("[provider]\ncache_tll_secs = 5\n").is_err());
    }

    #[test]
    fn env_overrides_win_over_file() {
        let mut config = AppConfig::from_toml_str("[logging]\nlevel = \"warn\"\n").expect("parse");
        config
            .apply_env(|key| match key {
                "FERROTRADE_LOG" => Some(String::from("debug")),
                "FERROTRADE_MAX_LOT_SIZE" => Some(String::from("0.5")),
                "FERROTRADE_HOME" => Some(String::from("/srv/ferrotrade")),
                _ => None,
            })
            .expect("overrides");

        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.trading.max_lot_size, dec!(0.5));
        assert_eq!(config.home_dir(), PathBuf::from("/srv/ferrotrade"));
        assert_eq!(
            config.warehouse_config().db_path,
            PathBuf::from("/srv/ferrotrade/db/ferrotrade.duckdb")
        );
    }

    #[test]
    fn invalid_override_is_reported() {
        let mut config = AppConfig::default();
        let err = config
            .apply_env(|key| (key == "FERROTRADE_MAX_LOT_SIZE").then(|| String::from("lots")))
            .expect_err("must fail");
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn validation_catches_inverted_lot_bounds() {
        let mut config = AppConfig::default();
        config.trading.max_lot_size = dec!(0.001);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { key, .. }) if key == "trading.max_lot_size"
        ));

        let mut config = AppConfig::default();
        config.provider.min_coverage_ratio = 1.5;
        assert!(config.validate().is_err());
    }
}
