//! Engine configuration
//!
//! Configuration is read from TOML and may be overridden from `COOPGRID_*`
//! environment variables.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};

/// Environment variable prefix for CoopGrid configuration
pub const ENV_PREFIX: &str = "COOPGRID_";

/// A TOML-backed settings document that can check itself
pub trait Configuration: Serialize + for<'de> Deserialize<'de> + Default {
    fn validate(&self) -> Result<()>;

    fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            Error::configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&text)
    }

    /// Parse and validate; missing sections take their defaults
    fn from_toml(text: &str) -> Result<Self> {
        let parsed: Self = toml::from_str(text)
            .map_err(|e| Error::configuration(format!("invalid TOML: {}", e)))?;
        parsed.validate()?;
        Ok(parsed)
    }

    fn write_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let text = toml::to_string_pretty(self)
            .map_err(|e| Error::configuration(format!("cannot encode settings: {}", e)))?;
        let path = path.as_ref();
        fs::write(path, text).map_err(|e| {
            Error::configuration(format!("cannot write {}: {}", path.display(), e))
        })
    }
}

/// Where records are persisted
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the record collections
    pub data_dir: PathBuf,
    /// Whether to fsync every write
    pub sync_writes: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            sync_writes: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    pub level: String,
    /// Directory for daily-rolling log files; console only when absent
    pub log_dir: Option<PathBuf>,
    /// File name prefix for rolling log files
    pub file_prefix: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_dir: None,
            file_prefix: "coopgrid.log".to_string(),
        }
    }
}

/// Defaults applied to clusters created without explicit governance rules
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernanceDefaults {
    /// Approval percentage used for proposal types with no explicit rule
    pub voting_threshold: f64,
    /// Minimum participating voting power (percentage points of ownership)
    pub quorum_requirement: f64,
    pub meeting_schedule: String,
    pub meeting_interval_days: i64,
}

impl Default for GovernanceDefaults {
    fn default() -> Self {
        Self {
            voting_threshold: 60.0,
            quorum_requirement: 50.0,
            meeting_schedule: "monthly".to_string(),
            meeting_interval_days: 30,
        }
    }
}

/// Defaults applied to clusters created without explicit trading rules
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TradingDefaults {
    /// Member tariff in ZMW per kWh
    pub internal_rate: f64,
    /// Open-market tariff in ZMW per kWh
    pub external_rate: f64,
    /// Energy held back from every distribution, in kWh
    pub minimum_reserve: f64,
    pub trading_start_hour: u8,
    pub trading_end_hour: u8,
}

impl Default for TradingDefaults {
    fn default() -> Self {
        Self {
            internal_rate: 0.8,
            external_rate: 1.2,
            minimum_reserve: 0.0,
            trading_start_hour: 6,
            trading_end_hour: 22,
        }
    }
}

/// Parameters of the returns calculation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReturnsConfig {
    /// Grid tariff members would otherwise pay, in ZMW per kWh
    pub market_rate: f64,
    /// Yearly appreciation applied to owned asset value (0.05 = 5%)
    pub annual_appreciation_rate: f64,
    /// Profit pool shared by ownership each period
    pub base_profit_pool: f64,
}

impl Default for ReturnsConfig {
    fn default() -> Self {
        Self {
            market_rate: 1.5,
            annual_appreciation_rate: 0.05,
            base_profit_pool: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TickerConfig {
    /// How often expired proposals are re-evaluated
    pub interval_secs: u64,
}

impl Default for TickerConfig {
    fn default() -> Self {
        Self { interval_secs: 300 }
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
    pub governance: GovernanceDefaults,
    pub trading: TradingDefaults,
    pub returns: ReturnsConfig,
    pub ticker: TickerConfig,
}

impl EngineConfig {
    /// Override selected values from `COOPGRID_*` environment variables
    pub fn apply_env(mut self) -> Result<Self> {
        if let Ok(dir) = env::var(format!("{}DATA_DIR", ENV_PREFIX)) {
            self.storage.data_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = env::var(format!("{}LOG_DIR", ENV_PREFIX)) {
            self.logging.log_dir = Some(PathBuf::from(dir));
        }
        if let Ok(level) = env::var(format!("{}LOG_LEVEL", ENV_PREFIX)) {
            self.logging.level = level;
        }
        self.ticker.interval_secs = parse_env("TICK_INTERVAL_SECS", self.ticker.interval_secs);
        self.returns.market_rate = parse_env("MARKET_RATE", self.returns.market_rate);

        self.validate()?;
        Ok(self)
    }
}

fn parse_env<T: FromStr>(key: &str, default: T) -> T
where
    T::Err: std::fmt::Display,
{
    let env_key = format!("{}{}", ENV_PREFIX, key);
    match env::var(&env_key) {
        Ok(value) => match value.parse::<T>() {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("Ignoring unparsable env variable {}: {}", env_key, e);
                default
            }
        },
        Err(_) => default,
    }
}

fn check_percentage(name: &str, value: f64) -> Result<()> {
    if !(value > 0.0 && value <= 100.0) {
        return Err(Error::configuration(format!(
            "{} must be in (0, 100], got {}",
            name, value
        )));
    }
    Ok(())
}

fn check_positive(name: &str, value: f64) -> Result<()> {
    if !(value.is_finite() && value > 0.0) {
        return Err(Error::configuration(format!(
            "{} must be positive, got {}",
            name, value
        )));
    }
    Ok(())
}

impl Configuration for EngineConfig {
    fn validate(&self) -> Result<()> {
        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(Error::configuration(format!("Invalid log level: {}", other)));
            }
        }

        check_percentage("governance.voting_threshold", self.governance.voting_threshold)?;
        check_percentage("governance.quorum_requirement", self.governance.quorum_requirement)?;
        if self.governance.meeting_interval_days <= 0 {
            return Err(Error::configuration("governance.meeting_interval_days must be positive"));
        }

        check_positive("trading.internal_rate", self.trading.internal_rate)?;
        check_positive("trading.external_rate", self.trading.external_rate)?;
        if !(self.trading.minimum_reserve.is_finite() && self.trading.minimum_reserve >= 0.0) {
            return Err(Error::configuration("trading.minimum_reserve must be non-negative"));
        }
        if self.trading.trading_start_hour > 23 || self.trading.trading_end_hour > 24 {
            return Err(Error::configuration("trading hours must lie within a day"));
        }

        check_positive("returns.market_rate", self.returns.market_rate)?;
        if !self.returns.annual_appreciation_rate.is_finite() {
            return Err(Error::configuration("returns.annual_appreciation_rate must be finite"));
        }
        if !(self.returns.base_profit_pool.is_finite() && self.returns.base_profit_pool >= 0.0) {
            return Err(Error::configuration("returns.base_profit_pool must be non-negative"));
        }

        if self.ticker.interval_secs == 0 {
            return Err(Error::configuration("ticker.interval_secs must be at least 1"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = EngineConfig::from_toml(
            r#"
            [governance]
            quorum_requirement = 40.0

            [returns]
            market_rate = 2.0
            "#,
        )
        .unwrap();

        assert_eq!(config.governance.quorum_requirement, 40.0);
        assert_eq!(config.governance.voting_threshold, 60.0);
        assert_eq!(config.returns.market_rate, 2.0);
        assert_eq!(config.ticker.interval_secs, 300);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let result = EngineConfig::from_toml("[governance]\nvoting_threshold = 0.0\n");
        assert!(matches!(result, Err(Error::Configuration(_))));

        let result = EngineConfig::from_toml("[logging]\nlevel = \"loud\"\n");
        assert!(matches!(result, Err(Error::Configuration(_))));

        let result = EngineConfig::from_toml("[ticker]\ninterval_secs = 0\n");
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coopgrid.toml");

        let mut config = EngineConfig::default();
        config.trading.minimum_reserve = 12.5;
        config.write_to(&path).unwrap();

        let loaded = EngineConfig::from_file(&path).unwrap();
        assert_eq!(loaded.trading.minimum_reserve, 12.5);
    }
}
