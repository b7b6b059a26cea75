use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::accounting::WithdrawalPolicy;

/// Prefix for environment overrides, e.g. `SPOT_TRADER__TRADING__MODE=simulated`
pub const ENV_PREFIX: &str = "SPOT_TRADER";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub general: GeneralConfig,
    pub trading: TradingConfig,
    pub withdrawal: WithdrawalConfig,
    #[serde(default)]
    pub pairs: HashMap<String, PairRules>,
    pub exchange: ExchangeConfig,
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Default pair tracked at startup
    pub symbol: String,
    pub base_currency: String,
    pub quote_currency: String,
    pub environment: String,
}

/// Live orders or synthetic outcomes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingMode {
    #[serde(alias = "real")]
    Live,
    Simulated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    pub mode: TradingMode,
    #[serde(default = "default_strategy_interval_ms")]
    pub strategy_interval_ms: u64,
    /// Starting balance reported by the paper gateway
    #[serde(default)]
    pub paper_balance: Decimal,
}

fn default_strategy_interval_ms() -> u64 {
    5_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawalConfig {
    pub minimum_amount: Decimal,
    pub percentage: Decimal,
}

impl From<&WithdrawalConfig> for WithdrawalPolicy {
    fn from(config: &WithdrawalConfig) -> Self {
        WithdrawalPolicy {
            minimum_amount: config.minimum_amount,
            percentage: config.percentage,
        }
    }
}

/// Per-pair trading constraints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairRules {
    pub min_trade_amount: Decimal,
    pub price_precision: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    pub name: String,
    pub testnet: bool,
    pub api_endpoint: String,
    pub testnet_endpoint: String,
    pub ws_endpoint: String,
    #[serde(default)]
    pub auto_reconnect: bool,
    #[serde(default = "default_ws_ping_interval_ms")]
    pub ws_ping_interval_ms: u64,
}

fn default_ws_ping_interval_ms() -> u64 {
    30_000
}

impl ExchangeConfig {
    /// REST base URL for the configured network
    pub fn rest_endpoint(&self) -> &str {
        if self.testnet {
            &self.testnet_endpoint
        } else {
            &self.api_endpoint
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub output: String,
    pub file_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents).context("parsing config")?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` and layer `SPOT_TRADER__<SECTION>__<KEY>` environment overrides
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .with_context(|| format!("loading config {}", path.display()))?;

        let config: Config = settings.try_deserialize().context("deserializing config")?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variable or default path
    pub fn load() -> Result<Self> {
        let path = std::env::var("CONFIG_FILE")
            .unwrap_or_else(|_| "config/production.toml".to_string());
        Self::load_from(path)
    }

    /// Fail unless the configured `trading.mode` is `expected`
    pub fn ensure_mode(&self, expected: TradingMode) -> Result<()> {
        anyhow::ensure!(
            self.trading.mode == expected,
            "trading.mode is {:?} but this binary runs in {:?} mode",
            self.trading.mode,
            expected
        );
        Ok(())
    }

    /// Pair rules keyed by upper-case symbol
    pub fn pair_rules(&self) -> HashMap<String, PairRules> {
        self.pairs
            .iter()
            .map(|(pair, rules)| (pair.to_uppercase(), rules.clone()))
            .collect()
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.general.symbol.is_empty(), "general.symbol must be set");
        anyhow::ensure!(
            self.trading.strategy_interval_ms > 0,
            "trading.strategy_interval_ms must be positive"
        );
        anyhow::ensure!(
            self.withdrawal.percentage >= Decimal::ZERO && self.withdrawal.percentage <= Decimal::ONE_HUNDRED,
            "withdrawal.percentage must be within 0-100"
        );
        Ok(())
    }
}
