//! Configuration management for the swing trading bot.
//!
//! Settings are layered: compiled defaults, then an optional TOML file, then
//! `SWINGBOT__SECTION__KEY` environment variables. The live unlock PIN is only
//! ever read from `LIVE_UNLOCK_PIN`.

use crate::{Error, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::env;
use std::path::Path;

/// Trading mode the process runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingMode {
    #[default]
    Paper,
    Live,
}

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub app: AppSettings,
    pub storage: StorageSettings,
    pub data: DataSettings,
    pub broker: BrokerSettings,
    pub universe: UniverseSettings,
    pub risk: RiskSettings,
    pub stress: StressSettings,
    pub circuit_breaker: CircuitBreakerSettings,
    pub orders: OrderSettings,
    pub funding_alert: FundingAlertSettings,
    pub strategies: StrategyToggles,
    pub ensemble: EnsembleSettings,
    pub setup_gate: SetupGateSettings,
    pub slippage: SlippageSettings,
    pub live_safety: LiveSafetySettings,
    pub alerts: AlertSettings,
    pub errors: ErrorSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub mode: TradingMode,
    pub log_level: String,
    /// Seconds between scheduled cycles.
    pub cycle_interval_secs: u64,
    /// Poll interval while paused.
    pub pause_poll_ms: u64,
    /// Upper bound on waiting for the scheduler to exit.
    pub stop_timeout_secs: u64,
    /// Daily bars fetched per symbol for entries.
    pub bars_limit: usize,
    /// Daily bars fetched per open trade for exits.
    pub exit_bars_limit: usize,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            mode: TradingMode::Paper,
            log_level: "info".to_string(),
            cycle_interval_secs: 3600,
            pause_poll_ms: 500,
            stop_timeout_secs: 5,
            bars_limit: 160,
            exit_bars_limit: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub database_url: String,
    pub max_connections: u32,
    pub busy_timeout_ms: u64,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            database_url: "sqlite://data/swing_bot.db".to_string(),
            max_connections: 5,
            busy_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSettings {
    pub cache_enabled: bool,
    /// Directory for cached bar files; memory only when unset.
    pub cache_dir: Option<String>,
    /// Age after which cached bars are fetched again.
    pub cache_ttl_minutes: i64,
    /// Bars kept per symbol in the cache.
    pub cache_keep_last_bars: usize,
    /// Lower/upper quantile at which bar columns are capped. 0 disables.
    pub outlier_quantile: f64,
}

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            cache_dir: Some("data/cache".to_string()),
            cache_ttl_minutes: 240,
            cache_keep_last_bars: 300,
            outlier_quantile: 0.001,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerSettings {
    /// Use the in-process mock broker instead of Alpaca.
    pub use_mock: bool,
    pub paper_base_url: String,
    pub live_base_url: String,
    pub data_base_url: String,
    pub paper_api_key: Option<String>,
    pub paper_secret_key: Option<String>,
    pub live_api_key: Option<String>,
    pub live_secret_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            use_mock: false,
            paper_base_url: "https://paper-api.alpaca.markets".to_string(),
            live_base_url: "https://api.alpaca.markets".to_string(),
            data_base_url: "https://data.alpaca.markets".to_string(),
            paper_api_key: None,
            paper_secret_key: None,
            live_api_key: None,
            live_secret_key: None,
            timeout_secs: 10,
        }
    }
}

impl BrokerSettings {
    /// Key pair and trading endpoint for the given mode.
    pub fn credentials(&self, mode: TradingMode) -> Option<(String, String, String)> {
        let (key, secret, url) = match mode {
            TradingMode::Paper => (
                self.paper_api_key.as_ref(),
                self.paper_secret_key.as_ref(),
                &self.paper_base_url,
            ),
            TradingMode::Live => (
                self.live_api_key.as_ref(),
                self.live_secret_key.as_ref(),
                &self.live_base_url,
            ),
        };
        match (key, secret) {
            (Some(k), Some(s)) if !k.is_empty() && !s.is_empty() => {
                Some((k.clone(), s.clone(), url.clone()))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UniverseSettings {
    pub watchlist_default: Vec<String>,
    pub watchlist_max_size: usize,
    /// Symbol to sector mapping used for concentration limits.
    pub sectors: HashMap<String, String>,
}

impl Default for UniverseSettings {
    fn default() -> Self {
        Self {
            watchlist_default: ["SPY", "QQQ", "AAPL", "MSFT", "NVDA"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            watchlist_max_size: 200,
            sectors: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskSettings {
    /// Fraction of equity risked per trade.
    pub risk_per_trade: Decimal,
    pub max_open_positions: usize,
    /// Fraction of equity a single position may occupy.
    pub max_position_weight: Decimal,
    /// Fraction of cash held back from new entries.
    pub cash_buffer: Decimal,
    pub max_sector_weight: f64,
    pub max_symbol_correlation: f64,
    pub correlation_window: usize,
    pub correlation_checks_enabled: bool,
    /// Cash/equity ratio below which a low-cash alert fires.
    pub low_cash_ratio: f64,
    pub max_hold_days: i64,
    pub atr_multiplier_stop: f64,
    pub atr_multiplier_tp: f64,
    pub trailing_stop_enabled: bool,
    pub trailing_atr_multiplier: f64,
}

impl Default for RiskSettings {
    fn default() -> Self {
        Self {
            risk_per_trade: Decimal::new(5, 3),      // 0.5%
            max_open_positions: 10,
            max_position_weight: Decimal::new(12, 2), // 12%
            cash_buffer: Decimal::new(8, 2),          // 8%
            max_sector_weight: 0.30,
            max_symbol_correlation: 0.85,
            correlation_window: 60,
            correlation_checks_enabled: true,
            low_cash_ratio: 0.10,
            max_hold_days: 14,
            atr_multiplier_stop: 2.0,
            atr_multiplier_tp: 4.0,
            trailing_stop_enabled: true,
            trailing_atr_multiplier: 2.5,
        }
    }
}

/// Named uniform price shocks applied to current holdings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StressSettings {
    pub scenarios: BTreeMap<String, f64>,
}

impl Default for StressSettings {
    fn default() -> Self {
        Self {
            scenarios: BTreeMap::from([
                ("down_5".to_string(), -0.05),
                ("down_10".to_string(), -0.10),
                ("crash_20".to_string(), -0.20),
            ]),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    pub max_failures: u32,
    /// Drawdown fraction at which trading halts.
    pub drawdown_limit: f64,
    pub cooldown_minutes: i64,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            max_failures: 3,
            drawdown_limit: 0.10,
            cooldown_minutes: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderSettings {
    /// Age after which unfilled orders are cancelled.
    pub ttl_minutes: i64,
}

impl Default for OrderSettings {
    fn default() -> Self {
        Self { ttl_minutes: 30 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FundingAlertSettings {
    pub enabled: bool,
    pub trade_queue_enabled: bool,
    pub trade_queue_ttl_hours: i64,
}

impl Default for FundingAlertSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            trade_queue_enabled: true,
            trade_queue_ttl_hours: 48,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyToggles {
    pub enable_setup_gate: bool,
    pub enable_trend_following: bool,
    pub enable_breakout: bool,
    pub enable_pullback_retest: bool,
    pub enable_rsi_momentum: bool,
    pub enable_volume_confirm: bool,
}

impl Default for StrategyToggles {
    fn default() -> Self {
        Self {
            enable_setup_gate: true,
            enable_trend_following: true,
            enable_breakout: true,
            enable_pullback_retest: true,
            enable_rsi_momentum: true,
            enable_volume_confirm: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleSettings {
    pub min_final_score_to_trade: f64,
}

impl Default for EnsembleSettings {
    fn default() -> Self {
        Self {
            min_final_score_to_trade: 0.70,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SetupGateSettings {
    pub min_trend: f64,
    pub min_rsi: f64,
}

impl Default for SetupGateSettings {
    fn default() -> Self {
        Self {
            min_trend: 0.0,
            min_rsi: 45.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SlippageSettings {
    pub spread_bps: Decimal,
    pub fee_bps: Decimal,
}

impl Default for SlippageSettings {
    fn default() -> Self {
        Self {
            spread_bps: Decimal::new(5, 0),
            fee_bps: Decimal::new(1, 0),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveSafetySettings {
    pub lock_enabled: bool,
    pub confirm_phrase: String,
    pub session_minutes: i64,
    /// Populated from `LIVE_UNLOCK_PIN` only.
    #[serde(skip)]
    pub unlock_pin: Option<String>,
}

impl Default for LiveSafetySettings {
    fn default() -> Self {
        Self {
            lock_enabled: true,
            confirm_phrase: "I_UNDERSTAND_LIVE_TRADING_RISK".to_string(),
            session_minutes: 30,
            unlock_pin: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertSettings {
    pub cooldown_seconds: i64,
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            cooldown_seconds: 300,
            telegram_bot_token: None,
            telegram_chat_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorSettings {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for ErrorSettings {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_delay_ms: 500,
        }
    }
}

impl Settings {
    /// Load settings from an optional TOML file and the environment.
    #[allow(clippy::result_large_err)]
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("SWINGBOT")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("universe.watchlist_default"),
        );

        let mut settings: Settings = builder.build()?.try_deserialize()?;
        settings.live_safety.unlock_pin = env::var("LIVE_UNLOCK_PIN")
            .ok()
            .filter(|pin| !pin.trim().is_empty());
        settings.validate()?;
        Ok(settings)
    }

    /// Reject values that would make the risk loop meaningless.
    #[allow(clippy::result_large_err)]
    pub fn validate(&self) -> Result<()> {
        let fraction = |name: &str, value: Decimal| -> Result<()> {
            if value <= Decimal::ZERO || value > Decimal::ONE {
                return Err(Error::config(format!("{name} must be in (0, 1], got {value}")));
            }
            Ok(())
        };
        fraction("risk.risk_per_trade", self.risk.risk_per_trade)?;
        fraction("risk.max_position_weight", self.risk.max_position_weight)?;
        if self.risk.cash_buffer < Decimal::ZERO || self.risk.cash_buffer >= Decimal::ONE {
            return Err(Error::config(format!(
                "risk.cash_buffer must be in [0, 1), got {}",
                self.risk.cash_buffer
            )));
        }
        if self.risk.max_open_positions == 0 {
            return Err(Error::config("risk.max_open_positions must be positive"));
        }
        if self.app.cycle_interval_secs == 0 || self.app.pause_poll_ms == 0 {
            return Err(Error::config("scheduler intervals must be positive"));
        }
        if self.circuit_breaker.max_failures == 0 {
            return Err(Error::config("circuit_breaker.max_failures must be positive"));
        }
        if !(0.0..=1.0).contains(&self.ensemble.min_final_score_to_trade) {
            return Err(Error::config(
                "ensemble.min_final_score_to_trade must be within [0, 1]",
            ));
        }
        if self.orders.ttl_minutes <= 0 || self.funding_alert.trade_queue_ttl_hours <= 0 {
            return Err(Error::config("order and queue TTLs must be positive"));
        }
        if !(0.0..0.5).contains(&self.data.outlier_quantile) {
            return Err(Error::config(format!(
                "data.outlier_quantile must be in [0, 0.5), got {}",
                self.data.outlier_quantile
            )));
        }
        if self.data.cache_enabled && self.data.cache_ttl_minutes <= 0 {
            return Err(Error::config("data.cache_ttl_minutes must be positive"));
        }
        if let Some((name, shock)) = self.stress.scenarios.iter().find(|(_, s)| **s <= -1.0) {
            return Err(Error::config(format!(
                "stress scenario {name} shock {shock} would drive prices below zero"
            )));
        }
        Ok(())
    }

    pub fn is_live(&self) -> bool {
        self.app.mode == TradingMode::Live
    }
}
