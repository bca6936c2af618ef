use config::{Config as ConfigBuilder, File};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::env;
use std::time::Duration;

use crate::error::ConfigError;
use crate::market::{Granularity, Instrument};

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub broker: BrokerConfig,
    pub trading: TradingConfig,
    pub strategy: StrategyConfig,
    pub risk: RiskConfig,
    pub schedule: ScheduleConfig,
    pub market: MarketHoursConfig,
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "fx-autotrader".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BrokerKind {
    Oanda,
    Mock,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct BrokerConfig {
    pub kind: BrokerKind,
    pub account_id: String,
    pub api_token: String,
    /// Demo (practice) account when true, live account otherwise.
    pub practice: bool,
    pub request_timeout_secs: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            kind: BrokerKind::Oanda,
            account_id: String::new(),
            api_token: String::new(),
            practice: true,
            request_timeout_secs: 10,
        }
    }
}

impl BrokerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct TradingConfig {
    pub instruments: Vec<String>,
    /// Units per trade when Kelly sizing is off.
    pub position_size: i64,
    pub min_units: i64,
    pub max_positions: usize,
    pub stop_loss_pips: f64,
    pub take_profit_pips: f64,
    pub granularity: Granularity,
    pub candle_count: usize,
    /// Groups of instruments whose exposure is summed for the correlation check.
    pub correlated_groups: Vec<Vec<String>>,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            instruments: vec!["EUR_USD".to_string(), "GBP_USD".to_string()],
            position_size: 1000,
            min_units: 1,
            max_positions: 2,
            stop_loss_pips: 20.0,
            take_profit_pips: 40.0,
            granularity: Granularity::M5,
            candle_count: 250,
            correlated_groups: vec![vec!["EUR_USD".to_string(), "GBP_USD".to_string()]],
        }
    }
}

impl TradingConfig {
    pub fn instruments(&self) -> Vec<Instrument> {
        self.instruments
            .iter()
            .map(|symbol| Instrument::from_symbol(symbol, self.min_units))
            .collect()
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StrategyVariant {
    Momentum,
    TrendFollowing,
    MeanReversion,
    Hybrid,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct StrategyConfig {
    pub variant: StrategyVariant,
    pub rsi_period: usize,
    pub rsi_oversold: f64,
    pub rsi_overbought: f64,
    pub ema_fast: usize,
    pub ema_slow: usize,
    pub ema_trend: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub adx_period: usize,
    pub adx_threshold: f64,
    pub bb_period: usize,
    pub bb_std: f64,
    pub stoch_k: usize,
    pub stoch_d: usize,
    pub stoch_oversold: f64,
    pub stoch_overbought: f64,
    pub lookback_period: usize,
    pub sr_threshold: f64,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            variant: StrategyVariant::Momentum,
            rsi_period: 14,
            rsi_oversold: 30.0,
            rsi_overbought: 70.0,
            ema_fast: 20,
            ema_slow: 50,
            ema_trend: 200,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            adx_period: 14,
            adx_threshold: 25.0,
            bb_period: 20,
            bb_std: 2.0,
            stoch_k: 14,
            stoch_d: 3,
            stoch_oversold: 20.0,
            stoch_overbought: 80.0,
            lookback_period: 50,
            sr_threshold: 0.001,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct RiskConfig {
    /// Fraction of balance that may be lost on a single trade's stop-loss.
    pub max_risk_per_trade: f64,
    /// Fraction of the day's opening balance that may be realized as loss.
    pub daily_loss_limit: f64,
    /// Correlated notional allowed, as a multiple of balance.
    pub correlation_risk: f64,
    pub kelly_enabled: bool,
    pub kelly_fraction: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_risk_per_trade: 0.01,
            daily_loss_limit: 0.03,
            correlation_risk: 2.0,
            kelly_enabled: false,
            kelly_fraction: 0.25,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ScheduleConfig {
    pub check_interval_secs: u64,
    pub max_retries: u32,
    pub retry_delay_secs: u64,
    pub shutdown_timeout_secs: u64,
    pub close_positions_on_shutdown: bool,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 300,
            max_retries: 3,
            retry_delay_secs: 5,
            shutdown_timeout_secs: 30,
            close_positions_on_shutdown: false,
        }
    }
}

impl ScheduleConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Weekly forex closure, in UTC hours.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct MarketHoursConfig {
    pub close_friday_hour_utc: u32,
    pub open_sunday_hour_utc: u32,
    pub day_rollover_hour_utc: u32,
}

impl Default for MarketHoursConfig {
    fn default() -> Self {
        Self {
            close_friday_hour_utc: 22,
            open_sunday_hour_utc: 22,
            day_rollover_hour_utc: 22,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct MonitoringConfig {
    pub metrics_port: Option<u16>,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder()
            .add_source(File::with_name("config/default").required(false));

        if let Ok(env) = env::var("RUN_ENV") {
            builder = builder.add_source(File::with_name(&format!("config/{}", env)).required(false));
        }

        // Credentials come from the environment, never from checked-in files
        if let Ok(account_id) = env::var("OANDA_ACCOUNT_ID") {
            builder = builder.set_override("broker.account_id", account_id)?;
        }
        if let Ok(api_token) = env::var("OANDA_API_TOKEN") {
            builder = builder.set_override("broker.api_token", api_token)?;
        }
        if let Ok(practice) = env::var("FXBOT_PRACTICE") {
            builder = builder.set_override("broker.practice", practice)?;
        }

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Largest candle count any indicator needs before it yields a value.
    pub fn required_candles(&self) -> usize {
        crate::indicators::IndicatorParams::from(&self.strategy).required_candles()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker.kind == BrokerKind::Oanda
            && (self.broker.account_id.trim().is_empty() || self.broker.api_token.trim().is_empty())
        {
            return Err(ConfigError::MissingCredentials);
        }

        let trading = &self.trading;
        if trading.instruments.is_empty() {
            return Err(invalid("trading.instruments must not be empty"));
        }
        let mut seen = HashSet::new();
        for symbol in &trading.instruments {
            if !seen.insert(symbol.as_str()) {
                return Err(invalid(format!("duplicate instrument {}", symbol)));
            }
        }
        if trading.max_positions == 0 {
            return Err(invalid("trading.max_positions must be at least 1"));
        }
        if trading.position_size <= 0 {
            return Err(invalid("trading.position_size must be positive"));
        }
        if trading.stop_loss_pips <= 0.0 || trading.take_profit_pips <= 0.0 {
            return Err(invalid("stop-loss and take-profit pips must be positive"));
        }

        let strategy = &self.strategy;
        let periods = [
            ("rsi_period", strategy.rsi_period),
            ("ema_fast", strategy.ema_fast),
            ("ema_slow", strategy.ema_slow),
            ("ema_trend", strategy.ema_trend),
            ("macd_fast", strategy.macd_fast),
            ("macd_slow", strategy.macd_slow),
            ("macd_signal", strategy.macd_signal),
            ("adx_period", strategy.adx_period),
            ("bb_period", strategy.bb_period),
            ("stoch_k", strategy.stoch_k),
            ("stoch_d", strategy.stoch_d),
            ("lookback_period", strategy.lookback_period),
        ];
        if let Some((name, _)) = periods.iter().find(|(_, period)| *period == 0) {
            return Err(invalid(format!("strategy.{} must be at least 1", name)));
        }
        if strategy.rsi_oversold >= strategy.rsi_overbought {
            return Err(invalid("rsi_oversold must be below rsi_overbought"));
        }
        if strategy.stoch_oversold >= strategy.stoch_overbought {
            return Err(invalid("stoch_oversold must be below stoch_overbought"));
        }
        if strategy.ema_fast >= strategy.ema_slow {
            return Err(invalid("ema_fast must be shorter than ema_slow"));
        }
        if strategy.macd_fast >= strategy.macd_slow {
            return Err(invalid("macd_fast must be shorter than macd_slow"));
        }
        if strategy.bb_std <= 0.0 || strategy.sr_threshold < 0.0 {
            return Err(invalid("bb_std must be positive and sr_threshold non-negative"));
        }

        let risk = &self.risk;
        for (name, value) in [
            ("max_risk_per_trade", risk.max_risk_per_trade),
            ("daily_loss_limit", risk.daily_loss_limit),
            ("kelly_fraction", risk.kelly_fraction),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(invalid(format!("risk.{} must be in (0, 1], got {}", name, value)));
            }
        }
        if risk.correlation_risk <= 0.0 {
            return Err(invalid("risk.correlation_risk must be positive"));
        }

        let required = self.required_candles();
        if trading.candle_count < required {
            return Err(invalid(format!(
                "trading.candle_count ({}) is below the largest indicator lookback ({})",
                trading.candle_count, required
            )));
        }

        if self.schedule.check_interval_secs == 0 {
            return Err(invalid("schedule.check_interval_secs must be positive"));
        }

        let market = &self.market;
        if [
            market.close_friday_hour_utc,
            market.open_sunday_hour_utc,
            market.day_rollover_hour_utc,
        ]
        .iter()
        .any(|hour| *hour > 23)
        {
            return Err(invalid("market hours must be within 0..=23"));
        }

        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(message.into())
}
