//! Indicator engine: a pure function from a candle window to an [`IndicatorBundle`].
//!
//! Every indicator works on the time-ascending window it is given and nothing else,
//! so the same window always produces the same bundle (live or replayed).

pub mod adx;
pub mod bollinger;
pub mod levels;
pub mod macd;
pub mod moving_average;
pub mod rsi;
pub mod stochastic;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::StrategyConfig;
use crate::market::Candle;

pub use adx::AdxValue;
pub use bollinger::BollingerBands;
pub use levels::SupportResistance;
pub use macd::MacdValue;
pub use stochastic::StochasticValue;

/// Periods and thresholds the engine needs, split out of the strategy config.
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorParams {
    pub rsi_period: usize,
    pub ema_fast: usize,
    pub ema_slow: usize,
    pub ema_trend: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub adx_period: usize,
    pub bb_period: usize,
    pub bb_std: f64,
    pub stoch_k: usize,
    pub stoch_d: usize,
    pub lookback_period: usize,
    pub sr_threshold: f64,
}

impl From<&StrategyConfig> for IndicatorParams {
    fn from(config: &StrategyConfig) -> Self {
        Self {
            rsi_period: config.rsi_period,
            ema_fast: config.ema_fast,
            ema_slow: config.ema_slow,
            ema_trend: config.ema_trend,
            macd_fast: config.macd_fast,
            macd_slow: config.macd_slow,
            macd_signal: config.macd_signal,
            adx_period: config.adx_period,
            bb_period: config.bb_period,
            bb_std: config.bb_std,
            stoch_k: config.stoch_k,
            stoch_d: config.stoch_d,
            lookback_period: config.lookback_period,
            sr_threshold: config.sr_threshold,
        }
    }
}

impl IndicatorParams {
    pub fn required_candles(&self) -> usize {
        [
            self.rsi_period + 1,
            self.ema_fast,
            self.ema_slow,
            self.ema_trend,
            self.macd_slow + self.macd_signal - 1,
            2 * self.adx_period,
            self.bb_period,
            self.stoch_k + self.stoch_d - 1,
            self.lookback_period,
        ]
        .into_iter()
        .max()
        .unwrap_or(1)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub instrument: String,
    pub time: DateTime<Utc>,
    pub price: f64,
    pub rsi: f64,
    pub ema_fast: f64,
    pub ema_slow: f64,
    pub ema_trend: f64,
    pub macd: MacdValue,
    pub adx: AdxValue,
    pub bollinger: BollingerBands,
    pub stochastic: StochasticValue,
    pub levels: SupportResistance,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IndicatorBundle {
    Ready(IndicatorSnapshot),
    InsufficientData {
        instrument: String,
        available: usize,
        required: usize,
    },
}

impl IndicatorBundle {
    pub fn instrument(&self) -> &str {
        match self {
            IndicatorBundle::Ready(snapshot) => &snapshot.instrument,
            IndicatorBundle::InsufficientData { instrument, .. } => instrument,
        }
    }

    pub fn snapshot(&self) -> Option<&IndicatorSnapshot> {
        match self {
            IndicatorBundle::Ready(snapshot) => Some(snapshot),
            IndicatorBundle::InsufficientData { .. } => None,
        }
    }
}

/// Computes every indicator over `candles`. Windows shorter than the largest
/// lookback (or containing non-finite prices) yield `InsufficientData`.
pub fn compute(instrument: &str, candles: &[Candle], params: &IndicatorParams) -> IndicatorBundle {
    let required = params.required_candles();
    let insufficient = || IndicatorBundle::InsufficientData {
        instrument: instrument.to_string(),
        available: candles.len(),
        required,
    };

    if candles.len() < required {
        return insufficient();
    }
    if candles
        .iter()
        .any(|c| !(c.open.is_finite() && c.high.is_finite() && c.low.is_finite() && c.close.is_finite()))
    {
        return insufficient();
    }

    match snapshot(instrument, candles, params) {
        Some(snapshot) => IndicatorBundle::Ready(snapshot),
        None => insufficient(),
    }
}

fn snapshot(instrument: &str, candles: &[Candle], params: &IndicatorParams) -> Option<IndicatorSnapshot> {
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let last = candles.last()?;

    Some(IndicatorSnapshot {
        instrument: instrument.to_string(),
        time: last.time,
        price: last.close,
        rsi: rsi::rsi(&closes, params.rsi_period)?,
        ema_fast: moving_average::ema(&closes, params.ema_fast)?,
        ema_slow: moving_average::ema(&closes, params.ema_slow)?,
        ema_trend: moving_average::ema(&closes, params.ema_trend)?,
        macd: macd::macd(&closes, params.macd_fast, params.macd_slow, params.macd_signal)?,
        adx: adx::adx(candles, params.adx_period)?,
        bollinger: bollinger::bollinger(&closes, params.bb_period, params.bb_std)?,
        stochastic: stochastic::stochastic(candles, params.stoch_k, params.stoch_d)?,
        levels: levels::support_resistance(candles, params.lookback_period, params.sr_threshold),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    /// Candles with the given closes, one pip of range on either side.
    pub(crate) fn candles_from_closes(closes: &[f64]) -> Vec<Candle> {
        let start = Utc.with_ymd_and_hms(2024, 3, 4, 0, 0, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Candle {
                time: start + Duration::minutes(5 * i as i64),
                open: close,
                high: close + 0.0001,
                low: close - 0.0001,
                close,
                volume: 100,
            })
            .collect()
    }

    pub(crate) fn small_params() -> IndicatorParams {
        IndicatorParams {
            rsi_period: 14,
            ema_fast: 5,
            ema_slow: 10,
            ema_trend: 20,
            macd_fast: 3,
            macd_slow: 6,
            macd_signal: 3,
            adx_period: 5,
            bb_period: 10,
            bb_std: 2.0,
            stoch_k: 5,
            stoch_d: 3,
            lookback_period: 20,
            sr_threshold: 0.001,
        }
    }

    #[test]
    fn test_required_candles_is_largest_lookback() {
        let params = IndicatorParams::from(&StrategyConfig::default());
        assert_eq!(params.required_candles(), 200);
        assert_eq!(small_params().required_candles(), 20);
    }

    #[test]
    fn test_short_window_is_insufficient() {
        let params = small_params();
        for len in [0, 1, 10, 19] {
            let candles = candles_from_closes(&vec![1.1; len]);
            match compute("EUR_USD", &candles, &params) {
                IndicatorBundle::InsufficientData {
                    available, required, ..
                } => {
                    assert_eq!(available, len);
                    assert_eq!(required, 20);
                }
                other => panic!("expected insufficient data, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_non_finite_prices_are_insufficient() {
        let mut candles = candles_from_closes(&vec![1.1; 30]);
        candles[12].close = f64::NAN;
        let bundle = compute("EUR_USD", &candles, &small_params());
        assert!(bundle.snapshot().is_none());
    }

    #[test]
    fn test_rising_series_snapshot() {
        let closes: Vec<f64> = (0..40).map(|i| 1.1000 + i as f64 * 0.0005).collect();
        let candles = candles_from_closes(&closes);
        let bundle = compute("EUR_USD", &candles, &small_params());
        let snapshot = bundle.snapshot().expect("enough candles");

        assert_eq!(snapshot.price, *closes.last().unwrap());
        assert_eq!(snapshot.rsi, 100.0);
        assert!(snapshot.ema_fast > snapshot.ema_slow);
        assert!(snapshot.ema_slow > snapshot.ema_trend);
        assert!(snapshot.macd.line > 0.0);
        assert!(snapshot.adx.plus_di > snapshot.adx.minus_di);
    }

    #[test]
    fn test_compute_is_deterministic() {
        let closes: Vec<f64> = (0..60)
            .map(|i| 1.1 + ((i as f64) * 0.7).sin() * 0.002)
            .collect();
        let candles = candles_from_closes(&closes);
        let params = small_params();
        assert_eq!(
            compute("EUR_USD", &candles, &params),
            compute("EUR_USD", &candles, &params)
        );
    }
}
