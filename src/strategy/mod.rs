//! Signal generator: strategy variants mapping an indicator bundle to one signal.

pub mod hybrid;
pub mod mean_reversion;
pub mod momentum;
pub mod trend;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::{StrategyConfig, StrategyVariant};
use crate::indicators::{IndicatorBundle, IndicatorSnapshot};

pub use hybrid::Hybrid;
pub use mean_reversion::MeanReversion;
pub use momentum::Momentum;
pub use trend::TrendFollowing;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Buy,
    Sell,
    Hold,
}

impl Direction {
    pub fn opposes(&self, other: Direction) -> bool {
        matches!(
            (self, other),
            (Direction::Buy, Direction::Sell) | (Direction::Sell, Direction::Buy)
        )
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Buy => f.write_str("BUY"),
            Direction::Sell => f.write_str("SELL"),
            Direction::Hold => f.write_str("HOLD"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeSignal {
    pub instrument: String,
    pub direction: Direction,
    /// 0..=1, always 0 for Hold
    pub strength: f64,
    pub variant: StrategyVariant,
    /// Time of the candle the signal was computed from; None without data.
    pub time: Option<DateTime<Utc>>,
    /// Last close of that candle.
    pub price: Option<f64>,
}

impl TradeSignal {
    pub fn is_actionable(&self) -> bool {
        self.direction != Direction::Hold
    }
}

/// Direction and strength one variant produces from a ready snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vote {
    pub direction: Direction,
    pub strength: f64,
}

impl Vote {
    pub const HOLD: Vote = Vote {
        direction: Direction::Hold,
        strength: 0.0,
    };

    pub fn buy(strength: f64) -> Self {
        Self {
            direction: Direction::Buy,
            strength: strength.clamp(0.0, 1.0),
        }
    }

    pub fn sell(strength: f64) -> Self {
        Self {
            direction: Direction::Sell,
            strength: strength.clamp(0.0, 1.0),
        }
    }

    /// Resolves one buy and one sell condition. Both firing is a conflict: Hold.
    pub fn resolve(buy: Option<f64>, sell: Option<f64>) -> Self {
        match (buy, sell) {
            (Some(strength), None) => Vote::buy(strength),
            (None, Some(strength)) => Vote::sell(strength),
            _ => Vote::HOLD,
        }
    }
}

/// Thresholds shared by every variant.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalThresholds {
    pub rsi_oversold: f64,
    pub rsi_overbought: f64,
    pub adx_threshold: f64,
    pub stoch_oversold: f64,
    pub stoch_overbought: f64,
}

impl From<&StrategyConfig> for SignalThresholds {
    fn from(config: &StrategyConfig) -> Self {
        Self {
            rsi_oversold: config.rsi_oversold,
            rsi_overbought: config.rsi_overbought,
            adx_threshold: config.adx_threshold,
            stoch_oversold: config.stoch_oversold,
            stoch_overbought: config.stoch_overbought,
        }
    }
}

impl Default for SignalThresholds {
    fn default() -> Self {
        Self::from(&StrategyConfig::default())
    }
}

pub trait Strategy: Send + Sync {
    fn variant(&self) -> StrategyVariant;

    fn vote(&self, snapshot: &IndicatorSnapshot) -> Vote;

    /// Exactly one signal per bundle. Insufficient data is Hold with strength 0.
    fn evaluate(&self, bundle: &IndicatorBundle) -> TradeSignal {
        let (vote, time, price) = match bundle.snapshot() {
            Some(snapshot) => {
                let vote = self.vote(snapshot);
                let vote = if vote.strength.is_finite() { vote } else { Vote::HOLD };
                (vote, Some(snapshot.time), Some(snapshot.price))
            }
            None => (Vote::HOLD, None, None),
        };

        TradeSignal {
            instrument: bundle.instrument().to_string(),
            direction: vote.direction,
            strength: if vote.direction == Direction::Hold { 0.0 } else { vote.strength },
            variant: self.variant(),
            time,
            price,
        }
    }
}

pub fn build_strategy(config: &StrategyConfig) -> Box<dyn Strategy> {
    let thresholds = SignalThresholds::from(config);
    match config.variant {
        StrategyVariant::Momentum => Box::new(Momentum::new(thresholds)),
        StrategyVariant::TrendFollowing => Box::new(TrendFollowing::new(thresholds)),
        StrategyVariant::MeanReversion => Box::new(MeanReversion::new(thresholds)),
        StrategyVariant::Hybrid => Box::new(Hybrid::new(thresholds)),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::indicators::{AdxValue, BollingerBands, MacdValue, StochasticValue, SupportResistance};
    use chrono::TimeZone;

    /// A neutral snapshot: mid RSI, flat EMAs, weak trend, price mid-band.
    pub(crate) fn neutral_snapshot() -> IndicatorSnapshot {
        IndicatorSnapshot {
            instrument: "EUR_USD".to_string(),
            time: Utc.with_ymd_and_hms(2024, 3, 4, 12, 0, 0).unwrap(),
            price: 1.1000,
            rsi: 50.0,
            ema_fast: 1.1000,
            ema_slow: 1.1000,
            ema_trend: 1.1000,
            macd: MacdValue {
                line: 0.0,
                signal: 0.0,
                histogram: 0.0,
            },
            adx: AdxValue {
                adx: 15.0,
                plus_di: 20.0,
                minus_di: 20.0,
            },
            bollinger: BollingerBands {
                upper: 1.1050,
                middle: 1.1000,
                lower: 1.0950,
            },
            stochastic: StochasticValue { k: 50.0, d: 50.0 },
            levels: SupportResistance::default(),
        }
    }

    #[test]
    fn test_insufficient_bundle_is_hold_for_every_variant() {
        let bundle = IndicatorBundle::InsufficientData {
            instrument: "EUR_USD".to_string(),
            available: 12,
            required: 200,
        };

        for variant in [
            StrategyVariant::Momentum,
            StrategyVariant::TrendFollowing,
            StrategyVariant::MeanReversion,
            StrategyVariant::Hybrid,
        ] {
            let config = StrategyConfig {
                variant,
                ..StrategyConfig::default()
            };
            let signal = build_strategy(&config).evaluate(&bundle);
            assert_eq!(signal.direction, Direction::Hold);
            assert_eq!(signal.strength, 0.0);
            assert_eq!(signal.variant, variant);
            assert_eq!(signal.instrument, "EUR_USD");
            assert!(signal.time.is_none());
        }
    }

    #[test]
    fn test_resolve_conflict_is_hold() {
        assert_eq!(Vote::resolve(Some(0.8), Some(0.6)), Vote::HOLD);
        assert_eq!(Vote::resolve(None, None), Vote::HOLD);
        assert_eq!(Vote::resolve(Some(1.7), None), Vote::buy(1.0));
    }

    #[test]
    fn test_opposes() {
        assert!(Direction::Buy.opposes(Direction::Sell));
        assert!(Direction::Sell.opposes(Direction::Buy));
        assert!(!Direction::Buy.opposes(Direction::Hold));
        assert!(!Direction::Buy.opposes(Direction::Buy));
    }
}
