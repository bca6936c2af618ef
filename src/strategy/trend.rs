use crate::config::StrategyVariant;
use crate::indicators::IndicatorSnapshot;

use super::{Direction, SignalThresholds, Strategy, Vote};

/// Trades with an established trend.
///
/// Three sub-signals must agree: fast EMA vs slow EMA, price vs the long trend EMA,
/// and the MACD histogram sign. ADX below the threshold means no trend worth
/// following. Any disagreement holds.
pub struct TrendFollowing {
    thresholds: SignalThresholds,
}

impl TrendFollowing {
    pub fn new(thresholds: SignalThresholds) -> Self {
        Self { thresholds }
    }
}

fn sign(value: f64) -> Direction {
    if value > 0.0 {
        Direction::Buy
    } else if value < 0.0 {
        Direction::Sell
    } else {
        Direction::Hold
    }
}

impl Strategy for TrendFollowing {
    fn variant(&self) -> StrategyVariant {
        StrategyVariant::TrendFollowing
    }

    fn vote(&self, snapshot: &IndicatorSnapshot) -> Vote {
        if snapshot.adx.adx < self.thresholds.adx_threshold {
            return Vote::HOLD;
        }

        let sub_signals = [
            sign(snapshot.ema_fast - snapshot.ema_slow),
            sign(snapshot.price - snapshot.ema_trend),
            sign(snapshot.macd.histogram),
        ];

        let strength = (snapshot.adx.adx / 50.0).min(1.0);
        if sub_signals.iter().all(|d| *d == Direction::Buy) {
            Vote::buy(strength)
        } else if sub_signals.iter().all(|d| *d == Direction::Sell) {
            Vote::sell(strength)
        } else {
            Vote::HOLD
        }
    }
}
