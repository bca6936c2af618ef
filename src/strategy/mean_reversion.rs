use crate::config::StrategyVariant;
use crate::indicators::IndicatorSnapshot;

use super::{SignalThresholds, Strategy, Vote};

/// Fades moves outside the Bollinger bands when the stochastic confirms the
/// extreme. Sitting on a support (resistance) level strengthens a buy (sell).
pub struct MeanReversion {
    thresholds: SignalThresholds,
}

/// Fraction of the band width within which price counts as "at" a level.
const LEVEL_PROXIMITY: f64 = 0.1;
const LEVEL_BONUS: f64 = 0.2;

impl MeanReversion {
    pub fn new(thresholds: SignalThresholds) -> Self {
        Self { thresholds }
    }
}

impl Strategy for MeanReversion {
    fn variant(&self) -> StrategyVariant {
        StrategyVariant::MeanReversion
    }

    fn vote(&self, snapshot: &IndicatorSnapshot) -> Vote {
        let t = &self.thresholds;
        let bands = &snapshot.bollinger;
        if bands.is_collapsed() {
            return Vote::HOLD;
        }
        let width = bands.width();

        let price = snapshot.price;
        let percent_b = bands.percent_b(price);
        let near = |level: Option<f64>| {
            level.is_some_and(|level| (price - level).abs() <= LEVEL_PROXIMITY * width)
        };

        let below_band = price <= bands.lower;
        let above_band = price >= bands.upper;
        let stoch_oversold = snapshot.stochastic.k < t.stoch_oversold;
        let stoch_overbought = snapshot.stochastic.k > t.stoch_overbought;

        // Band and oscillator pointing opposite ways is a conflict
        if (below_band && stoch_overbought) || (above_band && stoch_oversold) {
            return Vote::HOLD;
        }

        let buy = (below_band && stoch_oversold).then(|| {
            let bonus = if near(snapshot.levels.nearest_support) { LEVEL_BONUS } else { 0.0 };
            0.5 - percent_b + bonus
        });
        let sell = (above_band && stoch_overbought).then(|| {
            let bonus = if near(snapshot.levels.nearest_resistance) { LEVEL_BONUS } else { 0.0 };
            percent_b - 0.5 + bonus
        });

        Vote::resolve(buy, sell)
    }
}
