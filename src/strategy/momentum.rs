use crate::config::StrategyVariant;
use crate::indicators::IndicatorSnapshot;

use super::{SignalThresholds, Strategy, Vote};

/// RSI extremes confirmed by the fast/slow EMA trend.
///
/// Buy when RSI is oversold and the fast EMA is above the slow one, sell on the
/// mirror image, hold otherwise. An oversold RSI against a falling EMA pair is a
/// conflict and holds.
pub struct Momentum {
    thresholds: SignalThresholds,
}

impl Momentum {
    pub fn new(thresholds: SignalThresholds) -> Self {
        Self { thresholds }
    }
}

impl Strategy for Momentum {
    fn variant(&self) -> StrategyVariant {
        StrategyVariant::Momentum
    }

    fn vote(&self, snapshot: &IndicatorSnapshot) -> Vote {
        let t = &self.thresholds;
        let trend_up = snapshot.ema_fast > snapshot.ema_slow;
        let trend_down = snapshot.ema_fast < snapshot.ema_slow;

        if snapshot.rsi < t.rsi_oversold && trend_up {
            let depth = (t.rsi_oversold - snapshot.rsi) / t.rsi_oversold;
            return Vote::buy(0.5 + 0.5 * depth);
        }
        if snapshot.rsi > t.rsi_overbought && trend_down {
            let depth = (snapshot.rsi - t.rsi_overbought) / (100.0 - t.rsi_overbought);
            return Vote::sell(0.5 + 0.5 * depth);
        }

        Vote::HOLD
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::IndicatorBundle;
    use crate::strategy::tests::neutral_snapshot;
    use crate::strategy::Direction;

    fn signal_for(rsi: f64, ema_fast: f64, ema_slow: f64) -> Direction {
        let snapshot = IndicatorSnapshot {
            rsi,
            ema_fast,
            ema_slow,
            ..neutral_snapshot()
        };
        Momentum::new(SignalThresholds::default())
            .evaluate(&IndicatorBundle::Ready(snapshot))
            .direction
    }

    #[test]
    fn test_baseline_rule_grid() {
        let emas = [(1.101, 1.100), (1.100, 1.101), (1.100, 1.100)];
        for rsi in (0..=100).map(|v| v as f64) {
            for (fast, slow) in emas {
                let expected = if rsi < 30.0 && fast > slow {
                    Direction::Buy
                } else if rsi > 70.0 && fast < slow {
                    Direction::Sell
                } else {
                    Direction::Hold
                };
                assert_eq!(
                    signal_for(rsi, fast, slow),
                    expected,
                    "rsi {} fast {} slow {}",
                    rsi,
                    fast,
                    slow
                );
            }
        }
    }

    #[test]
    fn test_strength_grows_with_rsi_depth() {
        let strategy = Momentum::new(SignalThresholds::default());
        let shallow = IndicatorSnapshot {
            rsi: 28.0,
            ema_fast: 1.101,
            ..neutral_snapshot()
        };
        let deep = IndicatorSnapshot { rsi: 5.0, ..shallow.clone() };

        let shallow = strategy.evaluate(&IndicatorBundle::Ready(shallow));
        let deep = strategy.evaluate(&IndicatorBundle::Ready(deep));
        assert!(deep.strength > shallow.strength);
        assert!(shallow.strength >= 0.5 && deep.strength <= 1.0);
    }
}
