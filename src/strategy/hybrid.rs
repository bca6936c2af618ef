use crate::config::StrategyVariant;
use crate::indicators::IndicatorSnapshot;

use super::{
    Direction, MeanReversion, Momentum, SignalThresholds, Strategy, TrendFollowing, Vote,
};

/// Majority vote over the momentum, trend-following and mean-reversion variants.
///
/// A direction needs at least two votes and no vote against it; ties and split
/// decisions hold. Strength is the mean strength of the winning votes scaled by
/// the share of variants that cast them.
pub struct Hybrid {
    members: Vec<Box<dyn Strategy>>,
}

impl Hybrid {
    pub fn new(thresholds: SignalThresholds) -> Self {
        Self::with_members(vec![
            Box::new(Momentum::new(thresholds.clone())),
            Box::new(TrendFollowing::new(thresholds.clone())),
            Box::new(MeanReversion::new(thresholds)),
        ])
    }

    pub fn with_members(members: Vec<Box<dyn Strategy>>) -> Self {
        Self { members }
    }
}

impl Strategy for Hybrid {
    fn variant(&self) -> StrategyVariant {
        StrategyVariant::Hybrid
    }

    fn vote(&self, snapshot: &IndicatorSnapshot) -> Vote {
        if self.members.is_empty() {
            return Vote::HOLD;
        }

        let votes: Vec<Vote> = self.members.iter().map(|m| m.vote(snapshot)).collect();
        let tally = |direction: Direction| -> Vec<f64> {
            votes
                .iter()
                .filter(|v| v.direction == direction)
                .map(|v| v.strength)
                .collect()
        };
        let buys = tally(Direction::Buy);
        let sells = tally(Direction::Sell);

        let blended = |winners: &[f64]| {
            let mean = winners.iter().sum::<f64>() / winners.len() as f64;
            mean * winners.len() as f64 / self.members.len() as f64
        };

        match (buys.len(), sells.len()) {
            (b, 0) if b >= 2 => Vote::buy(blended(&buys)),
            (0, s) if s >= 2 => Vote::sell(blended(&sells)),
            _ => Vote::HOLD,
        }
    }
}
