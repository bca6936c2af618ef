//! Support and resistance from swing points.
//!
//! A swing high (low) is a candle whose high (low) is the extreme of the
//! `PIVOT_WIDTH` candles on either side. Levels closer than `threshold * price`
//! to an already accepted level are merged into it.

use serde::{Deserialize, Serialize};

use crate::market::Candle;

const PIVOT_WIDTH: usize = 2;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SupportResistance {
    /// Ascending
    pub support: Vec<f64>,
    /// Ascending
    pub resistance: Vec<f64>,
    pub nearest_support: Option<f64>,
    pub nearest_resistance: Option<f64>,
}

fn dedupe(mut levels: Vec<f64>, min_gap: f64) -> Vec<f64> {
    levels.sort_by(|a, b| a.total_cmp(b));
    let mut kept: Vec<f64> = Vec::with_capacity(levels.len());
    for level in levels {
        match kept.last() {
            Some(last) if level - last <= min_gap => {}
            _ => kept.push(level),
        }
    }
    kept
}

pub fn support_resistance(candles: &[Candle], lookback: usize, threshold: f64) -> SupportResistance {
    let start = candles.len().saturating_sub(lookback);
    let window = &candles[start..];
    let Some(price) = window.last().map(|c| c.close) else {
        return SupportResistance::default();
    };

    if window.len() < 2 * PIVOT_WIDTH + 1 {
        return SupportResistance::default();
    }

    let mut highs = Vec::new();
    let mut lows = Vec::new();
    for i in PIVOT_WIDTH..window.len() - PIVOT_WIDTH {
        let neighbours = &window[i - PIVOT_WIDTH..=i + PIVOT_WIDTH];
        if neighbours.iter().all(|c| c.high <= window[i].high) {
            highs.push(window[i].high);
        }
        if neighbours.iter().all(|c| c.low >= window[i].low) {
            lows.push(window[i].low);
        }
    }

    let min_gap = threshold * price;
    let support = dedupe(lows, min_gap);
    let resistance = dedupe(highs, min_gap);

    let nearest_support = support.iter().rev().find(|level| **level <= price).copied();
    let nearest_resistance = resistance.iter().find(|level| **level >= price).copied();

    SupportResistance {
        support,
        resistance,
        nearest_support,
        nearest_resistance,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::tests::candles_from_closes;

    #[test]
    fn test_zigzag_levels() {
        // Oscillates between 1.1000 and 1.1040, ends in the middle
        let pattern = [1.1000, 1.1010, 1.1020, 1.1030, 1.1040, 1.1030, 1.1020, 1.1010];
        let mut closes: Vec<f64> = pattern.iter().cycle().take(40).copied().collect();
        closes.push(1.1020);
        let levels = support_resistance(&candles_from_closes(&closes), 50, 0.001);

        assert_eq!(levels.support.len(), 1);
        assert_eq!(levels.resistance.len(), 1);
        assert!((levels.nearest_support.unwrap() - 1.0999).abs() < 1e-9);
        assert!((levels.nearest_resistance.unwrap() - 1.1041).abs() < 1e-9);
    }

    #[test]
    fn test_short_window_has_no_levels() {
        let levels = support_resistance(&candles_from_closes(&[1.1, 1.2, 1.3]), 50, 0.001);
        assert_eq!(levels, SupportResistance::default());
    }

    #[test]
    fn test_lookback_limits_window() {
        // An old deep low outside the lookback must not appear
        let mut closes = vec![1.2, 1.0, 1.2, 1.2, 1.2];
        closes.extend(std::iter::repeat(1.2).take(20));
        let levels = support_resistance(&candles_from_closes(&closes), 10, 0.001);
        assert!(levels.support.iter().all(|level| *level > 1.1));
    }
}
