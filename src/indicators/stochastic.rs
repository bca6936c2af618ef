use serde::{Deserialize, Serialize};

use crate::market::Candle;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StochasticValue {
    pub k: f64,
    pub d: f64,
}

fn percent_k(window: &[Candle]) -> f64 {
    let highest = window.iter().map(|c| c.high).fold(f64::MIN, f64::max);
    let lowest = window.iter().map(|c| c.low).fold(f64::MAX, f64::min);
    let close = window[window.len() - 1].close;

    if highest - lowest <= 0.0 {
        return 50.0;
    }
    100.0 * (close - lowest) / (highest - lowest)
}

/// %K over `k_period` candles, %D = SMA of the last `d_period` %K values.
pub fn stochastic(candles: &[Candle], k_period: usize, d_period: usize) -> Option<StochasticValue> {
    if k_period == 0 || d_period == 0 || candles.len() < k_period + d_period - 1 {
        return None;
    }

    let ks: Vec<f64> = candles
        .windows(k_period)
        .skip(candles.len() + 1 - k_period - d_period)
        .map(percent_k)
        .collect();

    Some(StochasticValue {
        k: ks[ks.len() - 1],
        d: ks.iter().sum::<f64>() / ks.len() as f64,
    })
}
