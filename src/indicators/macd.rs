use serde::{Deserialize, Serialize};

use super::moving_average::ema_series;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MacdValue {
    pub line: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// MACD line = EMA(fast) - EMA(slow); signal = EMA(signal) of the line.
pub fn macd(closes: &[f64], fast: usize, slow: usize, signal: usize) -> Option<MacdValue> {
    if fast == 0 || fast >= slow {
        return None;
    }

    let fast_series = ema_series(closes, fast);
    let slow_series = ema_series(closes, slow);
    if slow_series.is_empty() {
        return None;
    }

    // slow_series[j] and fast_series[j + offset] sit on the same candle
    let offset = slow - fast;
    let line: Vec<f64> = slow_series
        .iter()
        .enumerate()
        .map(|(j, slow_value)| fast_series[j + offset] - slow_value)
        .collect();

    let signal_value = *ema_series(&line, signal).last()?;
    let line_value = *line.last()?;

    Some(MacdValue {
        line: line_value,
        signal: signal_value,
        histogram: line_value - signal_value,
    })
}
