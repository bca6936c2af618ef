//! Simple and exponential moving averages.
//!
//! EMA uses k = 2/(n+1), seeded with the SMA of the first n values.

/// EMA series aligned to the end of `values`: element `j` is the EMA at
/// `values[j + period - 1]`. Empty when there are fewer than `period` values.
pub fn ema_series(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.len() < period {
        return Vec::new();
    }

    let k = 2.0 / (period as f64 + 1.0);
    let mut series = Vec::with_capacity(values.len() - period + 1);
    let mut ema = values[..period].iter().sum::<f64>() / period as f64;
    series.push(ema);

    for value in &values[period..] {
        ema = value * k + ema * (1.0 - k);
        series.push(ema);
    }

    series
}

pub fn ema(values: &[f64], period: usize) -> Option<f64> {
    ema_series(values, period).last().copied()
}

/// SMA of the last `period` values.
pub fn sma(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    let window = &values[values.len() - period..];
    Some(window.iter().sum::<f64>() / period as f64)
}
