//! ADX (Wilder).
//!
//! +DM/-DM and true range from consecutive candles, Wilder-smoothed over `period`,
//! DI = 100 * smoothed DM / smoothed TR, DX = 100 * |+DI - -DI| / (+DI + -DI),
//! ADX = Wilder average of DX. Needs 2 * period candles.

use serde::{Deserialize, Serialize};

use crate::market::Candle;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdxValue {
    pub adx: f64,
    pub plus_di: f64,
    pub minus_di: f64,
}

/// Wilder average: seed with the mean of the first `period` values, then
/// avg = (prev * (period - 1) + x) / period.
pub fn wilder_series(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.len() < period {
        return Vec::new();
    }

    let mut avg = values[..period].iter().sum::<f64>() / period as f64;
    let mut series = Vec::with_capacity(values.len() - period + 1);
    series.push(avg);
    for value in &values[period..] {
        avg = (avg * (period - 1) as f64 + value) / period as f64;
        series.push(avg);
    }
    series
}

pub fn adx(candles: &[Candle], period: usize) -> Option<AdxValue> {
    if period == 0 || candles.len() < 2 * period {
        return None;
    }

    let mut true_range = Vec::with_capacity(candles.len() - 1);
    let mut plus_dm = Vec::with_capacity(candles.len() - 1);
    let mut minus_dm = Vec::with_capacity(candles.len() - 1);

    for pair in candles.windows(2) {
        let (prev, bar) = (&pair[0], &pair[1]);
        let up_move = bar.high - prev.high;
        let down_move = prev.low - bar.low;

        plus_dm.push(if up_move > down_move && up_move > 0.0 { up_move } else { 0.0 });
        minus_dm.push(if down_move > up_move && down_move > 0.0 { down_move } else { 0.0 });
        true_range.push(
            (bar.high - bar.low)
                .max((bar.high - prev.close).abs())
                .max((bar.low - prev.close).abs()),
        );
    }

    let smooth_tr = wilder_series(&true_range, period);
    let smooth_plus = wilder_series(&plus_dm, period);
    let smooth_minus = wilder_series(&minus_dm, period);

    let mut plus_di = 0.0;
    let mut minus_di = 0.0;
    let dx: Vec<f64> = smooth_tr
        .iter()
        .zip(smooth_plus.iter().zip(&smooth_minus))
        .map(|(tr, (plus, minus))| {
            if *tr == 0.0 {
                plus_di = 0.0;
                minus_di = 0.0;
                return 0.0;
            }
            plus_di = 100.0 * plus / tr;
            minus_di = 100.0 * minus / tr;
            let sum = plus_di + minus_di;
            if sum == 0.0 {
                0.0
            } else {
                100.0 * (plus_di - minus_di).abs() / sum
            }
        })
        .collect();

    let adx = *wilder_series(&dx, period).last()?;

    Some(AdxValue {
        adx,
        plus_di,
        minus_di,
    })
}
