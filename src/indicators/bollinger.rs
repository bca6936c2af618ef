use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BollingerBands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

/// Widths within a few ulps of the middle band are rounding noise from the
/// mean, not volatility.
const COLLAPSE_ULPS: f64 = 64.0;

impl BollingerBands {
    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }

    /// True when the closes were flat and the bands sit on the mean.
    pub fn is_collapsed(&self) -> bool {
        self.width() <= COLLAPSE_ULPS * f64::EPSILON * self.middle.abs()
    }

    /// Where `price` sits inside the bands: 0 at the lower band, 1 at the upper.
    pub fn percent_b(&self, price: f64) -> f64 {
        if self.is_collapsed() {
            return 0.5;
        }
        (price - self.lower) / self.width()
    }
}

/// SMA(period) ± std_mult population standard deviations of the last `period` closes.
pub fn bollinger(closes: &[f64], period: usize, std_mult: f64) -> Option<BollingerBands> {
    if period == 0 || closes.len() < period {
        return None;
    }

    let window = &closes[closes.len() - period..];
    let mean = window.iter().sum::<f64>() / period as f64;
    let variance = window.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / period as f64;
    let band = std_mult * variance.sqrt();

    Some(BollingerBands {
        upper: mean + band,
        middle: mean,
        lower: mean - band,
    })
}
