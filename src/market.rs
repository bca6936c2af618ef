use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Reference data for a tradable currency pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    pub symbol: String,
    pub pip_size: f64,
    pub min_units: i64,
}

impl Instrument {
    /// Builds reference data from an OANDA-style symbol (`EUR_USD`, `USD_JPY`).
    /// JPY-quoted pairs move in hundredths, everything else in ten-thousandths.
    pub fn from_symbol(symbol: &str, min_units: i64) -> Self {
        let symbol = symbol.replace('/', "_");
        let pip_size = if symbol.ends_with("_JPY") { 0.01 } else { 0.0001 };

        Self {
            symbol,
            pip_size,
            min_units: min_units.max(1),
        }
    }

    pub fn pips_to_price(&self, pips: f64) -> f64 {
        pips * self.pip_size
    }

    pub fn base(&self) -> &str {
        self.symbol.split('_').next().unwrap_or(&self.symbol)
    }

    pub fn quote(&self) -> &str {
        self.symbol.rsplit('_').next().unwrap_or(&self.symbol)
    }

    /// Converts an amount in the quote currency into the account currency.
    /// Crosses with neither leg in the account currency are left unconverted.
    pub fn quote_to_account(&self, amount: f64, price: f64, account_currency: &str) -> f64 {
        if self.base() == account_currency && price > 0.0 {
            amount / price
        } else {
            amount
        }
    }

    /// Notional value of `units` of the base currency, in the account currency.
    pub fn notional(&self, units: i64, price: f64, account_currency: &str) -> f64 {
        let units = units.abs() as f64;
        if self.base() == account_currency {
            units
        } else {
            units * price
        }
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.symbol)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Granularity {
    M1,
    M5,
    M15,
    M30,
    H1,
    H4,
    D,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::M1 => "M1",
            Granularity::M5 => "M5",
            Granularity::M15 => "M15",
            Granularity::M30 => "M30",
            Granularity::H1 => "H1",
            Granularity::H4 => "H4",
            Granularity::D => "D",
        }
    }

    pub fn seconds(&self) -> i64 {
        match self {
            Granularity::M1 => 60,
            Granularity::M5 => 5 * 60,
            Granularity::M15 => 15 * 60,
            Granularity::M30 => 30 * 60,
            Granularity::H1 => 60 * 60,
            Granularity::H4 => 4 * 60 * 60,
            Granularity::D => 24 * 60 * 60,
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rolling, time-ascending candle buffer for one instrument.
///
/// New candles are appended; a candle with the same timestamp as the newest one
/// replaces it (the broker keeps updating the in-progress candle), anything older
/// than the newest candle is ignored. Oldest candles are evicted past `capacity`.
#[derive(Debug, Clone)]
pub struct CandleWindow {
    capacity: usize,
    candles: VecDeque<Candle>,
}

impl CandleWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            candles: VecDeque::with_capacity(capacity),
        }
    }

    pub fn extend<I>(&mut self, incoming: I)
    where
        I: IntoIterator<Item = Candle>,
    {
        for candle in incoming {
            match self.candles.back() {
                Some(last) if candle.time < last.time => continue,
                Some(last) if candle.time == last.time => {
                    self.candles.pop_back();
                }
                _ => {}
            }
            self.candles.push_back(candle);
            while self.candles.len() > self.capacity {
                self.candles.pop_front();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn latest(&self) -> Option<&Candle> {
        self.candles.back()
    }

    pub fn to_vec(&self) -> Vec<Candle> {
        self.candles.iter().cloned().collect()
    }
}
