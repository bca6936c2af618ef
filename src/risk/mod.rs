//! Risk manager: turns an actionable signal into a sized [`OrderRequest`] or a
//! [`Rejection`]. Assessment is a pure read of the ledger; the caller holds the
//! ledger lock across assessment and reservation.

pub mod budget;

use rust_decimal::prelude::*;
use std::fmt;

use crate::config::{Config, RiskConfig, TradingConfig};
use crate::ledger::Ledger;
use crate::market::Instrument;
use crate::strategy::TradeSignal;

pub use crate::orders::{OrderRequest, OrderSide};
pub use budget::RiskBudget;

/// Why a signal did not become an order. Not an error: a Hold-equivalent outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rejection {
    PositionAlreadyOpen,
    MaxPositionsReached,
    DailyLossExceeded,
    CorrelationExposureExceeded,
    SizeBelowMinimum,
    NoDirection,
}

impl Rejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rejection::PositionAlreadyOpen => "position-already-open",
            Rejection::MaxPositionsReached => "max-positions-reached",
            Rejection::DailyLossExceeded => "daily-loss-exceeded",
            Rejection::CorrelationExposureExceeded => "correlation-exposure-exceeded",
            Rejection::SizeBelowMinimum => "size-below-minimum",
            Rejection::NoDirection => "no-direction",
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct RiskManager {
    risk: RiskConfig,
    max_positions: usize,
    position_size: i64,
    stop_loss_pips: f64,
    take_profit_pips: f64,
    correlated_groups: Vec<Vec<String>>,
}

impl RiskManager {
    pub fn new(risk: &RiskConfig, trading: &TradingConfig) -> Self {
        let correlated_groups = trading
            .correlated_groups
            .iter()
            .map(|group| group.iter().map(|symbol| symbol.replace('/', "_")).collect())
            .collect();

        Self {
            risk: risk.clone(),
            max_positions: trading.max_positions,
            position_size: trading.position_size,
            stop_loss_pips: trading.stop_loss_pips,
            take_profit_pips: trading.take_profit_pips,
            correlated_groups,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.risk, &config.trading)
    }

    pub fn max_positions(&self) -> usize {
        self.max_positions
    }

    /// Checks, first match wins: already open, position ceiling (open plus
    /// in-flight submissions), daily loss, correlated exposure, then size.
    pub fn assess(
        &self,
        signal: &TradeSignal,
        instrument: &Instrument,
        ledger: &Ledger,
    ) -> Result<OrderRequest, Rejection> {
        let side = OrderSide::from_direction(signal.direction).ok_or(Rejection::NoDirection)?;
        let price = signal
            .price
            .filter(|p| p.is_finite() && *p > 0.0)
            .ok_or(Rejection::NoDirection)?;
        let budget = ledger.budget();

        if ledger.position(&instrument.symbol).is_some() {
            return Err(Rejection::PositionAlreadyOpen);
        }

        if budget.open_positions() + ledger.in_flight() >= self.max_positions {
            return Err(Rejection::MaxPositionsReached);
        }

        if self.daily_loss_exceeded(budget) {
            return Err(Rejection::DailyLossExceeded);
        }

        let units = self.position_units(instrument, price, budget);
        let notional = instrument.notional(units, price, budget.currency());
        if let Some(existing) = self.correlated_exposure(&instrument.symbol, budget) {
            let limit = self.risk.correlation_risk * budget.balance().to_f64().unwrap_or(0.0);
            if existing + notional > limit {
                return Err(Rejection::CorrelationExposureExceeded);
            }
        }

        if units < instrument.min_units {
            return Err(Rejection::SizeBelowMinimum);
        }

        Ok(OrderRequest {
            instrument: instrument.symbol.clone(),
            side,
            units,
            stop_loss_pips: self.stop_loss_pips,
            take_profit_pips: self.take_profit_pips,
            reference_price: price,
            variant: signal.variant,
        })
    }

    /// Gross realized loss today against the day's ceiling; winning trades do
    /// not buy back room under it.
    pub fn daily_loss_exceeded(&self, budget: &RiskBudget) -> bool {
        let loss = budget.daily_loss();
        if loss.is_zero() {
            return false;
        }
        let limit = Decimal::from_f64(self.risk.daily_loss_limit).unwrap_or(Decimal::ZERO);
        loss >= budget.day_start_balance() * limit
    }

    /// Units for a new position, capped so a stop-out never loses more than
    /// `max_risk_per_trade` of balance, rounded down to the instrument's lot.
    pub fn position_units(&self, instrument: &Instrument, price: f64, budget: &RiskBudget) -> i64 {
        let balance = budget.balance().to_f64().unwrap_or(0.0);
        let stop_distance = instrument.pips_to_price(self.stop_loss_pips);
        let loss_per_unit = instrument.quote_to_account(stop_distance, price, budget.currency());
        if balance <= 0.0 || loss_per_unit <= 0.0 {
            return 0;
        }

        let cap = balance * self.risk.max_risk_per_trade / loss_per_unit;
        let desired = if self.risk.kelly_enabled {
            balance * self.kelly_fraction(budget) / loss_per_unit
        } else {
            self.position_size as f64
        };

        let units = desired.min(cap).max(0.0).floor() as i64;
        units - units % instrument.min_units.max(1)
    }

    /// Fractional Kelly stake as a fraction of balance, in `[0, max_risk_per_trade]`.
    /// Win probability is Laplace-smoothed from the archive; the payoff ratio is
    /// the configured target/stop distance.
    pub fn kelly_fraction(&self, budget: &RiskBudget) -> f64 {
        let wins = budget.wins() as f64;
        let trades = wins + budget.losses() as f64;
        let p = (wins + 1.0) / (trades + 2.0);
        let b = self.take_profit_pips / self.stop_loss_pips;
        if !(b.is_finite() && b > 0.0) {
            return 0.0;
        }

        let full_kelly = p - (1.0 - p) / b;
        (full_kelly * self.risk.kelly_fraction).clamp(0.0, self.risk.max_risk_per_trade)
    }

    /// Notional already held on instruments correlated with `symbol`, or None
    /// when none of them is open.
    fn correlated_exposure(&self, symbol: &str, budget: &RiskBudget) -> Option<f64> {
        let mut peers: Vec<&str> = self
            .correlated_groups
            .iter()
            .filter(|group| group.iter().any(|member| member == symbol))
            .flat_map(|group| group.iter().map(String::as_str))
            .filter(|member| *member != symbol)
            .collect();
        peers.sort_unstable();
        peers.dedup();

        let open: Vec<f64> = peers.iter().filter_map(|peer| budget.exposure(peer)).collect();
        if open.is_empty() {
            None
        } else {
            Some(open.iter().sum())
        }
    }
}
