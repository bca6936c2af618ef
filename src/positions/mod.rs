//! Position lifecycle: one explicit state machine per instrument.
//!
//! `Flat` is the absence of a record. Records are created in `Submitting` and
//! leave the active set through `Rejected` or `Closed`; every other change goes
//! through [`PositionRecord::transition`], which enforces the table below.

pub mod manager;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::brokers::OpenTrade;
use crate::error::LifecycleError;
use crate::market::Instrument;
use crate::orders::{Order, OrderSide};

pub use manager::{EntryOutcome, ExitOutcome, PositionManager};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PositionState {
    Flat,
    Submitting,
    Open,
    ExitPending,
    StopOut,
    TargetHit,
    Closed,
    Rejected,
}

impl PositionState {
    pub fn can_transition(self, to: PositionState) -> bool {
        use PositionState::*;
        matches!(
            (self, to),
            (Flat, Submitting)
                | (Submitting, Open)
                | (Submitting, Rejected)
                | (Rejected, Flat)
                | (Open, ExitPending)
                | (Open, StopOut)
                | (Open, TargetHit)
                | (ExitPending, Open)
                | (ExitPending, Closed)
                | (ExitPending, StopOut)
                | (ExitPending, TargetHit)
                | (StopOut, Closed)
                | (TargetHit, Closed)
                | (Closed, Flat)
        )
    }

    /// Holds broker exposure: counts against the open-position ceiling.
    pub fn is_open(self) -> bool {
        matches!(self, PositionState::Open | PositionState::ExitPending)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    OpposingSignal,
    StopLoss,
    TakeProfit,
    Shutdown,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExitReason::OpposingSignal => "opposing_signal",
            ExitReason::StopLoss => "stop_loss",
            ExitReason::TakeProfit => "take_profit",
            ExitReason::Shutdown => "shutdown",
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PositionRecord {
    instrument: String,
    side: OrderSide,
    units: i64,
    state: PositionState,
    client_order_id: String,
    trade_id: Option<String>,
    entry_price: Option<f64>,
    stop_loss: Option<f64>,
    take_profit: Option<f64>,
    stop_loss_pips: f64,
    take_profit_pips: f64,
    opened_at: Option<DateTime<Utc>>,
}

impl PositionRecord {
    pub(crate) fn submitting(order: &Order) -> Self {
        let request = &order.request;
        Self {
            instrument: request.instrument.clone(),
            side: request.side,
            units: request.units,
            state: PositionState::Submitting,
            client_order_id: order.client_order_id.clone(),
            trade_id: None,
            entry_price: None,
            stop_loss: None,
            take_profit: None,
            stop_loss_pips: request.stop_loss_pips,
            take_profit_pips: request.take_profit_pips,
            opened_at: None,
        }
    }

    /// Rebuilds an `Open` record from a trade the broker reports on startup.
    /// Missing broker-side stop or target prices are derived from the configured
    /// distances so the record still satisfies the open-carries-a-stop rule.
    pub(crate) fn recovered(
        trade: &OpenTrade,
        instrument: &Instrument,
        stop_loss_pips: f64,
        take_profit_pips: f64,
    ) -> Self {
        let side = trade.side();
        let (derived_stop, derived_target) =
            protective_prices(side, trade.price, instrument, stop_loss_pips, take_profit_pips);

        Self {
            instrument: instrument.symbol.clone(),
            side,
            units: trade.units.abs(),
            state: PositionState::Open,
            client_order_id: format!("RECOVERED-{}", trade.trade_id),
            trade_id: Some(trade.trade_id.clone()),
            entry_price: Some(trade.price),
            stop_loss: Some(trade.stop_loss.unwrap_or(derived_stop)),
            take_profit: Some(trade.take_profit.unwrap_or(derived_target)),
            stop_loss_pips,
            take_profit_pips,
            opened_at: trade.open_time,
        }
    }

    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    pub fn side(&self) -> OrderSide {
        self.side
    }

    pub fn units(&self) -> i64 {
        self.units
    }

    pub fn state(&self) -> PositionState {
        self.state
    }

    pub fn client_order_id(&self) -> &str {
        &self.client_order_id
    }

    pub fn trade_id(&self) -> Option<&str> {
        self.trade_id.as_deref()
    }

    pub fn entry_price(&self) -> Option<f64> {
        self.entry_price
    }

    pub fn stop_loss(&self) -> Option<f64> {
        self.stop_loss
    }

    pub fn take_profit(&self) -> Option<f64> {
        self.take_profit
    }

    pub fn opened_at(&self) -> Option<DateTime<Utc>> {
        self.opened_at
    }

    pub(crate) fn transition(&mut self, to: PositionState) -> Result<(), LifecycleError> {
        if !self.state.can_transition(to) {
            return Err(LifecycleError::InvalidTransition {
                instrument: self.instrument.clone(),
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }

    /// Submitting -> Open on a confirmed fill. Stop and target prices are
    /// placed at the configured pip distances from the fill.
    pub(crate) fn confirm_fill(
        &mut self,
        trade_id: &str,
        fill_price: f64,
        instrument: &Instrument,
        time: DateTime<Utc>,
    ) -> Result<(), LifecycleError> {
        if !(self.stop_loss_pips.is_finite() && self.stop_loss_pips > 0.0) {
            return Err(LifecycleError::MissingStopLoss(self.instrument.clone()));
        }
        self.transition(PositionState::Open)?;

        let (stop, target) = protective_prices(
            self.side,
            fill_price,
            instrument,
            self.stop_loss_pips,
            self.take_profit_pips,
        );
        self.trade_id = Some(trade_id.to_string());
        self.entry_price = Some(fill_price);
        self.stop_loss = Some(stop);
        self.take_profit = Some(target);
        self.opened_at = Some(time);
        Ok(())
    }

    /// Which protective level the broker most likely hit, judged by distance
    /// from the close price.
    pub fn classify_broker_exit(&self, close_price: f64) -> PositionState {
        match (self.stop_loss, self.take_profit) {
            (Some(stop), Some(target)) => {
                if (close_price - stop).abs() <= (close_price - target).abs() {
                    PositionState::StopOut
                } else {
                    PositionState::TargetHit
                }
            }
            (Some(_), None) => PositionState::StopOut,
            (None, Some(_)) => PositionState::TargetHit,
            (None, None) => {
                if self.price_pnl(close_price) < 0.0 {
                    PositionState::StopOut
                } else {
                    PositionState::TargetHit
                }
            }
        }
    }

    /// P/L in the quote currency for closing at `close_price`.
    pub fn price_pnl(&self, close_price: f64) -> f64 {
        match self.entry_price {
            Some(entry) => (close_price - entry) * self.units as f64 * self.side.sign(),
            None => 0.0,
        }
    }
}

fn protective_prices(
    side: OrderSide,
    entry: f64,
    instrument: &Instrument,
    stop_loss_pips: f64,
    take_profit_pips: f64,
) -> (f64, f64) {
    let stop = instrument.pips_to_price(stop_loss_pips);
    let target = instrument.pips_to_price(take_profit_pips);
    match side {
        OrderSide::Buy => (entry - stop, entry + target),
        OrderSide::Sell => (entry + stop, entry - target),
    }
}

/// A settled position, kept in the ledger's bounded archive.
#[derive(Debug, Clone, Serialize)]
pub struct ClosedTrade {
    pub instrument: String,
    pub side: OrderSide,
    pub units: i64,
    pub trade_id: Option<String>,
    pub entry_price: Option<f64>,
    pub exit_price: f64,
    pub realized_pnl: Decimal,
    pub reason: ExitReason,
    pub opened_at: Option<DateTime<Utc>>,
    pub closed_at: DateTime<Utc>,
}
