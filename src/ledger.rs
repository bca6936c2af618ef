//! The single mutation point for shared trading state.
//!
//! [`Ledger`] owns the risk budget, the active position records and the trade
//! archive. It lives behind one async mutex ([`SharedLedger`]); every compound
//! change (reserve, fill, exit, settle) is one method so it happens inside a
//! single critical section.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::brokers::{OpenTrade, OrderFill};
use crate::error::LifecycleError;
use crate::market::Instrument;
use crate::orders::{validate_order, Order, OrderRequest};
use crate::positions::{ClosedTrade, ExitReason, PositionRecord, PositionState};
use crate::risk::RiskBudget;

const ARCHIVE_CAPACITY: usize = 500;

pub type SharedLedger = Arc<Mutex<Ledger>>;

#[derive(Debug)]
pub struct Ledger {
    budget: RiskBudget,
    positions: HashMap<String, PositionRecord>,
    archive: VecDeque<ClosedTrade>,
}

impl Ledger {
    pub fn new(budget: RiskBudget) -> Self {
        Self {
            budget,
            positions: HashMap::new(),
            archive: VecDeque::new(),
        }
    }

    pub fn shared(self) -> SharedLedger {
        Arc::new(Mutex::new(self))
    }

    pub fn budget(&self) -> &RiskBudget {
        &self.budget
    }

    #[cfg(test)]
    pub(crate) fn budget_mut(&mut self) -> &mut RiskBudget {
        &mut self.budget
    }

    pub fn position(&self, instrument: &str) -> Option<&PositionRecord> {
        self.positions.get(instrument)
    }

    pub fn positions(&self) -> impl Iterator<Item = &PositionRecord> {
        self.positions.values()
    }

    /// Submissions awaiting broker confirmation.
    pub fn in_flight(&self) -> usize {
        self.count(|state| state == PositionState::Submitting)
    }

    pub fn open_count(&self) -> usize {
        self.count(PositionState::is_open)
    }

    fn count(&self, pred: impl Fn(PositionState) -> bool) -> usize {
        self.positions.values().filter(|record| pred(record.state())).count()
    }

    pub fn closed_trades(&self) -> impl Iterator<Item = &ClosedTrade> {
        self.archive.iter()
    }

    pub(crate) fn roll_day(&mut self, day: NaiveDate) -> bool {
        self.budget.roll_day(day)
    }

    pub(crate) fn apply_balance(&mut self, balance: Decimal, currency: &str) {
        self.budget.apply_balance(balance, currency);
    }

    /// Flat -> Submitting. The record doubles as the reservation counted by the
    /// open-position ceiling until the broker answers.
    pub(crate) fn reserve(&mut self, request: &OrderRequest) -> Result<Order, LifecycleError> {
        if let Some(existing) = self.positions.get(&request.instrument) {
            return Err(LifecycleError::AlreadyActive {
                instrument: request.instrument.clone(),
                state: existing.state(),
            });
        }
        validate_order(request)?;

        let order = Order::new(request.clone());
        self.positions
            .insert(request.instrument.clone(), PositionRecord::submitting(&order));
        Ok(order)
    }

    /// Submitting -> Rejected -> Flat. The budget is untouched.
    pub(crate) fn reject(&mut self, instrument: &str) -> Result<(), LifecycleError> {
        let record = self
            .positions
            .get_mut(instrument)
            .ok_or_else(|| LifecycleError::NotOpen(instrument.to_string()))?;
        record.transition(PositionState::Rejected)?;
        record.transition(PositionState::Flat)?;
        self.positions.remove(instrument);
        Ok(())
    }

    /// Submitting -> Open; the position now counts against the budget.
    pub(crate) fn confirm_fill(
        &mut self,
        instrument: &Instrument,
        fill: &OrderFill,
    ) -> Result<&PositionRecord, LifecycleError> {
        let record = self
            .positions
            .get_mut(&instrument.symbol)
            .ok_or_else(|| LifecycleError::NotOpen(instrument.symbol.clone()))?;
        record.confirm_fill(&fill.trade_id, fill.fill_price, instrument, fill.time)?;

        let notional = instrument.notional(record.units(), fill.fill_price, self.budget.currency());
        self.budget.record_open(&instrument.symbol, notional);
        Ok(record)
    }

    /// Adopts a trade the broker reports as open but the ledger does not know.
    pub(crate) fn adopt(
        &mut self,
        trade: &OpenTrade,
        instrument: &Instrument,
        stop_loss_pips: f64,
        take_profit_pips: f64,
    ) -> Result<&PositionRecord, LifecycleError> {
        if let Some(existing) = self.positions.get(&instrument.symbol) {
            return Err(LifecycleError::AlreadyActive {
                instrument: instrument.symbol.clone(),
                state: existing.state(),
            });
        }

        let record = PositionRecord::recovered(trade, instrument, stop_loss_pips, take_profit_pips);
        let notional = instrument.notional(record.units(), trade.price, self.budget.currency());
        self.budget.record_open(&instrument.symbol, notional);
        Ok(self
            .positions
            .entry(instrument.symbol.clone())
            .or_insert(record))
    }

    /// Open -> ExitPending. Returns the broker trade id to close.
    pub(crate) fn begin_exit(&mut self, instrument: &str) -> Result<String, LifecycleError> {
        let record = self
            .positions
            .get_mut(instrument)
            .ok_or_else(|| LifecycleError::NotOpen(instrument.to_string()))?;
        let trade_id = record
            .trade_id()
            .map(str::to_string)
            .ok_or_else(|| LifecycleError::NotOpen(instrument.to_string()))?;
        record.transition(PositionState::ExitPending)?;
        Ok(trade_id)
    }

    /// ExitPending -> Open after a failed close.
    pub(crate) fn abort_exit(&mut self, instrument: &str) -> Result<(), LifecycleError> {
        self.positions
            .get_mut(instrument)
            .ok_or_else(|| LifecycleError::NotOpen(instrument.to_string()))?
            .transition(PositionState::Open)
    }

    /// Moves a record through `via` (StopOut / TargetHit, or Closed directly)
    /// to Flat, books the realized P/L and archives the trade.
    pub(crate) fn settle(
        &mut self,
        instrument: &str,
        via: PositionState,
        exit_price: f64,
        realized_pnl: Decimal,
        reason: ExitReason,
        now: DateTime<Utc>,
    ) -> Result<ClosedTrade, LifecycleError> {
        let record = self
            .positions
            .get_mut(instrument)
            .ok_or_else(|| LifecycleError::NotOpen(instrument.to_string()))?;

        record.transition(via)?;
        if via != PositionState::Closed {
            record.transition(PositionState::Closed)?;
        }
        record.transition(PositionState::Flat)?;

        let trade = ClosedTrade {
            instrument: record.instrument().to_string(),
            side: record.side(),
            units: record.units(),
            trade_id: record.trade_id().map(str::to_string),
            entry_price: record.entry_price(),
            exit_price,
            realized_pnl,
            reason,
            opened_at: record.opened_at(),
            closed_at: now,
        };

        self.positions.remove(instrument);
        self.budget.record_close(instrument, realized_pnl);
        self.archive.push_back(trade.clone());
        while self.archive.len() > ARCHIVE_CAPACITY {
            self.archive.pop_front();
        }
        Ok(trade)
    }

    /// Drops every Submitting reservation (shutdown with calls still pending).
    pub(crate) fn abandon_in_flight(&mut self) -> Vec<String> {
        let pending: Vec<String> = self
            .positions
            .values()
            .filter(|record| record.state() == PositionState::Submitting)
            .map(|record| record.instrument().to_string())
            .collect();

        for instrument in &pending {
            if let Err(e) = self.reject(instrument) {
                tracing::error!("Failed to release reservation for {}: {}", instrument, e);
            }
        }
        pending
    }

    /// Returns records left in ExitPending by an interrupted close to Open, so
    /// they are closed again rather than skipped.
    pub(crate) fn restore_pending_exits(&mut self) -> Vec<String> {
        let pending: Vec<String> = self
            .positions
            .values()
            .filter(|record| record.state() == PositionState::ExitPending)
            .map(|record| record.instrument().to_string())
            .collect();

        for instrument in &pending {
            if let Err(e) = self.abort_exit(instrument) {
                tracing::error!("Failed to restore {}: {}", instrument, e);
            }
        }
        pending
    }
}
