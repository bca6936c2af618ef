use chrono::NaiveDate;
use rust_decimal::prelude::*;
use serde::Serialize;
use std::collections::HashMap;

/// Process-wide risk state. Only ever touched through the ledger lock.
#[derive(Debug, Clone, Serialize)]
pub struct RiskBudget {
    balance: Decimal,
    currency: String,
    trading_day: Option<NaiveDate>,
    day_start_balance: Decimal,
    realized_pnl_today: Decimal,
    /// Sum of losing closes today; wins never offset it.
    realized_loss_today: Decimal,
    open_positions: usize,
    /// Notional (account currency) per instrument with an open position.
    exposure: HashMap<String, f64>,
    wins: u32,
    losses: u32,
}

impl RiskBudget {
    pub fn new(balance: Decimal, currency: impl Into<String>) -> Self {
        Self {
            balance,
            currency: currency.into(),
            trading_day: None,
            day_start_balance: balance,
            realized_pnl_today: Decimal::ZERO,
            realized_loss_today: Decimal::ZERO,
            open_positions: 0,
            exposure: HashMap::new(),
            wins: 0,
            losses: 0,
        }
    }

    pub fn balance(&self) -> Decimal {
        self.balance
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn trading_day(&self) -> Option<NaiveDate> {
        self.trading_day
    }

    pub fn day_start_balance(&self) -> Decimal {
        self.day_start_balance
    }

    pub fn realized_pnl_today(&self) -> Decimal {
        self.realized_pnl_today
    }

    /// Cumulative realized loss today, as a positive amount. Winning trades do
    /// not reduce it.
    pub fn daily_loss(&self) -> Decimal {
        self.realized_loss_today
    }

    pub fn open_positions(&self) -> usize {
        self.open_positions
    }

    pub fn exposure(&self, instrument: &str) -> Option<f64> {
        self.exposure.get(instrument).copied()
    }

    pub fn wins(&self) -> u32 {
        self.wins
    }

    pub fn losses(&self) -> u32 {
        self.losses
    }

    /// Starts a new trading day: today's realized P/L resets and the current
    /// balance becomes the reference for the daily-loss ceiling.
    /// Returns false when `day` is already the current trading day.
    pub(crate) fn roll_day(&mut self, day: NaiveDate) -> bool {
        if self.trading_day == Some(day) {
            return false;
        }
        self.trading_day = Some(day);
        self.day_start_balance = self.balance;
        self.realized_pnl_today = Decimal::ZERO;
        self.realized_loss_today = Decimal::ZERO;
        true
    }

    /// Applies the broker's balance snapshot. The first non-zero snapshot also
    /// seeds the day's reference balance.
    pub(crate) fn apply_balance(&mut self, balance: Decimal, currency: &str) {
        self.balance = balance;
        if !currency.is_empty() {
            self.currency = currency.to_string();
        }
        if self.day_start_balance.is_zero() {
            self.day_start_balance = balance;
        }
    }

    pub(crate) fn record_open(&mut self, instrument: &str, notional: f64) {
        if self.exposure.insert(instrument.to_string(), notional).is_none() {
            self.open_positions += 1;
        }
    }

    pub(crate) fn record_close(&mut self, instrument: &str, realized_pnl: Decimal) {
        if self.exposure.remove(instrument).is_some() {
            self.open_positions = self.open_positions.saturating_sub(1);
        }
        self.realized_pnl_today += realized_pnl;
        self.balance += realized_pnl;

        if realized_pnl > Decimal::ZERO {
            self.wins += 1;
        } else if realized_pnl < Decimal::ZERO {
            self.losses += 1;
            self.realized_loss_today -= realized_pnl;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_open_close_accounting() {
        let mut budget = RiskBudget::new(dec!(10000), "USD");
        budget.record_open("EUR_USD", 1085.0);
        // A second open on the same instrument does not double count
        budget.record_open("EUR_USD", 1085.0);
        assert_eq!(budget.open_positions(), 1);

        budget.record_close("EUR_USD", dec!(-12.5));
        assert_eq!(budget.open_positions(), 0);
        assert_eq!(budget.exposure("EUR_USD"), None);
        assert_eq!(budget.daily_loss(), dec!(12.5));
        assert_eq!(budget.balance(), dec!(9987.5));
        assert_eq!((budget.wins(), budget.losses()), (0, 1));
    }

    #[test]
    fn test_roll_day_resets_realized_pnl() {
        let mut budget = RiskBudget::new(dec!(10000), "USD");
        let monday = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        assert!(budget.roll_day(monday));
        budget.record_close("EUR_USD", dec!(-250));
        assert!(!budget.roll_day(monday));
        assert_eq!(budget.daily_loss(), dec!(250));

        assert!(budget.roll_day(monday.succ_opt().unwrap()));
        assert_eq!(budget.daily_loss(), Decimal::ZERO);
        assert_eq!(budget.day_start_balance(), dec!(9750));
    }

    #[test]
    fn test_wins_do_not_offset_daily_loss() {
        let mut budget = RiskBudget::new(dec!(10000), "USD");
        budget.record_close("EUR_USD", dec!(200));
        budget.record_close("GBP_USD", dec!(-150));
        budget.record_close("EUR_USD", dec!(-150));

        assert_eq!(budget.realized_pnl_today(), dec!(-100));
        assert_eq!(budget.daily_loss(), dec!(300));
    }

    #[test]
    fn test_first_snapshot_seeds_day_start() {
        let mut budget = RiskBudget::new(Decimal::ZERO, "USD");
        budget.apply_balance(dec!(5000), "EUR");
        assert_eq!(budget.day_start_balance(), dec!(5000));
        assert_eq!(budget.currency(), "EUR");

        budget.apply_balance(dec!(5100), "EUR");
        assert_eq!(budget.day_start_balance(), dec!(5000));
    }
}
