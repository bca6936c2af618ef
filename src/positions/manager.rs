use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::brokers::{AccountSnapshot, BrokerAPI, TradeOutcome};
use crate::error::{BrokerError, LifecycleError};
use crate::ledger::SharedLedger;
use crate::market::Instrument;
use crate::metrics::Metrics;
use crate::positions::{ClosedTrade, ExitReason, PositionRecord, PositionState};
use crate::retry::with_deadline;
use crate::risk::{Rejection, RiskManager};
use crate::strategy::TradeSignal;

#[derive(Debug, Clone, PartialEq)]
pub enum EntryOutcome {
    Opened {
        trade_id: String,
        units: i64,
        fill_price: f64,
    },
    /// Refused by the risk manager; a normal outcome.
    Refused(Rejection),
    /// Declined by the broker; the instrument is back to Flat.
    BrokerRejected(String),
    /// Submission failed in transit (network, timeout); treated as not placed.
    Failed(BrokerError),
    Violation(LifecycleError),
}

#[derive(Debug, Clone)]
pub enum ExitOutcome {
    Closed(ClosedTrade),
    /// Close failed; the position is Open again.
    Failed(BrokerError),
    NotOpen,
    Violation(LifecycleError),
}

/// Drives the per-instrument state machine against the broker. Ledger
/// mutations happen under the ledger lock; broker calls happen outside it.
pub struct PositionManager {
    broker: Arc<dyn BrokerAPI>,
    ledger: SharedLedger,
    risk: RiskManager,
    instruments: HashMap<String, Instrument>,
    stop_loss_pips: f64,
    take_profit_pips: f64,
    call_timeout: Duration,
    metrics: Metrics,
}

impl PositionManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        broker: Arc<dyn BrokerAPI>,
        ledger: SharedLedger,
        risk: RiskManager,
        instruments: &[Instrument],
        stop_loss_pips: f64,
        take_profit_pips: f64,
        call_timeout: Duration,
        metrics: Metrics,
    ) -> Self {
        Self {
            broker,
            ledger,
            risk,
            instruments: instruments
                .iter()
                .map(|instrument| (instrument.symbol.clone(), instrument.clone()))
                .collect(),
            stop_loss_pips,
            take_profit_pips,
            call_timeout,
            metrics,
        }
    }

    pub fn ledger(&self) -> &SharedLedger {
        &self.ledger
    }

    pub fn risk(&self) -> &RiskManager {
        &self.risk
    }

    fn instrument(&self, symbol: &str) -> Instrument {
        self.instruments
            .get(symbol)
            .cloned()
            .unwrap_or_else(|| Instrument::from_symbol(symbol, 1))
    }

    /// Flat -> Submitting -> Open | Rejected -> Flat.
    ///
    /// Assessment and reservation happen in one critical section, so concurrent
    /// instruments cannot both take the last open-position slot.
    pub async fn try_enter(&self, signal: &TradeSignal, instrument: &Instrument) -> EntryOutcome {
        let order = {
            let mut ledger = self.ledger.lock().await;
            let request = match self.risk.assess(signal, instrument, &ledger) {
                Ok(request) => request,
                Err(rejection) => return EntryOutcome::Refused(rejection),
            };
            match ledger.reserve(&request) {
                Ok(order) => order,
                Err(e) => {
                    error!("Refusing submission for {}: {}", instrument, e);
                    return EntryOutcome::Violation(e);
                }
            }
        };

        info!(
            "Submitting {:?} {} {} (SL {} pips, TP {} pips) as {}",
            order.request.side,
            order.request.units,
            instrument,
            order.request.stop_loss_pips,
            order.request.take_profit_pips,
            order.client_order_id
        );
        let result = with_deadline(self.call_timeout, self.broker.submit_order(&order)).await;

        let mut ledger = self.ledger.lock().await;
        match result {
            Ok(fill) => match ledger.confirm_fill(instrument, &fill) {
                Ok(record) => {
                    info!(
                        "Opened {} {:?} {} @ {} (trade {}, SL {:?}, TP {:?})",
                        instrument,
                        record.side(),
                        record.units(),
                        fill.fill_price,
                        fill.trade_id,
                        record.stop_loss(),
                        record.take_profit()
                    );
                    self.metrics
                        .orders_submitted
                        .with_label_values(&[instrument.symbol.as_str()])
                        .inc();
                    self.metrics.open_positions.set(ledger.open_count() as i64);
                    EntryOutcome::Opened {
                        trade_id: fill.trade_id,
                        units: order.request.units,
                        fill_price: fill.fill_price,
                    }
                }
                Err(e) => {
                    // The broker trade is picked up by the next reconcile
                    error!("Fill for {} could not be recorded: {}", instrument, e);
                    if let Err(release) = ledger.reject(&instrument.symbol) {
                        error!("Failed to release {}: {}", instrument, release);
                    }
                    EntryOutcome::Violation(e)
                }
            },
            Err(e) => {
                if let Err(release) = ledger.reject(&instrument.symbol) {
                    error!("Failed to release {}: {}", instrument, release);
                }
                self.metrics
                    .orders_rejected
                    .with_label_values(&[instrument.symbol.as_str()])
                    .inc();
                match e {
                    BrokerError::Rejected(reason) => {
                        warn!("Broker rejected order for {}: {}", instrument, reason);
                        EntryOutcome::BrokerRejected(reason)
                    }
                    other => {
                        error!("Order submission for {} failed: {}", instrument, other);
                        EntryOutcome::Failed(other)
                    }
                }
            }
        }
    }

    /// Open -> ExitPending -> Closed. A close the broker reports as not found
    /// means the broker already exited; the outcome is looked up instead.
    pub async fn exit(&self, symbol: &str, reason: ExitReason) -> ExitOutcome {
        let trade_id = {
            let mut ledger = self.ledger.lock().await;
            match ledger.position(symbol).map(PositionRecord::state) {
                Some(PositionState::Open) => {}
                _ => return ExitOutcome::NotOpen,
            }
            match ledger.begin_exit(symbol) {
                Ok(trade_id) => trade_id,
                Err(e) => {
                    error!("Refusing exit for {}: {}", symbol, e);
                    return ExitOutcome::Violation(e);
                }
            }
        };

        info!("Closing {} (trade {}, {})", symbol, trade_id, reason);
        match with_deadline(self.call_timeout, self.broker.close_position(&trade_id)).await {
            Ok(fill) => {
                let mut ledger = self.ledger.lock().await;
                let pnl = match fill.realized_pl {
                    Some(pnl) => pnl,
                    None => match ledger.position(symbol) {
                        Some(record) => self.estimate_pnl(record, fill.close_price, ledger.budget().currency()),
                        None => Decimal::ZERO,
                    },
                };
                self.settle(&mut ledger, symbol, PositionState::Closed, fill.close_price, pnl, reason)
            }
            Err(BrokerError::NotFound(_)) => {
                info!("{} trade {} already closed at the broker", symbol, trade_id);
                self.settle_from_broker(symbol, &trade_id).await
            }
            Err(e) => {
                warn!("Close of {} failed, keeping position open: {}", symbol, e);
                if let Err(e) = self.ledger.lock().await.abort_exit(symbol) {
                    error!("Failed to restore {}: {}", symbol, e);
                }
                ExitOutcome::Failed(e)
            }
        }
    }

    /// Settles a position the broker closed on its own (stop-loss or take-profit).
    async fn settle_from_broker(&self, symbol: &str, trade_id: &str) -> ExitOutcome {
        let outcome = with_deadline(self.call_timeout, self.broker.trade_outcome(trade_id)).await;

        let mut ledger = self.ledger.lock().await;
        let restore = |ledger: &mut crate::ledger::Ledger| {
            if ledger.position(symbol).map(PositionRecord::state) == Some(PositionState::ExitPending) {
                if let Err(e) = ledger.abort_exit(symbol) {
                    error!("Failed to restore {}: {}", symbol, e);
                }
            }
        };

        match outcome {
            Ok(TradeOutcome::Closed {
                close_price,
                realized_pl,
            }) => {
                let Some(record) = ledger.position(symbol) else {
                    return ExitOutcome::NotOpen;
                };
                let via = record.classify_broker_exit(close_price);
                let pnl = realized_pl
                    .unwrap_or_else(|| self.estimate_pnl(record, close_price, ledger.budget().currency()));
                let reason = if via == PositionState::StopOut {
                    ExitReason::StopLoss
                } else {
                    ExitReason::TakeProfit
                };
                self.settle(&mut ledger, symbol, via, close_price, pnl, reason)
            }
            Ok(TradeOutcome::Open) => {
                warn!("{} trade {} is still open at the broker", symbol, trade_id);
                restore(&mut *ledger);
                ExitOutcome::Failed(BrokerError::Rejected(format!("trade {} still open", trade_id)))
            }
            Err(e) => {
                warn!("Could not look up {} trade {}: {}", symbol, trade_id, e);
                restore(&mut *ledger);
                ExitOutcome::Failed(e)
            }
        }
    }

    fn settle(
        &self,
        ledger: &mut crate::ledger::Ledger,
        symbol: &str,
        via: PositionState,
        close_price: f64,
        pnl: Decimal,
        reason: ExitReason,
    ) -> ExitOutcome {
        match ledger.settle(symbol, via, close_price, pnl, reason, Utc::now()) {
            Ok(trade) => {
                info!(
                    "Closed {} @ {} | P/L {} | reason {} | realized today {}",
                    symbol,
                    close_price,
                    pnl,
                    reason,
                    ledger.budget().realized_pnl_today()
                );
                self.metrics
                    .positions_closed
                    .with_label_values(&[symbol, reason.to_string().as_str()])
                    .inc();
                self.metrics.open_positions.set(ledger.open_count() as i64);
                ExitOutcome::Closed(trade)
            }
            Err(e) => {
                error!("Failed to settle {}: {}", symbol, e);
                ExitOutcome::Violation(e)
            }
        }
    }

    fn estimate_pnl(&self, record: &PositionRecord, close_price: f64, currency: &str) -> Decimal {
        let instrument = self.instrument(record.instrument());
        let pnl = instrument.quote_to_account(record.price_pnl(close_price), close_price, currency);
        Decimal::from_f64(pnl).unwrap_or_default().round_dp(2)
    }

    /// Applies the cycle's account snapshot: settles positions the broker no
    /// longer lists, adopts trades we do not track, then takes the broker's
    /// balance as authoritative.
    pub async fn reconcile(&self, snapshot: &AccountSnapshot) -> Vec<ExitOutcome> {
        let missing: Vec<(String, String)> = {
            let mut ledger = self.ledger.lock().await;
            self.adopt_unknown(&mut ledger, snapshot);

            ledger
                .positions()
                .filter(|record| record.state() == PositionState::Open)
                .filter_map(|record| {
                    let trade_id = record.trade_id()?;
                    if snapshot.trade(trade_id).is_some() {
                        None
                    } else {
                        Some((record.instrument().to_string(), trade_id.to_string()))
                    }
                })
                .collect()
        };

        let mut outcomes = Vec::with_capacity(missing.len());
        for (symbol, trade_id) in missing {
            outcomes.push(self.settle_from_broker(&symbol, &trade_id).await);
        }

        self.ledger
            .lock()
            .await
            .apply_balance(snapshot.balance, &snapshot.currency);
        outcomes
    }

    /// Rebuilds Open records from the broker's open trades on startup.
    pub async fn recover(&self, snapshot: &AccountSnapshot) -> usize {
        let mut ledger = self.ledger.lock().await;
        ledger.apply_balance(snapshot.balance, &snapshot.currency);
        let adopted = self.adopt_unknown(&mut ledger, snapshot);
        info!(
            "Recovered {} open position(s); balance {} {}",
            adopted,
            snapshot.balance,
            snapshot.currency
        );
        adopted
    }

    fn adopt_unknown(&self, ledger: &mut crate::ledger::Ledger, snapshot: &AccountSnapshot) -> usize {
        let known: Vec<String> = ledger
            .positions()
            .filter_map(|record| record.trade_id().map(str::to_string))
            .collect();

        let mut adopted = 0;
        for trade in snapshot.open_trades.iter().filter(|t| !known.contains(&t.trade_id)) {
            let instrument = self.instrument(&trade.instrument);
            match ledger.adopt(trade, &instrument, self.stop_loss_pips, self.take_profit_pips) {
                Ok(record) => {
                    if trade.stop_loss.is_none() {
                        warn!("Broker trade {} on {} has no stop-loss attached", trade.trade_id, instrument);
                    }
                    info!(
                        "Tracking broker trade {}: {:?} {} {} @ {}",
                        trade.trade_id,
                        record.side(),
                        record.units(),
                        instrument,
                        trade.price
                    );
                    adopted += 1;
                }
                Err(e) => warn!("Ignoring broker trade {}: {}", trade.trade_id, e),
            }
        }

        if ledger.open_count() > self.risk.max_positions() {
            warn!(
                "Broker reports {} open positions, above the configured maximum of {}",
                ledger.open_count(),
                self.risk.max_positions()
            );
        }
        self.metrics.open_positions.set(ledger.open_count() as i64);
        adopted
    }

    /// Releases reservations whose submission never completed and reopens
    /// records whose close was interrupted (shutdown).
    pub async fn abandon_in_flight(&self) -> Vec<String> {
        let mut ledger = self.ledger.lock().await;
        let abandoned = ledger.abandon_in_flight();
        for symbol in &abandoned {
            warn!("Abandoned in-flight submission for {}; broker state is reconciled on next start", symbol);
        }
        for symbol in ledger.restore_pending_exits() {
            warn!("Close of {} was interrupted; position is tracked as open again", symbol);
        }
        abandoned
    }

    pub async fn close_all(&self, reason: ExitReason) -> Vec<ExitOutcome> {
        let open: Vec<String> = {
            let ledger = self.ledger.lock().await;
            ledger
                .positions()
                .filter(|record| record.state() == PositionState::Open)
                .map(|record| record.instrument().to_string())
                .collect()
        };

        let mut outcomes = Vec::with_capacity(open.len());
        for symbol in open {
            outcomes.push(self.exit(&symbol, reason).await);
        }
        outcomes
    }

    /// Starts a new trading day if `now` has crossed the rollover.
    pub async fn roll_day(&self, day: NaiveDate, now: DateTime<Utc>) -> bool {
        let mut ledger = self.ledger.lock().await;
        let rolled = ledger.roll_day(day);
        if rolled {
            info!(
                "Trading day {} started at {}; reference balance {}",
                day,
                now,
                ledger.budget().day_start_balance()
            );
        }
        rolled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brokers::mock_broker::MockBroker;
    use crate::brokers::OpenTrade;
    use crate::config::{RiskConfig, StrategyVariant, TradingConfig};
    use crate::indicators::tests::candles_from_closes;
    use crate::ledger::Ledger;
    use crate::risk::RiskBudget;
    use crate::strategy::Direction;
    use rust_decimal_macros::dec;

    struct Harness {
        broker: Arc<MockBroker>,
        manager: PositionManager,
    }

    async fn harness() -> Harness {
        let broker = Arc::new(MockBroker::scripted(dec!(10000)));
        broker.set_candles("EUR_USD", candles_from_closes(&[1.1000])).await;
        broker.set_candles("GBP_USD", candles_from_closes(&[1.2700])).await;
        broker.set_candles("USD_JPY", candles_from_closes(&[150.00])).await;

        let trading = TradingConfig::default();
        let manager = PositionManager::new(
            broker.clone(),
            Ledger::new(RiskBudget::new(dec!(10000), "USD")).shared(),
            RiskManager::new(&RiskConfig::default(), &trading),
            &trading.instruments(),
            trading.stop_loss_pips,
            trading.take_profit_pips,
            Duration::from_secs(5),
            Metrics::new().unwrap(),
        );
        Harness { broker, manager }
    }

    fn signal(instrument: &str, direction: Direction, price: f64) -> TradeSignal {
        TradeSignal {
            instrument: instrument.to_string(),
            direction,
            strength: 0.7,
            variant: StrategyVariant::Momentum,
            time: None,
            price: Some(price),
        }
    }

    fn instrument(symbol: &str) -> Instrument {
        Instrument::from_symbol(symbol, 1)
    }

    #[tokio::test]
    async fn test_enter_opens_with_protection() {
        let h = harness().await;
        let outcome = h
            .manager
            .try_enter(&signal("EUR_USD", Direction::Buy, 1.1), &instrument("EUR_USD"))
            .await;
        assert!(matches!(outcome, EntryOutcome::Opened { units: 1000, .. }));

        let ledger = h.manager.ledger().lock().await;
        let record = ledger.position("EUR_USD").unwrap();
        assert_eq!(record.state(), PositionState::Open);
        assert!((record.stop_loss().unwrap() - 1.0980).abs() < 1e-9);
        assert_eq!(ledger.budget().open_positions(), 1);
    }

    #[tokio::test]
    async fn test_broker_rejection_does_not_leak_budget() {
        let h = harness().await;
        h.broker.reject_next_order("EUR_USD", "INSUFFICIENT_MARGIN").await;

        let outcome = h
            .manager
            .try_enter(&signal("EUR_USD", Direction::Buy, 1.1), &instrument("EUR_USD"))
            .await;
        assert_eq!(outcome, EntryOutcome::BrokerRejected("INSUFFICIENT_MARGIN".to_string()));

        let ledger = h.manager.ledger().lock().await;
        assert!(ledger.position("EUR_USD").is_none());
        assert_eq!(ledger.budget().open_positions(), 0);
        assert_eq!(ledger.in_flight(), 0);
        assert_eq!(h.broker.calls().submit, 1);
    }

    #[tokio::test]
    async fn test_second_entry_is_refused() {
        let h = harness().await;
        let buy = signal("EUR_USD", Direction::Buy, 1.1);
        h.manager.try_enter(&buy, &instrument("EUR_USD")).await;
        let again = h.manager.try_enter(&buy, &instrument("EUR_USD")).await;

        assert_eq!(again, EntryOutcome::Refused(Rejection::PositionAlreadyOpen));
        assert_eq!(h.broker.calls().submit, 1);
    }

    #[tokio::test]
    async fn test_concurrent_entries_respect_ceiling() {
        let h = harness().await;
        let (eur, gbp, jpy) = (instrument("EUR_USD"), instrument("GBP_USD"), instrument("USD_JPY"));
        let eur_buy = signal("EUR_USD", Direction::Buy, 1.1);
        let gbp_buy = signal("GBP_USD", Direction::Buy, 1.27);
        let jpy_buy = signal("USD_JPY", Direction::Buy, 150.0);
        let (a, b, c) = tokio::join!(
            h.manager.try_enter(&eur_buy, &eur),
            h.manager.try_enter(&gbp_buy, &gbp),
            h.manager.try_enter(&jpy_buy, &jpy),
        );

        let opened = [&a, &b, &c]
            .iter()
            .filter(|o| matches!(o, EntryOutcome::Opened { .. }))
            .count();
        assert_eq!(opened, 2);
        assert!([a, b, c].contains(&EntryOutcome::Refused(Rejection::MaxPositionsReached)));
        assert_eq!(h.manager.ledger().lock().await.open_count(), 2);
    }

    #[tokio::test]
    async fn test_exit_books_realized_pnl() {
        let h = harness().await;
        h.manager
            .try_enter(&signal("EUR_USD", Direction::Buy, 1.1), &instrument("EUR_USD"))
            .await;
        h.broker.set_candles("EUR_USD", candles_from_closes(&[1.0990])).await;

        let outcome = h.manager.exit("EUR_USD", ExitReason::OpposingSignal).await;
        let ExitOutcome::Closed(trade) = outcome else {
            panic!("expected a closed trade, got {:?}", outcome);
        };
        assert_eq!(trade.realized_pnl, dec!(-1.00));

        let ledger = h.manager.ledger().lock().await;
        assert!(ledger.position("EUR_USD").is_none());
        assert_eq!(ledger.budget().daily_loss(), dec!(1.00));
        assert_eq!(ledger.budget().open_positions(), 0);
    }

    #[tokio::test]
    async fn test_failed_close_returns_to_open() {
        let h = harness().await;
        h.manager
            .try_enter(&signal("EUR_USD", Direction::Buy, 1.1), &instrument("EUR_USD"))
            .await;
        h.broker
            .fail_next_close(BrokerError::Network("connection reset".into()))
            .await;

        let outcome = h.manager.exit("EUR_USD", ExitReason::OpposingSignal).await;
        assert!(matches!(outcome, ExitOutcome::Failed(BrokerError::Network(_))));
        let ledger = h.manager.ledger().lock().await;
        assert_eq!(ledger.position("EUR_USD").unwrap().state(), PositionState::Open);
    }

    #[tokio::test]
    async fn test_reconcile_settles_broker_stop_out() {
        let h = harness().await;
        let outcome = h
            .manager
            .try_enter(&signal("EUR_USD", Direction::Buy, 1.1), &instrument("EUR_USD"))
            .await;
        let EntryOutcome::Opened { trade_id, .. } = outcome else {
            panic!("entry failed: {:?}", outcome);
        };

        h.broker.close_on_broker_side(&trade_id, 1.0980, dec!(-2)).await;
        let snapshot = h.broker.get_account_snapshot().await.unwrap();
        let outcomes = h.manager.reconcile(&snapshot).await;

        assert_eq!(outcomes.len(), 1);
        let ExitOutcome::Closed(trade) = &outcomes[0] else {
            panic!("expected settlement, got {:?}", outcomes[0]);
        };
        assert_eq!(trade.reason, ExitReason::StopLoss);

        let ledger = h.manager.ledger().lock().await;
        assert_eq!(ledger.budget().balance(), dec!(9998));
        assert_eq!(ledger.budget().daily_loss(), dec!(2));
        assert_eq!(ledger.budget().losses(), 1);
    }

    #[tokio::test]
    async fn test_recover_adopts_broker_trades() {
        let h = harness().await;
        h.broker
            .seed_trade(OpenTrade {
                trade_id: "900".to_string(),
                instrument: "GBP_USD".to_string(),
                units: -1000,
                price: 1.2700,
                stop_loss: Some(1.2720),
                take_profit: Some(1.2660),
                open_time: None,
            })
            .await;

        let snapshot = h.broker.get_account_snapshot().await.unwrap();
        assert_eq!(h.manager.recover(&snapshot).await, 1);
        // A second pass over the same snapshot adopts nothing new
        assert!(h.manager.reconcile(&snapshot).await.is_empty());

        let ledger = h.manager.ledger().lock().await;
        let record = ledger.position("GBP_USD").unwrap();
        assert_eq!(record.trade_id(), Some("900"));
        assert_eq!(record.state(), PositionState::Open);
        assert_eq!(ledger.budget().open_positions(), 1);
    }

    #[tokio::test]
    async fn test_close_all_on_shutdown() {
        let h = harness().await;
        h.manager
            .try_enter(&signal("EUR_USD", Direction::Buy, 1.1), &instrument("EUR_USD"))
            .await;
        h.manager
            .try_enter(&signal("USD_JPY", Direction::Sell, 150.0), &instrument("USD_JPY"))
            .await;

        let outcomes = h.manager.close_all(ExitReason::Shutdown).await;
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| matches!(o, ExitOutcome::Closed(_))));
        assert!(h.broker.open_trades().await.is_empty());
    }

    #[tokio::test]
    async fn test_interrupted_exit_is_closed_on_shutdown() {
        let h = harness().await;
        h.manager
            .try_enter(&signal("EUR_USD", Direction::Buy, 1.1), &instrument("EUR_USD"))
            .await;
        // Close started but the cycle was dropped before the broker answered
        h.manager.ledger().lock().await.begin_exit("EUR_USD").unwrap();
        assert!(h.manager.close_all(ExitReason::Shutdown).await.is_empty());

        h.manager.abandon_in_flight().await;
        assert_eq!(
            h.manager.ledger().lock().await.position("EUR_USD").unwrap().state(),
            PositionState::Open
        );
        let outcomes = h.manager.close_all(ExitReason::Shutdown).await;
        assert!(matches!(outcomes.as_slice(), [ExitOutcome::Closed(_)]));
        assert!(h.broker.open_trades().await.is_empty());
    }

    #[tokio::test]
    async fn test_loss_crossing_daily_ceiling_blocks_entries_until_next_day() {
        let h = harness().await;
        let monday = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        h.manager.roll_day(monday, Utc::now()).await;
        let eur = instrument("EUR_USD");
        let gbp = instrument("GBP_USD");
        let eur_buy = signal("EUR_USD", Direction::Buy, 1.1);
        let gbp_buy = signal("GBP_USD", Direction::Buy, 1.27);

        // Ceiling is 3% of 10000; earlier losses leave 1.00 of room
        h.manager.ledger().lock().await.budget_mut().record_close("AUD_USD", dec!(-299));
        assert!(matches!(h.manager.try_enter(&eur_buy, &eur).await, EntryOutcome::Opened { .. }));

        // 15 pips against 1000 units crosses it
        h.broker.set_candles("EUR_USD", candles_from_closes(&[1.0985])).await;
        let exit = h.manager.exit("EUR_USD", ExitReason::OpposingSignal).await;
        match exit {
            ExitOutcome::Closed(trade) => assert_eq!(trade.realized_pnl, dec!(-1.50)),
            other => panic!("expected a close, got {:?}", other),
        }
        assert_eq!(
            h.manager.try_enter(&gbp_buy, &gbp).await,
            EntryOutcome::Refused(Rejection::DailyLossExceeded)
        );

        assert!(h.manager.roll_day(monday.succ_opt().unwrap(), Utc::now()).await);
        assert!(matches!(h.manager.try_enter(&gbp_buy, &gbp).await, EntryOutcome::Opened { .. }));
    }
}
