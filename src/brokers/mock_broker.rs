use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use rand::Rng;
use rust_decimal::prelude::*;
use rust_decimal_macros::dec;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::info;

use crate::brokers::{AccountSnapshot, BrokerAPI, CloseFill, OpenTrade, OrderFill, TradeOutcome};
use crate::error::BrokerError;
use crate::market::{Candle, Granularity, Instrument};
use crate::orders::Order;

/// Paper-trading broker. Unscripted instruments get a synthetic random walk;
/// tests script candles, failures, rejections and broker-side exits.
pub struct MockBroker {
    latency_ms: u64,
    failure_rate: f64,
    currency: String,
    balance: Arc<Mutex<Decimal>>,
    next_trade_id: AtomicUsize,
    state: Arc<Mutex<MockState>>,
    calls: CallCounters,
}

#[derive(Debug, Clone)]
pub struct MockBrokerConfig {
    pub latency_ms: u64,
    /// Probability that a submission is declined for margin.
    pub failure_rate: f64,
    pub initial_balance: Decimal,
    pub currency: String,
}

impl Default for MockBrokerConfig {
    fn default() -> Self {
        Self {
            latency_ms: 50,
            failure_rate: 0.05,
            initial_balance: dec!(100000),
            currency: "USD".to_string(),
        }
    }
}

#[derive(Default)]
struct MockState {
    scripted: HashMap<String, Vec<Candle>>,
    synthetic: HashMap<String, Vec<Candle>>,
    fetch_failures: HashMap<String, VecDeque<BrokerError>>,
    rejections: HashMap<String, String>,
    close_failures: VecDeque<BrokerError>,
    submit_delay: Option<Duration>,
    open: HashMap<String, OpenTrade>,
    closed: HashMap<String, (f64, Decimal)>,
    fetches_by_instrument: HashMap<String, usize>,
}

#[derive(Default)]
struct CallCounters {
    fetch: AtomicUsize,
    snapshot: AtomicUsize,
    submit: AtomicUsize,
    close: AtomicUsize,
    outcome: AtomicUsize,
}

/// Per-operation call counts at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CallCounts {
    pub fetch: usize,
    pub snapshot: usize,
    pub submit: usize,
    pub close: usize,
    pub outcome: usize,
}

impl CallCounts {
    pub fn total(&self) -> usize {
        self.fetch + self.snapshot + self.submit + self.close + self.outcome
    }
}

impl MockBroker {
    pub fn new(config: MockBrokerConfig) -> Self {
        Self {
            latency_ms: config.latency_ms,
            failure_rate: config.failure_rate,
            currency: config.currency,
            balance: Arc::new(Mutex::new(config.initial_balance)),
            next_trade_id: AtomicUsize::new(1),
            state: Arc::new(Mutex::new(MockState::default())),
            calls: CallCounters::default(),
        }
    }

    /// Deterministic broker for tests: no latency, no random rejections.
    pub fn scripted(initial_balance: Decimal) -> Self {
        Self::new(MockBrokerConfig {
            latency_ms: 0,
            failure_rate: 0.0,
            initial_balance,
            ..MockBrokerConfig::default()
        })
    }

    pub async fn set_candles(&self, instrument: &str, candles: Vec<Candle>) {
        self.state.lock().await.scripted.insert(instrument.to_string(), candles);
    }

    /// The next `times` fetches for `instrument` fail with `error`.
    pub async fn fail_fetches(&self, instrument: &str, times: usize, error: BrokerError) {
        let mut state = self.state.lock().await;
        let queue = state.fetch_failures.entry(instrument.to_string()).or_default();
        queue.extend(std::iter::repeat(error).take(times));
    }

    /// The next submission for `instrument` is declined with `reason`.
    pub async fn reject_next_order(&self, instrument: &str, reason: &str) {
        self.state
            .lock()
            .await
            .rejections
            .insert(instrument.to_string(), reason.to_string());
    }

    pub async fn fail_next_close(&self, error: BrokerError) {
        self.state.lock().await.close_failures.push_back(error);
    }

    pub async fn set_submit_delay(&self, delay: Duration) {
        self.state.lock().await.submit_delay = Some(delay);
    }

    /// Opens a trade directly at the broker, as if placed before a restart.
    pub async fn seed_trade(&self, trade: OpenTrade) {
        self.state.lock().await.open.insert(trade.trade_id.clone(), trade);
    }

    /// Closes a trade at the broker (stop or target hit) without our involvement.
    pub async fn close_on_broker_side(&self, trade_id: &str, close_price: f64, realized_pl: Decimal) {
        let mut state = self.state.lock().await;
        if state.open.remove(trade_id).is_some() {
            state.closed.insert(trade_id.to_string(), (close_price, realized_pl));
            *self.balance.lock().await += realized_pl;
        }
    }

    pub async fn open_trades(&self) -> Vec<OpenTrade> {
        self.state.lock().await.open.values().cloned().collect()
    }

    pub async fn fetches_for(&self, instrument: &str) -> usize {
        self.state
            .lock()
            .await
            .fetches_by_instrument
            .get(instrument)
            .copied()
            .unwrap_or(0)
    }

    pub fn calls(&self) -> CallCounts {
        CallCounts {
            fetch: self.calls.fetch.load(Ordering::SeqCst),
            snapshot: self.calls.snapshot.load(Ordering::SeqCst),
            submit: self.calls.submit.load(Ordering::SeqCst),
            close: self.calls.close.load(Ordering::SeqCst),
            outcome: self.calls.outcome.load(Ordering::SeqCst),
        }
    }

    async fn simulate_latency(&self) {
        if self.latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.latency_ms)).await;
        }
    }

    fn should_fail(&self) -> bool {
        self.failure_rate > 0.0 && rand::thread_rng().gen::<f64>() < self.failure_rate
    }

    fn base_price(symbol: &str) -> f64 {
        match symbol {
            "EUR_USD" => 1.0850,
            "GBP_USD" => 1.2750,
            "USD_JPY" => 150.50,
            "AUD_USD" => 0.6600,
            _ if symbol.ends_with("_JPY") => 100.0,
            _ => 1.0,
        }
    }

    fn current_price(state: &MockState, symbol: &str) -> f64 {
        state
            .scripted
            .get(symbol)
            .or_else(|| state.synthetic.get(symbol))
            .and_then(|candles| candles.last())
            .map(|candle| candle.close)
            .unwrap_or_else(|| Self::base_price(symbol))
    }

    /// Extends the instrument's random walk up to the candle bucket containing now.
    fn random_walk(series: &mut Vec<Candle>, symbol: &str, granularity: Granularity, count: usize) {
        let step = granularity.seconds();
        let bucket = Utc::now().timestamp() / step * step;
        let latest = Utc.timestamp_opt(bucket, 0).single().unwrap_or_else(Utc::now);
        let pip = Instrument::from_symbol(symbol, 1).pip_size;
        let mut rng = rand::thread_rng();

        let mut time = match series.last() {
            Some(last) => last.time + ChronoDuration::seconds(step),
            None => latest - ChronoDuration::seconds(step * count.saturating_sub(1) as i64),
        };
        let mut price = series.last().map(|c| c.close).unwrap_or_else(|| Self::base_price(symbol));

        while time <= latest {
            let open = price;
            let close = open + rng.gen_range(-5.0..5.0) * pip;
            let high = open.max(close) + rng.gen_range(0.0..3.0) * pip;
            let low = open.min(close) - rng.gen_range(0.0..3.0) * pip;
            series.push(Candle {
                time,
                open,
                high,
                low,
                close,
                volume: rng.gen_range(50..500),
            });
            price = close;
            time += ChronoDuration::seconds(step);
        }

        let excess = series.len().saturating_sub(count.max(1) * 2);
        series.drain(..excess);
    }

    /// Closes every open trade whose instrument's latest candle has traded
    /// through its stop or target, at that level. The stop wins when a single
    /// candle spans both.
    async fn trigger_protection(&self, state: &mut MockState) {
        let mut triggered = Vec::new();
        for trade in state.open.values() {
            let Some(candle) = state
                .scripted
                .get(&trade.instrument)
                .or_else(|| state.synthetic.get(&trade.instrument))
                .and_then(|candles| candles.last())
            else {
                continue;
            };

            let long = trade.units > 0;
            let stop_hit = trade
                .stop_loss
                .filter(|stop| if long { candle.low <= *stop } else { candle.high >= *stop });
            let target_hit = trade
                .take_profit
                .filter(|target| if long { candle.high >= *target } else { candle.low <= *target });
            if let Some(level) = stop_hit.or(target_hit) {
                triggered.push((trade.trade_id.clone(), level));
            }
        }

        for (trade_id, close_price) in triggered {
            if let Some(trade) = state.open.remove(&trade_id) {
                let realized_pl = self.pnl_in_account_currency(&trade, close_price);
                info!(
                    "Mock broker closed trade {} on {} @ {} (protection), P/L {}",
                    trade_id, trade.instrument, close_price, realized_pl
                );
                state.closed.insert(trade_id, (close_price, realized_pl));
                *self.balance.lock().await += realized_pl;
            }
        }
    }

    fn pnl_in_account_currency(&self, trade: &OpenTrade, close_price: f64) -> Decimal {
        let instrument = Instrument::from_symbol(&trade.instrument, 1);
        let quote_pnl = (close_price - trade.price) * trade.units as f64;
        let pnl = instrument.quote_to_account(quote_pnl, close_price, &self.currency);
        Decimal::from_f64(pnl).unwrap_or_default().round_dp(2)
    }
}

#[async_trait]
impl BrokerAPI for MockBroker {
    async fn fetch_candles(
        &self,
        instrument: &str,
        granularity: Granularity,
        count: usize,
    ) -> Result<Vec<Candle>, BrokerError> {
        self.calls.fetch.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;

        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        *state.fetches_by_instrument.entry(instrument.to_string()).or_default() += 1;

        if let Some(error) = state.fetch_failures.get_mut(instrument).and_then(VecDeque::pop_front) {
            return Err(error);
        }

        if !state.scripted.contains_key(instrument) {
            let series = state.synthetic.entry(instrument.to_string()).or_default();
            Self::random_walk(series, instrument, granularity, count);
        }
        self.trigger_protection(state).await;
        let candles = state
            .scripted
            .get(instrument)
            .or_else(|| state.synthetic.get(instrument))
            .map(Vec::as_slice)
            .unwrap_or_default();

        let skip = candles.len().saturating_sub(count);
        Ok(candles[skip..].to_vec())
    }

    async fn get_account_snapshot(&self) -> Result<AccountSnapshot, BrokerError> {
        self.calls.snapshot.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;

        let mut state = self.state.lock().await;
        self.trigger_protection(&mut state).await;
        Ok(AccountSnapshot {
            account_id: "MOCK-001".to_string(),
            balance: *self.balance.lock().await,
            currency: self.currency.clone(),
            open_trades: state.open.values().cloned().collect(),
        })
    }

    async fn submit_order(&self, order: &Order) -> Result<OrderFill, BrokerError> {
        self.calls.submit.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;

        let delay = self.state.lock().await.submit_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let request = &order.request;
        let mut state = self.state.lock().await;
        if let Some(reason) = state.rejections.remove(&request.instrument) {
            return Err(BrokerError::Rejected(reason));
        }
        if self.should_fail() {
            return Err(BrokerError::Rejected("INSUFFICIENT_MARGIN".to_string()));
        }

        let trade_id = self.next_trade_id.fetch_add(1, Ordering::SeqCst).to_string();
        let fill_price = Self::current_price(&state, &request.instrument);
        let time = Utc::now();
        let instrument = Instrument::from_symbol(&request.instrument, 1);
        let sign = request.side.sign();
        let stop_loss = fill_price - sign * instrument.pips_to_price(request.stop_loss_pips);
        let take_profit = fill_price + sign * instrument.pips_to_price(request.take_profit_pips);
        state.open.insert(
            trade_id.clone(),
            OpenTrade {
                trade_id: trade_id.clone(),
                instrument: request.instrument.clone(),
                units: request.side.signed(request.units),
                price: fill_price,
                stop_loss: Some(stop_loss),
                take_profit: Some(take_profit),
                open_time: Some(time),
            },
        );

        info!(
            "Mock broker filled {} {} {} @ {} (trade {})",
            order.client_order_id,
            request.side.signed(request.units),
            request.instrument,
            fill_price,
            trade_id
        );

        Ok(OrderFill {
            trade_id,
            fill_price,
            time,
        })
    }

    async fn close_position(&self, trade_id: &str) -> Result<CloseFill, BrokerError> {
        self.calls.close.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;

        let mut state = self.state.lock().await;
        if let Some(error) = state.close_failures.pop_front() {
            return Err(error);
        }

        let trade = state
            .open
            .remove(trade_id)
            .ok_or_else(|| BrokerError::NotFound(format!("trade {}", trade_id)))?;
        let close_price = Self::current_price(&state, &trade.instrument);
        let realized_pl = self.pnl_in_account_currency(&trade, close_price);
        state.closed.insert(trade_id.to_string(), (close_price, realized_pl));
        *self.balance.lock().await += realized_pl;

        Ok(CloseFill {
            close_price,
            realized_pl: Some(realized_pl),
        })
    }

    async fn trade_outcome(&self, trade_id: &str) -> Result<TradeOutcome, BrokerError> {
        self.calls.outcome.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;

        let state = self.state.lock().await;
        if state.open.contains_key(trade_id) {
            return Ok(TradeOutcome::Open);
        }
        state
            .closed
            .get(trade_id)
            .map(|(close_price, realized_pl)| TradeOutcome::Closed {
                close_price: *close_price,
                realized_pl: Some(*realized_pl),
            })
            .ok_or_else(|| BrokerError::NotFound(format!("trade {}", trade_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StrategyVariant;
    use crate::indicators::tests::candles_from_closes;
    use crate::orders::{OrderRequest, OrderSide};

    fn order(instrument: &str) -> Order {
        Order::new(OrderRequest {
            instrument: instrument.to_string(),
            side: OrderSide::Buy,
            units: 1000,
            stop_loss_pips: 20.0,
            take_profit_pips: 40.0,
            reference_price: 1.085,
            variant: StrategyVariant::Momentum,
        })
    }

    #[tokio::test]
    async fn test_scripted_fetch_failures_then_success() {
        let broker = MockBroker::scripted(dec!(10000));
        broker.set_candles("EUR_USD", candles_from_closes(&[1.1, 1.2, 1.3])).await;
        broker
            .fail_fetches("EUR_USD", 1, BrokerError::Network("reset".into()))
            .await;

        assert!(broker.fetch_candles("EUR_USD", Granularity::M5, 2).await.is_err());
        let candles = broker.fetch_candles("EUR_USD", Granularity::M5, 2).await.unwrap();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[1].close, 1.3);
        assert_eq!(broker.calls().fetch, 2);
        assert_eq!(broker.fetches_for("EUR_USD").await, 2);
    }

    #[tokio::test]
    async fn test_random_walk_candles_are_ordered() {
        let broker = MockBroker::scripted(dec!(10000));
        let candles = broker.fetch_candles("GBP_USD", Granularity::M5, 50).await.unwrap();
        assert_eq!(candles.len(), 50);
        assert!(candles.windows(2).all(|pair| pair[0].time < pair[1].time));
        assert!(candles.iter().all(|c| c.low <= c.high));
    }

    #[tokio::test]
    async fn test_order_fill_and_close() {
        let broker = MockBroker::scripted(dec!(10000));
        broker.set_candles("EUR_USD", candles_from_closes(&[1.1000])).await;

        let fill = broker.submit_order(&order("EUR_USD")).await.unwrap();
        assert_eq!(fill.fill_price, 1.1000);
        assert_eq!(broker.get_account_snapshot().await.unwrap().open_trades.len(), 1);

        broker.set_candles("EUR_USD", candles_from_closes(&[1.1020])).await;
        let close = broker.close_position(&fill.trade_id).await.unwrap();
        assert_eq!(close.realized_pl, Some(dec!(2.00)));
        assert_eq!(broker.get_account_snapshot().await.unwrap().balance, dec!(10002.00));
        assert!(matches!(
            broker.close_position(&fill.trade_id).await,
            Err(BrokerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_scripted_rejection_and_broker_side_close() {
        let broker = MockBroker::scripted(dec!(10000));
        broker.reject_next_order("EUR_USD", "INSUFFICIENT_MARGIN").await;
        assert_eq!(
            broker.submit_order(&order("EUR_USD")).await.unwrap_err(),
            BrokerError::Rejected("INSUFFICIENT_MARGIN".into())
        );

        let fill = broker.submit_order(&order("EUR_USD")).await.unwrap();
        broker.close_on_broker_side(&fill.trade_id, 1.0830, dec!(-2)).await;
        assert_eq!(
            broker.trade_outcome(&fill.trade_id).await.unwrap(),
            TradeOutcome::Closed {
                close_price: 1.0830,
                realized_pl: Some(dec!(-2)),
            }
        );
        assert_eq!(broker.calls().submit, 2);
    }

    #[tokio::test]
    async fn test_paper_trades_close_at_attached_stop_and_target() {
        let broker = MockBroker::scripted(dec!(10000));
        broker.set_candles("EUR_USD", candles_from_closes(&[1.1000])).await;
        let long = broker.submit_order(&order("EUR_USD")).await.unwrap();

        let trade = broker.open_trades().await.pop().unwrap();
        assert!((trade.stop_loss.unwrap() - 1.0980).abs() < 1e-9);
        assert!((trade.take_profit.unwrap() - 1.1040).abs() < 1e-9);

        // Price falls through the stop; the next snapshot no longer lists it
        broker.set_candles("EUR_USD", candles_from_closes(&[1.0900])).await;
        let snapshot = broker.get_account_snapshot().await.unwrap();
        assert!(snapshot.open_trades.is_empty());
        assert_eq!(snapshot.balance, dec!(9998.00));
        match broker.trade_outcome(&long.trade_id).await.unwrap() {
            TradeOutcome::Closed { close_price, realized_pl } => {
                assert!((close_price - 1.0980).abs() < 1e-9);
                assert_eq!(realized_pl, Some(dec!(-2.00)));
            }
            other => panic!("expected a closed trade, got {:?}", other),
        }

        // A short is taken out at its target on the next fetch
        let mut short = order("EUR_USD");
        short.request.side = OrderSide::Sell;
        let short = broker.submit_order(&short).await.unwrap();
        broker.set_candles("EUR_USD", candles_from_closes(&[1.0850])).await;
        broker.fetch_candles("EUR_USD", Granularity::M5, 1).await.unwrap();
        assert!(broker.open_trades().await.is_empty());
        assert!(matches!(
            broker.trade_outcome(&short.trade_id).await.unwrap(),
            TradeOutcome::Closed { realized_pl: Some(pl), .. } if pl == dec!(4.00)
        ));
    }
}
