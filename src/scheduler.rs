//! The control loop: one cycle per interval tick, skipped while the market is
//! closed, fanned out across instruments, with one account refresh per cycle.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::brokers::BrokerAPI;
use crate::clock::{Clock, MarketHours};
use crate::config::Config;
use crate::error::BrokerError;
use crate::indicators::{self, IndicatorBundle, IndicatorParams};
use crate::market::{CandleWindow, Granularity, Instrument};
use crate::metrics::Metrics;
use crate::positions::{EntryOutcome, ExitOutcome, ExitReason, PositionManager, PositionState};
use crate::retry::RetryPolicy;
use crate::strategy::{build_strategy, Strategy, TradeSignal};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    MarketClosed,
}

#[derive(Debug, Clone)]
pub enum InstrumentOutcome {
    InsufficientData { available: usize, required: usize },
    Hold,
    /// A position is active and the signal does not oppose it.
    Holding(PositionState),
    Entry(EntryOutcome),
    Exit(ExitOutcome),
}

#[derive(Debug, Clone)]
pub struct InstrumentReport {
    pub instrument: String,
    pub signal: TradeSignal,
    pub outcome: InstrumentOutcome,
}

/// A broker failure that cost this cycle an instrument (or the account refresh).
#[derive(Debug, Clone)]
pub struct CycleFailure {
    /// None for the account refresh.
    pub instrument: Option<String>,
    pub time: DateTime<Utc>,
    pub error: BrokerError,
}

#[derive(Debug, Clone)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub skipped: Option<SkipReason>,
    pub instruments: Vec<InstrumentReport>,
    pub failures: Vec<CycleFailure>,
    /// Positions the broker closed on its own, settled during the refresh.
    pub settlements: Vec<ExitOutcome>,
}

impl CycleReport {
    fn skipped(started_at: DateTime<Utc>, reason: SkipReason) -> Self {
        Self {
            started_at,
            skipped: Some(reason),
            instruments: Vec::new(),
            failures: Vec::new(),
            settlements: Vec::new(),
        }
    }

    pub fn report_for(&self, instrument: &str) -> Option<&InstrumentReport> {
        self.instruments.iter().find(|report| report.instrument == instrument)
    }
}

struct InstrumentSlot {
    instrument: Instrument,
    window: Mutex<CandleWindow>,
}

pub struct Scheduler {
    broker: Arc<dyn BrokerAPI>,
    positions: Arc<PositionManager>,
    strategy: Box<dyn Strategy>,
    params: IndicatorParams,
    slots: Vec<InstrumentSlot>,
    granularity: Granularity,
    candle_count: usize,
    interval: Duration,
    retry: RetryPolicy,
    call_timeout: Duration,
    shutdown_timeout: Duration,
    close_on_shutdown: bool,
    market: MarketHours,
    clock: Arc<dyn Clock>,
    metrics: Metrics,
}

impl Scheduler {
    pub fn new(
        config: &Config,
        broker: Arc<dyn BrokerAPI>,
        positions: Arc<PositionManager>,
        clock: Arc<dyn Clock>,
        metrics: Metrics,
    ) -> Self {
        let slots = config
            .trading
            .instruments()
            .into_iter()
            .map(|instrument| InstrumentSlot {
                instrument,
                window: Mutex::new(CandleWindow::new(config.trading.candle_count)),
            })
            .collect();

        Self {
            broker,
            positions,
            strategy: build_strategy(&config.strategy),
            params: IndicatorParams::from(&config.strategy),
            slots,
            granularity: config.trading.granularity,
            candle_count: config.trading.candle_count,
            interval: config.schedule.check_interval(),
            retry: RetryPolicy::new(config.schedule.max_retries, config.schedule.retry_delay()),
            call_timeout: config.broker.request_timeout(),
            shutdown_timeout: config.schedule.shutdown_timeout(),
            close_on_shutdown: config.schedule.close_positions_on_shutdown,
            market: MarketHours::from(&config.market),
            clock,
            metrics,
        }
    }

    pub fn positions(&self) -> &Arc<PositionManager> {
        &self.positions
    }

    /// Ticks every interval until `shutdown` flips. A cycle in flight when the
    /// signal arrives gets `shutdown_timeout` to finish before it is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            "Scheduler started: {} instrument(s), {:?} variant, every {:?}",
            self.slots.len(),
            self.strategy.variant(),
            self.interval
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }

            let cycle = self.run_cycle();
            tokio::pin!(cycle);
            tokio::select! {
                _ = &mut cycle => {}
                _ = shutdown.changed() => {
                    info!("Shutdown requested mid-cycle; allowing {:?} to finish", self.shutdown_timeout);
                    if tokio::time::timeout(self.shutdown_timeout, &mut cycle).await.is_err() {
                        warn!("In-flight cycle did not finish within {:?}; abandoning it", self.shutdown_timeout);
                    }
                    break;
                }
            }
        }

        self.shutdown().await;
    }

    async fn shutdown(&self) {
        self.positions.abandon_in_flight().await;
        if self.close_on_shutdown {
            let outcomes = self.positions.close_all(ExitReason::Shutdown).await;
            let closed = outcomes
                .iter()
                .filter(|outcome| matches!(outcome, ExitOutcome::Closed(_)))
                .count();
            info!("Closed {}/{} position(s) on shutdown", closed, outcomes.len());
        }
        info!("Scheduler stopped");
    }

    /// One full cycle. Inside the market-closed window nothing is called and
    /// nothing is mutated.
    pub async fn run_cycle(&self) -> CycleReport {
        let now = self.clock.now();
        if !self.market.is_open(now) {
            info!("Market closed at {}, skipping cycle", now);
            self.metrics.cycles_skipped.inc();
            return CycleReport::skipped(now, SkipReason::MarketClosed);
        }

        self.metrics.cycles.inc();
        info!("Cycle started at {}", now);
        self.positions.roll_day(self.market.trading_day(now), now).await;

        let results = join_all(self.slots.iter().map(|slot| self.process_instrument(slot, now))).await;
        let mut instruments = Vec::with_capacity(results.len());
        let mut failures = Vec::new();
        for result in results {
            match result {
                Ok(report) => instruments.push(report),
                Err(failure) => failures.push(failure),
            }
        }

        let settlements = match self
            .retry
            .run("account snapshot", self.call_timeout, || self.broker.get_account_snapshot())
            .await
        {
            Ok(snapshot) => self.positions.reconcile(&snapshot).await,
            Err(e) => {
                error!("Account refresh failed at {}: {}", now, e);
                failures.push(CycleFailure {
                    instrument: None,
                    time: now,
                    error: e,
                });
                Vec::new()
            }
        };

        let (open, realized) = {
            let ledger = self.positions.ledger().lock().await;
            (ledger.open_count(), ledger.budget().realized_pnl_today())
        };
        info!(
            "Cycle {} done: {} evaluated, {} failed, {} settled by broker, {} open, realized today {}",
            now,
            instruments.len(),
            failures.len(),
            settlements.len(),
            open,
            realized
        );

        CycleReport {
            started_at: now,
            skipped: None,
            instruments,
            failures,
            settlements,
        }
    }

    async fn process_instrument(
        &self,
        slot: &InstrumentSlot,
        now: DateTime<Utc>,
    ) -> Result<InstrumentReport, CycleFailure> {
        let instrument = &slot.instrument;
        let label = format!("{} candle fetch", instrument);

        let candles = self
            .retry
            .run(&label, self.call_timeout, || {
                self.broker
                    .fetch_candles(&instrument.symbol, self.granularity, self.candle_count)
            })
            .await
            .map_err(|error| {
                error!(
                    "Skipping {} this cycle ({}): {} after {} retries",
                    instrument, now, error, self.retry.max_retries
                );
                self.metrics
                    .fetch_failures
                    .with_label_values(&[instrument.symbol.as_str()])
                    .inc();
                CycleFailure {
                    instrument: Some(instrument.symbol.clone()),
                    time: now,
                    error,
                }
            })?;

        let window = {
            let mut window = slot.window.lock().await;
            window.extend(candles);
            window.to_vec()
        };

        let bundle = indicators::compute(&instrument.symbol, &window, &self.params);
        if let Some(snapshot) = bundle.snapshot() {
            debug!(
                "{} @ {:.5}: RSI {:.2}, EMA {:.5}/{:.5}/{:.5}, MACD hist {:.6}, ADX {:.1}, BB {:.5}-{:.5}, %K {:.1}",
                instrument,
                snapshot.price,
                snapshot.rsi,
                snapshot.ema_fast,
                snapshot.ema_slow,
                snapshot.ema_trend,
                snapshot.macd.histogram,
                snapshot.adx.adx,
                snapshot.bollinger.lower,
                snapshot.bollinger.upper,
                snapshot.stochastic.k
            );
        }

        let signal = self.strategy.evaluate(&bundle);
        self.metrics
            .signals
            .with_label_values(&[instrument.symbol.as_str(), signal.direction.to_string().as_str()])
            .inc();
        info!(
            "{} signal: {} (strength {:.2}, {:?})",
            instrument, signal.direction, signal.strength, signal.variant
        );

        let active = {
            let ledger = self.positions.ledger().lock().await;
            ledger
                .position(&instrument.symbol)
                .map(|record| (record.state(), record.side()))
        };

        let outcome = match (active, &bundle) {
            (Some((PositionState::Open, side)), _) if signal.direction.opposes(side.direction()) => {
                InstrumentOutcome::Exit(self.positions.exit(&instrument.symbol, ExitReason::OpposingSignal).await)
            }
            (Some((state, _)), _) => InstrumentOutcome::Holding(state),
            (None, IndicatorBundle::InsufficientData { available, required, .. }) => {
                info!("{}: {} of {} candles, holding", instrument, available, required);
                InstrumentOutcome::InsufficientData {
                    available: *available,
                    required: *required,
                }
            }
            (None, _) if signal.is_actionable() => {
                let entry = self.positions.try_enter(&signal, instrument).await;
                if let EntryOutcome::Refused(rejection) = &entry {
                    info!("{} {} signal rejected at {}: {}", instrument, signal.direction, now, rejection);
                    self.metrics
                        .risk_rejections
                        .with_label_values(&[instrument.symbol.as_str(), rejection.as_str()])
                        .inc();
                }
                InstrumentOutcome::Entry(entry)
            }
            (None, _) => InstrumentOutcome::Hold,
        };

        Ok(InstrumentReport {
            instrument: instrument.symbol.clone(),
            signal,
            outcome,
        })
    }
}
