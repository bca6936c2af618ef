use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fx_autotrader::brokers::mock_broker::MockBrokerConfig;
use fx_autotrader::brokers::{BrokerAPI, MockBroker, OandaBroker};
use fx_autotrader::clock::SystemClock;
use fx_autotrader::config::{BrokerKind, Config};
use fx_autotrader::ledger::Ledger;
use fx_autotrader::metrics::Metrics;
use fx_autotrader::monitoring::{self, MonitoringState};
use fx_autotrader::positions::PositionManager;
use fx_autotrader::retry::RetryPolicy;
use fx_autotrader::risk::{RiskBudget, RiskManager};
use fx_autotrader::Scheduler;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if it exists
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fx_autotrader=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting FX autotrader");

    let config = Config::load()?;
    info!("Configuration loaded: {:?}", config.service.name);
    info!(
        "Trading {:?} on {} candles with the {:?} strategy",
        config.trading.instruments, config.trading.granularity, config.strategy.variant
    );

    let metrics = Metrics::new().context("registering metrics")?;

    let broker: Arc<dyn BrokerAPI> = match config.broker.kind {
        BrokerKind::Oanda => {
            info!(
                "Connecting to OANDA ({} account)",
                if config.broker.practice { "practice" } else { "live" }
            );
            Arc::new(OandaBroker::new(&config.broker)?)
        }
        BrokerKind::Mock => {
            warn!("Using the mock broker: no real orders will be placed");
            Arc::new(MockBroker::new(MockBrokerConfig::default()))
        }
    };

    // Starting balance and any positions left open by a previous run
    let retry = RetryPolicy::new(config.schedule.max_retries, config.schedule.retry_delay());
    let snapshot = retry
        .run("initial account snapshot", config.broker.request_timeout(), || {
            broker.get_account_snapshot()
        })
        .await
        .context("fetching account snapshot")?;
    info!(
        "Account {}: balance {} {}, {} open trade(s)",
        snapshot.account_id,
        snapshot.balance,
        snapshot.currency,
        snapshot.open_trades.len()
    );

    let ledger = Ledger::new(RiskBudget::new(snapshot.balance, &snapshot.currency)).shared();
    let positions = Arc::new(PositionManager::new(
        broker.clone(),
        ledger.clone(),
        RiskManager::from_config(&config),
        &config.trading.instruments(),
        config.trading.stop_loss_pips,
        config.trading.take_profit_pips,
        config.broker.request_timeout(),
        metrics.clone(),
    ));
    positions.recover(&snapshot).await;

    if let Some(port) = config.monitoring.metrics_port {
        let state = MonitoringState {
            metrics: metrics.clone(),
            ledger: ledger.clone(),
        };
        tokio::spawn(async move {
            if let Err(e) = monitoring::serve(port, state).await {
                error!("Monitoring server stopped: {}", e);
            }
        });
    }

    let scheduler = Arc::new(Scheduler::new(
        &config,
        broker,
        positions,
        Arc::new(SystemClock),
        metrics,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut loop_task = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.run(shutdown_rx).await })
    };

    tokio::select! {
        result = &mut loop_task => {
            if let Err(e) = result {
                error!("Scheduler task ended unexpectedly: {}", e);
            }
            return Ok(());
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    shutdown_tx.send(true).ok();
    if let Err(e) = loop_task.await {
        error!("Scheduler task failed during shutdown: {}", e);
    }

    let ledger = ledger.lock().await;
    info!(
        "FX autotrader stopped: {} open position(s), realized today {}",
        ledger.open_count(),
        ledger.budget().realized_pnl_today()
    );
    Ok(())
}
