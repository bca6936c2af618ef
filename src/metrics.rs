use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

/// Prometheus instruments for the control loop, registered on a private registry.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub cycles: IntCounter,
    pub cycles_skipped: IntCounter,
    pub fetch_failures: IntCounterVec,
    pub signals: IntCounterVec,
    pub risk_rejections: IntCounterVec,
    pub orders_submitted: IntCounterVec,
    pub orders_rejected: IntCounterVec,
    pub positions_closed: IntCounterVec,
    pub open_positions: IntGauge,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("fxbot".to_string()), None)?;

        let cycles = IntCounter::new("cycles_total", "Scheduler cycles run")?;
        let cycles_skipped = IntCounter::new("cycles_skipped_total", "Cycles skipped while the market is closed")?;
        let fetch_failures = IntCounterVec::new(
            Opts::new("candle_fetch_failures_total", "Instruments skipped after exhausting fetch retries"),
            &["instrument"],
        )?;
        let signals = IntCounterVec::new(
            Opts::new("signals_total", "Signals generated"),
            &["instrument", "direction"],
        )?;
        let risk_rejections = IntCounterVec::new(
            Opts::new("risk_rejections_total", "Signals refused by the risk manager"),
            &["instrument", "reason"],
        )?;
        let orders_submitted = IntCounterVec::new(
            Opts::new("orders_submitted_total", "Orders filled by the broker"),
            &["instrument"],
        )?;
        let orders_rejected = IntCounterVec::new(
            Opts::new("orders_rejected_total", "Orders the broker declined or that failed in flight"),
            &["instrument"],
        )?;
        let positions_closed = IntCounterVec::new(
            Opts::new("positions_closed_total", "Positions settled"),
            &["instrument", "reason"],
        )?;
        let open_positions = IntGauge::new("open_positions", "Positions currently open")?;

        registry.register(Box::new(cycles.clone()))?;
        registry.register(Box::new(cycles_skipped.clone()))?;
        registry.register(Box::new(fetch_failures.clone()))?;
        registry.register(Box::new(signals.clone()))?;
        registry.register(Box::new(risk_rejections.clone()))?;
        registry.register(Box::new(orders_submitted.clone()))?;
        registry.register(Box::new(orders_rejected.clone()))?;
        registry.register(Box::new(positions_closed.clone()))?;
        registry.register(Box::new(open_positions.clone()))?;

        Ok(Self {
            registry,
            cycles,
            cycles_skipped,
            fetch_failures,
            signals,
            risk_rejections,
            orders_submitted,
            orders_rejected,
            positions_closed,
            open_positions,
        })
    }

    /// Text exposition format for the `/metrics` endpoint.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}
