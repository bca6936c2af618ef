use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;
use tracing::{error, info};

use crate::ledger::SharedLedger;
use crate::metrics::Metrics;

#[derive(Clone)]
pub struct MonitoringState {
    pub metrics: Metrics,
    pub ledger: SharedLedger,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    open_positions: usize,
    in_flight: usize,
}

async fn health_check(State(state): State<MonitoringState>) -> Json<HealthResponse> {
    let ledger = state.ledger.lock().await;
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        open_positions: ledger.open_count(),
        in_flight: ledger.in_flight(),
    })
}

async fn metrics(State(state): State<MonitoringState>) -> Result<String, StatusCode> {
    state.metrics.render().map_err(|e| {
        error!("Failed to render metrics: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

pub fn router(state: MonitoringState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .with_state(state)
}

pub async fn serve(port: u16, state: MonitoringState) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    info!("Monitoring listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router(state)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::Ledger;
    use crate::risk::RiskBudget;
    use rust_decimal_macros::dec;

    fn state() -> MonitoringState {
        MonitoringState {
            metrics: Metrics::new().unwrap(),
            ledger: Ledger::new(RiskBudget::new(dec!(10000), "USD")).shared(),
        }
    }

    #[tokio::test]
    async fn test_health_reports_ledger_counts() {
        let Json(health) = health_check(State(state())).await;
        assert_eq!(health.status, "healthy");
        assert_eq!(health.open_positions, 0);
        assert_eq!(health.in_flight, 0);
    }

    #[tokio::test]
    async fn test_metrics_endpoint_renders_registry() {
        let state = state();
        state.metrics.cycles.inc();
        let body = metrics(State(state)).await.unwrap();
        assert!(body.contains("fxbot_cycles_total 1"));
    }
}
