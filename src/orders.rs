use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::StrategyVariant;
use crate::error::LifecycleError;
use crate::strategy::Direction;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn from_direction(direction: Direction) -> Option<Self> {
        match direction {
            Direction::Buy => Some(OrderSide::Buy),
            Direction::Sell => Some(OrderSide::Sell),
            Direction::Hold => None,
        }
    }

    pub fn direction(&self) -> Direction {
        match self {
            OrderSide::Buy => Direction::Buy,
            OrderSide::Sell => Direction::Sell,
        }
    }

    /// Units as the broker expects them: negative for sells.
    pub fn signed(&self, units: i64) -> i64 {
        match self {
            OrderSide::Buy => units.abs(),
            OrderSide::Sell => -units.abs(),
        }
    }

    /// +1 for long, -1 for short, for P/L arithmetic.
    pub fn sign(&self) -> f64 {
        match self {
            OrderSide::Buy => 1.0,
            OrderSide::Sell => -1.0,
        }
    }
}

/// Sized order the risk manager approved for one signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub instrument: String,
    pub side: OrderSide,
    pub units: i64,
    pub stop_loss_pips: f64,
    pub take_profit_pips: f64,
    /// Price the request was sized against (signal candle close).
    pub reference_price: f64,
    pub variant: StrategyVariant,
}

/// An approved request on its way to the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub client_order_id: String,
    pub request: OrderRequest,
    pub created_at: DateTime<Utc>,
}

impl Order {
    pub fn new(request: OrderRequest) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            client_order_id: format!("ORD-{}", id),
            request,
            created_at: Utc::now(),
        }
    }

    pub fn instrument(&self) -> &str {
        &self.request.instrument
    }
}

/// Refuses orders the broker must never see: stop-less or empty ones.
pub fn validate_order(request: &OrderRequest) -> Result<(), LifecycleError> {
    if request.instrument.is_empty() {
        return Err(LifecycleError::InvalidOrder("order instrument cannot be empty".to_string()));
    }

    if request.units <= 0 {
        return Err(LifecycleError::InvalidOrder(format!(
            "{}: order units must be positive, got {}",
            request.instrument, request.units
        )));
    }

    if !(request.stop_loss_pips.is_finite() && request.stop_loss_pips > 0.0) {
        return Err(LifecycleError::MissingStopLoss(request.instrument.clone()));
    }

    if !(request.take_profit_pips.is_finite() && request.take_profit_pips > 0.0) {
        return Err(LifecycleError::InvalidOrder(format!(
            "{}: take-profit distance must be positive",
            request.instrument
        )));
    }

    Ok(())
}
