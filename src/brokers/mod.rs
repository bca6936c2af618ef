use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::BrokerError;
use crate::market::{Candle, Granularity};
use crate::orders::{Order, OrderSide};

pub mod mock_broker;
pub mod oanda;

pub use mock_broker::MockBroker;
pub use oanda::OandaBroker;

/// The broker collaborator. Every call is a suspension point; callers wrap
/// each one in a deadline.
#[async_trait]
pub trait BrokerAPI: Send + Sync {
    /// Completed and in-progress candles, oldest first.
    async fn fetch_candles(
        &self,
        instrument: &str,
        granularity: Granularity,
        count: usize,
    ) -> Result<Vec<Candle>, BrokerError>;

    /// Balance plus the broker's list of open trades.
    async fn get_account_snapshot(&self) -> Result<AccountSnapshot, BrokerError>;

    /// Market order with stop-loss and take-profit attached on fill.
    async fn submit_order(&self, order: &Order) -> Result<OrderFill, BrokerError>;

    async fn close_position(&self, trade_id: &str) -> Result<CloseFill, BrokerError>;

    /// Looks up a trade the broker no longer lists as open.
    async fn trade_outcome(&self, trade_id: &str) -> Result<TradeOutcome, BrokerError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub account_id: String,
    pub balance: Decimal,
    pub currency: String,
    pub open_trades: Vec<OpenTrade>,
}

impl AccountSnapshot {
    pub fn trade(&self, trade_id: &str) -> Option<&OpenTrade> {
        self.open_trades.iter().find(|trade| trade.trade_id == trade_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenTrade {
    pub trade_id: String,
    pub instrument: String,
    /// Signed: negative for shorts.
    pub units: i64,
    pub price: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub open_time: Option<DateTime<Utc>>,
}

impl OpenTrade {
    pub fn side(&self) -> OrderSide {
        if self.units < 0 {
            OrderSide::Sell
        } else {
            OrderSide::Buy
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderFill {
    pub trade_id: String,
    pub fill_price: f64,
    pub time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseFill {
    pub close_price: f64,
    /// Account-currency P/L when the broker reports it.
    pub realized_pl: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TradeOutcome {
    Open,
    Closed {
        close_price: f64,
        realized_pl: Option<Decimal>,
    },
}
