use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{header, Client, Response, StatusCode};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::str::FromStr;
use tracing::{debug, error, info};

use crate::brokers::{AccountSnapshot, BrokerAPI, CloseFill, OpenTrade, OrderFill, TradeOutcome};
use crate::config::BrokerConfig;
use crate::error::BrokerError;
use crate::market::{Candle, Granularity, Instrument};
use crate::orders::Order;

const PRACTICE_URL: &str = "https://api-fxpractice.oanda.com";
const LIVE_URL: &str = "https://api-fxtrade.oanda.com";

/// OANDA v20 REST client.
pub struct OandaBroker {
    api_url: String,
    account_id: String,
    client: Client,
}

impl OandaBroker {
    pub fn new(config: &BrokerConfig) -> Result<Self, BrokerError> {
        let api_url = if config.practice { PRACTICE_URL } else { LIVE_URL };
        Self::with_url(config, api_url)
    }

    pub fn with_url(config: &BrokerConfig, api_url: &str) -> Result<Self, BrokerError> {
        let mut headers = header::HeaderMap::new();
        let auth = header::HeaderValue::from_str(&format!("Bearer {}", config.api_token))
            .map_err(|_| BrokerError::Auth("API token is not a valid header value".to_string()))?;
        headers.insert(header::AUTHORIZATION, auth);
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );
        headers.insert(
            "Accept-Datetime-Format",
            header::HeaderValue::from_static("RFC3339"),
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout())
            .build()?;

        info!(
            "OANDA client for account {} ({})",
            config.account_id,
            if config.practice { "practice" } else { "live" }
        );

        Ok(Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            account_id: config.account_id.clone(),
            client,
        })
    }

    fn account_url(&self, path: &str) -> String {
        format!("{}/v3/accounts/{}{}", self.api_url, self.account_id, path)
    }

    async fn read<T: DeserializeOwned>(&self, response: Response, what: &str) -> Result<T, BrokerError> {
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            error!("OANDA {} failed: {} - {}", what, status, body);
            return Err(map_status(status, &body));
        }
        serde_json::from_str(&body)
            .map_err(|e| BrokerError::Decode(format!("{}: {} - Response: {}", what, e, body)))
    }
}

/// Maps an unsuccessful HTTP status onto the broker error taxonomy.
fn map_status(status: StatusCode, body: &str) -> BrokerError {
    let message = serde_json::from_str::<OandaErrorBody>(body)
        .ok()
        .and_then(|e| e.error_message)
        .unwrap_or_else(|| body.to_string());

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => BrokerError::Auth(message),
        StatusCode::TOO_MANY_REQUESTS => BrokerError::RateLimited(message),
        StatusCode::NOT_FOUND => BrokerError::NotFound(message),
        s if s.is_client_error() => BrokerError::Rejected(message),
        s => BrokerError::Network(format!("{}: {}", s, message)),
    }
}

/// Protective distances carry the instrument's price precision.
fn format_distance(instrument: &Instrument, pips: f64) -> String {
    let decimals = if instrument.pip_size >= 0.01 { 3 } else { 5 };
    format!("{:.*}", decimals, instrument.pips_to_price(pips))
}

fn order_body(order: &Order) -> serde_json::Value {
    let request = &order.request;
    let instrument = Instrument::from_symbol(&request.instrument, 1);

    serde_json::json!({
        "order": {
            "type": "MARKET",
            "instrument": instrument.symbol,
            "units": request.side.signed(request.units).to_string(),
            "timeInForce": "FOK",
            "positionFill": "DEFAULT",
            "stopLossOnFill": {
                "distance": format_distance(&instrument, request.stop_loss_pips),
            },
            "takeProfitOnFill": {
                "distance": format_distance(&instrument, request.take_profit_pips),
            },
            "clientExtensions": {
                "id": order.client_order_id,
                "tag": format!("{:?}", request.variant).to_lowercase(),
            }
        }
    })
}

fn parse_f64(value: &str, field: &str) -> Result<f64, BrokerError> {
    value
        .parse()
        .map_err(|_| BrokerError::Decode(format!("{} is not a number: {:?}", field, value)))
}

fn parse_decimal(value: &str, field: &str) -> Result<Decimal, BrokerError> {
    Decimal::from_str(value)
        .map_err(|_| BrokerError::Decode(format!("{} is not a decimal: {:?}", field, value)))
}

#[async_trait]
impl BrokerAPI for OandaBroker {
    async fn fetch_candles(
        &self,
        instrument: &str,
        granularity: Granularity,
        count: usize,
    ) -> Result<Vec<Candle>, BrokerError> {
        let url = format!("{}/v3/instruments/{}/candles", self.api_url, instrument);
        debug!("Fetching {} {} candles for {}", count, granularity, instrument);

        let response = self
            .client
            .get(&url)
            .query(&[
                ("granularity", granularity.as_str().to_string()),
                ("count", count.to_string()),
                ("price", "M".to_string()),
            ])
            .send()
            .await?;

        let body: OandaCandles = self.read(response, "candles").await?;
        body.candles.into_iter().map(OandaCandle::into_candle).collect()
    }

    async fn get_account_snapshot(&self) -> Result<AccountSnapshot, BrokerError> {
        let response = self.client.get(self.account_url("/summary")).send().await?;
        let summary: OandaAccountSummary = self.read(response, "account summary").await?;

        let response = self.client.get(self.account_url("/openTrades")).send().await?;
        let trades: OandaTrades = self.read(response, "open trades").await?;

        Ok(AccountSnapshot {
            account_id: summary.account.id,
            balance: parse_decimal(&summary.account.balance, "balance")?,
            currency: summary.account.currency,
            open_trades: trades
                .trades
                .into_iter()
                .map(OandaTrade::into_open_trade)
                .collect::<Result<_, _>>()?,
        })
    }

    async fn submit_order(&self, order: &Order) -> Result<OrderFill, BrokerError> {
        let body = order_body(order);
        debug!("Submitting order to OANDA: {}", body);

        let response = self
            .client
            .post(self.account_url("/orders"))
            .json(&body)
            .send()
            .await?;
        let result: OandaOrderResponse = self.read(response, "order").await?;

        if let Some(cancel) = result.order_cancel_transaction {
            return Err(BrokerError::Rejected(cancel.reason.unwrap_or_else(|| "CANCELLED".to_string())));
        }

        let fill = result
            .order_fill_transaction
            .ok_or_else(|| BrokerError::Decode("order response without a fill".to_string()))?;
        let opened = fill
            .trade_opened
            .ok_or_else(|| BrokerError::Decode("fill did not open a trade".to_string()))?;

        info!(
            "OANDA filled {} as trade {} @ {}",
            order.client_order_id, opened.trade_id, opened.price
        );

        Ok(OrderFill {
            trade_id: opened.trade_id,
            fill_price: parse_f64(&opened.price, "fill price")?,
            time: fill.time,
        })
    }

    async fn close_position(&self, trade_id: &str) -> Result<CloseFill, BrokerError> {
        let response = self
            .client
            .put(self.account_url(&format!("/trades/{}/close", trade_id)))
            .send()
            .await?;
        let result: OandaOrderResponse = self.read(response, "trade close").await?;

        let fill = result
            .order_fill_transaction
            .ok_or_else(|| BrokerError::Decode("close response without a fill".to_string()))?;
        let close_price = fill
            .price
            .as_deref()
            .ok_or_else(|| BrokerError::Decode("close fill without a price".to_string()))
            .and_then(|price| parse_f64(price, "close price"))?;
        let realized_pl = fill.pl.as_deref().map(|pl| parse_decimal(pl, "pl")).transpose()?;

        Ok(CloseFill {
            close_price,
            realized_pl,
        })
    }

    async fn trade_outcome(&self, trade_id: &str) -> Result<TradeOutcome, BrokerError> {
        let response = self
            .client
            .get(self.account_url(&format!("/trades/{}", trade_id)))
            .send()
            .await?;
        let result: OandaTradeDetails = self.read(response, "trade details").await?;
        result.trade.into_outcome()
    }
}

// OANDA API response structures
#[derive(Debug, Deserialize)]
struct OandaErrorBody {
    #[serde(rename = "errorMessage")]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OandaCandles {
    candles: Vec<OandaCandle>,
}

#[derive(Debug, Deserialize)]
struct OandaCandle {
    time: DateTime<Utc>,
    volume: i64,
    mid: Option<OandaOhlc>,
}

#[derive(Debug, Deserialize)]
struct OandaOhlc {
    o: String,
    h: String,
    l: String,
    c: String,
}

impl OandaCandle {
    fn into_candle(self) -> Result<Candle, BrokerError> {
        let mid = self
            .mid
            .ok_or_else(|| BrokerError::Decode(format!("candle at {} has no mid prices", self.time)))?;
        Ok(Candle {
            time: self.time,
            open: parse_f64(&mid.o, "open")?,
            high: parse_f64(&mid.h, "high")?,
            low: parse_f64(&mid.l, "low")?,
            close: parse_f64(&mid.c, "close")?,
            volume: self.volume,
        })
    }
}

#[derive(Debug, Deserialize)]
struct OandaAccountSummary {
    account: OandaAccountDetails,
}

#[derive(Debug, Deserialize)]
struct OandaAccountDetails {
    id: String,
    currency: String,
    balance: String,
}

#[derive(Debug, Deserialize)]
struct OandaTrades {
    trades: Vec<OandaTrade>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OandaTrade {
    id: String,
    instrument: String,
    price: String,
    current_units: String,
    open_time: Option<DateTime<Utc>>,
    state: Option<String>,
    average_close_price: Option<String>,
    #[serde(rename = "realizedPL")]
    realized_pl: Option<String>,
    stop_loss_order: Option<OandaPriceOrder>,
    take_profit_order: Option<OandaPriceOrder>,
}

#[derive(Debug, Deserialize)]
struct OandaPriceOrder {
    price: Option<String>,
}

impl OandaTrade {
    fn into_open_trade(self) -> Result<OpenTrade, BrokerError> {
        let level = |order: Option<OandaPriceOrder>, field: &str| -> Result<Option<f64>, BrokerError> {
            order
                .and_then(|o| o.price)
                .map(|price| parse_f64(&price, field))
                .transpose()
        };

        Ok(OpenTrade {
            units: parse_f64(&self.current_units, "currentUnits")? as i64,
            price: parse_f64(&self.price, "price")?,
            stop_loss: level(self.stop_loss_order, "stop loss")?,
            take_profit: level(self.take_profit_order, "take profit")?,
            open_time: self.open_time,
            trade_id: self.id,
            instrument: self.instrument,
        })
    }

    fn into_outcome(self) -> Result<TradeOutcome, BrokerError> {
        if self.state.as_deref() != Some("CLOSED") {
            return Ok(TradeOutcome::Open);
        }

        let close_price = self
            .average_close_price
            .as_deref()
            .ok_or_else(|| BrokerError::Decode(format!("closed trade {} has no close price", self.id)))
            .and_then(|price| parse_f64(price, "averageClosePrice"))?;
        let realized_pl = self
            .realized_pl
            .as_deref()
            .map(|pl| parse_decimal(pl, "realizedPL"))
            .transpose()?;

        Ok(TradeOutcome::Closed {
            close_price,
            realized_pl,
        })
    }
}

#[derive(Debug, Deserialize)]
struct OandaTradeDetails {
    trade: OandaTrade,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OandaOrderResponse {
    order_fill_transaction: Option<OandaFillTransaction>,
    order_cancel_transaction: Option<OandaCancelTransaction>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OandaFillTransaction {
    time: DateTime<Utc>,
    price: Option<String>,
    pl: Option<String>,
    trade_opened: Option<OandaTradeOpened>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OandaTradeOpened {
    #[serde(rename = "tradeID")]
    trade_id: String,
    price: String,
}

#[derive(Debug, Deserialize)]
struct OandaCancelTransaction {
    reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StrategyVariant;
    use crate::orders::{OrderRequest, OrderSide};
    use rust_decimal_macros::dec;

    fn order(instrument: &str, side: OrderSide) -> Order {
        Order::new(OrderRequest {
            instrument: instrument.to_string(),
            side,
            units: 1000,
            stop_loss_pips: 20.0,
            take_profit_pips: 40.0,
            reference_price: 1.085,
            variant: StrategyVariant::TrendFollowing,
        })
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            map_status(StatusCode::UNAUTHORIZED, r#"{"errorMessage":"Insufficient authorization"}"#),
            BrokerError::Auth(m) if m == "Insufficient authorization"
        ));
        assert!(matches!(map_status(StatusCode::TOO_MANY_REQUESTS, ""), BrokerError::RateLimited(_)));
        assert!(matches!(map_status(StatusCode::NOT_FOUND, ""), BrokerError::NotFound(_)));
        assert!(matches!(map_status(StatusCode::BAD_REQUEST, "bad units"), BrokerError::Rejected(_)));
        let server = map_status(StatusCode::BAD_GATEWAY, "");
        assert!(matches!(server, BrokerError::Network(_)));
        assert!(server.is_transient());
    }

    #[test]
    fn test_order_body_attaches_protection() {
        let body = order_body(&order("EUR_USD", OrderSide::Sell));
        let order = &body["order"];
        assert_eq!(order["type"], "MARKET");
        assert_eq!(order["timeInForce"], "FOK");
        assert_eq!(order["units"], "-1000");
        assert_eq!(order["stopLossOnFill"]["distance"], "0.00200");
        assert_eq!(order["takeProfitOnFill"]["distance"], "0.00400");
        assert_eq!(order["clientExtensions"]["tag"], "trendfollowing");

        let jpy = order_body(&order_for_jpy());
        assert_eq!(jpy["order"]["stopLossOnFill"]["distance"], "0.200");
    }

    fn order_for_jpy() -> Order {
        order("USD_JPY", OrderSide::Buy)
    }

    #[test]
    fn test_parse_candles() {
        let json = r#"{
            "instrument": "EUR_USD",
            "granularity": "M5",
            "candles": [
                {"complete": true, "volume": 132, "time": "2024-03-04T10:00:00.000000000Z",
                 "mid": {"o": "1.08512", "h": "1.08540", "l": "1.08490", "c": "1.08531"}},
                {"complete": false, "volume": 12, "time": "2024-03-04T10:05:00.000000000Z",
                 "mid": {"o": "1.08531", "h": "1.08533", "l": "1.08520", "c": "1.08525"}}
            ]
        }"#;
        let parsed: OandaCandles = serde_json::from_str(json).unwrap();
        let candles: Vec<Candle> = parsed
            .candles
            .into_iter()
            .map(OandaCandle::into_candle)
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].close, 1.08531);
        assert_eq!(candles[1].volume, 12);
        assert!(candles[0].time < candles[1].time);
    }

    #[test]
    fn test_parse_order_responses() {
        let filled = r#"{
            "orderCreateTransaction": {"id": "6356"},
            "orderFillTransaction": {"id": "6357", "time": "2024-03-04T10:00:01.000000000Z",
                "price": "1.08531", "tradeOpened": {"tradeID": "6357", "price": "1.08531", "units": "1000"}}
        }"#;
        let response: OandaOrderResponse = serde_json::from_str(filled).unwrap();
        let opened = response.order_fill_transaction.unwrap().trade_opened.unwrap();
        assert_eq!(opened.trade_id, "6357");

        let cancelled = r#"{
            "orderCreateTransaction": {"id": "6358"},
            "orderCancelTransaction": {"id": "6359", "reason": "INSUFFICIENT_MARGIN"}
        }"#;
        let response: OandaOrderResponse = serde_json::from_str(cancelled).unwrap();
        assert_eq!(
            response.order_cancel_transaction.unwrap().reason.as_deref(),
            Some("INSUFFICIENT_MARGIN")
        );
    }

    #[test]
    fn test_parse_trades() {
        let open = r#"{"trades": [{"id": "77", "instrument": "GBP_USD", "price": "1.27010",
            "currentUnits": "-1000", "openTime": "2024-03-04T09:00:00.000000000Z", "state": "OPEN",
            "stopLossOrder": {"price": "1.27210"}}]}"#;
        let trades: OandaTrades = serde_json::from_str(open).unwrap();
        let trade = trades.trades.into_iter().next().unwrap().into_open_trade().unwrap();
        assert_eq!(trade.units, -1000);
        assert_eq!(trade.side(), OrderSide::Sell);
        assert_eq!(trade.stop_loss, Some(1.2721));
        assert_eq!(trade.take_profit, None);

        let closed = r#"{"trade": {"id": "77", "instrument": "GBP_USD", "price": "1.27010",
            "currentUnits": "0", "state": "CLOSED", "averageClosePrice": "1.27210",
            "realizedPL": "-2.0000"}}"#;
        let details: OandaTradeDetails = serde_json::from_str(closed).unwrap();
        assert_eq!(
            details.trade.into_outcome().unwrap(),
            TradeOutcome::Closed {
                close_price: 1.2721,
                realized_pl: Some(dec!(-2)),
            }
        );
    }

    #[test]
    fn test_practice_flag_selects_host() {
        let config = BrokerConfig {
            account_id: "101-001-1234567-001".to_string(),
            api_token: "token".to_string(),
            ..BrokerConfig::default()
        };
        let broker = OandaBroker::new(&config).unwrap();
        assert_eq!(
            broker.account_url("/summary"),
            "https://api-fxpractice.oanda.com/v3/accounts/101-001-1234567-001/summary"
        );

        let live = OandaBroker::new(&BrokerConfig {
            practice: false,
            ..config
        })
        .unwrap();
        assert!(live.account_url("").starts_with(LIVE_URL));
    }
}
