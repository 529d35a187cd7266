//! Alpaca REST client for trading and market data.

use crate::api::{Broker, MarketData};
use crate::types::{
    Account, Bar, BrokerPosition, OrderRequest, OrderResult, OrderStatus, OrderType,
    TimeInForce,
};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration as StdDuration;
use tracing::{debug, warn};

/// Alpaca v2 API client.
pub struct AlpacaClient {
    trading_url: String,
    data_url: String,
    api_key: String,
    secret_key: String,
    http_client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct AccountResponse {
    cash: String,
    portfolio_value: Option<String>,
    buying_power: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PositionResponse {
    symbol: String,
    qty: String,
    market_value: Option<String>,
    avg_entry_price: String,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    id: String,
    symbol: String,
    status: String,
    filled_qty: Option<String>,
    filled_avg_price: Option<String>,
    client_order_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BarsResponse {
    bars: Option<Vec<BarResponse>>,
}

#[derive(Debug, Deserialize)]
struct BarResponse {
    t: DateTime<Utc>,
    o: f64,
    h: f64,
    l: f64,
    c: f64,
    v: f64,
}

fn parse_decimal(field: &str, raw: &str) -> Result<Decimal> {
    raw.parse::<Decimal>()
        .map_err(|e| Error::Corrupt(format!("{field}={raw}: {e}")))
}

impl AlpacaClient {
    /// Maximum attempts for idempotent reads.
    const MAX_RETRIES: u32 = 3;

    #[allow(clippy::result_large_err)]
    pub fn new(
        trading_url: impl Into<String>,
        data_url: impl Into<String>,
        api_key: impl Into<String>,
        secret_key: impl Into<String>,
        timeout_secs: u64,
    ) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(StdDuration::from_secs(timeout_secs))
            .connect_timeout(StdDuration::from_secs(timeout_secs.min(10)))
            .build()?;
        Ok(Self {
            trading_url: trading_url.into().trim_end_matches('/').to_string(),
            data_url: data_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            secret_key: secret_key.into(),
            http_client,
        })
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("APCA-API-KEY-ID", &self.api_key)
            .header("APCA-API-SECRET-KEY", &self.secret_key)
    }

    /// GET with retry and exponential backoff on 5xx and 429.
    async fn get_with_retry(&self, url: &str) -> Result<reqwest::Response> {
        let mut last_error = None;

        for attempt in 0..Self::MAX_RETRIES {
            match self.authed(self.http_client.get(url)).send().await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response)
                    if response.status().as_u16() == 429 || response.status().is_server_error() =>
                {
                    let status = response.status();
                    warn!(
                        attempt = attempt + 1,
                        status = %status,
                        url = url,
                        "Retryable broker error, backing off"
                    );
                    last_error = Some(Error::Connectivity(format!("{url}: {status}")));
                }
                Ok(response) => {
                    return Err(Error::Connectivity(format!(
                        "{url}: {}",
                        response.status()
                    )));
                }
                Err(e) => {
                    warn!(attempt = attempt + 1, error = %e, url = url, "HTTP request failed");
                    last_error = Some(Error::Http(e));
                }
            }

            if attempt + 1 < Self::MAX_RETRIES {
                tokio::time::sleep(StdDuration::from_millis(500 * 2u64.pow(attempt))).await;
            }
        }

        Err(last_error
            .unwrap_or_else(|| Error::Connectivity(format!("{url}: max retries exceeded"))))
    }

    fn order_body(request: &OrderRequest) -> Value {
        let mut body = json!({
            "symbol": request.symbol,
            "qty": request.quantity.to_string(),
            "side": request.side.as_str(),
            "type": match request.order_type {
                OrderType::Market => "market",
                OrderType::Limit => "limit",
            },
            "time_in_force": match request.time_in_force {
                TimeInForce::Day => "day",
                TimeInForce::Gtc => "gtc",
            },
        });
        if let Some(price) = request.limit_price {
            body["limit_price"] = json!(price.to_string());
        }
        if let Some(key) = &request.idempotency_key {
            body["client_order_id"] = json!(key);
        }
        if let (Some(stop), Some(tp)) = (request.stop_loss, request.take_profit) {
            body["order_class"] = json!("bracket");
            body["stop_loss"] = json!({ "stop_price": stop.to_string() });
            body["take_profit"] = json!({ "limit_price": tp.to_string() });
        }
        body
    }
}

#[async_trait::async_trait]
impl Broker for AlpacaClient {
    async fn get_account(&self) -> Result<Account> {
        let url = format!("{}/v2/account", self.trading_url);
        let payload: AccountResponse = self.get_with_retry(&url).await?.json().await?;
        Ok(Account {
            cash: parse_decimal("cash", &payload.cash)?,
            portfolio_value: payload
                .portfolio_value
                .as_deref()
                .map(|v| parse_decimal("portfolio_value", v))
                .transpose()?,
            buying_power: payload
                .buying_power
                .as_deref()
                .map(|v| parse_decimal("buying_power", v))
                .transpose()?,
            positions: 0,
        })
    }

    async fn list_positions(&self) -> Result<Vec<BrokerPosition>> {
        let url = format!("{}/v2/positions", self.trading_url);
        let payload: Vec<PositionResponse> = self.get_with_retry(&url).await?.json().await?;
        payload
            .into_iter()
            .map(|p| -> Result<BrokerPosition> {
                Ok(BrokerPosition {
                    market_value: p
                        .market_value
                        .as_deref()
                        .map(|v| parse_decimal("market_value", v))
                        .transpose()?
                        .unwrap_or(Decimal::ZERO),
                    qty: parse_decimal("qty", &p.qty)?,
                    avg_entry_price: parse_decimal("avg_entry_price", &p.avg_entry_price)?,
                    symbol: p.symbol,
                })
            })
            .collect()
    }

    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderResult> {
        let url = format!("{}/v2/orders", self.trading_url);
        let response = self
            .authed(self.http_client.post(&url))
            .json(&Self::order_body(request))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            if status.is_server_error() || status.as_u16() == 429 {
                return Err(Error::Connectivity(format!("order submit {status}: {text}")));
            }
            return Err(Error::order(format!("{} rejected ({status}): {text}", request.symbol)));
        }

        let payload: OrderResponse = response.json().await?;
        debug!(order_id = %payload.id, status = %payload.status, "Broker accepted order");

        let mut raw = HashMap::new();
        raw.insert("status".to_string(), payload.status.clone());
        if let Some(client_id) = payload.client_order_id {
            raw.insert("client_order_id".to_string(), client_id);
        }

        Ok(OrderResult {
            status: OrderStatus::from_broker(&payload.status),
            filled_qty: payload
                .filled_qty
                .as_deref()
                .and_then(|q| q.parse::<Decimal>().ok())
                .and_then(|q| q.trunc().to_u64())
                .unwrap_or(0),
            average_fill_price: payload
                .filled_avg_price
                .as_deref()
                .and_then(|p| p.parse::<Decimal>().ok()),
            order_id: payload.id,
            symbol: payload.symbol,
            raw,
        })
    }

    async fn cancel_order(&self, order_id: &str) -> Result<()> {
        let url = format!("{}/v2/orders/{}", self.trading_url, order_id);
        let response = self.authed(self.http_client.delete(&url)).send().await?;
        let status = response.status();
        // 422 means the order already reached a terminal state.
        if status.is_success() || status.as_u16() == 404 || status.as_u16() == 422 {
            return Ok(());
        }
        Err(Error::Connectivity(format!("cancel {order_id}: {status}")))
    }
}

#[async_trait::async_trait]
impl MarketData for AlpacaClient {
    async fn get_daily_bars(&self, symbol: &str, limit: usize) -> Result<Vec<Bar>> {
        let url = format!(
            "{}/v2/stocks/{}/bars?timeframe=1Day&limit={}&adjustment=raw",
            self.data_url, symbol, limit
        );
        let payload: BarsResponse = self.get_with_retry(&url).await?.json().await?;
        let bars = payload
            .bars
            .unwrap_or_default()
            .into_iter()
            .map(|b| Bar {
                ts: b.t,
                open: b.o,
                high: b.h,
                low: b.l,
                close: b.c,
                volume: b.v,
            })
            .collect::<Vec<_>>();
        if bars.is_empty() {
            return Err(Error::DataValidation(format!("no bars returned for {symbol}")));
        }
        Ok(bars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OrderSide;

    #[test]
    fn test_bracket_order_body() {
        let request = OrderRequest::market("AAPL", OrderSide::Buy, 25)
            .with_bracket(Decimal::new(95, 0), Decimal::new(110, 0))
            .with_idempotency_key("c1-AAPL");
        let body = AlpacaClient::order_body(&request);
        assert_eq!(body["qty"], "25");
        assert_eq!(body["side"], "buy");
        assert_eq!(body["order_class"], "bracket");
        assert_eq!(body["stop_loss"]["stop_price"], "95");
        assert_eq!(body["take_profit"]["limit_price"], "110");
        assert_eq!(body["client_order_id"], "c1-AAPL");
    }

    #[test]
    fn test_plain_order_body_has_no_bracket() {
        let request = OrderRequest::market("SPY", OrderSide::Sell, 3);
        let body = AlpacaClient::order_body(&request);
        assert!(body.get("order_class").is_none());
        assert!(body.get("client_order_id").is_none());
        assert_eq!(body["type"], "market");
    }
}
