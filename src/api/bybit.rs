use std::num::NonZeroU32;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use governor::{Quota, RateLimiter};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use sha2::Sha256;

use crate::api::{ExchangeClient, OrderRequest};

const BYBIT_API_BASE: &str = "https://api.bybit.com";
const CATEGORY: &str = "linear";
const RECV_WINDOW: &str = "5000";
const RATE_LIMIT_RPS: u32 = 10;

// Type alias for the rate limiter to simplify signatures
type BybitRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, thiserror::Error)]
pub enum BybitError {
    #[error("bybit api error {code}: {message}")]
    Api { code: i64, message: String },
    #[error("malformed response field: {0}")]
    Malformed(String),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// Bybit V5 client covering the tickers, instruments, positions and order
/// endpoints the bot uses.
///
/// Cloneable so it can be shared across the loops; all clones share the
/// same rate limiter.
#[derive(Clone)]
pub struct BybitClient {
    client: Client,
    api_key: String,
    api_secret: String,
    rate_limiter: Arc<BybitRateLimiter>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    #[serde(rename = "retCode")]
    ret_code: i64,
    #[serde(rename = "retMsg")]
    ret_msg: String,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ListResult<T> {
    list: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TickerData {
    #[allow(dead_code)]
    symbol: String,
    last_price: String,
}

#[derive(Debug, Deserialize)]
struct PositionData {
    size: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResult {
    order_id: String,
}

#[derive(Debug, Deserialize)]
struct InstrumentData {
    #[allow(dead_code)]
    symbol: String,
}

impl BybitClient {
    pub fn new(api_key: String, api_secret: String) -> Self {
        let quota = Quota::per_second(NonZeroU32::new(RATE_LIMIT_RPS).unwrap());
        Self {
            client: Client::new(),
            api_key,
            api_secret,
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
        }
    }

    /// Last traded price for a linear instrument (public endpoint)
    pub async fn last_price(&self, symbol: &str) -> Result<f64, BybitError> {
        self.rate_limiter.until_ready().await;

        let url = format!(
            "{}/v5/market/tickers?category={}&symbol={}",
            BYBIT_API_BASE, CATEGORY, symbol
        );
        let response: ApiResponse<ListResult<TickerData>> =
            self.client.get(&url).send().await?.json().await?;
        let result = check(response)?;

        let ticker = result
            .list
            .into_iter()
            .next()
            .ok_or_else(|| BybitError::Malformed(format!("no ticker for {}", symbol)))?;
        ticker
            .last_price
            .parse()
            .map_err(|_| BybitError::Malformed(format!("lastPrice: {}", ticker.last_price)))
    }

    /// Whether a linear instrument with this symbol exists on the exchange
    pub async fn symbol_exists(&self, symbol: &str) -> Result<bool, BybitError> {
        self.rate_limiter.until_ready().await;

        let url = format!(
            "{}/v5/market/instruments-info?category={}&symbol={}",
            BYBIT_API_BASE, CATEGORY, symbol
        );
        let response: ApiResponse<ListResult<InstrumentData>> =
            self.client.get(&url).send().await?.json().await?;

        // An unknown symbol comes back as an error code, not an empty list
        if response.ret_code != 0 {
            tracing::debug!(
                "Instrument lookup for {} returned {}: {}",
                symbol,
                response.ret_code,
                response.ret_msg
            );
            return Ok(false);
        }
        Ok(response.result.map_or(false, |r| !r.list.is_empty()))
    }

    /// Number of open USDT-settled positions (size > 0)
    pub async fn open_position_count(&self) -> Result<usize, BybitError> {
        self.rate_limiter.until_ready().await;

        let query = format!("category={}&settleCoin=USDT", CATEGORY);
        let url = format!("{}/v5/position/list?{}", BYBIT_API_BASE, query);
        let timestamp = Utc::now().timestamp_millis().to_string();
        let signature = sign(
            &self.api_secret,
            &format!("{}{}{}{}", timestamp, self.api_key, RECV_WINDOW, query),
        );

        let response: ApiResponse<ListResult<PositionData>> = self
            .client
            .get(&url)
            .header("X-BAPI-API-KEY", &self.api_key)
            .header("X-BAPI-TIMESTAMP", &timestamp)
            .header("X-BAPI-RECV-WINDOW", RECV_WINDOW)
            .header("X-BAPI-SIGN", &signature)
            .send()
            .await?
            .json()
            .await?;
        let result = check(response)?;

        let count = result
            .list
            .iter()
            .filter(|p| p.size.parse::<f64>().map_or(false, |s| s > 0.0))
            .count();
        tracing::debug!("Open positions: {}", count);
        Ok(count)
    }

    /// Place a GTC limit order with optional take-profit / stop-loss
    pub async fn place_limit_order(&self, request: &OrderRequest) -> Result<String, BybitError> {
        self.rate_limiter.until_ready().await;

        let mut body = serde_json::json!({
            "category": CATEGORY,
            "symbol": request.symbol,
            "side": request.side.as_str(),
            "orderType": "Limit",
            "qty": request.qty.to_string(),
            "price": request.price.to_string(),
            "timeInForce": "GTC",
        });
        if let Some(tp) = request.take_profit {
            body["takeProfit"] = serde_json::Value::String(tp.to_string());
        }
        if let Some(sl) = request.stop_loss {
            body["stopLoss"] = serde_json::Value::String(sl.to_string());
        }
        let payload = body.to_string();

        let timestamp = Utc::now().timestamp_millis().to_string();
        let signature = sign(
            &self.api_secret,
            &format!("{}{}{}{}", timestamp, self.api_key, RECV_WINDOW, payload),
        );

        let response: ApiResponse<OrderResult> = self
            .client
            .post(format!("{}/v5/order/create", BYBIT_API_BASE))
            .header("X-BAPI-API-KEY", &self.api_key)
            .header("X-BAPI-TIMESTAMP", &timestamp)
            .header("X-BAPI-RECV-WINDOW", RECV_WINDOW)
            .header("X-BAPI-SIGN", &signature)
            .header("Content-Type", "application/json")
            .body(payload)
            .send()
            .await?
            .json()
            .await?;
        let result = check(response)?;

        tracing::info!("Order placed: {}", result.order_id);
        Ok(result.order_id)
    }
}

/// Unwrap the Bybit response envelope, mapping retCode != 0 to an error
fn check<T>(response: ApiResponse<T>) -> Result<T, BybitError> {
    if response.ret_code != 0 {
        return Err(BybitError::Api {
            code: response.ret_code,
            message: response.ret_msg,
        });
    }
    response
        .result
        .ok_or_else(|| BybitError::Malformed("missing result".to_string()))
}

/// Bybit V5 request signature: HMAC-SHA256 over
/// `timestamp + api_key + recv_window + payload`, hex-encoded
fn sign(secret: &str, payload: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

#[async_trait]
impl ExchangeClient for BybitClient {
    async fn open_position_count(&self) -> anyhow::Result<usize> {
        Ok(BybitClient::open_position_count(self).await?)
    }

    async fn place_limit_order(&self, request: &OrderRequest) -> anyhow::Result<String> {
        Ok(BybitClient::place_limit_order(self, request).await?)
    }
}
