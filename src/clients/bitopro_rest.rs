// BitoPro v3 REST client
//
// Signed endpoints carry the payload/signature headers; public endpoints
// (tickers, trading pairs) are plain GETs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use reqwest::Method;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::exchange::ExchangeApi;
use super::signer::{NonceSource, PayloadSigner};
use crate::config::ExchangeConfig;
use crate::error::{TradingError, TradingResult};
use crate::types::{is_rounded, Order, OrderId, OrderStatus, PairMetadata, Side};

pub struct BitoProClient {
    http: reqwest::Client,
    base_url: String,
    signer: PayloadSigner,
    identity: String,
    nonces: Arc<NonceSource>,
    metadata: Mutex<HashMap<String, PairMetadata>>,
}

impl BitoProClient {
    pub fn new(config: &ExchangeConfig) -> TradingResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            http,
            base_url: config.rest_url.trim_end_matches('/').to_string(),
            signer: PayloadSigner::new(&config.api_key, &config.api_secret),
            identity: config.identity.clone(),
            nonces: Arc::new(NonceSource::new()),
            metadata: Mutex::new(HashMap::new()),
        })
    }

    /// Shared with the stream connector so both sides hand out increasing nonces
    pub fn nonce_source(&self) -> Arc<NonceSource> {
        Arc::clone(&self.nonces)
    }

    fn identity_params(&self) -> Value {
        json!({ "identity": self.identity, "nonce": self.nonces.next() })
    }

    async fn signed_request(
        &self,
        method: Method,
        path: &str,
        params: Value,
        with_body: bool,
    ) -> TradingResult<Value> {
        let signed = self.signer.sign(&params)?;
        let url = format!("{}{}", self.base_url, path);

        let mut request = self.http.request(method.clone(), &url);
        for (name, value) in self.signer.headers(&signed) {
            request = request.header(name, value);
        }
        if with_body {
            request = request.json(&params);
        }

        debug!(%method, path, "signed request");
        let response = request.send().await?;
        read_json(response).await
    }

    async fn public_get(&self, path: &str) -> TradingResult<Value> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.http.get(&url).send().await?;
        read_json(response).await
    }

    async fn cached_metadata(&self, pair: &str) -> TradingResult<PairMetadata> {
        let cached = self
            .metadata
            .lock()
            .map_err(|_| TradingError::Internal("metadata cache poisoned".to_string()))?
            .get(pair)
            .cloned();

        match cached {
            Some(meta) => Ok(meta),
            None => self.get_pair_metadata(pair).await,
        }
    }
}

async fn read_json(response: reqwest::Response) -> TradingResult<Value> {
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        return Err(TradingError::ApiResponse {
            status: status.as_u16(),
            body,
        });
    }

    let value: Value = serde_json::from_str(&body)?;
    if let Some(error) = value.get("error").and_then(Value::as_str) {
        return Err(TradingError::OrderRejected(error.to_string()));
    }
    Ok(value)
}

#[async_trait]
impl ExchangeApi for BitoProClient {
    async fn place_order(
        &self,
        pair: &str,
        side: Side,
        price: Decimal,
        qty: Decimal,
    ) -> TradingResult<OrderId> {
        let meta = self.cached_metadata(pair).await?;
        if !is_rounded(price, meta.price_precision) {
            return Err(TradingError::UnroundedPrice {
                price,
                precision: meta.price_precision,
            });
        }
        if !is_rounded(qty, meta.quantity_precision) {
            return Err(TradingError::UnroundedQuantity {
                quantity: qty,
                precision: meta.quantity_precision,
            });
        }

        let body = json!({
            "action": side.to_string(),
            "amount": qty.normalize().to_string(),
            "price": price.normalize().to_string(),
            "timestamp": self.nonces.next(),
            "type": "LIMIT",
        });

        let response = self
            .signed_request(Method::POST, &format!("/orders/{}", pair), body, true)
            .await?;

        let id = id_field(&response, "orderId").ok_or_else(|| {
            TradingError::ApiDecode(format!("orderId missing from response: {}", response))
        })?;
        Ok(OrderId(id))
    }

    async fn cancel_order(&self, pair: &str, id: &OrderId) -> TradingResult<()> {
        let path = format!("/orders/{}/{}", pair, id);
        self.signed_request(Method::DELETE, &path, self.identity_params(), false)
            .await?;
        Ok(())
    }

    async fn cancel_all(&self, pair: &str) -> TradingResult<Vec<OrderId>> {
        let path = format!("/orders/{}", pair);
        let response = self
            .signed_request(Method::DELETE, &path, self.identity_params(), false)
            .await
            .map_err(|e| match e {
                TradingError::ApiResponse { status, body } => {
                    TradingError::CancelFailed(format!("HTTP {}: {}", status, body))
                }
                other => other,
            })?;

        let ids = response
            .get("data")
            .and_then(|data| data.get(pair))
            .and_then(Value::as_array)
            .map(|ids| {
                ids.iter()
                    .filter_map(|v| match v {
                        Value::String(s) => Some(OrderId(s.clone())),
                        Value::Number(n) => Some(OrderId(n.to_string())),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(ids)
    }

    async fn get_order(&self, pair: &str, id: &OrderId) -> TradingResult<Order> {
        let path = format!("/orders/{}/{}", pair, id);
        let response = self
            .signed_request(Method::GET, &path, self.identity_params(), false)
            .await?;
        let detail = response.get("data").unwrap_or(&response);
        parse_order(pair, detail)
    }

    async fn get_price(&self, pair: &str) -> TradingResult<Decimal> {
        let response = self.public_get(&format!("/tickers/{}", pair)).await?;
        let data = response
            .get("data")
            .ok_or_else(|| TradingError::ApiDecode("ticker response has no data".to_string()))?;
        // Some deployments wrap a single ticker in an array
        let ticker = data.as_array().and_then(|a| a.first()).unwrap_or(data);
        decimal_field(ticker, "lastPrice")
    }

    async fn get_pair_metadata(&self, pair: &str) -> TradingResult<PairMetadata> {
        let response = self.public_get("/provisioning/trading-pairs").await?;
        let pairs = response
            .get("data")
            .and_then(Value::as_array)
            .ok_or_else(|| TradingError::ApiDecode("trading-pairs response has no data".to_string()))?;

        let entry = pairs
            .iter()
            .find(|p| p.get("pair").and_then(Value::as_str) == Some(pair))
            .ok_or_else(|| TradingError::InvalidParameter("pair".to_string(), format!("{} is not listed", pair)))?;

        let meta = PairMetadata {
            pair: pair.to_string(),
            price_precision: precision_field(entry, "quotePrecision")?,
            quantity_precision: precision_field(entry, "basePrecision")?,
            min_order_qty: decimal_field(entry, "minLimitBaseAmount").ok(),
            min_notional: None,
        };

        match self.metadata.lock() {
            Ok(mut cache) => {
                cache.insert(pair.to_string(), meta.clone());
            }
            Err(_) => warn!("⚠️ Pair metadata cache poisoned; not caching {}", pair),
        }
        Ok(meta)
    }
}

fn id_field(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// BitoPro sends most numbers as strings
pub(crate) fn decimal_field(value: &Value, key: &str) -> TradingResult<Decimal> {
    let raw = value
        .get(key)
        .ok_or_else(|| TradingError::ApiDecode(format!("field '{}' missing", key)))?;
    let text = match raw {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        other => return Err(TradingError::ApiDecode(format!("field '{}' is not numeric: {}", key, other))),
    };
    text.parse::<Decimal>()
        .map_err(|e| TradingError::ApiDecode(format!("field '{}': {}", key, e)))
}

fn precision_field(value: &Value, key: &str) -> TradingResult<u32> {
    let dp = decimal_field(value, key)?;
    dp.to_u32()
        .ok_or_else(|| TradingError::ApiDecode(format!("field '{}' out of range", key)))
}

fn parse_order(pair: &str, value: &Value) -> TradingResult<Order> {
    let id = id_field(value, "id")
        .ok_or_else(|| TradingError::ApiDecode("order detail has no id".to_string()))?;

    let side = value
        .get("action")
        .and_then(Value::as_str)
        .and_then(Side::from_string)
        .ok_or_else(|| TradingError::ApiDecode(format!("order {} has no valid action", id)))?;

    let code = value
        .get("status")
        .and_then(Value::as_i64)
        .ok_or_else(|| TradingError::ApiDecode(format!("order {} has no status", id)))?;
    let status = OrderStatus::from_bitopro_code(code)
        .ok_or_else(|| TradingError::ApiDecode(format!("order {} has unknown status {}", id, code)))?;

    let updated_at = value
        .get("updatedTimestamp")
        .and_then(Value::as_i64)
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or_else(Utc::now);

    Ok(Order {
        id: OrderId(id),
        pair: pair.to_string(),
        side,
        price: decimal_field(value, "price")?,
        orig_qty: decimal_field(value, "originalAmount")?,
        executed_qty: decimal_field(value, "executedAmount").unwrap_or(Decimal::ZERO),
        avg_execution_price: decimal_field(value, "avgExecutionPrice").unwrap_or(Decimal::ZERO),
        fee: decimal_field(value, "fee").unwrap_or(Decimal::ZERO),
        fee_currency: value
            .get("feeSymbol")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        status,
        updated_at,
    })
}
