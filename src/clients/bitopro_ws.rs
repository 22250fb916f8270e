// Authenticated BitoPro order stream
//
// One frame may carry several orders, so decoded hints are queued and handed
// out one at a time.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::exchange::{OrderHint, StreamConnection, StreamConnector};
use super::signer::{NonceSource, PayloadSigner};
use crate::config::ExchangeConfig;
use crate::error::{TradingError, TradingResult};
use crate::types::{OrderId, OrderStatus};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

pub const ACTIVE_ORDERS_EVENT: &str = "ACTIVE_ORDERS";

pub struct BitoProStreamConnector {
    url: String,
    signer: PayloadSigner,
    identity: String,
    nonces: Arc<NonceSource>,
}

impl BitoProStreamConnector {
    pub fn new(config: &ExchangeConfig, nonces: Arc<NonceSource>) -> Self {
        Self {
            url: config.ws_url.clone(),
            signer: PayloadSigner::new(&config.api_key, &config.api_secret),
            identity: config.identity.clone(),
            nonces,
        }
    }
}

#[async_trait]
impl StreamConnector for BitoProStreamConnector {
    async fn connect(&self) -> TradingResult<Box<dyn StreamConnection>> {
        let params = json!({ "identity": self.identity, "nonce": self.nonces.next() });
        let signed = self.signer.sign(&params)?;

        let mut request = self.url.as_str().into_client_request()?;
        for (name, value) in self.signer.headers(&signed) {
            let value = HeaderValue::from_str(&value)
                .map_err(|e| TradingError::Signature(format!("invalid header {}: {}", name, e)))?;
            request.headers_mut().insert(name, value);
        }

        let (socket, _) = connect_async(request).await?;
        info!("✅ Connected to BitoPro order stream");

        Ok(Box::new(BitoProStream {
            socket,
            pending: VecDeque::new(),
        }))
    }
}

pub struct BitoProStream {
    socket: WsStream,
    pending: VecDeque<OrderHint>,
}

#[async_trait]
impl StreamConnection for BitoProStream {
    async fn next_hint(&mut self) -> Option<TradingResult<OrderHint>> {
        loop {
            if let Some(hint) = self.pending.pop_front() {
                return Some(Ok(hint));
            }

            let msg = match self.socket.next().await? {
                Ok(msg) => msg,
                Err(e) => return Some(Err(e.into())),
            };

            match msg {
                Message::Text(text) => match serde_json::from_str::<Value>(&text) {
                    Ok(frame) => self.pending.extend(decode_active_orders(&frame)),
                    Err(e) => debug!("Ignoring undecodable frame: {}", e),
                },
                Message::Ping(data) => {
                    if let Err(e) = self.socket.send(Message::Pong(data)).await {
                        return Some(Err(e.into()));
                    }
                }
                Message::Close(frame) => {
                    warn!("⚠️ Order stream closed by server: {:?}", frame);
                    return None;
                }
                _ => {}
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.socket.close(None).await {
            debug!("Order stream close: {}", e);
        }
    }
}

/// Extract order hints from an `ACTIVE_ORDERS` frame. Other events yield nothing.
pub fn decode_active_orders(frame: &Value) -> Vec<OrderHint> {
    if frame.get("event").and_then(Value::as_str) != Some(ACTIVE_ORDERS_EVENT) {
        return Vec::new();
    }

    let Some(data) = frame.get("data").and_then(Value::as_object) else {
        return Vec::new();
    };

    let mut hints = Vec::new();
    for (pair, orders) in data {
        let Some(orders) = orders.as_array() else {
            continue;
        };
        for order in orders {
            let id = match order.get("id") {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Number(n)) => n.to_string(),
                _ => continue,
            };
            let status_hint = order
                .get("status")
                .and_then(Value::as_i64)
                .and_then(OrderStatus::from_bitopro_code);

            hints.push(OrderHint {
                pair: pair.clone(),
                order_id: OrderId(id),
                status_hint,
            });
        }
    }
    hints
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_active_orders() {
        let frame = json!({
            "event": "ACTIVE_ORDERS",
            "timestamp": 1700000000000i64,
            "data": {
                "btc_twd": [
                    {"id": "111", "status": 2, "price": "100"},
                    {"id": "112", "status": 0}
                ]
            }
        });

        let hints = decode_active_orders(&frame);
        assert_eq!(hints.len(), 2);
        assert_eq!(hints[0].pair, "btc_twd");
        assert_eq!(hints[0].order_id, OrderId::from("111"));
        assert_eq!(hints[0].status_hint, Some(OrderStatus::Filled));
        assert_eq!(hints[1].status_hint, Some(OrderStatus::New));
    }

    #[test]
    fn test_other_events_ignored() {
        let frame = json!({"event": "ACCOUNT_BALANCE", "data": {"btc_twd": [{"id": "1"}]}});
        assert!(decode_active_orders(&frame).is_empty());

        let malformed = json!({"event": "ACTIVE_ORDERS", "data": {"btc_twd": [{"status": 2}]}});
        assert!(decode_active_orders(&malformed).is_empty());
    }
}
