// Request signing for the BitoPro v3 API
//
// payload   = base64url(json(params))
// signature = hex(HMAC-SHA384(secret, payload))

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha384;

use crate::error::{TradingError, TradingResult};

type HmacSha384 = Hmac<Sha384>;

pub const HEADER_API_KEY: &str = "X-BITOPRO-APIKEY";
pub const HEADER_PAYLOAD: &str = "X-BITOPRO-PAYLOAD";
pub const HEADER_SIGNATURE: &str = "X-BITOPRO-SIGNATURE";

/// Payload and signature ready to be attached as headers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedPayload {
    pub payload: String,
    pub signature: String,
}

#[derive(Clone)]
pub struct PayloadSigner {
    api_key: String,
    secret: String,
}

impl std::fmt::Debug for PayloadSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayloadSigner")
            .field("api_key", &self.api_key)
            .field("secret", &"***")
            .finish()
    }
}

impl PayloadSigner {
    pub fn new(api_key: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            secret: secret.into(),
        }
    }

    pub fn sign(&self, params: &Value) -> TradingResult<SignedPayload> {
        let json = serde_json::to_string(params)?;
        let payload = URL_SAFE.encode(json.as_bytes());
        let signature = signature_hex(&self.secret, &payload)?;
        Ok(SignedPayload { payload, signature })
    }

    /// The three auth headers in wire order
    pub fn headers(&self, signed: &SignedPayload) -> [(&'static str, String); 3] {
        [
            (HEADER_API_KEY, self.api_key.clone()),
            (HEADER_PAYLOAD, signed.payload.clone()),
            (HEADER_SIGNATURE, signed.signature.clone()),
        ]
    }
}

fn signature_hex(secret: &str, payload: &str) -> TradingResult<String> {
    let mut mac = HmacSha384::new_from_slice(secret.as_bytes())
        .map_err(|e| TradingError::Signature(e.to_string()))?;
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Millisecond nonce that never repeats and never goes backwards, even when
/// two requests land in the same millisecond or the wall clock steps back.
#[derive(Debug, Default)]
pub struct NonceSource {
    last: AtomicU64,
}

impl NonceSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> u64 {
        let now = now_unix_ms();
        let mut prev = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = if now > prev { now } else { prev + 1 };
            match self
                .last
                .compare_exchange_weak(prev, candidate, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return candidate,
                Err(actual) => prev = actual,
            }
        }
    }
}

pub fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
