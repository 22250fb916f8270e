// Exchange clients

pub mod bitopro_rest;
pub mod bitopro_ws;
pub mod exchange;
pub mod signer;

pub use bitopro_rest::BitoProClient;
pub use bitopro_ws::{decode_active_orders, BitoProStreamConnector};
pub use exchange::{ExchangeApi, OrderHint, StreamConnection, StreamConnector};
pub use signer::{NonceSource, PayloadSigner, SignedPayload};
