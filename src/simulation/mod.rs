// Paper trading
// In-memory exchange and order stream for dry runs and tests

pub mod paper_exchange;
pub mod paper_stream;

pub use paper_exchange::{PaperExchange, PlacedOrder};
pub use paper_stream::{PaperStreamConnector, StreamHub};
