// Core trading logic modules

pub mod ladder;
pub mod ledger;
pub mod notifier;
pub mod registry;
pub mod session;
pub mod session_config;
pub mod stream_session;
pub mod volatility;

// Re-export commonly used types
pub use ladder::{LadderController, LadderReaction, PlacementReport};
pub use ledger::{match_fifo, FifoReport, OpenLot, OpenPosition, TradeLedger, UnmatchedSell};
pub use notifier::{LogNotifier, Notification, Notifier, WebhookNotifier};
pub use registry::{SessionHandle, SessionRegistry, SessionReport};
pub use session::{SessionDeps, SessionSnapshot};
pub use session_config::{SessionConfig, SessionConfigPatch};
pub use stream_session::{ReconnectPolicy, StreamEvent, StreamSession, StreamState};
pub use volatility::{GuardDecision, PriceSample, VolatilityGuard};
