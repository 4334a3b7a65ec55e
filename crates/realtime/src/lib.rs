//! MarketPulse Realtime Crate
//!
//! Streams live ticker events for subscribed symbols from two upstream websocket
//! channels and fans them out to in-process listeners.
//!
//! # Overview
//!
//! - Crypto symbols stream from an exchange ticker channel, everything else from a
//!   trade channel that needs an API token.
//! - Subscriptions are reference counted per symbol: the first listener sends the
//!   upstream subscribe frame, the last one to leave sends the unsubscribe frame.
//! - Each channel runs its own supervised loop that reconnects with exponential
//!   backoff and resubscribes every active symbol after a reconnect.
//! - Listener callbacks are isolated from each other; a panicking listener does not
//!   stop delivery to the rest.
//!
//! # Core Types
//!
//! - [`StreamManager`] - Entry point: `connect`, `subscribe`, `unsubscribe`
//! - [`TickerData`] - One normalized ticker event
//! - [`ConnectionState`] - Connection lifecycle reported to state listeners
//! - [`StreamConnector`] - Transport seam, [`TungsteniteConnector`] in production

pub mod config;
pub mod error;
pub mod manager;
pub mod protocol;
pub mod reconnect;
pub mod state;
pub mod ticker;
pub mod transport;

pub use config::StreamConfig;
pub use error::StreamError;
pub use manager::{StateListener, StateListenerHandle, StreamManager, TickListener};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use state::{Channel, ConnectionState};
pub use ticker::TickerData;
pub use transport::{Connection, StreamConnector, TungsteniteConnector};
