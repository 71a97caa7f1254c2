mod connection;
pub mod multiplexer;
pub mod updates;

pub use multiplexer::{StreamMultiplexer, SubscriptionHandle};
pub use updates::{AccountUpdate, MarkPriceUpdate, OrderBookUpdate, TradeUpdate};
