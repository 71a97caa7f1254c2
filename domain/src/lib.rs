//! Shared, exchange-agnostic data types passed across the gateway's public boundary.
//!
//! Nothing in this crate talks to the network or holds synchronization primitives; it is the
//! vocabulary the REST client, streaming multiplexer and execution engine all share.

pub mod credentials;
pub mod market;
pub mod order;
pub mod position;
pub mod symbol;

pub use credentials::{Credentials, Environment};
pub use market::MarketSnapshot;
pub use order::{Order, OrderOutcome, OrderSide, OrderStatus, OrderType, PositionSide, TimeInForce};
pub use position::{MarginMode, Position};
pub use symbol::{Precision, SymbolInfo};

/// Quote-precision price and size values. Kept as `Decimal` end to end — parsed once at the
/// REST ingress boundary and never re-parsed downstream.
pub type Price = rust_decimal::Decimal;
pub type Amount = rust_decimal::Decimal;
