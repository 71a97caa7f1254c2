//! Resilient signed-REST and streaming client core for a crypto-futures exchange gateway.
//!
//! Four subsystems compose here: the hardened [`rest::RestClient`] (signing, rate limiting,
//! circuit breaking, response classification), the [`stream::StreamMultiplexer`] fan-out, and the
//! self-optimizing [`execution::ExecutionEngine`]. Strategy/signal generation, persistent learning
//! storage, and process bootstrap/config-loading are deliberately out of scope — those are the
//! job of whatever binary links this crate in.

pub mod cache;
pub mod circuit_breaker;
pub mod config;
pub mod error;
pub mod execution;
pub mod rate_governor;
pub mod rest;
pub mod signer;
pub mod stream;

#[cfg(test)]
pub(crate) mod testing;

pub use circuit_breaker::{BreakerConfig, BreakerSnapshot, BreakerState, CircuitBreaker};
pub use config::GatewayConfig;
pub use error::GatewayError;
pub use execution::ExecutionEngine;
pub use rate_governor::RateGovernor;
pub use rest::RestClient;
pub use stream::{StreamMultiplexer, SubscriptionHandle};
