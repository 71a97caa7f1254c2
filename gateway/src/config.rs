//! Plain `Deserialize`/`Serialize` structs, no env parsing, no globals: callers build a
//! `GatewayConfig` however they like (env, TOML, hardcoded) and pass it to
//! `RestClient::new`/`ExecutionEngine::new` explicitly. Loading it from a file or environment is
//! left to the caller's own process bootstrap.

use std::time::Duration;

use domain::Credentials;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub open_timeout: Duration,
    pub half_open_permits: u32,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            open_timeout: Duration::from_secs(30),
            half_open_permits: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSettings {
    pub use_smart_order_type: bool,
    pub market_vol_threshold: f64,
    pub base_slippage_tolerance: f64,
    pub max_slippage_tolerance: f64,
    pub adaptation_rate: f64,
    pub enable_smart_entry: bool,
    pub prefer_limit_for_fees: bool,
    pub max_retries: u32,
    pub base_retry_delay: Duration,
    pub max_split_size: rust_decimal::Decimal,
    pub split_interval: Duration,
    pub quality_window: usize,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            use_smart_order_type: true,
            market_vol_threshold: 0.03,
            base_slippage_tolerance: 0.001,
            max_slippage_tolerance: 0.005,
            adaptation_rate: 0.1,
            enable_smart_entry: true,
            prefer_limit_for_fees: false,
            max_retries: 3,
            base_retry_delay: Duration::from_secs(1),
            max_split_size: rust_decimal_macros::dec!(50),
            split_interval: Duration::from_secs(2),
            quality_window: 50,
        }
    }
}

/// Top-level gateway configuration. No part of this is read from the environment; the caller is
/// responsible for constructing it.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub credentials: Credentials,
    pub rate_limit_rps: f64,
    pub rate_burst: f64,
    pub min_interval: Duration,
    pub jitter_fraction: f64,
    pub recv_window: Duration,
    pub request_timeout: Duration,
    pub breaker: BreakerSettings,
    pub execution: ExecutionSettings,
    pub pool_size: usize,
}

impl GatewayConfig {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            rate_limit_rps: 10.0,
            rate_burst: 10.0,
            min_interval: Duration::from_millis(50),
            jitter_fraction: 0.1,
            recv_window: Duration::from_millis(5000),
            request_timeout: Duration::from_secs(10),
            breaker: BreakerSettings::default(),
            execution: ExecutionSettings::default(),
            pool_size: 8,
        }
    }

    pub fn base_url(&self) -> &'static str {
        self.credentials.environment().base_url()
    }
}
