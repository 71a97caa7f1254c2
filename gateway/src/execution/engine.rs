//! Self-optimizing execution: order-type selection, smart limit entry, splitting, adaptive
//! slippage, retry with error-class awareness, and a feedback loop that shifts the volatility
//! threshold toward whichever order type is performing better.
//!
//! Retries are bounded and branch on the error class in [`crate::error`] rather than retrying
//! blindly or giving up on the first failure.

use std::sync::Arc;
use std::time::{Duration, Instant};

use domain::order::{OrderSide, OrderType, TimeInForce};
use domain::{MarketSnapshot, Order, OrderOutcome, Price};
use parking_lot::RwLock;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal_macros::dec;
use support::time::exponential_backoff;
use support::CancellationToken;

use crate::config::ExecutionSettings;
use crate::error::GatewayError;
use crate::execution::metrics::{ExecutionRecord, MetricsStore};
use crate::rest::client::RestClient;

const ASSESSMENT_BARS: u32 = 20;
const SMART_ENTRY_BARS: u32 = 10;
const SMART_ENTRY_MA_WINDOW: usize = 5;
const DEFAULT_VOLATILITY: f64 = 0.02;
const DEFAULT_VOLUME: f64 = 1_000_000.0;
const QUALITY_DIVERGENCE_THRESHOLD: f64 = 0.1;

struct AdaptiveState {
    theta_vol: f64,
    slippage_adaptation_factor: f64,
}

/// Ties together market assessment, order-type selection, splitting, retrying and the quality
/// feedback loop. One instance per traded account; holds a shared [`RestClient`] rather than
/// owning its own signer/governor/breaker.
pub struct ExecutionEngine {
    rest: Arc<RestClient>,
    config: ExecutionSettings,
    metrics: MetricsStore,
    adaptive: RwLock<AdaptiveState>,
}

impl ExecutionEngine {
    pub fn new(rest: Arc<RestClient>, config: ExecutionSettings) -> Self {
        let quality_window = config.quality_window;
        Self {
            rest,
            adaptive: RwLock::new(AdaptiveState {
                theta_vol: config.market_vol_threshold,
                slippage_adaptation_factor: 1.0,
            }),
            config,
            metrics: MetricsStore::new(quality_window),
        }
    }

    pub fn metrics(&self) -> &MetricsStore {
        &self.metrics
    }

    /// Single entry point: assesses the market, picks an order type, splits
    /// if the notional is large, submits with retry, and records the outcome for adaptation.
    ///
    /// `market` lets a caller that already holds a fresh [`MarketSnapshot`] (e.g. a strategy
    /// sitting on a live `MarketDataProvider` feed) skip the engine's own `getKlines`/24h-volume
    /// round trip; pass `None` to have the engine fetch it itself.
    ///
    /// Returns one `Result` per child order actually submitted, in submission order. A mid-split
    /// failure still returns `Ok` at the top level: the failing child's error takes its place in
    /// the vec and no further children are issued, so the caller sees exactly which children
    /// filled and which didn't rather than losing the failure behind a `log::warn!`. The top-level
    /// `Err` is reserved for the *first* child failing, since there's nothing to report alongside
    /// it.
    pub async fn execute(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Price,
        reference_price: Price,
        market: Option<&MarketSnapshot>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Result<OrderOutcome, GatewayError>>, GatewayError> {
        let (volatility, volume) = match market {
            Some(snapshot) => assess_from_snapshot(snapshot),
            None => self.assess_market(symbol, cancel).await,
        };
        let order_type = self.select_order_type(volatility, volume);

        let entry_price = if order_type == OrderType::Limit && self.config.enable_smart_entry {
            self.smart_entry_price(symbol, side, reference_price, volatility, cancel)
                .await
        } else {
            reference_price
        };

        let notional = quantity * entry_price;
        let child_orders = self.split(quantity, notional);

        let mut outcomes = Vec::with_capacity(child_orders.len());
        for (index, child_quantity) in child_orders.iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(self.config.split_interval).await;
            }
            let started_at = Instant::now();
            let outcome = self
                .submit_with_retry(symbol, side, *child_quantity, order_type, entry_price, cancel)
                .await;
            match outcome {
                Ok(outcome) => {
                    self.record_and_adapt(symbol, order_type, reference_price, &outcome, volatility, volume, started_at);
                    outcomes.push(Ok(outcome));
                }
                Err(err) => {
                    if outcomes.is_empty() {
                        return Err(err);
                    }
                    log::warn!(target: "gateway::execution", "child order {index} failed, aborting remaining splits: {err}");
                    outcomes.push(Err(err));
                    break;
                }
            }
        }
        Ok(outcomes)
    }

    async fn assess_market(&self, symbol: &str, cancel: &CancellationToken) -> (f64, f64) {
        let closes = self
            .rest
            .get_klines(symbol, "5m", ASSESSMENT_BARS, cancel)
            .await
            .map(|klines| klines.iter().filter_map(|k| k.close.to_f64()).collect::<Vec<_>>());
        let volatility = closes.ok().filter(|c| !c.is_empty()).map(|c| stddev_over_mean(&c)).unwrap_or(DEFAULT_VOLATILITY);

        let volume = self
            .rest
            .get_24h_quote_volume(symbol, cancel)
            .await
            .ok()
            .and_then(|v| v.to_f64())
            .unwrap_or(DEFAULT_VOLUME);

        (volatility, volume)
    }

    fn select_order_type(&self, volatility: f64, volume: f64) -> OrderType {
        if !self.config.use_smart_order_type {
            return OrderType::Market;
        }
        let theta_vol = self.adaptive.read().theta_vol;
        if volatility > theta_vol && volume < 5_000_000.0 {
            OrderType::Limit
        } else if volatility < theta_vol && volume > 10_000_000.0 {
            OrderType::Market
        } else if self.config.prefer_limit_for_fees {
            OrderType::Limit
        } else {
            OrderType::Market
        }
    }

    async fn smart_entry_price(
        &self,
        symbol: &str,
        side: OrderSide,
        price: Price,
        volatility: f64,
        cancel: &CancellationToken,
    ) -> Price {
        let klines = match self.rest.get_klines(symbol, "1m", SMART_ENTRY_BARS, cancel).await {
            Ok(klines) => klines,
            Err(_) => return price,
        };
        let recent: Vec<Price> = klines
            .iter()
            .rev()
            .take(SMART_ENTRY_MA_WINDOW)
            .map(|k| k.close)
            .collect();
        if recent.is_empty() {
            return price;
        }
        let moving_average = recent.iter().sum::<Price>() / Price::from(recent.len() as u64);

        let quality = price_quality(side, price, moving_average);
        if quality >= 0.7 {
            return price;
        }

        let shift = Price::from_f64_retain(volatility / 2.0).unwrap_or(dec!(0.01));
        match side {
            OrderSide::Buy => price * (Price::ONE - shift),
            OrderSide::Sell => price * (Price::ONE + shift),
        }
    }

    fn split(&self, quantity: Price, notional: Price) -> Vec<Price> {
        if notional <= self.config.max_split_size || self.config.max_split_size.is_zero() {
            return vec![quantity];
        }
        let ratio = (notional / self.config.max_split_size)
            .ceil()
            .to_u64()
            .unwrap_or(1)
            .max(2);
        let child_quantity = quantity / Price::from(ratio);
        let mut children = vec![child_quantity; ratio as usize - 1];
        let accounted: Price = child_quantity * Price::from(ratio - 1);
        children.push(quantity - accounted);
        children
    }

    async fn submit_with_retry(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Price,
        order_type: OrderType,
        entry_price: Price,
        cancel: &CancellationToken,
    ) -> Result<OrderOutcome, GatewayError> {
        let mut attempt = 0;
        let mut price = entry_price;
        loop {
            let order = self.build_order(symbol, side, quantity, order_type, price, cancel).await;
            match self.rest.create_order(&order, cancel).await {
                Ok(outcome) => return Ok(outcome),
                Err(err) => {
                    if let GatewayError::ClientError { ref remedy, .. } = err {
                        if remedy.contains("precision") {
                            let _ = self.rest.refresh_symbol_info(symbol, cancel).await;
                        }
                    }
                    if attempt >= self.config.max_retries || !err.is_retryable() {
                        return Err(err);
                    }
                    attempt += 1;
                    if order_type == OrderType::Limit {
                        price = concede_price(side, price, self.config.base_slippage_tolerance * attempt as f64);
                    }
                    let delay = exponential_backoff(
                        self.config.base_retry_delay,
                        attempt,
                        Duration::from_secs(30),
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => return Err(GatewayError::Canceled),
                    }
                }
            }
        }
    }

    /// Formats quantity and price to the symbol's declared precision using the most recently
    /// cached `getExchangeInfo` snapshot before transmission. Falls back to the unrounded values
    /// if the snapshot can't be fetched.
    async fn build_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Price,
        order_type: OrderType,
        price: Price,
        cancel: &CancellationToken,
    ) -> Order {
        let symbol_info = self.rest.get_symbol_info(symbol, cancel).await.ok();
        let rounded_quantity = symbol_info
            .as_ref()
            .map(|info| info.round_quantity(quantity, domain::symbol::Round::Floor))
            .unwrap_or(quantity);

        match order_type {
            OrderType::Limit => {
                let buffer = self.config.base_slippage_tolerance * self.adaptive.read().slippage_adaptation_factor;
                let widened = widen_for_fill(side, price, buffer);
                let rounded_price = symbol_info
                    .as_ref()
                    .map(|info| info.round_price(widened, domain::symbol::Round::ToNearest))
                    .unwrap_or(widened);
                Order::limit(symbol, side, rounded_quantity, rounded_price, TimeInForce::Gtc)
            }
            _ => Order::market(symbol, side, rounded_quantity),
        }
    }

    fn record_and_adapt(
        &self,
        symbol: &str,
        order_type: OrderType,
        reference_price: Price,
        outcome: &OrderOutcome,
        volatility: f64,
        volume: f64,
        started_at: Instant,
    ) {
        let slippage = if reference_price.is_zero() || outcome.avg_fill_price.is_zero() {
            0.0
        } else {
            ((outcome.avg_fill_price - reference_price).abs() / reference_price)
                .to_f64()
                .unwrap_or(0.0)
        };
        let fill_latency = started_at.elapsed();
        let quality_score = quality_score(slippage, fill_latency, self.config.max_slippage_tolerance);

        self.metrics.record(ExecutionRecord {
            symbol: symbol.to_string(),
            order_type,
            slippage,
            fill_latency,
            quality_score,
            volatility,
            volume,
            success: matches!(outcome.status, domain::OrderStatus::Filled | domain::OrderStatus::PartiallyFilled),
            cause: None,
        });

        self.adapt_slippage_buffer(slippage);
        self.adapt_theta_vol();
    }

    fn adapt_slippage_buffer(&self, latest_slippage: f64) {
        let recent_avg = self.metrics.recent_slippage_avg(self.config.quality_window).unwrap_or(latest_slippage);
        let mut adaptive = self.adaptive.write();
        if recent_avg > 2.0 * self.config.base_slippage_tolerance {
            adaptive.slippage_adaptation_factor =
                (adaptive.slippage_adaptation_factor + self.config.adaptation_rate).min(
                    self.config.max_slippage_tolerance / self.config.base_slippage_tolerance.max(f64::EPSILON),
                );
        } else if recent_avg < 0.5 * self.config.base_slippage_tolerance {
            adaptive.slippage_adaptation_factor = (adaptive.slippage_adaptation_factor - self.config.adaptation_rate).max(1.0);
        }
    }

    fn adapt_theta_vol(&self) {
        let window = self.config.quality_window;
        let market_quality = self.metrics.avg_quality_for(OrderType::Market, window);
        let limit_quality = self.metrics.avg_quality_for(OrderType::Limit, window);
        let (market_quality, limit_quality) = match (market_quality, limit_quality) {
            (Some(m), Some(l)) => (m, l),
            _ => return,
        };

        let divergence = (market_quality - limit_quality).abs();
        if divergence <= QUALITY_DIVERGENCE_THRESHOLD {
            return;
        }

        let mut adaptive = self.adaptive.write();
        if market_quality > limit_quality {
            adaptive.theta_vol *= 1.1;
        } else {
            adaptive.theta_vol *= 0.9;
        }
        drop(adaptive);
        self.metrics.mark_adaptation();
    }
}

/// Derives `(volatility, volume)` straight from a caller-supplied snapshot instead of hitting
/// `getKlines`/24h-volume, falling back to the same defaults `assess_market` uses when the
/// snapshot is thin (no recent closes, zero volume).
fn assess_from_snapshot(snapshot: &MarketSnapshot) -> (f64, f64) {
    let closes: Vec<f64> = snapshot.recent_closes.iter().filter_map(|c| c.to_f64()).collect();
    let volatility = if closes.is_empty() { DEFAULT_VOLATILITY } else { stddev_over_mean(&closes) };
    let volume = snapshot.quote_volume.to_f64().filter(|v| *v > 0.0).unwrap_or(DEFAULT_VOLUME);
    (volatility, volume)
}

fn stddev_over_mean(values: &[f64]) -> f64 {
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    if mean == 0.0 {
        return DEFAULT_VOLATILITY;
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt() / mean
}

/// `q ∈ [0,1]`: how favorably `price` sits relative to the moving average `m` for the given side.
fn price_quality(side: OrderSide, price: Price, moving_average: Price) -> f64 {
    let m = moving_average.to_f64().unwrap_or(1.0);
    let p = price.to_f64().unwrap_or(1.0);
    if m == 0.0 {
        return 1.0;
    }
    let raw = match side {
        OrderSide::Buy => {
            if p < m {
                0.5 + (m - p) / m
            } else {
                0.5 - (p - m) / m
            }
        }
        OrderSide::Sell => {
            if p > m {
                0.5 + (p - m) / m
            } else {
                0.5 - (m - p) / m
            }
        }
    };
    raw.clamp(0.0, 1.0)
}

fn widen_for_fill(side: OrderSide, price: Price, buffer: f64) -> Price {
    let factor = Price::from_f64_retain(buffer).unwrap_or(Price::ZERO);
    match side {
        OrderSide::Buy => price * (Price::ONE + factor),
        OrderSide::Sell => price * (Price::ONE - factor),
    }
}

fn concede_price(side: OrderSide, price: Price, buffer: f64) -> Price {
    widen_for_fill(side, price, buffer)
}

fn quality_score(slippage: f64, fill_latency: Duration, max_tolerance: f64) -> f64 {
    let slippage_component = 1.0 - (slippage / max_tolerance.max(f64::EPSILON)).min(1.0);
    let latency_component = 1.0 - (fill_latency.as_secs_f64() / 5.0).min(1.0);
    0.7 * slippage_component + 0.3 * latency_component
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;
    use crate::rest::client::RestClient;
    use crate::testing::FakeTransport;
    use domain::{Credentials, Environment};

    fn engine_with(transport: Arc<FakeTransport>, execution: ExecutionSettings) -> ExecutionEngine {
        let credentials = Credentials::new("key", "secret", Environment::Testnet);
        let mut config = GatewayConfig::new(credentials);
        config.execution = execution.clone();
        let rest = Arc::new(RestClient::with_transport(config, transport));
        ExecutionEngine::new(rest, execution)
    }

    fn flat_snapshot() -> MarketSnapshot {
        MarketSnapshot {
            symbol: "BTCUSDT".to_string(),
            last_price: dec!(100),
            recent_closes: vec![dec!(100), dec!(100), dec!(100)],
            quote_volume: dec!(2_500_000),
        }
    }

    #[tokio::test]
    async fn execute_splits_and_submits_every_child_in_order() {
        let transport = Arc::new(FakeTransport::new());
        transport.push(200, r#"{"symbols":[{"symbol":"BTCUSDT","pricePrecision":2,"quantityPrecision":2}]}"#);
        for order_id in 1..=3u64 {
            transport.push(
                200,
                format!(r#"{{"orderId":{order_id},"status":"FILLED","avgPrice":"100","executedQty":"1","updateTime":1700000000000}}"#),
            );
        }

        let mut execution = ExecutionSettings::default();
        execution.use_smart_order_type = false;
        execution.enable_smart_entry = false;
        execution.max_split_size = dec!(50);
        execution.split_interval = Duration::ZERO;
        let engine = engine_with(transport.clone(), execution);
        let snapshot = flat_snapshot();
        let cancel = CancellationToken::new();

        let outcomes = engine
            .execute("BTCUSDT", OrderSide::Buy, dec!(3), dec!(40), Some(&snapshot), &cancel)
            .await
            .unwrap();

        assert_eq!(outcomes.len(), 3);
        assert!(outcomes.iter().all(|o| o.is_ok()));
        assert_eq!(outcomes[0].as_ref().unwrap().order_id, 1);
        assert_eq!(outcomes[2].as_ref().unwrap().order_id, 3);
    }

    #[tokio::test]
    async fn execute_reports_a_mid_split_failure_without_issuing_the_remaining_child() {
        let transport = Arc::new(FakeTransport::new());
        transport.push(200, r#"{"symbols":[{"symbol":"BTCUSDT","pricePrecision":2,"quantityPrecision":2}]}"#);
        transport.push(
            200,
            r#"{"orderId":1,"status":"FILLED","avgPrice":"100","executedQty":"1","updateTime":1700000000000}"#,
        );
        transport.push(400, r#"{"code":-2019,"msg":"Margin is insufficient."}"#);

        let mut execution = ExecutionSettings::default();
        execution.use_smart_order_type = false;
        execution.enable_smart_entry = false;
        execution.max_split_size = dec!(50);
        execution.split_interval = Duration::ZERO;
        let engine = engine_with(transport.clone(), execution);
        let snapshot = flat_snapshot();
        let cancel = CancellationToken::new();

        let outcomes = engine
            .execute("BTCUSDT", OrderSide::Buy, dec!(3), dec!(40), Some(&snapshot), &cancel)
            .await
            .unwrap();

        assert_eq!(outcomes.len(), 2, "child 3 must not be issued after child 2 fails");
        assert!(outcomes[0].is_ok());
        assert!(matches!(outcomes[1], Err(GatewayError::InsufficientFunds { .. })));
        assert_eq!(transport.calls(), 3, "exchangeInfo + 2 create_order calls, third child never sent");
    }

    #[test]
    fn price_quality_is_high_when_buy_price_below_average() {
        let quality = price_quality(OrderSide::Buy, dec!(95), dec!(100));
        assert!(quality > 0.9);
    }

    #[test]
    fn price_quality_is_low_when_buy_price_above_average() {
        let quality = price_quality(OrderSide::Buy, dec!(110), dec!(100));
        assert!(quality < 0.5);
    }

    #[test]
    fn quality_score_penalizes_slippage_and_latency() {
        let perfect = quality_score(0.0, Duration::ZERO, 0.005);
        let worse = quality_score(0.005, Duration::from_secs(5), 0.005);
        assert!((perfect - 1.0).abs() < 1e-9);
        assert!(worse < perfect);
    }

    #[test]
    fn assess_from_snapshot_uses_closes_and_volume() {
        let snapshot = MarketSnapshot {
            symbol: "BTCUSDT".to_string(),
            last_price: dec!(100),
            recent_closes: vec![dec!(98), dec!(100), dec!(102)],
            quote_volume: dec!(2_500_000),
        };
        let (volatility, volume) = assess_from_snapshot(&snapshot);
        assert!(volatility > 0.0);
        assert!((volume - 2_500_000.0).abs() < 1e-6);
    }

    #[test]
    fn assess_from_snapshot_falls_back_on_empty_closes() {
        let snapshot = MarketSnapshot::empty("BTCUSDT");
        let (volatility, volume) = assess_from_snapshot(&snapshot);
        assert_eq!(volatility, DEFAULT_VOLATILITY);
        assert_eq!(volume, DEFAULT_VOLUME);
    }

    #[test]
    fn stddev_over_mean_is_zero_for_flat_series() {
        let closes = vec![100.0, 100.0, 100.0];
        assert!(stddev_over_mean(&closes) < 1e-9);
    }

    #[test]
    fn widen_for_fill_moves_buy_price_up_and_sell_price_down() {
        let bought = widen_for_fill(OrderSide::Buy, dec!(100), 0.01);
        let sold = widen_for_fill(OrderSide::Sell, dec!(100), 0.01);
        assert!(bought > dec!(100));
        assert!(sold < dec!(100));
    }
}
