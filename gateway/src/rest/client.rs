//! Signed REST operations: every public method runs the same pipeline —
//! `acquire -> permit -> signed-send -> classify -> record` — against a single exchange.

use std::sync::Arc;
use std::time::Duration;

use domain::order::OrderSide;
use domain::{Order, OrderOutcome, Position, SymbolInfo};
use hyper::Method;
use rust_decimal::Decimal;
use serde_json::Value;
use support::numeric::DecimalFieldError;
use support::CancellationToken;

use crate::cache::RequestCache;
use crate::circuit_breaker::{BreakerSnapshot, CircuitBreaker};
use crate::config::GatewayConfig;
use crate::error::{classify, classify_unparseable, GatewayError, RemoteError};
use crate::rate_governor::RateGovernor;
use crate::rest::transport::{HttpTransport, HyperTransport};
use crate::rest::wire;
use crate::signer::Signer;

const ORDER_CACHE_TTL: Duration = Duration::from_secs(5);
const SYMBOL_CACHE_TTL: Duration = Duration::from_secs(5);

impl From<DecimalFieldError> for GatewayError {
    fn from(err: DecimalFieldError) -> Self {
        GatewayError::Unknown {
            code: None,
            message: err.to_string(),
        }
    }
}

/// The hardened signed REST client. One instance is shared (via `Arc`) across every task in the
/// process for a given environment, so its rate governor and breaker see every request.
pub struct RestClient {
    config: GatewayConfig,
    signer: Signer,
    governor: RateGovernor,
    breaker: CircuitBreaker,
    order_cache: RequestCache<(String, u64), OrderOutcome>,
    symbol_cache: RequestCache<String, SymbolInfo>,
    transport: Arc<dyn HttpTransport>,
}

impl RestClient {
    pub fn new(config: GatewayConfig) -> Self {
        let transport = Arc::new(HyperTransport::new(config.pool_size));
        Self::with_transport(config, transport)
    }

    pub fn with_transport(config: GatewayConfig, transport: Arc<dyn HttpTransport>) -> Self {
        let breaker = CircuitBreaker::new(crate::circuit_breaker::BreakerConfig {
            failure_threshold: config.breaker.failure_threshold,
            success_threshold: config.breaker.success_threshold,
            open_timeout: config.breaker.open_timeout,
            half_open_permits: config.breaker.half_open_permits,
        });
        let governor = RateGovernor::new(
            config.rate_limit_rps,
            config.rate_burst,
            config.min_interval,
            config.jitter_fraction,
        );
        let signer = Signer::new(config.credentials.api_secret().to_string());
        Self {
            config,
            signer,
            governor,
            breaker,
            order_cache: RequestCache::new(ORDER_CACHE_TTL),
            symbol_cache: RequestCache::new(SYMBOL_CACHE_TTL),
            transport,
        }
    }

    pub fn breaker_snapshot(&self) -> BreakerSnapshot {
        self.breaker.snapshot()
    }

    fn api_key(&self) -> &str {
        self.config.credentials.api_key()
    }

    /// Runs one request through the full pipeline: governor -> breaker -> (sign) -> send ->
    /// classify -> record. `signed` requests get `timestamp`/`recvWindow`/`signature` appended;
    /// unsigned requests (market data) skip the credentials entirely.
    async fn request(
        &self,
        method: Method,
        path: &str,
        mut params: Vec<(String, String)>,
        signed: bool,
        cancel: &CancellationToken,
    ) -> Result<Value, GatewayError> {
        self.governor
            .acquire(cancel)
            .await
            .map_err(|_| GatewayError::Canceled)?;

        if !self.breaker.permit() {
            log::warn!(target: "gateway::rest", "breaker open, refusing {method} {path}");
            return Err(GatewayError::BreakerOpen);
        }

        if signed {
            let timestamp = support::time::current_millis()
                + support::time::jitter(Duration::from_millis(100)).as_millis() as u64;
            params.push(("timestamp".into(), timestamp.to_string()));
            params.push((
                "recvWindow".into(),
                self.config.recv_window.as_millis().to_string(),
            ));
        }

        let query = build_query(&params);
        let mut headers = vec![];
        if signed {
            let signature = self.signer.sign(&query);
            headers.push(("X-MBX-APIKEY".to_string(), self.api_key().to_string()));
            let (uri, body) = match &method {
                &Method::POST | &Method::PUT => {
                    headers.push((
                        "Content-Type".to_string(),
                        "application/x-www-form-urlencoded".to_string(),
                    ));
                    (
                        format!("{}{}", self.config.base_url(), path),
                        Some(format!("{query}&signature={signature}")),
                    )
                }
                _ => (
                    format!("{}{}?{}&signature={}", self.config.base_url(), path, query, signature),
                    None,
                ),
            };
            self.send_and_classify(method, uri, body, headers).await
        } else {
            let uri = if query.is_empty() {
                format!("{}{}", self.config.base_url(), path)
            } else {
                format!("{}{}?{}", self.config.base_url(), path, query)
            };
            self.send_and_classify(method, uri, None, headers).await
        }
    }

    async fn send_and_classify(
        &self,
        method: Method,
        uri: String,
        body: Option<String>,
        headers: Vec<(String, String)>,
    ) -> Result<Value, GatewayError> {
        let response = match self.transport.send(method, uri, body, headers).await {
            Ok(response) => response,
            Err(err) => {
                log::warn!(target: "gateway::rest", "transport error: {err}");
                let classified = GatewayError::Transient {
                    message: err.to_string(),
                };
                self.breaker.record_failure();
                return Err(classified);
            }
        };

        if (200..300).contains(&response.status) {
            match serde_json::from_str::<Value>(&response.body) {
                Ok(value) => {
                    self.breaker.record_success();
                    Ok(value)
                }
                Err(_) => {
                    let classified = classify_unparseable(&response.body);
                    log::error!(target: "gateway::rest", "unparseable 2xx body: {classified}");
                    self.breaker.record_failure();
                    Err(classified)
                }
            }
        } else {
            let classified = parse_remote_error(response.status, &response.body);
            log::warn!(target: "gateway::rest", "classified error: {classified}");
            if classified.affects_breaker() {
                self.breaker.record_failure();
            }
            Err(classified)
        }
    }

    // ---- market data (unsigned) ----

    pub async fn get_exchange_info(&self, cancel: &CancellationToken) -> Result<Value, GatewayError> {
        self.request(Method::GET, "/fapi/v1/exchangeInfo", vec![], false, cancel)
            .await
    }

    pub async fn get_symbol_info(
        &self,
        symbol: &str,
        cancel: &CancellationToken,
    ) -> Result<SymbolInfo, GatewayError> {
        if let Some(cached) = self.symbol_cache.get(&symbol.to_string()) {
            return Ok(cached);
        }
        let info = self.get_exchange_info(cancel).await?;
        let symbols = info.get("symbols").and_then(Value::as_array).cloned().unwrap_or_default();
        let raw = symbols
            .iter()
            .find(|s| s.get("symbol").and_then(Value::as_str) == Some(symbol))
            .ok_or_else(|| GatewayError::ClientError {
                code: -1121,
                message: format!("symbol {symbol} not found"),
                remedy: "check the symbol name against getExchangeInfo".to_string(),
            })?;
        let parsed = wire::parse_symbol_info(raw)?;
        self.symbol_cache.insert(symbol.to_string(), parsed.clone());
        Ok(parsed)
    }

    /// Forces a refresh of the cached symbol precision, used after a precision-flavored
    /// `ClientError`.
    pub async fn refresh_symbol_info(
        &self,
        symbol: &str,
        cancel: &CancellationToken,
    ) -> Result<SymbolInfo, GatewayError> {
        self.symbol_cache.invalidate(&symbol.to_string());
        self.get_symbol_info(symbol, cancel).await
    }

    pub async fn get_price(&self, symbol: &str, cancel: &CancellationToken) -> Result<Decimal, GatewayError> {
        let value = self
            .request(
                Method::GET,
                "/fapi/v1/ticker/price",
                vec![("symbol".into(), symbol.to_string())],
                false,
                cancel,
            )
            .await?;
        Ok(support::numeric::decimal_field(&value, "price")?)
    }

    pub async fn get_mark_price(&self, symbol: &str, cancel: &CancellationToken) -> Result<Decimal, GatewayError> {
        let value = self
            .request(
                Method::GET,
                "/fapi/v1/premiumIndex",
                vec![("symbol".into(), symbol.to_string())],
                false,
                cancel,
            )
            .await?;
        Ok(support::numeric::decimal_field(&value, "markPrice")?)
    }

    pub async fn get_funding_rate(&self, symbol: &str, cancel: &CancellationToken) -> Result<Decimal, GatewayError> {
        let value = self
            .request(
                Method::GET,
                "/fapi/v1/premiumIndex",
                vec![("symbol".into(), symbol.to_string())],
                false,
                cancel,
            )
            .await?;
        Ok(support::numeric::decimal_field(&value, "lastFundingRate")?)
    }

    pub async fn get_24h_quote_volume(
        &self,
        symbol: &str,
        cancel: &CancellationToken,
    ) -> Result<Decimal, GatewayError> {
        let value = self
            .request(
                Method::GET,
                "/fapi/v1/ticker/24hr",
                vec![("symbol".into(), symbol.to_string())],
                false,
                cancel,
            )
            .await?;
        Ok(support::numeric::decimal_field(&value, "quoteVolume")?)
    }

    pub async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
        cancel: &CancellationToken,
    ) -> Result<Vec<wire::Kline>, GatewayError> {
        let value = self
            .request(
                Method::GET,
                "/fapi/v1/klines",
                vec![
                    ("symbol".into(), symbol.to_string()),
                    ("interval".into(), interval.to_string()),
                    ("limit".into(), limit.to_string()),
                ],
                false,
                cancel,
            )
            .await?;
        Ok(wire::parse_klines(&value)?)
    }

    // ---- trading (signed) ----

    pub async fn create_order(
        &self,
        order: &Order,
        cancel: &CancellationToken,
    ) -> Result<OrderOutcome, GatewayError> {
        order
            .validate()
            .map_err(|err| GatewayError::ClientError {
                code: -1102,
                message: err.to_string(),
                remedy: "amend the order before resubmitting".to_string(),
            })?;

        let mut params = vec![
            ("symbol".into(), order.symbol.clone()),
            ("side".into(), side_param(order.side).to_string()),
            ("type".into(), order_type_param(order.order_type).to_string()),
            ("quantity".into(), order.quantity.to_string()),
        ];
        if let Some(price) = order.price {
            params.push(("price".into(), price.to_string()));
        }
        if let Some(stop_price) = order.stop_price {
            params.push(("stopPrice".into(), stop_price.to_string()));
        }
        if let Some(time_in_force) = order.time_in_force {
            params.push((
                "timeInForce".into(),
                time_in_force_param(time_in_force).to_string(),
            ));
        }
        if order.reduce_only {
            params.push(("reduceOnly".into(), "true".to_string()));
        }
        if order.close_position {
            params.push(("closePosition".into(), "true".to_string()));
        }
        if let Some(position_side) = order.position_side {
            params.push((
                "positionSide".into(),
                position_side_param(position_side).to_string(),
            ));
        }

        let value = self
            .request(Method::POST, "/fapi/v1/order", params, true, cancel)
            .await?;
        Ok(wire::parse_order_outcome(&value)?)
    }

    pub async fn cancel_order(
        &self,
        symbol: &str,
        order_id: u64,
        cancel: &CancellationToken,
    ) -> Result<OrderOutcome, GatewayError> {
        let value = self
            .request(
                Method::DELETE,
                "/fapi/v1/order",
                vec![
                    ("symbol".into(), symbol.to_string()),
                    ("orderId".into(), order_id.to_string()),
                ],
                true,
                cancel,
            )
            .await?;
        let outcome = wire::parse_order_outcome(&value)?;
        self.order_cache.invalidate(&(symbol.to_string(), order_id));
        Ok(outcome)
    }

    /// Cacheable: repeated lookups within `ORDER_CACHE_TTL` reuse the last fetched outcome;
    /// `create_order`/`cancel_order` never write to this cache, only invalidate.
    pub async fn get_order(
        &self,
        symbol: &str,
        order_id: u64,
        cancel: &CancellationToken,
    ) -> Result<OrderOutcome, GatewayError> {
        let key = (symbol.to_string(), order_id);
        if let Some(cached) = self.order_cache.get(&key) {
            return Ok(cached);
        }
        let value = self
            .request(
                Method::GET,
                "/fapi/v1/order",
                vec![
                    ("symbol".into(), symbol.to_string()),
                    ("orderId".into(), order_id.to_string()),
                ],
                true,
                cancel,
            )
            .await?;
        let outcome = wire::parse_order_outcome(&value)?;
        self.order_cache.insert(key, outcome.clone());
        Ok(outcome)
    }

    pub async fn get_positions(&self, cancel: &CancellationToken) -> Result<Vec<Position>, GatewayError> {
        let value = self
            .request(Method::GET, "/fapi/v2/positionRisk", vec![], true, cancel)
            .await?;
        let rows = value.as_array().cloned().unwrap_or_default();
        let positions = rows
            .iter()
            .map(wire::parse_position)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(positions.into_iter().filter(Position::is_active).collect())
    }

    pub async fn get_position(
        &self,
        symbol: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<Position>, GatewayError> {
        let value = self
            .request(
                Method::GET,
                "/fapi/v2/positionRisk",
                vec![("symbol".into(), symbol.to_string())],
                true,
                cancel,
            )
            .await?;
        let rows = value.as_array().cloned().unwrap_or_default();
        let positions = rows
            .iter()
            .map(wire::parse_position)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(positions.into_iter().find(Position::is_active))
    }

    /// Reads the current position and synthesizes a reduce-only market order with the inverted
    /// side.
    pub async fn close_position(
        &self,
        symbol: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<OrderOutcome>, GatewayError> {
        let Some(position) = self.get_position(symbol, cancel).await? else {
            return Ok(None);
        };
        let closing_side = if position.size.is_sign_positive() {
            OrderSide::Sell
        } else {
            OrderSide::Buy
        };
        let mut order = Order::market(symbol, closing_side, position.size.abs());
        order.reduce_only = true;
        let outcome = self.create_order(&order, cancel).await?;
        Ok(Some(outcome))
    }

    pub async fn get_balance(&self, cancel: &CancellationToken) -> Result<Decimal, GatewayError> {
        let value = self
            .request(Method::GET, "/fapi/v2/balance", vec![], true, cancel)
            .await?;
        Ok(wire::parse_usdt_balance(&value)?)
    }

    pub async fn set_leverage(
        &self,
        symbol: &str,
        leverage: u32,
        cancel: &CancellationToken,
    ) -> Result<(), GatewayError> {
        self.request(
            Method::POST,
            "/fapi/v1/leverage",
            vec![
                ("symbol".into(), symbol.to_string()),
                ("leverage".into(), leverage.to_string()),
            ],
            true,
            cancel,
        )
        .await?;
        Ok(())
    }

    pub async fn set_margin_type(
        &self,
        symbol: &str,
        margin_mode: domain::MarginMode,
        cancel: &CancellationToken,
    ) -> Result<(), GatewayError> {
        let margin_type = match margin_mode {
            domain::MarginMode::Isolated => "ISOLATED",
            domain::MarginMode::Cross => "CROSSED",
        };
        self.request(
            Method::POST,
            "/fapi/v1/marginType",
            vec![
                ("symbol".into(), symbol.to_string()),
                ("marginType".into(), margin_type.to_string()),
            ],
            true,
            cancel,
        )
        .await?;
        Ok(())
    }

    pub async fn set_position_mode(
        &self,
        hedge_mode: bool,
        cancel: &CancellationToken,
    ) -> Result<(), GatewayError> {
        self.request(
            Method::POST,
            "/fapi/v1/positionSide/dual",
            vec![("dualSidePosition".into(), hedge_mode.to_string())],
            true,
            cancel,
        )
        .await?;
        Ok(())
    }

    pub async fn get_position_mode(&self, cancel: &CancellationToken) -> Result<bool, GatewayError> {
        let value = self
            .request(Method::GET, "/fapi/v1/positionSide/dual", vec![], true, cancel)
            .await?;
        Ok(value
            .get("dualSidePosition")
            .and_then(Value::as_bool)
            .unwrap_or(false))
    }

    // ---- user-data stream support ----

    pub async fn create_listen_key(&self, cancel: &CancellationToken) -> Result<String, GatewayError> {
        let value = self
            .request(Method::POST, "/fapi/v1/listenKey", vec![], true, cancel)
            .await?;
        Ok(value
            .get("listenKey")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }

    /// Performs the actual keep-alive PUT that keeps a user-data stream's `listenKey` from
    /// expiring; a stream that never calls this gets disconnected by the remote after an hour.
    pub async fn refresh_listen_key(&self, cancel: &CancellationToken) -> Result<(), GatewayError> {
        self.request(Method::PUT, "/fapi/v1/listenKey", vec![], true, cancel)
            .await?;
        Ok(())
    }
}

fn build_query(params: &[(String, String)]) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in params {
        serializer.append_pair(key, value);
    }
    serializer.finish()
}

fn parse_remote_error(status: u16, body: &str) -> GatewayError {
    match serde_json::from_str::<Value>(body) {
        Ok(value) => {
            let code = value.get("code").and_then(Value::as_i64);
            let message = value
                .get("msg")
                .and_then(Value::as_str)
                .unwrap_or(body)
                .to_string();
            match code {
                Some(code) => classify(&RemoteError { code, message }),
                None if status == 429 => GatewayError::RateLimited { message },
                None if status == 401 => GatewayError::AuthFailure { message },
                None => GatewayError::Unknown {
                    code: None,
                    message,
                },
            }
        }
        Err(_) => classify_unparseable(body),
    }
}

fn side_param(side: OrderSide) -> &'static str {
    match side {
        OrderSide::Buy => "BUY",
        OrderSide::Sell => "SELL",
    }
}

fn order_type_param(order_type: domain::order::OrderType) -> &'static str {
    use domain::order::OrderType::*;
    match order_type {
        Market => "MARKET",
        Limit => "LIMIT",
        StopMarket => "STOP_MARKET",
        StopLimit => "STOP",
    }
}

fn time_in_force_param(tif: domain::order::TimeInForce) -> &'static str {
    use domain::order::TimeInForce::*;
    match tif {
        Gtc => "GTC",
        Ioc => "IOC",
        Fok => "FOK",
    }
}

fn position_side_param(side: domain::order::PositionSide) -> &'static str {
    use domain::order::PositionSide::*;
    match side {
        Long => "LONG",
        Short => "SHORT",
        Both => "BOTH",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeTransport;
    use domain::{Credentials, Environment};
    use rust_decimal_macros::dec;

    fn client_with(transport: Arc<FakeTransport>) -> RestClient {
        let credentials = Credentials::new("key", "secret", Environment::Testnet);
        RestClient::with_transport(GatewayConfig::new(credentials), transport)
    }

    #[tokio::test]
    async fn invalid_order_never_reaches_the_transport() {
        let transport = Arc::new(FakeTransport::new());
        let client = client_with(transport.clone());
        let order = Order::market("BTCUSDT", OrderSide::Buy, dec!(0));
        let cancel = CancellationToken::new();

        let err = client.create_order(&order, &cancel).await.unwrap_err();
        assert!(matches!(err, GatewayError::ClientError { .. }));
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn create_order_round_trip_parses_outcome() {
        let transport = Arc::new(FakeTransport::new());
        transport.push(
            200,
            r#"{"orderId":42,"status":"NEW","avgPrice":"0","executedQty":"0","updateTime":1700000000000}"#,
        );
        let client = client_with(transport.clone());
        let order = Order::market("BTCUSDT", OrderSide::Buy, dec!(1));
        let cancel = CancellationToken::new();

        let outcome = client.create_order(&order, &cancel).await.unwrap();
        assert_eq!(outcome.order_id, 42);
        assert_eq!(outcome.status, domain::OrderStatus::New);
    }

    #[tokio::test]
    async fn get_order_caches_the_first_response() {
        let transport = Arc::new(FakeTransport::new());
        transport.push(
            200,
            r#"{"orderId":7,"status":"FILLED","avgPrice":"100","executedQty":"1","updateTime":1700000000000}"#,
        );
        let client = client_with(transport.clone());
        let cancel = CancellationToken::new();

        let first = client.get_order("BTCUSDT", 7, &cancel).await.unwrap();
        let second = client.get_order("BTCUSDT", 7, &cancel).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(transport.calls(), 1, "second lookup must be served from cache");
    }

    #[tokio::test]
    async fn repeated_transient_errors_trip_the_breaker() {
        let transport = Arc::new(FakeTransport::new());
        for _ in 0..5 {
            transport.push(500, r#"{"code":-1001,"msg":"Internal error."}"#);
        }
        let client = client_with(transport.clone());
        let cancel = CancellationToken::new();

        for _ in 0..5 {
            let err = client.get_balance(&cancel).await.unwrap_err();
            assert!(matches!(err, GatewayError::Transient { .. }));
        }

        let err = client.get_balance(&cancel).await.unwrap_err();
        assert!(matches!(err, GatewayError::BreakerOpen));
        assert_eq!(transport.calls(), 5, "breaker must refuse without calling the transport");
    }

    #[tokio::test]
    async fn cancellation_short_circuits_before_any_send() {
        let transport = Arc::new(FakeTransport::new());
        let client = client_with(transport.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = client.get_balance(&cancel).await.unwrap_err();
        assert_eq!(err, GatewayError::Canceled);
        assert_eq!(transport.calls(), 0);
    }
}
