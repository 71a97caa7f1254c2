//! Typed stream payloads, one fixed sum type per topic: a `StreamMultiplexer` consumer always
//! knows exactly what it receives, rather than downcasting a dynamically-typed channel value.

use chrono::{DateTime, TimeZone, Utc};
use domain::{Amount, OrderOutcome, Position, Price};
use rust_decimal::Decimal;
use serde_json::Value;
use support::numeric::{decimal_field, u64_field, DecimalFieldError};

use crate::rest::wire::{parse_order_outcome, parse_order_status, parse_position};

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBookUpdate {
    pub symbol: String,
    pub bids: Vec<(Price, Amount)>,
    pub asks: Vec<(Price, Amount)>,
    pub event_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TradeUpdate {
    pub symbol: String,
    pub price: Price,
    pub quantity: Amount,
    pub is_buyer_maker: bool,
    pub trade_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarkPriceUpdate {
    pub symbol: String,
    pub mark_price: Price,
    pub index_price: Price,
    pub funding_rate: Decimal,
    pub next_funding_time: DateTime<Utc>,
}

/// Account user-data-stream events. One variant per Binance `e` event type this gateway cares
/// about; anything else is dropped upstream in [`parse_account_update`].
#[derive(Debug, Clone, PartialEq)]
pub enum AccountUpdate {
    Order(OrderOutcome),
    Position(Position),
    Balance { asset: String, wallet_balance: Decimal },
}

fn event_time(value: &Value, field: &str) -> DateTime<Utc> {
    value
        .get(field)
        .and_then(Value::as_i64)
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or_else(Utc::now)
}

fn price_levels(value: &Value, field: &str) -> Vec<(Price, Amount)> {
    value
        .get(field)
        .and_then(Value::as_array)
        .map(|levels| {
            levels
                .iter()
                .filter_map(|level| {
                    let pair = level.as_array()?;
                    let price = pair.first()?.as_str()?.parse::<Decimal>().ok()?;
                    let qty = pair.get(1)?.as_str()?.parse::<Decimal>().ok()?;
                    Some((price, qty))
                })
                .collect()
        })
        .unwrap_or_default()
}

pub fn parse_order_book_update(value: &Value) -> Result<OrderBookUpdate, DecimalFieldError> {
    let symbol = value
        .get("s")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    Ok(OrderBookUpdate {
        symbol,
        bids: price_levels(value, "b"),
        asks: price_levels(value, "a"),
        event_time: event_time(value, "E"),
    })
}

pub fn parse_trade_update(value: &Value) -> Result<TradeUpdate, DecimalFieldError> {
    Ok(TradeUpdate {
        symbol: value
            .get("s")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        price: decimal_field(value, "p")?,
        quantity: decimal_field(value, "q")?,
        is_buyer_maker: value.get("m").and_then(Value::as_bool).unwrap_or(false),
        trade_time: event_time(value, "T"),
    })
}

pub fn parse_mark_price_update(value: &Value) -> Result<MarkPriceUpdate, DecimalFieldError> {
    Ok(MarkPriceUpdate {
        symbol: value
            .get("s")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        mark_price: decimal_field(value, "p")?,
        index_price: decimal_field(value, "i")?,
        funding_rate: decimal_field(value, "r")?,
        next_funding_time: event_time(value, "T"),
    })
}

/// Dispatches on Binance's `e` event-type discriminant. Returns `Ok(None)` for event types this
/// gateway does not surface (e.g. `listenKeyExpired`), which the connection loop silently skips.
pub fn parse_account_update(value: &Value) -> Result<Option<AccountUpdate>, DecimalFieldError> {
    match value.get("e").and_then(Value::as_str) {
        Some("ORDER_TRADE_UPDATE") => {
            let order = value.get("o").cloned().unwrap_or_default();
            let order_id = u64_field(&order, "i")?;
            let status = order
                .get("X")
                .and_then(Value::as_str)
                .map(parse_order_status)
                .unwrap_or(domain::OrderStatus::Rejected);
            let avg_fill_price = decimal_field(&order, "ap").unwrap_or(Decimal::ZERO);
            let filled_qty = decimal_field(&order, "z").unwrap_or(Decimal::ZERO);
            Ok(Some(AccountUpdate::Order(OrderOutcome {
                order_id,
                status,
                avg_fill_price,
                filled_qty,
                updated_at: event_time(value, "E"),
            })))
        }
        Some("ACCOUNT_UPDATE") => {
            let positions = value
                .get("a")
                .and_then(|a| a.get("P"))
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            match positions.first() {
                Some(raw) => Ok(Some(AccountUpdate::Position(parse_position(raw)?))),
                None => Ok(None),
            }
        }
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn order_book_update_parses_price_levels() {
        let raw = json!({
            "s": "BTCUSDT",
            "E": 1_700_000_000_000i64,
            "b": [["50000.1", "1.5"]],
            "a": [["50000.2", "2.0"]],
        });
        let update = parse_order_book_update(&raw).unwrap();
        assert_eq!(update.symbol, "BTCUSDT");
        assert_eq!(update.bids.len(), 1);
        assert_eq!(update.asks[0].0.to_string(), "50000.2");
    }

    #[test]
    fn trade_update_parses_required_fields() {
        let raw = json!({"s": "BTCUSDT", "p": "50000.0", "q": "0.01", "m": true, "T": 1_700_000_000_000i64});
        let update = parse_trade_update(&raw).unwrap();
        assert!(update.is_buyer_maker);
        assert_eq!(update.quantity.to_string(), "0.01");
    }

    #[test]
    fn unrecognized_account_event_is_skipped() {
        let raw = json!({"e": "listenKeyExpired"});
        assert_eq!(parse_account_update(&raw).unwrap(), None);
    }

    #[test]
    fn order_trade_update_maps_to_order_outcome() {
        let raw = json!({
            "e": "ORDER_TRADE_UPDATE",
            "E": 1_700_000_000_000i64,
            "o": {"i": 555, "X": "FILLED", "ap": "50000.0", "z": "1.0"},
        });
        let update = parse_account_update(&raw).unwrap().unwrap();
        match update {
            AccountUpdate::Order(outcome) => {
                assert_eq!(outcome.order_id, 555);
                assert_eq!(outcome.status, domain::OrderStatus::Filled);
            }
            _ => panic!("expected an order update"),
        }
    }
}
