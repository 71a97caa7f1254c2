//! Parses the Binance-shaped USD-M futures wire format into typed `domain` values. Every numeric
//! field is parsed exactly once, here, through `support::numeric` — nothing downstream re-parses
//! a string.

use chrono::{TimeZone, Utc};
use domain::order::{OrderStatus, PositionSide};
use domain::symbol::Precision;
use domain::{MarginMode, OrderOutcome, Position, SymbolInfo};
use rust_decimal::Decimal;
use serde_json::Value;
use support::numeric::{decimal_field, optional_decimal_field, u64_field, DecimalFieldError};

pub fn parse_order_status(raw: &str) -> OrderStatus {
    match raw {
        "NEW" => OrderStatus::New,
        "PARTIALLY_FILLED" => OrderStatus::PartiallyFilled,
        "FILLED" => OrderStatus::Filled,
        "CANCELED" | "CANCELLED" => OrderStatus::Canceled,
        "REJECTED" => OrderStatus::Rejected,
        "EXPIRED" => OrderStatus::Expired,
        _ => OrderStatus::Rejected,
    }
}

pub fn parse_order_outcome(value: &Value) -> Result<OrderOutcome, DecimalFieldError> {
    let order_id = u64_field(value, "orderId")?;
    let status = value
        .get("status")
        .and_then(Value::as_str)
        .map(parse_order_status)
        .unwrap_or(OrderStatus::Rejected);
    let avg_fill_price = optional_decimal_field(value, "avgPrice")?.unwrap_or(Decimal::ZERO);
    let filled_qty = optional_decimal_field(value, "executedQty")?.unwrap_or(Decimal::ZERO);
    let updated_at = value
        .get("updateTime")
        .and_then(Value::as_i64)
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or_else(Utc::now);

    Ok(OrderOutcome {
        order_id,
        status,
        avg_fill_price,
        filled_qty,
        updated_at,
    })
}

pub fn parse_position(value: &Value) -> Result<Position, DecimalFieldError> {
    let symbol = value
        .get("symbol")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let size = decimal_field(value, "positionAmt")?;
    let entry_price = decimal_field(value, "entryPrice")?;
    let mark_price = decimal_field(value, "markPrice")?;
    let unrealized_pnl = decimal_field(value, "unRealizedProfit")?;
    let liquidation_price = optional_decimal_field(value, "liquidationPrice")?.unwrap_or(Decimal::ZERO);
    let leverage = value
        .get("leverage")
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<u32>().ok())
        .unwrap_or(1);
    let margin_mode = match value.get("marginType").and_then(Value::as_str) {
        Some("isolated") => MarginMode::Isolated,
        _ => MarginMode::Cross,
    };
    let side = match value.get("positionSide").and_then(Value::as_str) {
        Some("LONG") => PositionSide::Long,
        Some("SHORT") => PositionSide::Short,
        _ => PositionSide::Both,
    };

    Ok(Position {
        symbol,
        side,
        size,
        entry_price,
        mark_price,
        unrealized_pnl,
        leverage,
        margin_mode,
        liquidation_price,
    })
}

/// A single 5-minute-or-1-minute bar's close price — only fields 0..6 of the 12-field kline
/// array are used.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Kline {
    pub open_time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub close_time: i64,
}

pub fn parse_klines(value: &Value) -> Result<Vec<Kline>, DecimalFieldError> {
    let rows = value.as_array().cloned().unwrap_or_default();
    rows.iter()
        .map(|row| {
            let fields = row.as_array().cloned().unwrap_or_default();
            let get_decimal = |idx: usize| -> Result<Decimal, DecimalFieldError> {
                fields
                    .get(idx)
                    .and_then(Value::as_str)
                    .and_then(|s| s.parse::<Decimal>().ok())
                    .ok_or(DecimalFieldError {
                        field: "kline_field",
                        raw: fields.get(idx).map(|v| v.to_string()).unwrap_or_default(),
                    })
            };
            Ok(Kline {
                open_time: fields.first().and_then(Value::as_i64).unwrap_or_default(),
                open: get_decimal(1)?,
                high: get_decimal(2)?,
                low: get_decimal(3)?,
                close: get_decimal(4)?,
                volume: get_decimal(5)?,
                close_time: fields.get(6).and_then(Value::as_i64).unwrap_or_default(),
            })
        })
        .collect()
}

fn parse_precision_filter(filters: &[Value], filter_type: &str, field: &str) -> Option<Precision> {
    filters
        .iter()
        .find(|f| f.get("filterType").and_then(Value::as_str) == Some(filter_type))
        .and_then(|f| f.get(field))
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<Decimal>().ok())
        .map(|tick| Precision::ByTick { tick })
}

pub fn parse_symbol_info(value: &Value) -> Result<SymbolInfo, DecimalFieldError> {
    let symbol = value
        .get("symbol")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let filters = value
        .get("filters")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let price_precision = parse_precision_filter(&filters, "PRICE_FILTER", "tickSize")
        .unwrap_or_else(|| fallback_mantissa(value, "pricePrecision"));
    let quantity_precision = parse_precision_filter(&filters, "LOT_SIZE", "stepSize")
        .unwrap_or_else(|| fallback_mantissa(value, "quantityPrecision"));

    let min_qty = filters
        .iter()
        .find(|f| f.get("filterType").and_then(Value::as_str) == Some("LOT_SIZE"))
        .and_then(|f| f.get("minQty"))
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<Decimal>().ok())
        .unwrap_or(Decimal::ZERO);

    let min_notional = filters
        .iter()
        .find(|f| f.get("filterType").and_then(Value::as_str) == Some("MIN_NOTIONAL"))
        .and_then(|f| f.get("notional"))
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<Decimal>().ok())
        .unwrap_or(Decimal::ZERO);

    Ok(SymbolInfo {
        symbol,
        price_precision,
        quantity_precision,
        min_qty,
        min_notional,
    })
}

fn fallback_mantissa(value: &Value, field: &str) -> Precision {
    let digits = value.get(field).and_then(Value::as_u64).unwrap_or(2) as u8;
    Precision::ByMantissa { digits }
}

/// Binance bundles every quote asset's balance in one array; only the USDT entry matters here.
pub fn parse_usdt_balance(value: &Value) -> Result<Decimal, DecimalFieldError> {
    let entries = value.as_array().cloned().unwrap_or_default();
    let usdt = entries
        .iter()
        .find(|entry| entry.get("asset").and_then(Value::as_str) == Some("USDT"));
    match usdt {
        Some(entry) => decimal_field(entry, "balance"),
        None => Ok(Decimal::ZERO),
    }
}
