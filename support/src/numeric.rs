use std::str::FromStr;

use rust_decimal::Decimal;
use serde_json::Value;

/// Every numeric field in a REST response is parsed here, once, at ingress, through a single
/// strict parser rather than several ad hoc float conversions scattered downstream. A value that
/// fails to parse is a bug in the exchange's response, not a silent zero.
#[derive(Debug, thiserror::Error)]
#[error("field `{field}` is not a valid decimal: {raw:?}")]
pub struct DecimalFieldError {
    pub field: &'static str,
    pub raw: String,
}

/// Extracts a required string-encoded decimal field, the shape Binance-style REST responses use
/// for price/quantity fields (`"price": "100.50"`).
pub fn decimal_field(value: &Value, field: &'static str) -> Result<Decimal, DecimalFieldError> {
    let raw = value
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| DecimalFieldError {
            field,
            raw: value.get(field).map(|v| v.to_string()).unwrap_or_default(),
        })?;
    Decimal::from_str(raw).map_err(|_| DecimalFieldError {
        field,
        raw: raw.to_string(),
    })
}

/// Same as [`decimal_field`] but tolerates the field being absent, returning `None` rather than
/// erroring — used for optional fields like `liquidationPrice` on a flat (non-derivative) spot
/// position.
pub fn optional_decimal_field(
    value: &Value,
    field: &'static str,
) -> Result<Option<Decimal>, DecimalFieldError> {
    match value.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(_) => decimal_field(value, field).map(Some),
    }
}

/// Extracts a required integer field which Binance-style APIs sometimes encode as a JSON number
/// and sometimes as a string (order ids in particular vary by endpoint).
pub fn u64_field(value: &Value, field: &'static str) -> Result<u64, DecimalFieldError> {
    match value.get(field) {
        Some(Value::Number(n)) => n.as_u64().ok_or_else(|| DecimalFieldError {
            field,
            raw: n.to_string(),
        }),
        Some(Value::String(s)) => s.parse::<u64>().map_err(|_| DecimalFieldError {
            field,
            raw: s.clone(),
        }),
        other => Err(DecimalFieldError {
            field,
            raw: other.map(|v| v.to_string()).unwrap_or_default(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn parses_string_encoded_decimal() {
        let v = json!({"price": "100.50"});
        assert_eq!(decimal_field(&v, "price").unwrap(), dec!(100.50));
    }

    #[test]
    fn rejects_unparseable_decimal() {
        let v = json!({"price": "not-a-number"});
        assert!(decimal_field(&v, "price").is_err());
    }

    #[test]
    fn missing_optional_field_is_none() {
        let v = json!({});
        assert_eq!(optional_decimal_field(&v, "liquidationPrice").unwrap(), None);
    }

    #[test]
    fn u64_field_accepts_number_or_string() {
        let v = json!({"orderId": 123, "clientOrderId": "456"});
        assert_eq!(u64_field(&v, "orderId").unwrap(), 123);
        assert_eq!(u64_field(&v, "clientOrderId").unwrap(), 456);
    }
}
