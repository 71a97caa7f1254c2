use chrono::{DateTime, Utc};

use crate::{Amount, Price};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(self) -> OrderSide {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum OrderType {
    Market,
    Limit,
    StopMarket,
    StopLimit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum TimeInForce {
    Gtc,
    Ioc,
    Fok,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum PositionSide {
    Long,
    Short,
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
}

/// An order as the caller intends to submit it.
///
/// Invariants are checked by [`Order::validate`], not at construction: quantity precision
/// depends on the symbol's exchange-declared metadata, which is only known to the REST client.
#[derive(Debug, Clone)]
pub struct Order {
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Amount,
    pub price: Option<Price>,
    pub stop_price: Option<Price>,
    pub reduce_only: bool,
    pub close_position: bool,
    pub time_in_force: Option<TimeInForce>,
    pub position_side: Option<PositionSide>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum OrderValidationError {
    #[error("limit orders require a price")]
    LimitRequiresPrice,
    #[error("limit orders require a time-in-force")]
    LimitRequiresTimeInForce,
    #[error("reduce_only and close_position are mutually exclusive")]
    ReduceOnlyConflictsWithClosePosition,
    #[error("quantity must be > 0")]
    NonPositiveQuantity,
}

impl Order {
    pub fn market(symbol: impl Into<String>, side: OrderSide, quantity: Amount) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Market,
            quantity,
            price: None,
            stop_price: None,
            reduce_only: false,
            close_position: false,
            time_in_force: None,
            position_side: None,
        }
    }

    pub fn limit(
        symbol: impl Into<String>,
        side: OrderSide,
        quantity: Amount,
        price: Price,
        time_in_force: TimeInForce,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Limit,
            quantity,
            price: Some(price),
            stop_price: None,
            reduce_only: false,
            close_position: false,
            time_in_force: Some(time_in_force),
            position_side: None,
        }
    }

    /// Checks the invariants that do not depend on exchange-side precision.
    pub fn validate(&self) -> Result<(), OrderValidationError> {
        if self.quantity <= Amount::ZERO {
            return Err(OrderValidationError::NonPositiveQuantity);
        }
        if matches!(self.order_type, OrderType::Limit | OrderType::StopLimit) {
            if self.price.is_none() {
                return Err(OrderValidationError::LimitRequiresPrice);
            }
            if self.time_in_force.is_none() {
                return Err(OrderValidationError::LimitRequiresTimeInForce);
            }
        }
        if self.reduce_only && self.close_position {
            return Err(OrderValidationError::ReduceOnlyConflictsWithClosePosition);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderOutcome {
    pub order_id: u64,
    pub status: OrderStatus,
    pub avg_fill_price: Price,
    pub filled_qty: Amount,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    #[test]
    fn market_order_needs_no_price() {
        let order = Order::market("BTCUSDT", OrderSide::Buy, dec!(1));
        assert_eq!(order.validate(), Ok(()));
    }

    #[test]
    fn limit_without_price_is_rejected() {
        let mut order = Order::limit(
            "BTCUSDT",
            OrderSide::Buy,
            dec!(1),
            dec!(100),
            TimeInForce::Gtc,
        );
        order.price = None;
        assert_eq!(
            order.validate(),
            Err(OrderValidationError::LimitRequiresPrice)
        );
    }

    #[test]
    fn limit_without_time_in_force_is_rejected() {
        let mut order = Order::limit(
            "BTCUSDT",
            OrderSide::Buy,
            dec!(1),
            dec!(100),
            TimeInForce::Gtc,
        );
        order.time_in_force = None;
        assert_eq!(
            order.validate(),
            Err(OrderValidationError::LimitRequiresTimeInForce)
        );
    }

    #[test]
    fn reduce_only_and_close_position_conflict() {
        let mut order = Order::market("BTCUSDT", OrderSide::Sell, dec!(1));
        order.reduce_only = true;
        order.close_position = true;
        assert_eq!(
            order.validate(),
            Err(OrderValidationError::ReduceOnlyConflictsWithClosePosition)
        );
    }

    #[test]
    fn zero_quantity_is_rejected() {
        let order = Order::market("BTCUSDT", OrderSide::Buy, dec!(0));
        assert_eq!(
            order.validate(),
            Err(OrderValidationError::NonPositiveQuantity)
        );
    }
}
