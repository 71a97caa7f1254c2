use rust_decimal::{Decimal, MathematicalOps};
use rust_decimal_macros::dec;

use crate::{Amount, Price};

/// How a symbol's price or quantity must be rounded before it is sent to the exchange.
///
/// `ByTick` rounds to the nearest multiple of a fixed step (most futures price ladders);
/// `ByMantissa` rounds to a fixed number of significant decimal digits (used by some quantity
/// fields). Both shapes are taken from the exchange's `exchangeInfo` response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Precision {
    ByTick { tick: Decimal },
    ByMantissa { digits: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Round {
    Floor,
    Ceiling,
    ToNearest,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SymbolInfo {
    pub symbol: String,
    pub price_precision: Precision,
    pub quantity_precision: Precision,
    pub min_qty: Amount,
    pub min_notional: Amount,
}

impl SymbolInfo {
    pub fn round_price(&self, price: Price, round: Round) -> Price {
        Self::round(price, self.price_precision, round)
    }

    pub fn round_quantity(&self, quantity: Amount, round: Round) -> Amount {
        Self::round(quantity, self.quantity_precision, round)
    }

    fn round(value: Decimal, precision: Precision, round: Round) -> Decimal {
        match precision {
            Precision::ByTick { tick } if tick > Decimal::ZERO => {
                Self::round_by_tick(value, tick, round)
            }
            Precision::ByTick { .. } => value,
            Precision::ByMantissa { digits } => Self::round_by_mantissa(value, digits, round),
        }
    }

    fn round_by_tick(value: Decimal, tick: Decimal, round: Round) -> Decimal {
        let floor = (value / tick).floor() * tick;
        let ceil = (value / tick).ceil() * tick;
        match round {
            Round::Floor => floor,
            Round::Ceiling => ceil,
            Round::ToNearest => {
                if ceil - value <= value - floor {
                    ceil
                } else {
                    floor
                }
            }
        }
    }

    fn round_by_mantissa(value: Decimal, digits: u8, round: Round) -> Decimal {
        if value.is_zero() {
            return Decimal::ZERO;
        }
        let tick = dec!(0.1).checked_powi(digits as i64).unwrap_or(dec!(1));
        Self::round_by_tick(value, tick, round)
    }
}
