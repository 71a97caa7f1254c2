use crate::order::PositionSide;
use crate::{Amount, Price};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum MarginMode {
    Isolated,
    Cross,
}

/// A live position snapshot. An absent position (size == 0) is simply never constructed; callers
/// read the active set from `RestClient::get_positions` rather than a nullable field.
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub symbol: String,
    pub side: PositionSide,
    pub size: Amount,
    pub entry_price: Price,
    pub mark_price: Price,
    pub unrealized_pnl: Price,
    pub leverage: u32,
    pub margin_mode: MarginMode,
    pub liquidation_price: Price,
}

impl Position {
    pub fn is_active(&self) -> bool {
        !self.size.is_zero()
    }
}
