use rust_decimal::Decimal;

/// Opaque market snapshot handed to the execution engine. Indicator math (EMA/RSI/etc) is left to
/// an external `MarketDataProvider` — this type only carries what `ExecutionEngine` needs
/// directly: recent closes for volatility/moving-average math, last price, and 24h quote volume.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub last_price: Decimal,
    /// Oldest first.
    pub recent_closes: Vec<Decimal>,
    pub quote_volume: Decimal,
}

impl MarketSnapshot {
    pub fn empty(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            last_price: Decimal::ZERO,
            recent_closes: Vec::new(),
            quote_volume: Decimal::ZERO,
        }
    }
}
