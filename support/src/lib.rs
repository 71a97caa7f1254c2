//! Small, exchange-agnostic helpers shared by every gateway module: cooperative cancellation,
//! time, and strict numeric parsing. Kept separate from `domain` (data shapes) and `gateway`
//! (the stateful client logic) — a leaf utility crate with no opinion on either.

pub mod cancellation;
pub mod numeric;
pub mod time;

pub use cancellation::CancellationToken;
