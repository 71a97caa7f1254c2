pub mod engine;
pub mod metrics;

pub use engine::ExecutionEngine;
pub use metrics::{ExecutionRecord, MetricsSnapshot, MetricsStore};
