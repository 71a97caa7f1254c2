//! Fixed-capacity ring buffer of execution outcomes plus a derived aggregate snapshot: a single
//! mutex-guarded buffer, with lock-free reads for callers via a cloned snapshot rather than a
//! held lock.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use domain::order::OrderType;

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionRecord {
    pub symbol: String,
    pub order_type: OrderType,
    pub slippage: f64,
    pub fill_latency: Duration,
    pub quality_score: f64,
    pub volatility: f64,
    pub volume: f64,
    pub success: bool,
    pub cause: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct MetricsSnapshot {
    pub total_orders: u64,
    pub successful: u64,
    pub failed: u64,
    pub avg_slippage: f64,
    pub avg_fill_latency: Duration,
    pub avg_quality_score: f64,
    pub market_orders: u64,
    pub limit_orders: u64,
    pub last_adaptation_at: Option<Instant>,
}

struct Inner {
    records: VecDeque<ExecutionRecord>,
    capacity: usize,
    total_orders: u64,
    successful: u64,
    failed: u64,
    market_orders: u64,
    limit_orders: u64,
    last_adaptation_at: Option<Instant>,
}

/// Append-only from [`crate::execution::engine::ExecutionEngine`]; every other reader only calls
/// [`MetricsStore::snapshot`], which clones the aggregate counters under a short-held lock rather
/// than walking the ring buffer.
pub struct MetricsStore {
    inner: Mutex<Inner>,
}

impl MetricsStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                records: VecDeque::with_capacity(capacity),
                capacity,
                total_orders: 0,
                successful: 0,
                failed: 0,
                market_orders: 0,
                limit_orders: 0,
                last_adaptation_at: None,
            }),
        }
    }

    pub fn record(&self, record: ExecutionRecord) {
        let mut inner = self.inner.lock();
        inner.total_orders += 1;
        if record.success {
            inner.successful += 1;
        } else {
            inner.failed += 1;
        }
        match record.order_type {
            OrderType::Market | OrderType::StopMarket => inner.market_orders += 1,
            OrderType::Limit | OrderType::StopLimit => inner.limit_orders += 1,
        }
        if inner.records.len() == inner.capacity {
            inner.records.pop_front();
        }
        inner.records.push_back(record);
    }

    pub fn mark_adaptation(&self) {
        self.inner.lock().last_adaptation_at = Some(Instant::now());
    }

    /// Average `qualityScore` for the last `window` records matching `order_type`, used by the
    /// engine's adaptation pass to compare order types against each other.
    pub fn avg_quality_for(&self, order_type: OrderType, window: usize) -> Option<f64> {
        let inner = self.inner.lock();
        let scores: Vec<f64> = inner
            .records
            .iter()
            .rev()
            .take(window)
            .filter(|r| r.order_type == order_type)
            .map(|r| r.quality_score)
            .collect();
        if scores.is_empty() {
            None
        } else {
            Some(scores.iter().sum::<f64>() / scores.len() as f64)
        }
    }

    pub fn recent_slippage_avg(&self, window: usize) -> Option<f64> {
        let inner = self.inner.lock();
        let values: Vec<f64> = inner.records.iter().rev().take(window).map(|r| r.slippage).collect();
        if values.is_empty() {
            None
        } else {
            Some(values.iter().sum::<f64>() / values.len() as f64)
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = self.inner.lock();
        let n = inner.records.len().max(1) as f64;
        let avg_slippage = inner.records.iter().map(|r| r.slippage).sum::<f64>() / n;
        let avg_quality_score = inner.records.iter().map(|r| r.quality_score).sum::<f64>() / n;
        let avg_fill_latency = if inner.records.is_empty() {
            Duration::ZERO
        } else {
            inner.records.iter().map(|r| r.fill_latency).sum::<Duration>() / inner.records.len() as u32
        };
        MetricsSnapshot {
            total_orders: inner.total_orders,
            successful: inner.successful,
            failed: inner.failed,
            avg_slippage,
            avg_fill_latency,
            avg_quality_score,
            market_orders: inner.market_orders,
            limit_orders: inner.limit_orders,
            last_adaptation_at: inner.last_adaptation_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(order_type: OrderType, quality_score: f64, success: bool) -> ExecutionRecord {
        ExecutionRecord {
            symbol: "BTCUSDT".to_string(),
            order_type,
            slippage: 0.001,
            fill_latency: Duration::from_millis(100),
            quality_score,
            volatility: 0.02,
            volume: 1_000_000.0,
            success,
            cause: None,
        }
    }

    #[test]
    fn ring_buffer_evicts_oldest_past_capacity() {
        let store = MetricsStore::new(2);
        store.record(record(OrderType::Market, 0.5, true));
        store.record(record(OrderType::Market, 0.6, true));
        store.record(record(OrderType::Market, 0.7, true));
        let snapshot = store.snapshot();
        assert!((snapshot.avg_quality_score - 0.65).abs() < 1e-9);
    }

    #[test]
    fn snapshot_tracks_success_and_order_type_counts() {
        let store = MetricsStore::new(10);
        store.record(record(OrderType::Market, 0.8, true));
        store.record(record(OrderType::Limit, 0.2, false));
        let snapshot = store.snapshot();
        assert_eq!(snapshot.total_orders, 2);
        assert_eq!(snapshot.successful, 1);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.market_orders, 1);
        assert_eq!(snapshot.limit_orders, 1);
    }

    #[test]
    fn avg_quality_for_filters_by_order_type() {
        let store = MetricsStore::new(10);
        store.record(record(OrderType::Market, 0.9, true));
        store.record(record(OrderType::Limit, 0.1, true));
        assert!((store.avg_quality_for(OrderType::Market, 10).unwrap() - 0.9).abs() < 1e-9);
        assert_eq!(store.avg_quality_for(OrderType::StopLimit, 10), None);
    }
}
