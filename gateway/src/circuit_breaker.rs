//! Three-state failure isolation with timed recovery: a `parking_lot::Mutex`-guarded state
//! machine with an explicit timed transition from open back to half-open, rather than manual
//! block/unblock-reason bookkeeping.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub open_timeout: Duration,
    pub half_open_permits: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            open_timeout: Duration::from_secs(30),
            half_open_permits: 3,
        }
    }
}

struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
    half_open_permits_outstanding: u32,
    total_requests: u64,
    total_failures: u64,
    total_successes: u64,
    last_transition_at: Instant,
}

#[derive(Debug, Clone, Copy)]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    pub total_requests: u64,
    pub total_failures: u64,
    pub total_successes: u64,
    pub failure_rate: f64,
}

pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                opened_at: None,
                half_open_permits_outstanding: 0,
                total_requests: 0,
                total_failures: 0,
                total_successes: 0,
                last_transition_at: Instant::now(),
            }),
        }
    }

    /// Returns `true` (and, in `Open`, performs the timed `Open -> HalfOpen` transition) if a
    /// call should be allowed through right now.
    pub fn permit(&self) -> bool {
        let mut inner = self.inner.lock();
        inner.total_requests += 1;
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                let opened_at = inner.opened_at.expect("Open state always sets opened_at");
                if opened_at.elapsed() >= self.config.open_timeout {
                    inner.state = BreakerState::HalfOpen;
                    inner.consecutive_successes = 0;
                    inner.half_open_permits_outstanding = 1;
                    inner.last_transition_at = Instant::now();
                    true
                } else {
                    false
                }
            }
            BreakerState::HalfOpen => {
                if inner.half_open_permits_outstanding < self.config.half_open_permits {
                    inner.half_open_permits_outstanding += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.total_successes += 1;
        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures = 0;
            }
            BreakerState::HalfOpen => {
                inner.half_open_permits_outstanding = inner.half_open_permits_outstanding.saturating_sub(1);
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.config.success_threshold {
                    inner.state = BreakerState::Closed;
                    inner.consecutive_failures = 0;
                    inner.consecutive_successes = 0;
                    inner.last_transition_at = Instant::now();
                }
            }
            BreakerState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.total_failures += 1;
        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                    inner.last_transition_at = Instant::now();
                }
            }
            BreakerState::HalfOpen => {
                inner.half_open_permits_outstanding = inner.half_open_permits_outstanding.saturating_sub(1);
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
                inner.consecutive_successes = 0;
                inner.last_transition_at = Instant::now();
            }
            BreakerState::Open => {}
        }
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock();
        let failure_rate = if inner.total_requests == 0 {
            0.0
        } else {
            inner.total_failures as f64 / inner.total_requests as f64
        };
        BreakerSnapshot {
            state: inner.state,
            total_requests: inner.total_requests,
            total_failures: inner.total_failures,
            total_successes: inner.total_successes,
            failure_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> BreakerConfig {
        BreakerConfig {
            failure_threshold: 3,
            success_threshold: 2,
            open_timeout: Duration::from_millis(100),
            half_open_permits: 3,
        }
    }

    #[test]
    fn trips_open_after_failure_threshold_and_recovers() {
        let breaker = CircuitBreaker::new(config());

        for _ in 0..3 {
            assert!(breaker.permit());
            breaker.record_failure();
        }
        assert_eq!(breaker.snapshot().state, BreakerState::Open);
        assert!(!breaker.permit(), "4th call must be denied while open");

        std::thread::sleep(Duration::from_millis(120));
        assert!(breaker.permit(), "permit after timeout moves to half-open and allows the probe");
        assert_eq!(breaker.snapshot().state, BreakerState::HalfOpen);

        breaker.record_success();
        assert_eq!(breaker.snapshot().state, BreakerState::HalfOpen);
        assert!(breaker.permit());
        breaker.record_success();
        assert_eq!(breaker.snapshot().state, BreakerState::Closed);
        assert!(breaker.permit());
    }

    #[test]
    fn half_open_failure_reopens_immediately() {
        let breaker = CircuitBreaker::new(config());
        for _ in 0..3 {
            breaker.permit();
            breaker.record_failure();
        }
        std::thread::sleep(Duration::from_millis(120));
        assert!(breaker.permit());
        breaker.record_failure();
        assert_eq!(breaker.snapshot().state, BreakerState::Open);
        assert!(!breaker.permit());
    }

    #[test]
    fn half_open_respects_permit_ceiling() {
        let breaker = CircuitBreaker::new(BreakerConfig {
            half_open_permits: 2,
            ..config()
        });
        for _ in 0..3 {
            breaker.permit();
            breaker.record_failure();
        }
        std::thread::sleep(Duration::from_millis(120));
        assert!(breaker.permit()); // 1st half-open permit
        assert!(breaker.permit()); // 2nd half-open permit
        assert!(!breaker.permit(), "3rd concurrent half-open call must be denied");
    }

    #[test]
    fn success_in_closed_state_resets_consecutive_failures() {
        let breaker = CircuitBreaker::new(config());
        breaker.permit();
        breaker.record_failure();
        breaker.permit();
        breaker.record_failure();
        breaker.permit();
        breaker.record_success();
        breaker.permit();
        breaker.record_failure();
        breaker.permit();
        breaker.record_failure();
        assert_eq!(breaker.snapshot().state, BreakerState::Closed);
    }

    #[test]
    fn failure_rate_is_tracked() {
        let breaker = CircuitBreaker::new(config());
        breaker.permit();
        breaker.record_success();
        breaker.permit();
        breaker.record_failure();
        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.total_requests, 2);
        assert!((snapshot.failure_rate - 0.5).abs() < 1e-9);
    }
}
