//! Token-bucket rate limiting plus a per-endpoint minimum-interval floor.
//!
//! A ticket queue gives strict FIFO admission: each `acquire` call draws a ticket number under
//! the inner lock on arrival, then only consumes a token once `now_serving` reaches that ticket.
//! Cooperative `tokio::time::sleep`/`Notify` waits, no busy polling.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::Notify;

use support::CancellationToken;

/// Why an `acquire` call returned without granting a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("rate governor acquire canceled")]
pub struct Canceled;

struct Inner {
    capacity: f64,
    refill_per_sec: f64,
    tokens: f64,
    last_refill: Instant,
    last_send: Option<Instant>,
    next_ticket: u64,
    now_serving: u64,
    /// Tickets that canceled before their turn arrived; skipped over when `now_serving` reaches
    /// them so a canceled waiter never stalls everyone behind it.
    abandoned: HashSet<u64>,
}

impl Inner {
    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }

    /// Hands the turn to the next non-abandoned ticket.
    fn advance_serving(&mut self) {
        self.now_serving += 1;
        while self.abandoned.remove(&self.now_serving) {
            self.now_serving += 1;
        }
    }
}

enum Action {
    Granted,
    WaitForTurn,
    Wait(Duration),
}

/// Global token bucket (`rps`/`burst`) plus a minimum spacing floor between any two sends,
/// jittered to avoid a thundering herd against the same endpoint.
///
/// `acquire` is cancellation-safe: a token is only debited from the bucket in the branch that
/// actually returns `Ok`, never on the canceled path. A canceled waiter relinquishes its ticket
/// so the queue behind it keeps moving.
pub struct RateGovernor {
    inner: Mutex<Inner>,
    turn_notify: Notify,
    min_interval: Duration,
    jitter_fraction: f64,
}

impl RateGovernor {
    pub fn new(rps: f64, burst: f64, min_interval: Duration, jitter_fraction: f64) -> Self {
        Self {
            inner: Mutex::new(Inner {
                capacity: burst,
                refill_per_sec: rps,
                tokens: burst,
                last_refill: Instant::now(),
                last_send: None,
                next_ticket: 0,
                now_serving: 0,
                abandoned: HashSet::new(),
            }),
            turn_notify: Notify::new(),
            min_interval,
            jitter_fraction,
        }
    }

    /// Blocks cooperatively until a token is available and the minimum-interval floor has
    /// elapsed, or `cancel` fires first. On cancellation, no token is ever consumed.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<(), Canceled> {
        let ticket = {
            let mut inner = self.inner.lock();
            let ticket = inner.next_ticket;
            inner.next_ticket += 1;
            ticket
        };

        loop {
            if cancel.is_cancelled() {
                self.abandon(ticket);
                return Err(Canceled);
            }

            // Registered before inspecting state so a notification fired between the check and
            // the wait below is never missed.
            let notified = self.turn_notify.notified();

            let action = {
                let mut inner = self.inner.lock();
                if inner.now_serving != ticket {
                    Action::WaitForTurn
                } else {
                    let now = Instant::now();
                    inner.refill(now);

                    let interval_wait = inner
                        .last_send
                        .map(|last| self.min_interval.saturating_sub(now.saturating_duration_since(last)))
                        .unwrap_or(Duration::ZERO);

                    if inner.tokens >= 1.0 && interval_wait.is_zero() {
                        inner.tokens -= 1.0;
                        inner.last_send = Some(now);
                        inner.advance_serving();
                        Action::Granted
                    } else if inner.tokens < 1.0 {
                        let deficit = 1.0 - inner.tokens;
                        Action::Wait(Duration::from_secs_f64(deficit / inner.refill_per_sec).max(interval_wait))
                    } else {
                        let jitter = support::time::jitter(self.min_interval.mul_f64(self.jitter_fraction));
                        Action::Wait(interval_wait + jitter)
                    }
                }
            };

            match action {
                Action::Granted => {
                    self.turn_notify.notify_waiters();
                    return Ok(());
                }
                Action::WaitForTurn => {
                    tokio::select! {
                        _ = notified => {}
                        _ = cancel.cancelled() => {
                            self.abandon(ticket);
                            return Err(Canceled);
                        }
                    }
                }
                Action::Wait(delay) => {
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => {
                            self.abandon(ticket);
                            return Err(Canceled);
                        }
                    }
                }
            }
        }
    }

    fn abandon(&self, ticket: u64) {
        let mut inner = self.inner.lock();
        if inner.now_serving == ticket {
            inner.advance_serving();
            drop(inner);
            self.turn_notify.notify_waiters();
        } else {
            inner.abandoned.insert(ticket);
        }
    }

    /// Snapshot of tokens currently available, for observability/tests.
    pub fn available_tokens(&self) -> f64 {
        let mut inner = self.inner.lock();
        inner.refill(Instant::now());
        inner.tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn burst_capacity_is_immediately_available() {
        let governor = RateGovernor::new(10.0, 10.0, Duration::ZERO, 0.0);
        let cancel = CancellationToken::new();
        for _ in 0..10 {
            governor.acquire(&cancel).await.unwrap();
        }
        assert!(governor.available_tokens() < 1.0);
    }

    #[tokio::test]
    async fn eleventh_request_waits_for_refill() {
        let governor = Arc::new(RateGovernor::new(10.0, 10.0, Duration::ZERO, 0.0));
        let cancel = CancellationToken::new();
        for _ in 0..10 {
            governor.acquire(&cancel).await.unwrap();
        }
        let start = Instant::now();
        governor.acquire(&cancel).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(90));
    }

    #[tokio::test]
    async fn min_interval_is_enforced_even_with_tokens_available() {
        let governor = RateGovernor::new(1000.0, 1000.0, Duration::from_millis(50), 0.0);
        let cancel = CancellationToken::new();
        governor.acquire(&cancel).await.unwrap();
        let start = Instant::now();
        governor.acquire(&cancel).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(45));
    }

    #[tokio::test]
    async fn cancellation_consumes_no_token() {
        let governor = RateGovernor::new(1.0, 1.0, Duration::ZERO, 0.0);
        let cancel = CancellationToken::new();
        governor.acquire(&cancel).await.unwrap();
        let before = governor.available_tokens();

        let cancel2 = CancellationToken::new();
        cancel2.cancel();
        let result = governor.acquire(&cancel2).await;
        assert!(result.is_err());
        assert_eq!(governor.available_tokens(), before);
    }

    #[tokio::test]
    async fn concurrent_acquires_are_granted_in_arrival_order() {
        let governor = Arc::new(RateGovernor::new(1.0, 1.0, Duration::ZERO, 0.0));
        let cancel = CancellationToken::new();
        // Drain the initial burst token so every spawned task below has to queue for a turn.
        governor.acquire(&cancel).await.unwrap();

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for id in 0..5u32 {
            let governor = governor.clone();
            let cancel = cancel.clone();
            let order = order.clone();
            // Each task registers its ticket (inside `acquire`) before the next is spawned, so
            // ticket order matches spawn order deterministically.
            handles.push(tokio::spawn(async move {
                governor.acquire(&cancel).await.unwrap();
                order.lock().push(id);
            }));
            tokio::task::yield_now().await;
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    }
}
