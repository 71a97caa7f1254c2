use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Current Unix time in milliseconds, used for request timestamps and TTL bookkeeping.
///
/// # Panics
/// Panics if the system clock is set before the Unix epoch; that is an operator misconfiguration
/// this crate cannot recover from.
pub fn current_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock set before unix epoch")
        .as_millis() as u64
}

/// Jitter uniformly drawn from `[0, max)`, used for signed-request timestamp jitter and
/// reconnection backoff.
pub fn jitter(max: Duration) -> Duration {
    if max.is_zero() {
        return Duration::ZERO;
    }
    let fraction: f64 = rand::random();
    max.mul_f64(fraction)
}

/// `base * 2^attempt`, capped at `max` — the shape used for both request retry and
/// reconnection backoff.
pub fn exponential_backoff(base: Duration, attempt: u32, max: Duration) -> Duration {
    let scaled = base.checked_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX));
    scaled.unwrap_or(max).min(max)
}

/// `delay +/- fraction * delay`, used to jitter backoff so a herd of reconnecting streams doesn't
/// synchronize on the exchange.
pub fn jitter_around(delay: Duration, fraction: f64) -> Duration {
    let magnitude = delay.mul_f64(fraction);
    let offset: f64 = rand::random::<f64>() * 2.0 - 1.0; // [-1, 1)
    let signed = magnitude.mul_f64(offset.abs());
    if offset < 0.0 {
        delay.checked_sub(signed).unwrap_or(Duration::ZERO)
    } else {
        delay + signed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_until_cap() {
        let base = Duration::from_secs(1);
        let max = Duration::from_secs(60);
        assert_eq!(exponential_backoff(base, 0, max), Duration::from_secs(1));
        assert_eq!(exponential_backoff(base, 1, max), Duration::from_secs(2));
        assert_eq!(exponential_backoff(base, 2, max), Duration::from_secs(4));
        assert_eq!(exponential_backoff(base, 10, max), max);
    }

    #[test]
    fn jitter_around_stays_within_fraction() {
        let delay = Duration::from_secs(10);
        for _ in 0..100 {
            let jittered = jitter_around(delay, 0.15);
            assert!(jittered >= Duration::from_millis(8500));
            assert!(jittered <= Duration::from_millis(11500));
        }
    }

    #[test]
    fn jitter_is_bounded() {
        let max = Duration::from_millis(100);
        for _ in 0..100 {
            assert!(jitter(max) < max);
        }
    }
}
