//! Classifies remote errors into the small algebra the breaker, retry policy, and caller all
//! reason about.
//!
//! A numeric-code table handles the well-known cases, a message-substring fallback covers
//! everything else, and one bucket (`Unknown`) catches whatever neither table recognizes.

use std::fmt;

/// Remote error code ranges and exact codes that map to a stable classification. Pulled from the
/// Binance USD-M futures error code reference; ranges collapse repetitive near-duplicate codes
/// (e.g. the block of "leverage not changed"-style codes) into one bucket rather than branching
/// per code.
const CLOCK_SKEW_CODES: &[i64] = &[-1021, -1099];
const AUTH_FAILURE_CODES: &[i64] = &[-1022, -2014, -2015];
const RATE_LIMIT_CODES: &[i64] = &[-1003, -1015];
const INSUFFICIENT_FUNDS_CODES: &[i64] = &[-2018, -2019];
const MARKET_CONDITION_CODES: &[i64] = &[-2021, -2022, -4131, -4164];
const TRANSIENT_CODES: &[i64] = &[-1000, -1001, -1006, -1007, -1016];

/// Client-side request errors: bad symbol, bad precision, reduce-only rejected, etc. Wide ranges
/// on the Binance futures API (-1100..=-1199 request formatting, -2010..=-2013 order rejections,
/// -4000..=-4999 futures-specific filter failures) collapse into this one bucket.
fn is_client_error_code(code: i64) -> bool {
    (-1199..=-1100).contains(&code)
        || (-2013..=-2010).contains(&code)
        || (-4999..=-4000).contains(&code)
}

/// The stable classification of a remote error. Drives retry eligibility, breaker effect, and
/// what a caller should do about it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("operation canceled")]
    Canceled,
    #[error("transient remote error: {message}")]
    Transient { message: String },
    #[error("rate limited by remote: {message}")]
    RateLimited { message: String },
    #[error("authentication failed: {message}")]
    AuthFailure { message: String },
    #[error("clock skew: request timestamp outside recvWindow: {message}")]
    ClockSkew { message: String },
    #[error("client error {code}: {message} ({remedy})")]
    ClientError {
        code: i64,
        message: String,
        remedy: String,
    },
    #[error("insufficient funds: {message}")]
    InsufficientFunds { message: String },
    #[error("market condition rejected order: {message}")]
    MarketCondition { message: String },
    #[error("circuit breaker is open")]
    BreakerOpen,
    #[error("unclassified remote error (code={code:?}): {message}")]
    Unknown { code: Option<i64>, message: String },
}

impl GatewayError {
    /// Whether the caller (ExecutionEngine's retry loop, in practice) should retry this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GatewayError::Transient { .. }
                | GatewayError::RateLimited { .. }
                | GatewayError::Unknown { .. }
        )
    }

    /// Whether this error should be fed to `CircuitBreaker::record_failure`. RateLimited and
    /// ClientError are deliberately excluded — the breaker models remote *health*, not caller
    /// mistakes or admission control.
    pub fn affects_breaker(&self) -> bool {
        matches!(
            self,
            GatewayError::Transient { .. }
                | GatewayError::AuthFailure { .. }
                | GatewayError::ClockSkew { .. }
                | GatewayError::Unknown { .. }
        )
    }
}

/// A parsed `{"code": ..., "msg": ...}` error envelope, pre-classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteError {
    pub code: i64,
    pub message: String,
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

/// Remediation text surfaced to operators, keyed by classification rather than by code — one
/// message per kind instead of a near-duplicate string for every code that falls in it.
fn remedy_for_client_error(message: &str) -> String {
    if message.contains("Precision") || message.contains("LOT_SIZE") || message.contains("PRICE_FILTER") {
        "amend quantity/price to the symbol's declared precision and retry".into()
    } else if message.contains("reduceOnly") || message.contains("ReduceOnly") {
        "position does not support a reduce-only order of this size; amend quantity".into()
    } else if message.contains("position side") || message.contains("positionSide") {
        "account position mode does not match the requested positionSide".into()
    } else {
        "amend the order parameters per the remote's message and retry".into()
    }
}

/// Classifies a parsed remote error into the taxonomy, consulting the numeric-code table first
/// and falling back to message substrings.
pub fn classify(error: &RemoteError) -> GatewayError {
    let code = error.code;
    let message = error.message.clone();

    if CLOCK_SKEW_CODES.contains(&code) {
        return GatewayError::ClockSkew { message };
    }
    if AUTH_FAILURE_CODES.contains(&code) {
        return GatewayError::AuthFailure { message };
    }
    if RATE_LIMIT_CODES.contains(&code) {
        return GatewayError::RateLimited { message };
    }
    if INSUFFICIENT_FUNDS_CODES.contains(&code) {
        return GatewayError::InsufficientFunds { message };
    }
    if MARKET_CONDITION_CODES.contains(&code) {
        return GatewayError::MarketCondition { message };
    }
    if TRANSIENT_CODES.contains(&code) {
        return GatewayError::Transient { message };
    }
    if is_client_error_code(code) {
        let remedy = remedy_for_client_error(&message);
        return GatewayError::ClientError {
            code,
            message,
            remedy,
        };
    }

    classify_message(code, &message)
}

/// Substring fallback for codes the table above doesn't recognize — kind-level patterns instead
/// of a per-message branch for every known string.
fn classify_message(code: i64, message: &str) -> GatewayError {
    let lower = message.to_ascii_lowercase();

    if lower.contains("too many requests") || lower.contains("429") {
        return GatewayError::RateLimited {
            message: message.to_string(),
        };
    }
    if lower.contains("timestamp") && (lower.contains("outside") || lower.contains("ahead")) {
        return GatewayError::ClockSkew {
            message: message.to_string(),
        };
    }
    if lower.contains("invalid api-key") || lower.contains("signature") || lower.contains("ip not allowed") {
        return GatewayError::AuthFailure {
            message: message.to_string(),
        };
    }
    if lower.contains("insufficient") || lower.contains("margin is insufficient") {
        return GatewayError::InsufficientFunds {
            message: message.to_string(),
        };
    }
    if lower.contains("would immediately trigger")
        || lower.contains("would immediately match")
        || lower.contains("no depth")
        || lower.contains("maintenance margin")
    {
        return GatewayError::MarketCondition {
            message: message.to_string(),
        };
    }
    if lower.contains("disconnected")
        || lower.contains("unexpected response")
        || lower.contains("internal server")
        || lower.contains("timeout")
    {
        return GatewayError::Transient {
            message: message.to_string(),
        };
    }
    if lower.contains("invalid symbol")
        || lower.contains("invalid quantity")
        || lower.contains("precision")
        || lower.contains("reduce")
        || lower.contains("position side")
    {
        return GatewayError::ClientError {
            code,
            remedy: remedy_for_client_error(message),
            message: message.to_string(),
        };
    }

    GatewayError::Unknown {
        code: Some(code),
        message: message.to_string(),
    }
}

/// Classifies a response body that failed to parse as JSON at all: unparseable JSON yields
/// `Unknown{raw}` rather than a panic.
pub fn classify_unparseable(raw: &str) -> GatewayError {
    GatewayError::Unknown {
        code: None,
        message: format!("unparseable response body: {raw}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn remote(code: i64, message: &str) -> RemoteError {
        RemoteError {
            code,
            message: message.to_string(),
        }
    }

    #[rstest]
    #[case(-1021, "Timestamp for this request is outside of the recvWindow.")]
    fn clock_skew_by_code(#[case] code: i64, #[case] message: &str) {
        assert!(matches!(
            classify(&remote(code, message)),
            GatewayError::ClockSkew { .. }
        ));
    }

    #[test]
    fn clock_skew_is_not_retryable_but_affects_breaker() {
        let err = classify(&remote(-1021, "bad timestamp"));
        assert!(!err.is_retryable());
        assert!(err.affects_breaker());
    }

    #[test]
    fn rate_limited_is_retryable_but_does_not_affect_breaker() {
        let err = classify(&remote(-1003, "Too many requests; current limit is 1200"));
        assert!(matches!(err, GatewayError::RateLimited { .. }));
        assert!(err.is_retryable());
        assert!(!err.affects_breaker());
    }

    #[test]
    fn client_error_is_not_retryable_and_does_not_affect_breaker() {
        let err = classify(&remote(-1102, "Invalid quantity."));
        assert!(matches!(err, GatewayError::ClientError { .. }));
        assert!(!err.is_retryable());
        assert!(!err.affects_breaker());
    }

    #[test]
    fn transient_is_retryable_and_affects_breaker() {
        let err = classify(&remote(-1001, "Internal error; unable to process your request."));
        assert!(matches!(err, GatewayError::Transient { .. }));
        assert!(err.is_retryable());
        assert!(err.affects_breaker());
    }

    #[test]
    fn insufficient_funds_surfaces_without_retry_or_breaker_effect() {
        let err = classify(&remote(-2019, "Margin is insufficient."));
        assert!(matches!(err, GatewayError::InsufficientFunds { .. }));
        assert!(!err.is_retryable());
        assert!(!err.affects_breaker());
    }

    #[test]
    fn unrecognized_code_and_message_falls_back_to_unknown_but_is_retryable_once() {
        let err = classify(&remote(-9999, "something never seen before"));
        assert!(matches!(err, GatewayError::Unknown { .. }));
        assert!(err.is_retryable());
        assert!(err.affects_breaker());
    }

    #[test]
    fn message_fallback_classifies_rate_limit_outside_table() {
        let err = classify_message(-9001, "Too many requests; ban until 1700000");
        assert!(matches!(err, GatewayError::RateLimited { .. }));
    }

    #[test]
    fn unparseable_body_never_panics_and_is_unknown() {
        let err = classify_unparseable("<html>not json</html>");
        assert!(matches!(err, GatewayError::Unknown { code: None, .. }));
    }
}
