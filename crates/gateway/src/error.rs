//! Raw gateway errors, as reported by the gateway before classification.

use thiserror::Error;

/// Broad error family reported by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayErrorKind {
    /// The card was rejected.
    Card,
    InvalidRequest,
    /// The gateway failed internally.
    Api,
    /// The request never got a response.
    Connection,
    RateLimit,
    /// Our credentials were rejected.
    Authentication,
    Idempotency,
    /// Rejected locally by an open circuit breaker.
    CircuitOpen,
}

impl GatewayErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayErrorKind::Card => "card_error",
            GatewayErrorKind::InvalidRequest => "invalid_request_error",
            GatewayErrorKind::Api => "api_error",
            GatewayErrorKind::Connection => "api_connection_error",
            GatewayErrorKind::RateLimit => "rate_limit_error",
            GatewayErrorKind::Authentication => "authentication_error",
            GatewayErrorKind::Idempotency => "idempotency_error",
            GatewayErrorKind::CircuitOpen => "circuit_open",
        }
    }
}

impl std::fmt::Display for GatewayErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error returned by a payment gateway call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct GatewayError {
    pub kind: GatewayErrorKind,
    pub code: Option<String>,
    /// Issuer reason for card declines.
    pub decline_code: Option<String>,
    pub message: String,
}

impl GatewayError {
    pub fn new(kind: GatewayErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: None,
            decline_code: None,
            message: message.into(),
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_decline_code(mut self, decline_code: impl Into<String>) -> Self {
        self.decline_code = Some(decline_code.into());
        self
    }

    /// A generic card decline with the issuer's reason.
    pub fn card_declined(decline_code: impl Into<String>) -> Self {
        Self::new(GatewayErrorKind::Card, "Your card was declined.")
            .with_code("card_declined")
            .with_decline_code(decline_code)
    }

    /// A card error with a specific code, e.g. `expired_card`.
    pub fn card(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(GatewayErrorKind::Card, message).with_code(code)
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorKind::Connection, message)
    }

    pub fn rate_limited() -> Self {
        Self::new(GatewayErrorKind::RateLimit, "Too many requests").with_code("rate_limit")
    }

    pub fn api(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorKind::Api, message)
    }

    pub fn invalid_request(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(GatewayErrorKind::InvalidRequest, message).with_code(code)
    }

    pub fn resource_missing(what: &str, id: &str) -> Self {
        Self::invalid_request("resource_missing", format!("No such {what}: '{id}'"))
    }

    pub fn circuit_open(breaker: &str) -> Self {
        Self::new(
            GatewayErrorKind::CircuitOpen,
            format!("circuit breaker '{breaker}' is open"),
        )
        .with_code("circuit_open")
    }

    /// True for failures that say the gateway itself is unhealthy.
    ///
    /// Card declines and bad requests are answers from a healthy gateway
    /// and never count toward opening a breaker.
    pub fn is_service_failure(&self) -> bool {
        matches!(
            self.kind,
            GatewayErrorKind::Api | GatewayErrorKind::Connection | GatewayErrorKind::RateLimit
        )
    }
}

/// Result type for gateway calls.
pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_card_declined_carries_codes() {
        let err = GatewayError::card_declined("insufficient_funds");
        assert_eq!(err.kind, GatewayErrorKind::Card);
        assert_eq!(err.code.as_deref(), Some("card_declined"));
        assert_eq!(err.decline_code.as_deref(), Some("insufficient_funds"));
        assert_eq!(err.to_string(), "card_error: Your card was declined.");
    }

    #[test]
    fn test_service_failures() {
        assert!(GatewayError::connection("reset").is_service_failure());
        assert!(GatewayError::api("boom").is_service_failure());
        assert!(GatewayError::rate_limited().is_service_failure());
        assert!(!GatewayError::card_declined("generic_decline").is_service_failure());
        assert!(!GatewayError::resource_missing("payment_method", "pm_x").is_service_failure());
        assert!(!GatewayError::circuit_open("general").is_service_failure());
    }
}
