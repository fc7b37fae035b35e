//! Maps raw gateway errors to a small taxonomy with retry and messaging
//! hints.

use std::time::Duration;

use serde::Serialize;

use crate::error::{GatewayError, GatewayErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    CardDeclined,
    InsufficientFunds,
    ExpiredCard,
    InvalidCard,
    NetworkError,
    QuotaExceeded,
    AuthenticationRequired,
    ProcessingError,
    GatewayInternal,
    Unknown,
}

impl ErrorCategory {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorCategory::CardDeclined => "card_declined",
            ErrorCategory::InsufficientFunds => "insufficient_funds",
            ErrorCategory::ExpiredCard => "expired_card",
            ErrorCategory::InvalidCard => "invalid_card",
            ErrorCategory::NetworkError => "network_error",
            ErrorCategory::QuotaExceeded => "quota_exceeded",
            ErrorCategory::AuthenticationRequired => "authentication_required",
            ErrorCategory::ProcessingError => "processing_error",
            ErrorCategory::GatewayInternal => "gateway_error",
            ErrorCategory::Unknown => "unknown_error",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCategory::NetworkError
                | ErrorCategory::QuotaExceeded
                | ErrorCategory::ProcessingError
        )
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            ErrorCategory::CardDeclined => "Your card was declined.",
            ErrorCategory::InsufficientFunds => "Your card has insufficient funds.",
            ErrorCategory::ExpiredCard => "Your card has expired.",
            ErrorCategory::InvalidCard => "Your card details are invalid.",
            ErrorCategory::NetworkError => "We couldn't reach our payment provider.",
            ErrorCategory::QuotaExceeded => "Our payment provider is busy right now.",
            ErrorCategory::AuthenticationRequired => "Your bank needs you to confirm this card.",
            ErrorCategory::ProcessingError => "Your card couldn't be processed.",
            ErrorCategory::GatewayInternal => "Our payment provider had a problem.",
            ErrorCategory::Unknown => "Something went wrong saving your card.",
        }
    }

    pub fn suggested_action(&self) -> &'static str {
        match self {
            ErrorCategory::CardDeclined => "Try a different card or contact your bank.",
            ErrorCategory::InsufficientFunds => "Use a different card.",
            ErrorCategory::ExpiredCard => "Update the expiry date or use a different card.",
            ErrorCategory::InvalidCard => "Check the card number, expiry and CVC.",
            ErrorCategory::NetworkError
            | ErrorCategory::QuotaExceeded
            | ErrorCategory::ProcessingError => "Please try again in a moment.",
            ErrorCategory::AuthenticationRequired => {
                "Complete the verification step from your bank."
            }
            ErrorCategory::GatewayInternal | ErrorCategory::Unknown => {
                "Please try again later or contact support."
            }
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// A gateway error after classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassifiedError {
    pub category: ErrorCategory,
    /// Stable code; usually the category's, `circuit_open` for local rejections.
    pub code: String,
    pub retryable: bool,
    pub user_message: String,
    pub suggested_action: String,
    /// The raw gateway message, for logs only.
    #[serde(skip)]
    pub detail: String,
}

impl ClassifiedError {
    fn from_category(category: ErrorCategory, detail: impl Into<String>) -> Self {
        Self {
            category,
            code: category.code().to_string(),
            retryable: category.is_retryable(),
            user_message: category.user_message().to_string(),
            suggested_action: category.suggested_action().to_string(),
            detail: detail.into(),
        }
    }
}

impl std::fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.detail)
    }
}

const INVALID_CARD_CODES: &[&str] = &[
    "incorrect_number",
    "invalid_number",
    "incorrect_cvc",
    "invalid_cvc",
    "invalid_expiry_month",
    "invalid_expiry_year",
    "incorrect_zip",
];

/// Classifies a raw gateway error.
pub fn classify(error: &GatewayError) -> ClassifiedError {
    let code = error.code.as_deref();
    let decline = error.decline_code.as_deref();

    let category = match error.kind {
        GatewayErrorKind::Card => classify_card(code, decline),
        GatewayErrorKind::Connection => ErrorCategory::NetworkError,
        GatewayErrorKind::CircuitOpen => {
            let mut classified =
                ClassifiedError::from_category(ErrorCategory::NetworkError, &error.message);
            classified.code = "circuit_open".to_string();
            return classified;
        }
        GatewayErrorKind::RateLimit => ErrorCategory::QuotaExceeded,
        GatewayErrorKind::Api | GatewayErrorKind::Authentication => ErrorCategory::GatewayInternal,
        GatewayErrorKind::InvalidRequest => match code {
            Some("setup_intent_authentication_failure" | "authentication_required") => {
                ErrorCategory::AuthenticationRequired
            }
            Some("payment_method_unactivated" | "payment_method_invalid_parameter") => {
                ErrorCategory::InvalidCard
            }
            _ => ErrorCategory::Unknown,
        },
        GatewayErrorKind::Idempotency => ErrorCategory::Unknown,
    };

    ClassifiedError::from_category(category, &error.message)
}

fn classify_card(code: Option<&str>, decline: Option<&str>) -> ErrorCategory {
    match (code, decline) {
        (_, Some("insufficient_funds")) | (Some("insufficient_funds"), _) => {
            ErrorCategory::InsufficientFunds
        }
        (_, Some("expired_card")) | (Some("expired_card"), _) => ErrorCategory::ExpiredCard,
        (_, Some("authentication_required")) | (Some("authentication_required"), _) => {
            ErrorCategory::AuthenticationRequired
        }
        (Some("processing_error"), _) | (_, Some("processing_error")) => {
            ErrorCategory::ProcessingError
        }
        (Some(code), _) if INVALID_CARD_CODES.contains(&code) => ErrorCategory::InvalidCard,
        _ => ErrorCategory::CardDeclined,
    }
}

/// Retry only retryable categories, and only while `attempt < max_retries`.
///
/// `attempt` counts retries already made, starting at zero.
pub fn should_retry(classified: &ClassifiedError, attempt: u32, max_retries: u32) -> bool {
    classified.category.is_retryable() && attempt < max_retries
}

const BACKOFF_BASE: Duration = Duration::from_millis(250);
const BACKOFF_CAP: Duration = Duration::from_secs(8);

/// Exponential backoff for the given retry attempt.
pub fn backoff_delay(attempt: u32) -> Duration {
    let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
    BACKOFF_BASE.saturating_mul(factor).min(BACKOFF_CAP)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_card_declines() {
        let c = classify(&GatewayError::card_declined("generic_decline"));
        assert_eq!(c.category, ErrorCategory::CardDeclined);
        assert_eq!(c.code, "card_declined");
        assert!(!c.retryable);

        let c = classify(&GatewayError::card_declined("insufficient_funds"));
        assert_eq!(c.category, ErrorCategory::InsufficientFunds);

        let c = classify(&GatewayError::card("expired_card", "Your card has expired."));
        assert_eq!(c.category, ErrorCategory::ExpiredCard);

        let c = classify(&GatewayError::card("incorrect_cvc", "Bad CVC"));
        assert_eq!(c.category, ErrorCategory::InvalidCard);

        let c = classify(&GatewayError::card("processing_error", "Try again"));
        assert_eq!(c.category, ErrorCategory::ProcessingError);
        assert!(c.retryable);
    }

    #[test]
    fn test_infrastructure_errors() {
        let c = classify(&GatewayError::connection("connection reset"));
        assert_eq!(c.category, ErrorCategory::NetworkError);
        assert!(c.retryable);
        assert_eq!(c.detail, "connection reset");

        let c = classify(&GatewayError::rate_limited());
        assert_eq!(c.category, ErrorCategory::QuotaExceeded);
        assert!(c.retryable);

        let c = classify(&GatewayError::api("internal"));
        assert_eq!(c.category, ErrorCategory::GatewayInternal);
        assert!(!c.retryable);
    }

    #[test]
    fn test_circuit_open_is_retryable_network() {
        let c = classify(&GatewayError::circuit_open("payment_confirmation"));
        assert_eq!(c.category, ErrorCategory::NetworkError);
        assert_eq!(c.code, "circuit_open");
        assert!(c.retryable);
    }

    #[test]
    fn test_authentication_required() {
        let err = GatewayError::invalid_request(
            "setup_intent_authentication_failure",
            "authentication failed",
        );
        assert_eq!(classify(&err).category, ErrorCategory::AuthenticationRequired);
    }

    #[test]
    fn test_unknown_fallback() {
        let err = GatewayError::resource_missing("customer", "cus_x");
        let c = classify(&err);
        assert_eq!(c.category, ErrorCategory::Unknown);
        assert!(!c.user_message.is_empty());
        assert!(!c.suggested_action.is_empty());
    }

    #[test]
    fn test_should_retry() {
        let network = classify(&GatewayError::connection("timeout"));
        assert!(should_retry(&network, 0, 3));
        assert!(should_retry(&network, 2, 3));
        assert!(!should_retry(&network, 3, 3));

        let declined = classify(&GatewayError::card_declined("generic_decline"));
        assert!(!should_retry(&declined, 0, 3));
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        assert_eq!(backoff_delay(0), Duration::from_millis(250));
        assert_eq!(backoff_delay(1), Duration::from_millis(500));
        assert_eq!(backoff_delay(3), Duration::from_secs(2));
        assert_eq!(backoff_delay(5), Duration::from_secs(8));
        assert_eq!(backoff_delay(40), Duration::from_secs(8));
    }

    #[test]
    fn test_serialized_shape() {
        let c = classify(&GatewayError::card_declined("generic_decline"));
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(json["category"], "card_declined");
        assert_eq!(json["retryable"], false);
        assert!(json.get("detail").is_none());
    }
}
