//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use capacity::CapacityError;
use domain::{BookingError, DomainError, OrderError};
use gateway::{ClassifiedError, ErrorCategory};
use saga::SagaError;
use serde::Serialize;
use store::StoreError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Booking, saga or order error.
    Saga(SagaError),
    /// Slot generation or lookup error.
    Capacity(CapacityError),
    /// Internal server error.
    Internal(String),
}

/// JSON body of every error response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: String,
    pub user_message: String,
    pub suggested_action: String,
    pub retryable: bool,
}

struct Mapped {
    status: StatusCode,
    code: &'static str,
    user_message: &'static str,
    suggested_action: &'static str,
    retryable: bool,
}

impl Mapped {
    fn new(status: StatusCode, code: &'static str, user_message: &'static str) -> Self {
        Self {
            status,
            code,
            user_message,
            suggested_action: "",
            retryable: false,
        }
    }

    fn action(mut self, suggested_action: &'static str) -> Self {
        self.suggested_action = suggested_action;
        self
    }

    fn retryable(mut self) -> Self {
        self.retryable = true;
        self
    }

    fn into_body(self, error: String) -> (StatusCode, ErrorBody) {
        (
            self.status,
            ErrorBody {
                error,
                code: self.code.to_string(),
                user_message: self.user_message.to_string(),
                suggested_action: self.suggested_action.to_string(),
                retryable: self.retryable,
            },
        )
    }
}

const TRY_LATER: &str = "Please try again later or contact support.";

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::NotFound(msg) => {
                Mapped::new(StatusCode::NOT_FOUND, "not_found", "We couldn't find that.")
                    .into_body(msg)
            }
            ApiError::BadRequest(msg) => Mapped::new(
                StatusCode::BAD_REQUEST,
                "bad_request",
                "The request was not valid.",
            )
            .into_body(msg),
            ApiError::Saga(err) => saga_error_to_response(err),
            ApiError::Capacity(err) => {
                let message = err.to_string();
                capacity_error_mapping(&err).into_body(message)
            }
            ApiError::Internal(msg) => {
                Mapped::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "Something went wrong on our side.",
                )
                .action(TRY_LATER)
                .into_body(msg)
            }
        };

        if status.is_server_error() {
            tracing::error!(code = %body.code, error = %body.error, "request failed");
        } else {
            tracing::debug!(code = %body.code, error = %body.error, "request rejected");
        }
        (status, axum::Json(body)).into_response()
    }
}

fn saga_error_to_response(err: SagaError) -> (StatusCode, ErrorBody) {
    let message = err.to_string();
    match err.root() {
        SagaError::Gateway(classified) => gateway_error_to_response(classified, message),
        SagaError::Validation(booking) => booking_error_mapping(booking).into_body(message),
        SagaError::SlotMismatch { .. } => Mapped::new(
            StatusCode::BAD_REQUEST,
            "slot_mismatch",
            "That time slot isn't available for this booking.",
        )
        .action("Pick a slot from the current availability.")
        .into_body(message),
        SagaError::Capacity(capacity) => capacity_error_mapping(capacity).into_body(message),
        SagaError::Store(store) => store_error_mapping(store).into_body(message),
        SagaError::Domain(domain) => domain_error_mapping(domain).into_body(message),
        SagaError::OrderNotFound(_) => {
            Mapped::new(StatusCode::NOT_FOUND, "order_not_found", "We couldn't find that order.")
                .into_body(message)
        }
        SagaError::SagaNotFound(_) => Mapped::new(
            StatusCode::NOT_FOUND,
            "saga_not_found",
            "We couldn't find that booking attempt.",
        )
        .into_body(message),
        SagaError::Superseded(_) => Mapped::new(
            StatusCode::CONFLICT,
            "saga_superseded",
            "This booking attempt timed out and was closed.",
        )
        .action("Check your bookings before trying again.")
        .into_body(message),
        SagaError::Serialization(_) | SagaError::Unresolved { .. } => Mapped::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_error",
            "Something went wrong on our side.",
        )
        .action(TRY_LATER)
        .into_body(message),
    }
}

fn gateway_error_to_response(
    classified: &ClassifiedError,
    message: String,
) -> (StatusCode, ErrorBody) {
    let status = match classified.category {
        ErrorCategory::CardDeclined
        | ErrorCategory::InsufficientFunds
        | ErrorCategory::ExpiredCard
        | ErrorCategory::InvalidCard
        | ErrorCategory::AuthenticationRequired
        | ErrorCategory::ProcessingError => StatusCode::PAYMENT_REQUIRED,
        ErrorCategory::NetworkError | ErrorCategory::QuotaExceeded => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        ErrorCategory::GatewayInternal | ErrorCategory::Unknown => StatusCode::BAD_GATEWAY,
    };
    (
        status,
        ErrorBody {
            error: message,
            code: classified.code.clone(),
            user_message: classified.user_message.clone(),
            suggested_action: classified.suggested_action.clone(),
            retryable: classified.retryable,
        },
    )
}

fn booking_error_mapping(err: &BookingError) -> Mapped {
    let user_message = match err {
        BookingError::InvalidAmount { .. } => "The estimated amount must be positive.",
        BookingError::InvalidPaymentMethod => "The card details are missing.",
        BookingError::InvalidAddress { .. } => "The address is incomplete.",
        BookingError::InvalidGuest { .. } => "Please check your name, email and phone number.",
        BookingError::InvalidSchedule { .. } => "The pickup or delivery time is not valid.",
        BookingError::InvalidDetails => "The service details are not valid.",
    };
    Mapped::new(StatusCode::BAD_REQUEST, "invalid_booking", user_message)
        .action("Check the booking details and try again.")
}

fn capacity_error_mapping(err: &CapacityError) -> Mapped {
    match err {
        CapacityError::InvalidTemplate { .. } => Mapped::new(
            StatusCode::BAD_REQUEST,
            "invalid_template",
            "The slot template is not valid.",
        ),
        CapacityError::SlotNotFound(_) => {
            Mapped::new(StatusCode::NOT_FOUND, "slot_not_found", "That time slot doesn't exist.")
        }
        CapacityError::SlotFull { .. } => Mapped::new(
            StatusCode::CONFLICT,
            "slot_full",
            "That time slot was just booked up.",
        )
        .action("Pick another time slot."),
        CapacityError::Store(store) => store_error_mapping(store),
    }
}

fn store_error_mapping(err: &StoreError) -> Mapped {
    if err.is_conflict() {
        return Mapped::new(
            StatusCode::CONFLICT,
            "version_conflict",
            "The order changed while we were updating it.",
        )
        .action("Reload the order and try again.")
        .retryable();
    }
    match err {
        StoreError::OrderNotFound(_) => {
            Mapped::new(StatusCode::NOT_FOUND, "order_not_found", "We couldn't find that order.")
        }
        StoreError::SagaNotFound(_) => Mapped::new(
            StatusCode::NOT_FOUND,
            "saga_not_found",
            "We couldn't find that booking attempt.",
        ),
        StoreError::SlotNotFound(_) => {
            Mapped::new(StatusCode::NOT_FOUND, "slot_not_found", "That time slot doesn't exist.")
        }
        _ => Mapped::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "storage_error",
            "Something went wrong on our side.",
        )
        .action(TRY_LATER),
    }
}

fn domain_error_mapping(err: &DomainError) -> Mapped {
    match err {
        DomainError::Order(OrderError::Transition(_) | OrderError::TerminalStatus { .. }) => {
            Mapped::new(
                StatusCode::CONFLICT,
                "invalid_transition",
                "The order can't move to that status now.",
            )
        }
        DomainError::Order(OrderError::TotalBelowSubtotal { .. } | OrderError::InvalidWindow { .. })
        | DomainError::Booking(_) => Mapped::new(
            StatusCode::BAD_REQUEST,
            "invalid_order",
            "The order details are not valid.",
        ),
        _ => Mapped::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_error",
            "Something went wrong on our side.",
        )
        .action(TRY_LATER),
    }
}

impl From<SagaError> for ApiError {
    fn from(err: SagaError) -> Self {
        ApiError::Saga(err)
    }
}

impl From<CapacityError> for ApiError {
    fn from(err: CapacityError) -> Self {
        ApiError::Capacity(err)
    }
}
