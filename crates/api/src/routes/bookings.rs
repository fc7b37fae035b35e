//! Booking endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use domain::{BookingParams, Order};
use resilience::TraceContext;
use saga::ExecuteOptions;
use serde::Serialize;

use crate::AppState;
use crate::error::ApiError;

/// Header carrying a caller-supplied trace id.
pub const TRACE_HEADER: &str = "x-trace-id";

#[derive(Serialize)]
pub struct BookingResponse {
    pub saga_id: String,
    pub trace_id: String,
    pub order: Order,
    pub requires_action: bool,
    pub client_secret: Option<String>,
}

fn trace_from(headers: &HeaderMap) -> TraceContext {
    headers
        .get(TRACE_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(TraceContext::with_trace_id)
        .unwrap_or_else(TraceContext::root)
}

/// POST /bookings: hold capacity and run the payment-setup saga.
#[tracing::instrument(skip_all)]
pub async fn create(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(params): Json<BookingParams>,
) -> Result<(StatusCode, Json<BookingResponse>), ApiError> {
    let trace = trace_from(&headers);
    let options = ExecuteOptions {
        validate_card: state.rollout.is_enabled(&params.identity),
    };

    let result = state.bookings.book(params, options, &trace).await;
    let label = if result.is_ok() { "created" } else { "rejected" };
    metrics::counter!("http_bookings_total", "outcome" => label).increment(1);
    let outcome = result?;

    Ok((
        StatusCode::CREATED,
        Json(BookingResponse {
            saga_id: outcome.saga_id.to_string(),
            trace_id: trace.trace_id,
            order: outcome.order,
            requires_action: outcome.requires_action,
            client_secret: outcome.client_secret,
        }),
    ))
}
