//! Order read and status endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use common::OrderId;
use domain::{Order, OrderStatus};
use saga::StatusChange;
use serde::Serialize;

use super::parse_id;
use crate::AppState;
use crate::error::ApiError;

#[derive(Serialize)]
pub struct NextStatusesResponse {
    pub order_id: String,
    pub status: OrderStatus,
    pub next_statuses: Vec<OrderStatus>,
}

/// GET /orders/{id}
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Order>, ApiError> {
    let order_id: OrderId = parse_id("order", &id)?;
    Ok(Json(state.bookings.order(order_id).await?))
}

/// GET /orders/{id}/next-statuses: statuses the table allows next, before guards.
#[tracing::instrument(skip(state))]
pub async fn next_statuses(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<NextStatusesResponse>, ApiError> {
    let order_id: OrderId = parse_id("order", &id)?;
    let order = state.bookings.order(order_id).await?;

    Ok(Json(NextStatusesResponse {
        order_id: order_id.to_string(),
        status: order.status(),
        next_statuses: order.next_statuses(),
    }))
}

/// POST /orders/{id}/status
#[tracing::instrument(skip(state, change))]
pub async fn change_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(change): Json<StatusChange>,
) -> Result<Json<Order>, ApiError> {
    let order_id: OrderId = parse_id("order", &id)?;
    Ok(Json(state.bookings.change_status(order_id, change).await?))
}
