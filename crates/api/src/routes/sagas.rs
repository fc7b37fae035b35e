//! Saga record lookup.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use common::SagaId;
use domain::SagaRecord;

use super::parse_id;
use crate::AppState;
use crate::error::ApiError;

/// GET /sagas/{id}
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SagaRecord>, ApiError> {
    let saga_id: SagaId = parse_id("saga", &id)?;
    Ok(Json(state.bookings.saga_record(saga_id).await?))
}
