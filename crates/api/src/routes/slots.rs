//! Slot generation and availability.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Query, State};
use capacity::{GenerationReport, SlotTemplate};
use chrono::NaiveDate;
use common::PartnerId;
use domain::{CapacitySlot, ServiceType};
use serde::Deserialize;
use store::SlotQuery;

use crate::AppState;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct SlotListParams {
    pub service_type: Option<ServiceType>,
    pub day: Option<NaiveDate>,
    pub partner_id: Option<PartnerId>,
    #[serde(default)]
    pub available: bool,
}

impl SlotListParams {
    fn into_query(self) -> SlotQuery {
        // `for_day` only contributes the window; the service filter is the caller's.
        let mut query = match self.day {
            Some(day) => SlotQuery::for_day(ServiceType::Laundry, day),
            None => SlotQuery::new(),
        };
        query.service_type = self.service_type;
        if let Some(partner_id) = self.partner_id {
            query = query.partner(partner_id);
        }
        if self.available {
            query = query.only_available();
        }
        query
    }
}

/// POST /slots/generate: idempotent, existing slots are left untouched.
#[tracing::instrument(
    skip(state, template),
    fields(partner_id = %template.partner_id, day = %template.day)
)]
pub async fn generate(
    State(state): State<Arc<AppState>>,
    Json(template): Json<SlotTemplate>,
) -> Result<Json<GenerationReport>, ApiError> {
    Ok(Json(state.bookings.ledger().generate(&template).await?))
}

/// GET /slots?service_type=LAUNDRY&day=2026-10-26&available=true
#[tracing::instrument(skip(state))]
pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SlotListParams>,
) -> Result<Json<Vec<CapacitySlot>>, ApiError> {
    let slots = state
        .bookings
        .ledger()
        .availability(params.into_query())
        .await?;
    Ok(Json(slots))
}
