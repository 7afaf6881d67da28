use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;

use crate::errors::AppError;
use crate::models::Actor;
use crate::services::reservation::{self, CourtAvailability};
use crate::state::AppState;

const DEFAULT_SLOT_MINUTES: u32 = 60;

#[derive(Deserialize)]
pub struct AvailabilityQuery {
    pub date: String,
    pub slot_minutes: Option<u32>,
}

// GET /facilities/:facility_id/courts/:court_id/availability
pub async fn court_availability(
    State(state): State<Arc<AppState>>,
    _actor: Actor,
    Path((facility_id, court_id)): Path<(String, String)>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Json<CourtAvailability>, AppError> {
    let availability = reservation::availability(
        &state,
        &facility_id,
        &court_id,
        &query.date,
        query.slot_minutes.unwrap_or(DEFAULT_SLOT_MINUTES),
    )?;
    Ok(Json(availability))
}
