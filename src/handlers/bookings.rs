use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::db::queries;
use crate::errors::AppError;
use crate::models::{Actor, Booking, BookingDetails, BookingStatus};
use crate::services::reservation::{self, ReserveRequest};
use crate::services::status;
use crate::state::AppState;

const DEFAULT_PAGE_SIZE: i64 = 10;
const MAX_PAGE_SIZE: i64 = 100;

// POST /bookings
pub async fn create_booking(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Json(body): Json<ReserveRequest>,
) -> Result<(StatusCode, Json<BookingDetails>), AppError> {
    let details = reservation::reserve(&state, &actor, body)?;
    Ok((StatusCode::CREATED, Json(details)))
}

// GET /bookings/:id
pub async fn get_booking(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<String>,
) -> Result<Json<BookingDetails>, AppError> {
    let conn = state.conn()?;
    let booking = queries::get_booking(&conn, &id)?.ok_or(AppError::NotFound("booking"))?;
    let facility =
        queries::get_facility(&conn, &booking.facility_id)?.ok_or(AppError::FacilityNotFound)?;

    if booking.user_id != actor.user_id
        && !actor.is_admin()
        && !actor.owns_facility(&facility.owner_id)
    {
        return Err(AppError::Forbidden);
    }

    Ok(Json(BookingDetails {
        booking,
        facility_name: facility.name,
        facility_address: facility.address,
    }))
}

#[derive(Deserialize)]
pub struct MyBookingsQuery {
    pub status: Option<BookingStatus>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Serialize)]
pub struct MyBookingsResponse {
    bookings: Vec<Booking>,
    total: i64,
    total_pages: i64,
    current_page: i64,
}

// GET /bookings/my-bookings
pub async fn my_bookings(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Query(query): Query<MyBookingsQuery>,
) -> Result<Json<MyBookingsResponse>, AppError> {
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);

    let conn = state.conn()?;
    let total = queries::count_user_bookings(&conn, &actor.user_id, query.status)?;
    let bookings = queries::list_user_bookings(
        &conn,
        &actor.user_id,
        query.status,
        limit,
        (page - 1) * limit,
    )?;

    Ok(Json(MyBookingsResponse {
        bookings,
        total,
        total_pages: (total + limit - 1) / limit,
        current_page: page,
    }))
}

#[derive(Deserialize)]
pub struct UpdateStatusBody {
    pub status: BookingStatus,
    #[serde(default, alias = "cancellation_reason")]
    pub reason: Option<String>,
}

// PATCH /bookings/:id/status
pub async fn update_status(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<String>,
    Json(body): Json<UpdateStatusBody>,
) -> Result<Json<Booking>, AppError> {
    let booking = status::update_status(&state, &actor, &id, body.status, body.reason).await?;
    Ok(Json(booking))
}
