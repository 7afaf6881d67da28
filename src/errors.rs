use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use rust_decimal::Decimal;

use crate::models::BookingStatus;
use crate::services::time::TimeError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("facility not found")]
    FacilityNotFound,

    #[error("facility is not accepting bookings")]
    FacilityInactive,

    #[error("court not found")]
    CourtNotFound,

    #[error("court is not active")]
    CourtInactive,

    #[error("{0}")]
    InvalidTime(#[from] TimeError),

    #[error("invalid date: {0}")]
    InvalidDate(String),

    #[error("end time must be after start time")]
    InvalidInterval,

    #[error("duration must be a positive number of hours")]
    InvalidDuration,

    #[error("duration of {given} hours does not match the {minutes} minute interval")]
    DurationMismatch { given: Decimal, minutes: u32 },

    #[error("that time is outside the court's operating hours: {hours}")]
    OutsideOperatingHours { hours: String },

    #[error("time slot not available")]
    SlotUnavailable,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("unauthorized")]
    Unauthorized,

    #[error("access denied")]
    Forbidden,

    #[error("cannot change booking from {} to {}", .from.as_str(), .to.as_str())]
    InvalidTransition {
        from: BookingStatus,
        to: BookingStatus,
    },

    #[error("booking cannot be paid in its current state")]
    BookingNotPayable,

    #[error("payment not completed (provider status: {0})")]
    PaymentNotCompleted(String),

    #[error("payment provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("booking was modified concurrently, please retry")]
    ConcurrentModification,

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::FacilityNotFound | AppError::CourtNotFound | AppError::NotFound(_) => {
                StatusCode::NOT_FOUND
            }
            AppError::FacilityInactive
            | AppError::CourtInactive
            | AppError::InvalidTime(_)
            | AppError::InvalidDate(_)
            | AppError::InvalidInterval
            | AppError::InvalidDuration
            | AppError::DurationMismatch { .. }
            | AppError::OutsideOperatingHours { .. }
            | AppError::BookingNotPayable
            | AppError::PaymentNotCompleted(_) => StatusCode::BAD_REQUEST,
            AppError::SlotUnavailable
            | AppError::InvalidTransition { .. }
            | AppError::ConcurrentModification => StatusCode::CONFLICT,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::ProviderUnavailable(_) => StatusCode::BAD_GATEWAY,
            AppError::Database(_) | AppError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::FacilityNotFound => "FACILITY_NOT_FOUND",
            AppError::FacilityInactive => "FACILITY_INACTIVE",
            AppError::CourtNotFound => "COURT_NOT_FOUND",
            AppError::CourtInactive => "COURT_INACTIVE",
            AppError::InvalidTime(_) => "INVALID_TIME_FORMAT",
            AppError::InvalidDate(_) => "INVALID_DATE",
            AppError::InvalidInterval => "INVALID_INTERVAL",
            AppError::InvalidDuration => "INVALID_DURATION",
            AppError::DurationMismatch { .. } => "DURATION_MISMATCH",
            AppError::OutsideOperatingHours { .. } => "OUTSIDE_OPERATING_HOURS",
            AppError::SlotUnavailable => "SLOT_UNAVAILABLE",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Unauthorized => "UNAUTHORIZED",
            AppError::Forbidden => "FORBIDDEN",
            AppError::InvalidTransition { .. } => "INVALID_TRANSITION",
            AppError::BookingNotPayable => "BOOKING_NOT_PAYABLE",
            AppError::PaymentNotCompleted(_) => "PAYMENT_NOT_COMPLETED",
            AppError::ProviderUnavailable(_) => "PROVIDER_UNAVAILABLE",
            AppError::ConcurrentModification => "CONCURRENT_MODIFICATION",
            AppError::Database(_) | AppError::Storage(_) => "INTERNAL",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Provider and storage details stay in the logs.
        let message = match &self {
            AppError::ProviderUnavailable(detail) => {
                tracing::error!(error = %detail, "payment provider call failed");
                "payment provider unavailable, please try again later".to_string()
            }
            AppError::Database(e) => {
                tracing::error!(error = %e, "database error");
                "internal server error".to_string()
            }
            AppError::Storage(e) => {
                tracing::error!(error = %e, "storage error");
                "internal server error".to_string()
            }
            other => other.to_string(),
        };

        let body = serde_json::json!({ "error": message, "code": self.code() });
        (status, axum::Json(body)).into_response()
    }
}
