use chrono::{DateTime, NaiveDate};
use rusqlite::TransactionBehavior;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::db::queries;
use crate::errors::AppError;
use crate::models::{
    Actor, Booking, BookingDetails, BookingEvent, BookingEventKind, BookingStatus, CourtSnapshot,
    PaymentStatus,
};
use crate::services::time::{self, MINUTES_PER_DAY};
use crate::state::AppState;

#[derive(Debug, Clone, Deserialize)]
pub struct ReserveRequest {
    pub facility_id: String,
    pub court_id: String,
    pub date: String,
    pub start_time: String,
    pub end_time: String,
    #[serde(alias = "duration")]
    pub duration_hours: Decimal,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Accepts a plain `YYYY-MM-DD` day or an RFC 3339 timestamp, whose calendar
/// day (in its own offset) is used.
pub fn parse_booking_date(s: &str) -> Result<NaiveDate, AppError> {
    let s = s.trim();
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .or_else(|_| DateTime::parse_from_rfc3339(s).map(|dt| dt.date_naive()))
        .map_err(|_| AppError::InvalidDate(s.to_string()))
}

/// `duration_hours` must describe the same span as the interval, to the
/// nearest minute.
fn check_duration(duration_hours: Decimal, interval_minutes: u32) -> Result<(), AppError> {
    if duration_hours <= Decimal::ZERO {
        return Err(AppError::InvalidDuration);
    }
    let given_minutes = (duration_hours * Decimal::from(60)).round();
    if given_minutes != Decimal::from(interval_minutes) {
        return Err(AppError::DurationMismatch {
            given: duration_hours,
            minutes: interval_minutes,
        });
    }
    Ok(())
}

/// Reserves a court slot for `actor`. The conflict check and the insert run in
/// one immediate transaction on the shared ledger connection, and the storage
/// trigger rejects any overlapping insert that slips past the check.
pub fn reserve(
    state: &AppState,
    actor: &Actor,
    req: ReserveRequest,
) -> Result<BookingDetails, AppError> {
    let date = parse_booking_date(&req.date)?;
    let start = time::to_minutes(&req.start_time)?;
    let end = time::to_end_minutes(&req.end_time)?;
    if end <= start {
        return Err(AppError::InvalidInterval);
    }
    check_duration(req.duration_hours, end - start)?;

    let (details, facility_owner_id) = {
        let mut conn = state.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let facility =
            queries::get_facility(&tx, &req.facility_id)?.ok_or(AppError::FacilityNotFound)?;
        if !facility.is_active {
            return Err(AppError::FacilityInactive);
        }
        let court = facility
            .court(&req.court_id)
            .ok_or(AppError::CourtNotFound)?;
        if !court.is_active {
            return Err(AppError::CourtInactive);
        }
        if let Some(hours) = court.operating_hours.as_ref().filter(|h| !h.is_empty()) {
            if !hours.covers(date, start, end) {
                return Err(AppError::OutsideOperatingHours {
                    hours: hours.to_human_readable(),
                });
            }
        }

        let conflicts = queries::find_overlapping(
            &tx,
            &facility.id,
            &court.id,
            &date,
            start,
            end,
            &BookingStatus::ACTIVE,
        )?;
        if let Some(existing) = conflicts.first() {
            tracing::info!(
                facility_id = %facility.id,
                court_id = %court.id,
                date = %date,
                conflicting_booking = %existing.id,
                "slot unavailable"
            );
            return Err(AppError::SlotUnavailable);
        }

        let now = queries::timestamp_now();
        let booking = Booking {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: actor.user_id.clone(),
            facility_id: facility.id.clone(),
            court: CourtSnapshot {
                court_id: court.id.clone(),
                court_name: court.name.clone(),
                sport_type: court.sport_type.clone(),
            },
            date,
            start_time: time::from_minutes(start),
            end_time: time::format_end(end),
            duration_hours: req.duration_hours,
            total_amount: (court.price_per_hour * req.duration_hours).round_dp(2),
            booking_status: BookingStatus::Pending,
            payment_status: PaymentStatus::Pending,
            payment_intent_id: None,
            notes: req.notes.filter(|n| !n.trim().is_empty()),
            cancellation_reason: None,
            cancelled_at: None,
            cancelled_by: None,
            created_at: now,
            updated_at: now,
        };

        if let Err(e) = queries::insert_booking(&tx, &booking, start, end) {
            if queries::is_slot_conflict(&e) {
                return Err(AppError::SlotUnavailable);
            }
            return Err(e.into());
        }
        tx.commit()?;

        (
            BookingDetails {
                booking,
                facility_name: facility.name.clone(),
                facility_address: facility.address.clone(),
            },
            facility.owner_id.clone(),
        )
    };

    tracing::info!(
        booking_id = %details.booking.id,
        user_id = %actor.user_id,
        court_id = %details.booking.court.court_id,
        date = %details.booking.date,
        start = %details.booking.start_time,
        end = %details.booking.end_time,
        total = %details.booking.total_amount,
        "booking reserved"
    );

    state.notifier.emit(BookingEvent::new(
        BookingEventKind::BookingCreated,
        &details.booking,
        &facility_owner_id,
    ));

    Ok(details)
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Slot {
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CourtAvailability {
    pub facility_id: String,
    pub court_id: String,
    pub date: NaiveDate,
    pub booked: Vec<Slot>,
    pub open: Vec<Slot>,
}

/// Booked intervals of a court on a day, and the free `slot_minutes` slots
/// left inside its operating windows.
pub fn availability(
    state: &AppState,
    facility_id: &str,
    court_id: &str,
    date: &str,
    slot_minutes: u32,
) -> Result<CourtAvailability, AppError> {
    let date = parse_booking_date(date)?;
    if slot_minutes == 0 || slot_minutes > MINUTES_PER_DAY {
        return Err(AppError::InvalidDuration);
    }

    let (court, bookings) = {
        let conn = state.conn()?;
        let facility = queries::get_facility(&conn, facility_id)?.ok_or(AppError::FacilityNotFound)?;
        let court = facility
            .court(court_id)
            .cloned()
            .ok_or(AppError::CourtNotFound)?;
        let bookings =
            queries::bookings_on(&conn, facility_id, court_id, &date, &BookingStatus::ACTIVE)?;
        (court, bookings)
    };
    if !court.is_active {
        return Err(AppError::CourtInactive);
    }

    let mut booked = Vec::with_capacity(bookings.len());
    let mut taken = Vec::with_capacity(bookings.len());
    for booking in &bookings {
        taken.push((
            time::to_minutes(&booking.start_time)?,
            time::to_end_minutes(&booking.end_time)?,
        ));
        booked.push(Slot {
            start: booking.start_time.clone(),
            end: booking.end_time.clone(),
        });
    }

    let windows = match court.operating_hours.as_ref().filter(|h| !h.is_empty()) {
        Some(hours) => hours.windows_on(date),
        None => vec![(0, MINUTES_PER_DAY)],
    };

    let mut open = vec![];
    for (window_start, window_end) in windows {
        let mut cursor = window_start;
        while cursor + slot_minutes <= window_end {
            let slot_end = cursor + slot_minutes;
            let free = !taken
                .iter()
                .any(|&(s, e)| time::minutes_overlap(cursor, slot_end, s, e));
            if free {
                open.push(Slot {
                    start: time::from_minutes(cursor),
                    end: time::format_end(slot_end),
                });
            }
            cursor = slot_end;
        }
    }

    Ok(CourtAvailability {
        facility_id: facility_id.to_string(),
        court_id: court_id.to_string(),
        date,
        booked,
        open,
    })
}
