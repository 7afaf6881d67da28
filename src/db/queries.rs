use std::str::FromStr;

use anyhow::Context;
use chrono::{NaiveDate, NaiveDateTime, Timelike, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;

use crate::models::{
    Booking, BookingStatus, Court, CourtSnapshot, Facility, OperatingHours, Payment,
    PaymentRecordStatus, PaymentStatus,
};

const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const DATE_FORMAT: &str = "%Y-%m-%d";

/// Current UTC time at second precision, matching what the ledger stores.
pub fn timestamp_now() -> NaiveDateTime {
    let now = Utc::now().naive_utc();
    now.with_nanosecond(0).unwrap_or(now)
}

fn format_ts(ts: &NaiveDateTime) -> String {
    ts.format(TS_FORMAT).to_string()
}

fn parse_ts(s: &str) -> anyhow::Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, TS_FORMAT).with_context(|| format!("bad timestamp: {s}"))
}

fn format_date(date: &NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn parse_decimal(s: &str) -> anyhow::Result<Decimal> {
    Decimal::from_str(s).with_context(|| format!("bad decimal: {s}"))
}

// ── Facilities ──

pub fn insert_facility(conn: &Connection, facility: &Facility) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO facilities (id, name, owner_id, address, is_active) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            facility.id,
            facility.name,
            facility.owner_id,
            facility.address,
            facility.is_active,
        ],
    )?;

    for court in &facility.courts {
        upsert_court(conn, &facility.id, court)?;
    }
    Ok(())
}

pub fn upsert_court(conn: &Connection, facility_id: &str, court: &Court) -> anyhow::Result<()> {
    let hours = court
        .operating_hours
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    conn.execute(
        "INSERT INTO courts (id, facility_id, name, sport_type, price_per_hour, is_active, operating_hours)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(id) DO UPDATE SET
           name = excluded.name,
           sport_type = excluded.sport_type,
           price_per_hour = excluded.price_per_hour,
           is_active = excluded.is_active,
           operating_hours = excluded.operating_hours",
        params![
            court.id,
            facility_id,
            court.name,
            court.sport_type,
            court.price_per_hour.to_string(),
            court.is_active,
            hours,
        ],
    )?;
    Ok(())
}

pub fn get_facility(conn: &Connection, id: &str) -> anyhow::Result<Option<Facility>> {
    let facility = conn
        .query_row(
            "SELECT id, name, owner_id, address, is_active FROM facilities WHERE id = ?1",
            params![id],
            |row| {
                Ok(Facility {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    owner_id: row.get(2)?,
                    address: row.get(3)?,
                    is_active: row.get(4)?,
                    courts: vec![],
                })
            },
        )
        .optional()?;

    let Some(mut facility) = facility else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT id, name, sport_type, price_per_hour, is_active, operating_hours
         FROM courts WHERE facility_id = ?1 ORDER BY name ASC",
    )?;
    let rows = stmt.query_map(params![id], |row| Ok(parse_court_row(row)))?;
    for row in rows {
        facility.courts.push(row??);
    }

    Ok(Some(facility))
}

fn parse_court_row(row: &rusqlite::Row) -> anyhow::Result<Court> {
    let price: String = row.get(3)?;
    let hours: Option<String> = row.get(5)?;

    Ok(Court {
        id: row.get(0)?,
        name: row.get(1)?,
        sport_type: row.get(2)?,
        price_per_hour: parse_decimal(&price)?,
        is_active: row.get(4)?,
        operating_hours: hours.as_deref().map(OperatingHours::from_json).transpose()?,
    })
}

// ── Bookings ──

const BOOKING_COLUMNS: &str = "id, user_id, facility_id, court_id, court_name, sport_type, booking_date, \
     start_time, end_time, duration_hours, total_amount, booking_status, payment_status, \
     payment_intent_id, notes, cancellation_reason, cancelled_at, cancelled_by, created_at, updated_at";

pub fn insert_booking(
    conn: &Connection,
    booking: &Booking,
    start_minute: u32,
    end_minute: u32,
) -> anyhow::Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO bookings ({BOOKING_COLUMNS}, start_minute, end_minute)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22)"
        ),
        params![
            booking.id,
            booking.user_id,
            booking.facility_id,
            booking.court.court_id,
            booking.court.court_name,
            booking.court.sport_type,
            format_date(&booking.date),
            booking.start_time,
            booking.end_time,
            booking.duration_hours.to_string(),
            booking.total_amount.to_string(),
            booking.booking_status.as_str(),
            booking.payment_status.as_str(),
            booking.payment_intent_id,
            booking.notes,
            booking.cancellation_reason,
            booking.cancelled_at.as_ref().map(format_ts),
            booking.cancelled_by,
            format_ts(&booking.created_at),
            format_ts(&booking.updated_at),
            start_minute,
            end_minute,
        ],
    )?;
    Ok(())
}

/// True when an insert was rejected by the storage-level overlap guard.
pub fn is_slot_conflict(err: &anyhow::Error) -> bool {
    match err.downcast_ref::<rusqlite::Error>() {
        Some(rusqlite::Error::SqliteFailure(_, Some(msg))) => msg.contains("slot_unavailable"),
        _ => false,
    }
}

pub fn get_booking(conn: &Connection, id: &str) -> anyhow::Result<Option<Booking>> {
    let result = conn
        .query_row(
            &format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = ?1"),
            params![id],
            |row| Ok(parse_booking_row(row)),
        )
        .optional()?;

    result.transpose()
}

/// Bookings on the court and day in one of `statuses` whose interval
/// overlaps `[start_minute, end_minute)`.
pub fn find_overlapping(
    conn: &Connection,
    facility_id: &str,
    court_id: &str,
    date: &NaiveDate,
    start_minute: u32,
    end_minute: u32,
    statuses: &[BookingStatus],
) -> anyhow::Result<Vec<Booking>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {BOOKING_COLUMNS} FROM bookings
         WHERE facility_id = ?1 AND court_id = ?2 AND booking_date = ?3
           AND start_minute < ?5 AND end_minute > ?4
         ORDER BY start_minute ASC"
    ))?;

    let rows = stmt.query_map(
        params![facility_id, court_id, format_date(date), start_minute, end_minute],
        |row| Ok(parse_booking_row(row)),
    )?;

    let mut bookings = vec![];
    for row in rows {
        let booking = row??;
        if statuses.contains(&booking.booking_status) {
            bookings.push(booking);
        }
    }
    Ok(bookings)
}

/// Bookings on the court and day in one of `statuses`, earliest first.
pub fn bookings_on(
    conn: &Connection,
    facility_id: &str,
    court_id: &str,
    date: &NaiveDate,
    statuses: &[BookingStatus],
) -> anyhow::Result<Vec<Booking>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {BOOKING_COLUMNS} FROM bookings
         WHERE facility_id = ?1 AND court_id = ?2 AND booking_date = ?3
         ORDER BY start_minute ASC"
    ))?;

    let rows = stmt.query_map(params![facility_id, court_id, format_date(date)], |row| {
        Ok(parse_booking_row(row))
    })?;

    let mut bookings = vec![];
    for row in rows {
        let booking = row??;
        if statuses.contains(&booking.booking_status) {
            bookings.push(booking);
        }
    }
    Ok(bookings)
}

pub fn list_user_bookings(
    conn: &Connection,
    user_id: &str,
    status: Option<BookingStatus>,
    limit: i64,
    offset: i64,
) -> anyhow::Result<Vec<Booking>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {BOOKING_COLUMNS} FROM bookings
         WHERE user_id = ?1 AND (?2 IS NULL OR booking_status = ?2)
         ORDER BY created_at DESC, id DESC LIMIT ?3 OFFSET ?4"
    ))?;

    let rows = stmt.query_map(
        params![user_id, status.map(|s| s.as_str()), limit, offset],
        |row| Ok(parse_booking_row(row)),
    )?;

    let mut bookings = vec![];
    for row in rows {
        bookings.push(row??);
    }
    Ok(bookings)
}

pub fn count_user_bookings(
    conn: &Connection,
    user_id: &str,
    status: Option<BookingStatus>,
) -> anyhow::Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM bookings WHERE user_id = ?1 AND (?2 IS NULL OR booking_status = ?2)",
        params![user_id, status.map(|s| s.as_str())],
        |row| row.get(0),
    )?;
    Ok(count)
}

pub struct Cancellation<'a> {
    pub reason: Option<&'a str>,
    pub cancelled_by: &'a str,
    pub cancelled_at: NaiveDateTime,
}

/// Moves a booking from `expected` to `next`. Returns false when the booking
/// is missing or no longer in `expected`. Cancellation fields are written
/// together with the status so they are present only on cancelled bookings.
pub fn update_booking_status(
    conn: &Connection,
    id: &str,
    expected: BookingStatus,
    next: BookingStatus,
    cancellation: Option<&Cancellation>,
    now: &NaiveDateTime,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE bookings SET booking_status = ?1, cancellation_reason = ?2, cancelled_at = ?3,
             cancelled_by = ?4, updated_at = ?5
         WHERE id = ?6 AND booking_status = ?7",
        params![
            next.as_str(),
            cancellation.and_then(|c| c.reason),
            cancellation.map(|c| format_ts(&c.cancelled_at)),
            cancellation.map(|c| c.cancelled_by),
            format_ts(now),
            id,
            expected.as_str(),
        ],
    )?;
    Ok(count > 0)
}

/// Sets the booking's payment status when it is still `expected`.
pub fn update_booking_payment(
    conn: &Connection,
    id: &str,
    expected: PaymentStatus,
    next: PaymentStatus,
    payment_intent_id: Option<&str>,
    now: &NaiveDateTime,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE bookings SET payment_status = ?1,
             payment_intent_id = COALESCE(?2, payment_intent_id), updated_at = ?3
         WHERE id = ?4 AND payment_status = ?5",
        params![next.as_str(), payment_intent_id, format_ts(now), id, expected.as_str()],
    )?;
    Ok(count > 0)
}

fn parse_booking_row(row: &rusqlite::Row) -> anyhow::Result<Booking> {
    let date_str: String = row.get(6)?;
    let duration_str: String = row.get(9)?;
    let total_str: String = row.get(10)?;
    let status_str: String = row.get(11)?;
    let payment_str: String = row.get(12)?;
    let cancelled_at_str: Option<String> = row.get(16)?;
    let created_at_str: String = row.get(18)?;
    let updated_at_str: String = row.get(19)?;

    Ok(Booking {
        id: row.get(0)?,
        user_id: row.get(1)?,
        facility_id: row.get(2)?,
        court: CourtSnapshot {
            court_id: row.get(3)?,
            court_name: row.get(4)?,
            sport_type: row.get(5)?,
        },
        date: NaiveDate::parse_from_str(&date_str, DATE_FORMAT)
            .with_context(|| format!("bad booking date: {date_str}"))?,
        start_time: row.get(7)?,
        end_time: row.get(8)?,
        duration_hours: parse_decimal(&duration_str)?,
        total_amount: parse_decimal(&total_str)?,
        booking_status: BookingStatus::parse(&status_str)
            .with_context(|| format!("unknown booking status: {status_str}"))?,
        payment_status: PaymentStatus::parse(&payment_str)
            .with_context(|| format!("unknown payment status: {payment_str}"))?,
        payment_intent_id: row.get(13)?,
        notes: row.get(14)?,
        cancellation_reason: row.get(15)?,
        cancelled_at: cancelled_at_str.as_deref().map(parse_ts).transpose()?,
        cancelled_by: row.get(17)?,
        created_at: parse_ts(&created_at_str)?,
        updated_at: parse_ts(&updated_at_str)?,
    })
}

// ── Payments ──

const PAYMENT_COLUMNS: &str = "id, booking_id, user_id, amount, currency, provider, provider_intent_id, \
     provider_charge_id, status, failure_reason, created_at, updated_at";

/// Records a payment attempt. A second insert for the same provider intent is
/// ignored; returns whether a row was written.
pub fn insert_payment(conn: &Connection, payment: &Payment) -> anyhow::Result<bool> {
    let count = conn.execute(
        &format!(
            "INSERT INTO payments ({PAYMENT_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
             ON CONFLICT(provider_intent_id) DO NOTHING"
        ),
        params![
            payment.id,
            payment.booking_id,
            payment.user_id,
            payment.amount.to_string(),
            payment.currency,
            payment.provider,
            payment.provider_intent_id,
            payment.provider_charge_id,
            payment.status.as_str(),
            payment.failure_reason,
            format_ts(&payment.created_at),
            format_ts(&payment.updated_at),
        ],
    )?;
    Ok(count > 0)
}

pub fn get_payment_by_intent(
    conn: &Connection,
    provider_intent_id: &str,
) -> anyhow::Result<Option<Payment>> {
    let result = conn
        .query_row(
            &format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE provider_intent_id = ?1"),
            params![provider_intent_id],
            |row| Ok(parse_payment_row(row)),
        )
        .optional()?;

    result.transpose()
}

pub fn count_payments_for_booking(conn: &Connection, booking_id: &str) -> anyhow::Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM payments WHERE booking_id = ?1",
        params![booking_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// The booking's most recently recorded payment attempt.
pub fn get_latest_payment(conn: &Connection, booking_id: &str) -> anyhow::Result<Option<Payment>> {
    let result = conn
        .query_row(
            &format!(
                "SELECT {PAYMENT_COLUMNS} FROM payments
                 WHERE booking_id = ?1
                 ORDER BY rowid DESC LIMIT 1"
            ),
            params![booking_id],
            |row| Ok(parse_payment_row(row)),
        )
        .optional()?;

    result.transpose()
}

/// The settled payment of a booking, if any.
pub fn get_succeeded_payment(conn: &Connection, booking_id: &str) -> anyhow::Result<Option<Payment>> {
    let result = conn
        .query_row(
            &format!(
                "SELECT {PAYMENT_COLUMNS} FROM payments
                 WHERE booking_id = ?1 AND status = 'succeeded'
                 ORDER BY updated_at DESC LIMIT 1"
            ),
            params![booking_id],
            |row| Ok(parse_payment_row(row)),
        )
        .optional()?;

    result.transpose()
}

pub fn update_payment_status(
    conn: &Connection,
    provider_intent_id: &str,
    status: PaymentRecordStatus,
    charge_id: Option<&str>,
    failure_reason: Option<&str>,
    now: &NaiveDateTime,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE payments SET status = ?1,
             provider_charge_id = COALESCE(?2, provider_charge_id),
             failure_reason = ?3, updated_at = ?4
         WHERE provider_intent_id = ?5",
        params![
            status.as_str(),
            charge_id,
            failure_reason,
            format_ts(now),
            provider_intent_id,
        ],
    )?;
    Ok(count > 0)
}

fn parse_payment_row(row: &rusqlite::Row) -> anyhow::Result<Payment> {
    let amount_str: String = row.get(3)?;
    let status_str: String = row.get(8)?;
    let created_at_str: String = row.get(10)?;
    let updated_at_str: String = row.get(11)?;

    Ok(Payment {
        id: row.get(0)?,
        booking_id: row.get(1)?,
        user_id: row.get(2)?,
        amount: parse_decimal(&amount_str)?,
        currency: row.get(4)?,
        provider: row.get(5)?,
        provider_intent_id: row.get(6)?,
        provider_charge_id: row.get(7)?,
        status: PaymentRecordStatus::parse(&status_str)
            .with_context(|| format!("unknown payment record status: {status_str}"))?,
        failure_reason: row.get(9)?,
        created_at: parse_ts(&created_at_str)?,
        updated_at: parse_ts(&updated_at_str)?,
    })
}
