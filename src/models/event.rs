use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::{Actor, Booking, BookingStatus, PaymentStatus};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BookingEventKind {
    BookingCreated,
    BookingStatusChanged,
}

impl BookingEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingEventKind::BookingCreated => "booking_created",
            BookingEventKind::BookingStatusChanged => "booking_status_changed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingEvent {
    pub kind: BookingEventKind,
    pub booking_id: String,
    pub user_id: String,
    pub facility_id: String,
    pub facility_owner_id: String,
    pub booking_status: BookingStatus,
    pub payment_status: PaymentStatus,
    pub occurred_at: NaiveDateTime,
}

impl BookingEvent {
    pub fn new(kind: BookingEventKind, booking: &Booking, facility_owner_id: &str) -> Self {
        Self {
            kind,
            booking_id: booking.id.clone(),
            user_id: booking.user_id.clone(),
            facility_id: booking.facility_id.clone(),
            facility_owner_id: facility_owner_id.to_string(),
            booking_status: booking.booking_status,
            payment_status: booking.payment_status,
            occurred_at: booking.updated_at,
        }
    }

    /// Whether `actor` is a party to this event.
    pub fn is_visible_to(&self, actor: &Actor) -> bool {
        actor.is_admin()
            || actor.user_id == self.user_id
            || actor.owns_facility(&self.facility_owner_id)
    }
}
