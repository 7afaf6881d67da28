pub mod actor;
pub mod booking;
pub mod event;
pub mod facility;
pub mod payment;

pub use actor::{Actor, Role};
pub use booking::{Booking, BookingDetails, BookingStatus, CourtSnapshot, PaymentStatus};
pub use event::{BookingEvent, BookingEventKind};
pub use facility::{Court, Facility, OperatingHours, TimeWindow};
pub use payment::{Payment, PaymentRecordStatus};
