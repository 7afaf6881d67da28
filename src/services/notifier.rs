use tokio::sync::broadcast;

use crate::models::BookingEvent;

/// Outbound booking events. Delivery is best-effort: implementations must not
/// block and must not fail the operation that emitted the event.
pub trait Notifier: Send + Sync {
    fn emit(&self, event: BookingEvent);
}

/// Publishes events to in-process subscribers, such as the SSE stream.
pub struct BroadcastNotifier {
    tx: broadcast::Sender<BookingEvent>,
}

impl BroadcastNotifier {
    pub fn new(tx: broadcast::Sender<BookingEvent>) -> Self {
        Self { tx }
    }
}

impl Notifier for BroadcastNotifier {
    fn emit(&self, event: BookingEvent) {
        let kind = event.kind.as_str();
        let booking_id = event.booking_id.clone();
        // No receivers is not an error
        if self.tx.send(event).is_err() {
            tracing::debug!(kind, booking_id = %booking_id, "no event subscribers");
        }
    }
}
