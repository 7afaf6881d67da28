use rusqlite::TransactionBehavior;

use crate::db::queries::{self, Cancellation};
use crate::errors::AppError;
use crate::models::{
    Actor, Booking, BookingEvent, BookingEventKind, BookingStatus, PaymentRecordStatus,
    PaymentStatus,
};
use crate::services::payments::call_provider;
use crate::state::AppState;

/// Who may move a booking to `to`. Players may only cancel their own
/// bookings; the facility's owner and admins may cancel, confirm or complete.
/// Nobody moves a booking back to pending.
pub fn can_transition(
    actor: &Actor,
    booking: &Booking,
    facility_owner_id: &str,
    to: BookingStatus,
) -> bool {
    let staff = actor.is_admin() || actor.owns_facility(facility_owner_id);
    match to {
        BookingStatus::Cancelled => staff || actor.user_id == booking.user_id,
        BookingStatus::Confirmed | BookingStatus::Completed => staff,
        BookingStatus::Pending => false,
    }
}

/// Loads a booking with the owner of its facility.
pub fn load_booking(state: &AppState, booking_id: &str) -> Result<(Booking, String), AppError> {
    let conn = state.conn()?;
    let booking = queries::get_booking(&conn, booking_id)?.ok_or(AppError::NotFound("booking"))?;
    let facility =
        queries::get_facility(&conn, &booking.facility_id)?.ok_or(AppError::FacilityNotFound)?;
    Ok((booking, facility.owner_id))
}

/// Moves a booking along its lifecycle on behalf of `actor`. Cancelling a
/// paid booking refunds it first and then records the cancellation, the
/// booking refund and the payment refund together.
pub async fn update_status(
    state: &AppState,
    actor: &Actor,
    booking_id: &str,
    to: BookingStatus,
    reason: Option<String>,
) -> Result<Booking, AppError> {
    let (booking, facility_owner_id) = load_booking(state, booking_id)?;

    if !can_transition(actor, &booking, &facility_owner_id, to) {
        tracing::warn!(
            booking_id,
            user_id = %actor.user_id,
            role = actor.role.as_str(),
            to = to.as_str(),
            "status change denied"
        );
        return Err(AppError::Forbidden);
    }
    if !booking.booking_status.can_transition_to(to) {
        return Err(AppError::InvalidTransition {
            from: booking.booking_status,
            to,
        });
    }

    let reason = reason.filter(|r| !r.trim().is_empty());
    let updated = if to == BookingStatus::Cancelled && booking.payment_status == PaymentStatus::Paid
    {
        cancel_with_refund(state, actor, &booking, reason.as_deref()).await?
    } else {
        apply_transition(state, actor, &booking, to, reason.as_deref())?
    };

    tracing::info!(
        booking_id,
        user_id = %actor.user_id,
        from = booking.booking_status.as_str(),
        to = to.as_str(),
        payment_status = updated.payment_status.as_str(),
        "booking status changed"
    );
    state.notifier.emit(BookingEvent::new(
        BookingEventKind::BookingStatusChanged,
        &updated,
        &facility_owner_id,
    ));

    Ok(updated)
}

fn apply_transition(
    state: &AppState,
    actor: &Actor,
    booking: &Booking,
    to: BookingStatus,
    reason: Option<&str>,
) -> Result<Booking, AppError> {
    let conn = state.conn()?;
    let now = queries::timestamp_now();
    let cancellation = (to == BookingStatus::Cancelled).then(|| Cancellation {
        reason,
        cancelled_by: &actor.user_id,
        cancelled_at: now,
    });

    let moved = queries::update_booking_status(
        &conn,
        &booking.id,
        booking.booking_status,
        to,
        cancellation.as_ref(),
        &now,
    )?;
    if !moved {
        return Err(AppError::ConcurrentModification);
    }

    queries::get_booking(&conn, &booking.id)?.ok_or(AppError::NotFound("booking"))
}

async fn cancel_with_refund(
    state: &AppState,
    actor: &Actor,
    booking: &Booking,
    reason: Option<&str>,
) -> Result<Booking, AppError> {
    let payment = {
        let conn = state.conn()?;
        queries::get_succeeded_payment(&conn, &booking.id)?
    }
    .ok_or_else(|| {
        AppError::Storage(anyhow::anyhow!(
            "booking {} is paid but has no settled payment",
            booking.id
        ))
    })?;

    // Keyed on the payment so a retried cancel never refunds twice
    let idempotency_key = format!("refund-{}", payment.id);
    let refund_id = call_provider(
        state,
        "refund payment",
        state
            .payments
            .refund_intent(&payment.provider_intent_id, &idempotency_key),
    )
    .await?;

    let mut conn = state.conn()?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let now = queries::timestamp_now();
    let cancellation = Cancellation {
        reason,
        cancelled_by: &actor.user_id,
        cancelled_at: now,
    };

    let moved = queries::update_booking_status(
        &tx,
        &booking.id,
        booking.booking_status,
        BookingStatus::Cancelled,
        Some(&cancellation),
        &now,
    )?;
    if !moved {
        tracing::error!(
            booking_id = %booking.id,
            refund_id = %refund_id,
            "booking changed while its refund was issued"
        );
        return Err(AppError::ConcurrentModification);
    }
    queries::update_booking_payment(
        &tx,
        &booking.id,
        PaymentStatus::Paid,
        PaymentStatus::Refunded,
        None,
        &now,
    )?;
    queries::update_payment_status(
        &tx,
        &payment.provider_intent_id,
        PaymentRecordStatus::Refunded,
        None,
        None,
        &now,
    )?;
    tx.commit()?;

    tracing::info!(
        booking_id = %booking.id,
        payment_id = %payment.id,
        refund_id = %refund_id,
        "payment refunded"
    );

    queries::get_booking(&conn, &booking.id)?.ok_or(AppError::NotFound("booking"))
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::*;
    use crate::models::Role;
    use crate::services::payments::bridge;
    use crate::services::reservation::{self, ReserveRequest};
    use crate::services::testing::{seed_facility, test_state};

    fn player() -> Actor {
        Actor::new("user-1", Role::User)
    }

    fn owner() -> Actor {
        Actor::new("owner-1", Role::FacilityOwner)
    }

    fn book(state: &AppState, start: &str, end: &str) -> Booking {
        reservation::reserve(
            state,
            &player(),
            ReserveRequest {
                facility_id: "fac-1".to_string(),
                court_id: "court-1".to_string(),
                date: "2024-01-10".to_string(),
                start_time: start.to_string(),
                end_time: end.to_string(),
                duration_hours: Decimal::ONE,
                notes: None,
            },
        )
        .unwrap()
        .booking
    }

    #[test]
    fn test_policy_matrix() {
        let (state, _) = test_state();
        seed_facility(&state, Decimal::from(20));
        let booking = book(&state, "09:00", "10:00");

        let stranger = Actor::new("user-2", Role::User);
        let other_owner = Actor::new("owner-2", Role::FacilityOwner);
        let admin = Actor::new("admin-1", Role::Admin);

        assert!(can_transition(&player(), &booking, "owner-1", BookingStatus::Cancelled));
        assert!(!can_transition(&player(), &booking, "owner-1", BookingStatus::Confirmed));
        assert!(!can_transition(&player(), &booking, "owner-1", BookingStatus::Completed));
        assert!(!can_transition(&stranger, &booking, "owner-1", BookingStatus::Cancelled));
        assert!(!can_transition(&other_owner, &booking, "owner-1", BookingStatus::Confirmed));
        assert!(can_transition(&owner(), &booking, "owner-1", BookingStatus::Confirmed));
        assert!(can_transition(&admin, &booking, "owner-1", BookingStatus::Completed));
        assert!(!can_transition(&admin, &booking, "owner-1", BookingStatus::Pending));
    }

    #[tokio::test]
    async fn test_cancel_records_reason_and_frees_slot() {
        let (state, _) = test_state();
        seed_facility(&state, Decimal::from(20));
        let booking = book(&state, "14:00", "15:00");

        let cancelled = update_status(
            &state,
            &player(),
            &booking.id,
            BookingStatus::Cancelled,
            Some("rain".to_string()),
        )
        .await
        .unwrap();
        assert_eq!(cancelled.booking_status, BookingStatus::Cancelled);
        assert_eq!(cancelled.cancellation_reason.as_deref(), Some("rain"));
        assert_eq!(cancelled.cancelled_by.as_deref(), Some("user-1"));
        assert!(cancelled.cancelled_at.is_some());

        // the same slot can be booked again
        book(&state, "14:00", "15:00");
    }

    #[tokio::test]
    async fn test_denied_before_state_machine() {
        let (state, _) = test_state();
        seed_facility(&state, Decimal::from(20));
        let booking = book(&state, "14:00", "15:00");

        let err = update_status(&state, &player(), &booking.id, BookingStatus::Completed, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden));

        let err = update_status(&state, &owner(), &booking.id, BookingStatus::Completed, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::InvalidTransition {
                from: BookingStatus::Pending,
                to: BookingStatus::Completed
            }
        ));
    }

    #[tokio::test]
    async fn test_terminal_states_reject_changes() {
        let (state, _) = test_state();
        seed_facility(&state, Decimal::from(20));
        let booking = book(&state, "14:00", "15:00");

        update_status(&state, &owner(), &booking.id, BookingStatus::Confirmed, None)
            .await
            .unwrap();
        let done = update_status(&state, &owner(), &booking.id, BookingStatus::Completed, None)
            .await
            .unwrap();
        assert_eq!(done.booking_status, BookingStatus::Completed);

        let err = update_status(&state, &owner(), &booking.id, BookingStatus::Cancelled, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_missing_booking_is_not_found() {
        let (state, _) = test_state();
        seed_facility(&state, Decimal::from(20));
        let err = update_status(&state, &owner(), "nope", BookingStatus::Cancelled, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound("booking")));
    }

    #[tokio::test]
    async fn test_cancelling_paid_booking_refunds_once() {
        let (state, control) = test_state();
        seed_facility(&state, Decimal::from(20));
        let booking = book(&state, "14:00", "15:00");
        let intent = bridge::create_intent(&state, &player(), &booking.id).await.unwrap();
        bridge::confirm(&state, &player(), &intent.provider_intent_id, &booking.id)
            .await
            .unwrap();

        let cancelled = update_status(&state, &player(), &booking.id, BookingStatus::Cancelled, None)
            .await
            .unwrap();
        assert_eq!(cancelled.booking_status, BookingStatus::Cancelled);
        assert_eq!(cancelled.payment_status, PaymentStatus::Refunded);

        let refunds = control.refunds.lock().unwrap().clone();
        assert_eq!(refunds.len(), 1);
        assert_eq!(refunds[0].0, intent.provider_intent_id);
        assert_eq!(refunds[0].1, format!("refund-{}", intent.payment_id));

        let conn = state.conn().unwrap();
        let payment = queries::get_payment_by_intent(&conn, &intent.provider_intent_id)
            .unwrap()
            .unwrap();
        assert_eq!(payment.status, PaymentRecordStatus::Refunded);
    }

    #[tokio::test]
    async fn test_failed_refund_leaves_booking_untouched() {
        let (state, control) = test_state();
        seed_facility(&state, Decimal::from(20));
        let booking = book(&state, "14:00", "15:00");
        let intent = bridge::create_intent(&state, &player(), &booking.id).await.unwrap();
        bridge::confirm(&state, &player(), &intent.provider_intent_id, &booking.id)
            .await
            .unwrap();

        control
            .unavailable
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let err = update_status(&state, &player(), &booking.id, BookingStatus::Cancelled, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ProviderUnavailable(_)));

        let (reloaded, _) = load_booking(&state, &booking.id).unwrap();
        assert_eq!(reloaded.booking_status, BookingStatus::Confirmed);
        assert_eq!(reloaded.payment_status, PaymentStatus::Paid);
    }

    #[tokio::test]
    async fn test_status_change_is_published() {
        let (state, _) = test_state();
        seed_facility(&state, Decimal::from(20));
        let booking = book(&state, "14:00", "15:00");
        let mut rx = state.events_tx.subscribe();

        update_status(&state, &owner(), &booking.id, BookingStatus::Confirmed, None)
            .await
            .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, BookingEventKind::BookingStatusChanged);
        assert_eq!(event.booking_status, BookingStatus::Confirmed);
        assert_eq!(event.facility_owner_id, "owner-1");
    }
}
