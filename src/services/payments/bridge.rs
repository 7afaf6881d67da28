use std::collections::HashMap;

use rusqlite::TransactionBehavior;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;

use super::{call_provider, IntentStatus, NewIntent};
use crate::db::queries;
use crate::errors::AppError;
use crate::models::{
    Actor, Booking, BookingEvent, BookingEventKind, BookingStatus, Payment, PaymentRecordStatus,
    PaymentStatus,
};
use crate::services::status::load_booking;
use crate::state::AppState;

#[derive(Debug, Clone, Serialize)]
pub struct PaymentIntentResponse {
    pub payment_id: String,
    pub provider_intent_id: String,
    pub client_secret: String,
    pub amount: Decimal,
    pub currency: String,
}

/// Amount in the currency's minor unit, halves rounded away from zero.
pub fn to_minor_units(amount: Decimal) -> Result<i64, AppError> {
    (amount * Decimal::from(100))
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or_else(|| AppError::Storage(anyhow::anyhow!("amount out of range: {amount}")))
}

/// Opens a provider payment intent for the caller's pending booking and
/// records the attempt. While the latest attempt has not failed, its intent is
/// handed out again instead of opening a second one.
pub async fn create_intent(
    state: &AppState,
    actor: &Actor,
    booking_id: &str,
) -> Result<PaymentIntentResponse, AppError> {
    let (booking, attempt) = {
        let conn = state.conn()?;
        let booking =
            queries::get_booking(&conn, booking_id)?.ok_or(AppError::NotFound("booking"))?;
        let prior = queries::count_payments_for_booking(&conn, booking_id)?;
        let reuse = queries::get_latest_payment(&conn, booking_id)?
            .is_some_and(|p| p.status != PaymentRecordStatus::Failed);
        (booking, if reuse { prior } else { prior + 1 })
    };

    if booking.user_id != actor.user_id {
        return Err(AppError::Forbidden);
    }
    if booking.booking_status != BookingStatus::Pending
        || !matches!(
            booking.payment_status,
            PaymentStatus::Pending | PaymentStatus::Failed
        )
    {
        return Err(AppError::BookingNotPayable);
    }

    let currency = state.config.currency.clone();
    let metadata = HashMap::from([
        ("booking_id".to_string(), booking.id.clone()),
        ("user_id".to_string(), booking.user_id.clone()),
        ("facility_id".to_string(), booking.facility_id.clone()),
        ("court_id".to_string(), booking.court.court_id.clone()),
    ]);
    let intent = NewIntent {
        amount_minor: to_minor_units(booking.total_amount)?,
        currency: currency.clone(),
        metadata,
        idempotency_key: format!("booking-{}-attempt-{attempt}", booking.id),
    };
    let created = call_provider(
        state,
        "create payment intent",
        state.payments.create_intent(intent),
    )
    .await?;

    let payment_id = {
        let mut conn = state.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current =
            queries::get_booking(&tx, &booking.id)?.ok_or(AppError::NotFound("booking"))?;
        if current.booking_status != BookingStatus::Pending
            || !matches!(
                current.payment_status,
                PaymentStatus::Pending | PaymentStatus::Failed
            )
        {
            tracing::warn!(
                booking_id = %booking.id,
                provider_intent_id = %created.id,
                booking_status = current.booking_status.as_str(),
                payment_status = current.payment_status.as_str(),
                "booking stopped being payable while opening intent"
            );
            return Err(AppError::BookingNotPayable);
        }

        let now = queries::timestamp_now();
        let payment = Payment {
            id: uuid::Uuid::new_v4().to_string(),
            booking_id: booking.id.clone(),
            user_id: booking.user_id.clone(),
            amount: booking.total_amount,
            currency: currency.clone(),
            provider: state.payments.name().to_string(),
            provider_intent_id: created.id.clone(),
            provider_charge_id: None,
            status: PaymentRecordStatus::Created,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        };

        let payment_id = if queries::insert_payment(&tx, &payment)? {
            payment.id
        } else {
            queries::get_payment_by_intent(&tx, &created.id)?
                .map(|p| p.id)
                .ok_or(AppError::NotFound("payment"))?
        };

        let linked = queries::update_booking_payment(
            &tx,
            &booking.id,
            current.payment_status,
            PaymentStatus::Pending,
            Some(&created.id),
            &now,
        )?;
        if !linked {
            tracing::warn!(
                booking_id = %booking.id,
                provider_intent_id = %created.id,
                "booking payment state changed while opening intent"
            );
            return Err(AppError::ConcurrentModification);
        }
        tx.commit()?;
        payment_id
    };

    tracing::info!(
        booking_id = %booking.id,
        payment_id = %payment_id,
        provider = state.payments.name(),
        provider_intent_id = %created.id,
        attempt,
        amount = %booking.total_amount,
        "payment intent created"
    );

    Ok(PaymentIntentResponse {
        payment_id,
        provider_intent_id: created.id,
        client_secret: created.client_secret,
        amount: booking.total_amount,
        currency,
    })
}

/// Checks the intent with the provider and, once it has succeeded, marks the
/// payment succeeded, the booking paid and the booking confirmed in one
/// transaction. Safe to call again: a settled booking is returned as is, and
/// a half-applied settlement is completed.
pub async fn confirm(
    state: &AppState,
    actor: &Actor,
    provider_intent_id: &str,
    booking_id: &str,
) -> Result<Booking, AppError> {
    let (booking, facility_owner_id) = load_booking(state, booking_id)?;
    let payment = {
        let conn = state.conn()?;
        queries::get_payment_by_intent(&conn, provider_intent_id)?
    }
    .filter(|p| p.booking_id == booking.id)
    .ok_or(AppError::NotFound("payment"))?;

    if booking.user_id != actor.user_id {
        return Err(AppError::Forbidden);
    }

    if payment.status == PaymentRecordStatus::Succeeded {
        return settle(state, &booking.id, &payment, None, &facility_owner_id);
    }

    let intent = call_provider(
        state,
        "retrieve payment intent",
        state.payments.retrieve_intent(provider_intent_id),
    )
    .await?;

    match intent.status {
        IntentStatus::Succeeded => settle(
            state,
            &booking.id,
            &payment,
            intent.charge_id.as_deref(),
            &facility_owner_id,
        ),
        IntentStatus::Processing => {
            let conn = state.conn()?;
            queries::update_payment_status(
                &conn,
                provider_intent_id,
                PaymentRecordStatus::Processing,
                None,
                None,
                &queries::timestamp_now(),
            )?;
            Err(AppError::PaymentNotCompleted(intent.status.as_str().to_string()))
        }
        IntentStatus::Canceled => {
            let reason = intent
                .failure_reason
                .unwrap_or_else(|| "payment intent canceled".to_string());
            mark_failed(state, &booking.id, provider_intent_id, &reason)?;
            Err(AppError::PaymentNotCompleted(intent.status.as_str().to_string()))
        }
        IntentStatus::RequiresPaymentMethod if intent.failure_reason.is_some() => {
            let reason = intent.failure_reason.unwrap_or_default();
            mark_failed(state, &booking.id, provider_intent_id, &reason)?;
            Err(AppError::PaymentNotCompleted(intent.status.as_str().to_string()))
        }
        other => Err(AppError::PaymentNotCompleted(other.as_str().to_string())),
    }
}

fn settle(
    state: &AppState,
    booking_id: &str,
    payment: &Payment,
    charge_id: Option<&str>,
    facility_owner_id: &str,
) -> Result<Booking, AppError> {
    let mut conn = state.conn()?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let current = queries::get_booking(&tx, booking_id)?.ok_or(AppError::NotFound("booking"))?;
    if !current.booking_status.is_active() {
        tracing::warn!(
            booking_id,
            provider_intent_id = %payment.provider_intent_id,
            booking_status = current.booking_status.as_str(),
            "payment succeeded for a booking that can no longer be confirmed"
        );
        return Err(AppError::InvalidTransition {
            from: current.booking_status,
            to: BookingStatus::Confirmed,
        });
    }
    if current.payment_status == PaymentStatus::Paid
        && current.payment_intent_id.as_deref() != Some(payment.provider_intent_id.as_str())
    {
        tracing::warn!(
            booking_id,
            provider_intent_id = %payment.provider_intent_id,
            settled_intent_id = current.payment_intent_id.as_deref().unwrap_or_default(),
            "booking already paid through another intent, charge requires a refund"
        );
        return Err(AppError::BookingNotPayable);
    }

    let now = queries::timestamp_now();
    let mut changed = false;

    if payment.status != PaymentRecordStatus::Succeeded {
        queries::update_payment_status(
            &tx,
            &payment.provider_intent_id,
            PaymentRecordStatus::Succeeded,
            charge_id,
            None,
            &now,
        )?;
    }
    if current.payment_status != PaymentStatus::Paid {
        if !queries::update_booking_payment(
            &tx,
            booking_id,
            current.payment_status,
            PaymentStatus::Paid,
            Some(&payment.provider_intent_id),
            &now,
        )? {
            return Err(AppError::ConcurrentModification);
        }
        changed = true;
    }
    if current.booking_status == BookingStatus::Pending {
        if !queries::update_booking_status(
            &tx,
            booking_id,
            BookingStatus::Pending,
            BookingStatus::Confirmed,
            None,
            &now,
        )? {
            return Err(AppError::ConcurrentModification);
        }
        changed = true;
    }

    let booking = queries::get_booking(&tx, booking_id)?.ok_or(AppError::NotFound("booking"))?;
    tx.commit()?;
    drop(conn);

    if changed {
        tracing::info!(
            booking_id,
            payment_id = %payment.id,
            provider_intent_id = %payment.provider_intent_id,
            "payment confirmed"
        );
        state.notifier.emit(BookingEvent::new(
            BookingEventKind::BookingStatusChanged,
            &booking,
            facility_owner_id,
        ));
    }
    Ok(booking)
}

fn mark_failed(
    state: &AppState,
    booking_id: &str,
    provider_intent_id: &str,
    reason: &str,
) -> Result<(), AppError> {
    let mut conn = state.conn()?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let now = queries::timestamp_now();

    queries::update_payment_status(
        &tx,
        provider_intent_id,
        PaymentRecordStatus::Failed,
        None,
        Some(reason),
        &now,
    )?;
    // Only a pending booking payment flips to failed
    queries::update_booking_payment(
        &tx,
        booking_id,
        PaymentStatus::Pending,
        PaymentStatus::Failed,
        None,
        &now,
    )?;
    tx.commit()?;

    tracing::warn!(booking_id, provider_intent_id, reason, "payment failed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use super::*;
    use crate::models::Role;
    use crate::services::reservation::{self, ReserveRequest};
    use crate::services::testing::{seed_facility, test_state};

    fn player() -> Actor {
        Actor::new("user-1", Role::User)
    }

    fn book(state: &AppState) -> Booking {
        reservation::reserve(
            state,
            &player(),
            ReserveRequest {
                facility_id: "fac-1".to_string(),
                court_id: "court-1".to_string(),
                date: "2024-01-10".to_string(),
                start_time: "10:00".to_string(),
                end_time: "11:30".to_string(),
                duration_hours: Decimal::new(15, 1),
                notes: None,
            },
        )
        .unwrap()
        .booking
    }

    #[test]
    fn test_minor_units_round_half_away() {
        assert_eq!(to_minor_units(Decimal::new(3750, 2)).unwrap(), 3750);
        assert_eq!(to_minor_units(Decimal::new(10005, 3)).unwrap(), 1001);
        assert_eq!(to_minor_units(Decimal::ZERO).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_create_intent_sends_total_in_minor_units() {
        let (state, control) = test_state();
        seed_facility(&state, Decimal::new(2550, 2));
        let booking = book(&state);
        assert_eq!(booking.total_amount, Decimal::new(3825, 2));

        let created = create_intent(&state, &player(), &booking.id).await.unwrap();
        assert_eq!(created.amount, Decimal::new(3825, 2));
        assert_eq!(created.currency, "usd");

        let intents = control.intents.lock().unwrap();
        let sent = &intents[&created.provider_intent_id];
        assert_eq!(sent.amount_minor, 3825);
        assert_eq!(sent.metadata["booking_id"], booking.id);
        assert_eq!(sent.idempotency_key, format!("booking-{}-attempt-1", booking.id));
    }

    #[tokio::test]
    async fn test_only_owner_of_pending_booking_may_pay() {
        let (state, _) = test_state();
        seed_facility(&state, Decimal::from(20));
        let booking = book(&state);

        let stranger = Actor::new("user-2", Role::User);
        assert!(matches!(
            create_intent(&state, &stranger, &booking.id).await,
            Err(AppError::Forbidden)
        ));
        assert!(matches!(
            create_intent(&state, &player(), "missing").await,
            Err(AppError::NotFound("booking"))
        ));

        let created = create_intent(&state, &player(), &booking.id).await.unwrap();
        confirm(&state, &player(), &created.provider_intent_id, &booking.id)
            .await
            .unwrap();
        assert!(matches!(
            create_intent(&state, &player(), &booking.id).await,
            Err(AppError::BookingNotPayable)
        ));
    }

    #[tokio::test]
    async fn test_confirm_settles_atomically_and_is_idempotent() {
        let (state, _) = test_state();
        seed_facility(&state, Decimal::from(20));
        let booking = book(&state);
        let created = create_intent(&state, &player(), &booking.id).await.unwrap();
        let mut rx = state.events_tx.subscribe();

        let confirmed = confirm(&state, &player(), &created.provider_intent_id, &booking.id)
            .await
            .unwrap();
        assert_eq!(confirmed.booking_status, BookingStatus::Confirmed);
        assert_eq!(confirmed.payment_status, PaymentStatus::Paid);
        assert_eq!(
            confirmed.payment_intent_id.as_deref(),
            Some(created.provider_intent_id.as_str())
        );
        assert_eq!(
            rx.recv().await.unwrap().kind,
            BookingEventKind::BookingStatusChanged
        );

        let again = confirm(&state, &player(), &created.provider_intent_id, &booking.id)
            .await
            .unwrap();
        assert_eq!(again.booking_status, BookingStatus::Confirmed);
        assert!(rx.try_recv().is_err());

        let conn = state.conn().unwrap();
        let payment = queries::get_payment_by_intent(&conn, &created.provider_intent_id)
            .unwrap()
            .unwrap();
        assert_eq!(payment.status, PaymentRecordStatus::Succeeded);
        assert_eq!(
            payment.provider_charge_id,
            Some(format!("ch_{}", created.provider_intent_id))
        );
    }

    #[tokio::test]
    async fn test_confirm_repairs_half_applied_settlement() {
        let (state, _) = test_state();
        seed_facility(&state, Decimal::from(20));
        let booking = book(&state);
        let created = create_intent(&state, &player(), &booking.id).await.unwrap();

        {
            let conn = state.conn().unwrap();
            queries::update_payment_status(
                &conn,
                &created.provider_intent_id,
                PaymentRecordStatus::Succeeded,
                None,
                None,
                &queries::timestamp_now(),
            )
            .unwrap();
        }

        let repaired = confirm(&state, &player(), &created.provider_intent_id, &booking.id)
            .await
            .unwrap();
        assert_eq!(repaired.booking_status, BookingStatus::Confirmed);
        assert_eq!(repaired.payment_status, PaymentStatus::Paid);
    }

    #[tokio::test]
    async fn test_declined_payment_marks_failed_and_allows_retry() {
        let (state, control) = test_state();
        seed_facility(&state, Decimal::from(20));
        let booking = book(&state);
        let first = create_intent(&state, &player(), &booking.id).await.unwrap();

        control.set_status(
            IntentStatus::RequiresPaymentMethod,
            Some("Your card was declined."),
        );
        let err = confirm(&state, &player(), &first.provider_intent_id, &booking.id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PaymentNotCompleted(ref s) if s == "requires_payment_method"));

        let (failed, _) = load_booking(&state, &booking.id).unwrap();
        assert_eq!(failed.booking_status, BookingStatus::Pending);
        assert_eq!(failed.payment_status, PaymentStatus::Failed);

        let second = create_intent(&state, &player(), &booking.id).await.unwrap();
        assert_ne!(first.provider_intent_id, second.provider_intent_id);

        control.set_status(IntentStatus::Succeeded, None);
        let paid = confirm(&state, &player(), &second.provider_intent_id, &booking.id)
            .await
            .unwrap();
        assert_eq!(paid.payment_status, PaymentStatus::Paid);
    }

    #[tokio::test]
    async fn test_open_attempt_is_handed_out_again() {
        let (state, control) = test_state();
        seed_facility(&state, Decimal::from(20));
        let booking = book(&state);

        let first = create_intent(&state, &player(), &booking.id).await.unwrap();
        let again = create_intent(&state, &player(), &booking.id).await.unwrap();
        assert_eq!(again.provider_intent_id, first.provider_intent_id);
        assert_eq!(again.payment_id, first.payment_id);
        assert_eq!(again.client_secret, first.client_secret);
        assert_eq!(control.intents.lock().unwrap().len(), 1);

        let conn = state.conn().unwrap();
        assert_eq!(queries::count_payments_for_booking(&conn, &booking.id).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_late_success_on_replaced_attempt_is_not_applied() {
        let (state, control) = test_state();
        seed_facility(&state, Decimal::from(20));
        let booking = book(&state);

        let first = create_intent(&state, &player(), &booking.id).await.unwrap();
        control.set_status(
            IntentStatus::RequiresPaymentMethod,
            Some("Your card was declined."),
        );
        confirm(&state, &player(), &first.provider_intent_id, &booking.id)
            .await
            .unwrap_err();

        let second = create_intent(&state, &player(), &booking.id).await.unwrap();
        control.set_status(IntentStatus::Succeeded, None);
        confirm(&state, &player(), &second.provider_intent_id, &booking.id)
            .await
            .unwrap();

        // The declined attempt is retried on the client and also goes through
        let err = confirm(&state, &player(), &first.provider_intent_id, &booking.id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BookingNotPayable));
        {
            let conn = state.conn().unwrap();
            let stale = queries::get_payment_by_intent(&conn, &first.provider_intent_id)
                .unwrap()
                .unwrap();
            assert_eq!(stale.status, PaymentRecordStatus::Failed);
        }
        let (paid, _) = load_booking(&state, &booking.id).unwrap();
        assert_eq!(
            paid.payment_intent_id.as_deref(),
            Some(second.provider_intent_id.as_str())
        );

        crate::services::status::update_status(
            &state,
            &player(),
            &booking.id,
            BookingStatus::Cancelled,
            None,
        )
        .await
        .unwrap();
        let refunds = control.refunds.lock().unwrap().clone();
        assert_eq!(refunds.len(), 1);
        assert_eq!(refunds[0].0, second.provider_intent_id);

        let conn = state.conn().unwrap();
        assert!(queries::get_succeeded_payment(&conn, &booking.id)
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_cancel_during_intent_creation_wins() {
        let (state, control) = test_state();
        seed_facility(&state, Decimal::from(20));
        let booking = book(&state);
        *control.delay.lock().unwrap() = Some(Duration::from_millis(300));

        let creator = player();
        let canceller = player();
        let (created, cancelled) = tokio::join!(
            create_intent(&state, &creator, &booking.id),
            crate::services::status::update_status(
                &state,
                &canceller,
                &booking.id,
                BookingStatus::Cancelled,
                None,
            ),
        );
        assert!(cancelled.is_ok());
        assert!(matches!(created, Err(AppError::BookingNotPayable)));

        let (after, _) = load_booking(&state, &booking.id).unwrap();
        assert_eq!(after.booking_status, BookingStatus::Cancelled);
        assert_eq!(after.payment_intent_id, None);
        let conn = state.conn().unwrap();
        assert_eq!(queries::count_payments_for_booking(&conn, &booking.id).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unfinished_intent_leaves_booking_pending() {
        let (state, control) = test_state();
        seed_facility(&state, Decimal::from(20));
        let booking = book(&state);
        let created = create_intent(&state, &player(), &booking.id).await.unwrap();

        control.set_status(IntentStatus::RequiresAction, None);
        let err = confirm(&state, &player(), &created.provider_intent_id, &booking.id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PaymentNotCompleted(_)));

        let (unchanged, _) = load_booking(&state, &booking.id).unwrap();
        assert_eq!(unchanged.booking_status, BookingStatus::Pending);
        assert_eq!(unchanged.payment_status, PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn test_payment_for_cancelled_booking_is_not_applied() {
        let (state, _) = test_state();
        seed_facility(&state, Decimal::from(20));
        let booking = book(&state);
        let created = create_intent(&state, &player(), &booking.id).await.unwrap();
        crate::services::status::update_status(
            &state,
            &player(),
            &booking.id,
            BookingStatus::Cancelled,
            None,
        )
        .await
        .unwrap();

        let err = confirm(&state, &player(), &created.provider_intent_id, &booking.id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { .. }));

        let (cancelled, _) = load_booking(&state, &booking.id).unwrap();
        assert_eq!(cancelled.booking_status, BookingStatus::Cancelled);
        assert_eq!(cancelled.payment_status, PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn test_intent_must_belong_to_booking() {
        let (state, _) = test_state();
        seed_facility(&state, Decimal::from(20));
        let booking = book(&state);
        create_intent(&state, &player(), &booking.id).await.unwrap();

        assert!(matches!(
            confirm(&state, &player(), "pi_unknown", &booking.id).await,
            Err(AppError::NotFound("payment"))
        ));
    }

    #[tokio::test]
    async fn test_provider_outage_and_timeout() {
        let (state, control) = test_state();
        seed_facility(&state, Decimal::from(20));
        let booking = book(&state);

        control.unavailable.store(true, Ordering::SeqCst);
        assert!(matches!(
            create_intent(&state, &player(), &booking.id).await,
            Err(AppError::ProviderUnavailable(_))
        ));
        control.unavailable.store(false, Ordering::SeqCst);

        *control.delay.lock().unwrap() = Some(Duration::from_secs(3));
        assert!(matches!(
            create_intent(&state, &player(), &booking.id).await,
            Err(AppError::ProviderUnavailable(_))
        ));

        let conn = state.conn().unwrap();
        assert_eq!(queries::count_payments_for_booking(&conn, &booking.id).unwrap(), 0);
    }
}
