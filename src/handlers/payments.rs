use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Deserialize;

use crate::errors::AppError;
use crate::models::{Actor, Booking};
use crate::services::payments::bridge::{self, PaymentIntentResponse};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct CreateIntentBody {
    pub booking_id: String,
}

#[derive(Deserialize)]
pub struct ConfirmBody {
    #[serde(alias = "provider_intent_id")]
    pub payment_intent_id: String,
    pub booking_id: String,
}

// POST /payments/create-payment-intent
pub async fn create_payment_intent(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Json(body): Json<CreateIntentBody>,
) -> Result<Json<PaymentIntentResponse>, AppError> {
    let created = bridge::create_intent(&state, &actor, &body.booking_id).await?;
    Ok(Json(created))
}

// POST /payments/confirm
pub async fn confirm_payment(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Json(body): Json<ConfirmBody>,
) -> Result<Json<Booking>, AppError> {
    let booking = bridge::confirm(&state, &actor, &body.payment_intent_id, &body.booking_id).await?;
    Ok(Json(booking))
}
