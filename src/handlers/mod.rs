pub mod auth;
pub mod availability;
pub mod bookings;
pub mod events;
pub mod health;
pub mod payments;

use std::sync::Arc;

use axum::http::Method;
use axum::routing::{get, patch, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/bookings", post(bookings::create_booking))
        .route("/bookings/my-bookings", get(bookings::my_bookings))
        .route("/bookings/:id", get(bookings::get_booking))
        .route("/bookings/:id/status", patch(bookings::update_status))
        .route(
            "/payments/create-payment-intent",
            post(payments::create_payment_intent),
        )
        .route("/payments/confirm", post(payments::confirm_payment))
        .route(
            "/facilities/:facility_id/courts/:court_id/availability",
            get(availability::court_availability),
        )
        .route("/events", get(events::events_stream))
        .layer(
            CorsLayer::new()
                .allow_methods([Method::GET, Method::POST, Method::PATCH])
                .allow_origin(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
