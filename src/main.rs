use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

use courtside::config::AppConfig;
use courtside::db;
use courtside::handlers;
use courtside::services::notifier::BroadcastNotifier;
use courtside::services::payments::stripe::StripeProvider;
use courtside::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env();
    anyhow::ensure!(
        !config.stripe_secret_key.is_empty(),
        "STRIPE_SECRET_KEY must be set"
    );

    let conn = db::init_db(&config.database_url, config.db_busy_timeout())?;

    let payments = StripeProvider::new(
        config.stripe_secret_key.clone(),
        config.stripe_api_base.clone(),
        config.provider_timeout(),
    )?;
    tracing::info!(
        "using Stripe payment provider (api: {}, currency: {})",
        config.stripe_api_base,
        config.currency
    );

    let (events_tx, _) = broadcast::channel(256);

    let state = Arc::new(AppState {
        db: Arc::new(Mutex::new(conn)),
        config: config.clone(),
        payments: Box::new(payments),
        notifier: Box::new(BroadcastNotifier::new(events_tx.clone())),
        events_tx,
    });

    let app = handlers::router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
