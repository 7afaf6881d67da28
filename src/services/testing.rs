use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::broadcast;

use crate::config::AppConfig;
use crate::db::{self, queries};
use crate::models::{Court, Facility, OperatingHours};
use crate::services::notifier::BroadcastNotifier;
use crate::services::payments::{
    CreatedIntent, IntentStatus, NewIntent, PaymentProvider, RetrievedIntent,
};
use crate::state::AppState;

/// Knobs and call log shared between a test and its `MockProvider`.
pub struct MockControl {
    pub status: Mutex<IntentStatus>,
    pub failure_reason: Mutex<Option<String>>,
    pub unavailable: AtomicBool,
    pub delay: Mutex<Option<Duration>>,
    pub intents: Mutex<HashMap<String, NewIntent>>,
    pub refunds: Mutex<Vec<(String, String)>>,
}

impl MockControl {
    pub fn set_status(&self, status: IntentStatus, failure_reason: Option<&str>) {
        *self.status.lock().unwrap() = status;
        *self.failure_reason.lock().unwrap() = failure_reason.map(str::to_string);
    }
}

pub struct MockProvider {
    control: Arc<MockControl>,
}

impl MockProvider {
    async fn simulate_network(&self) -> anyhow::Result<()> {
        let delay = *self.control.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.control.unavailable.load(Ordering::SeqCst) {
            anyhow::bail!("connection refused");
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentProvider for MockProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn create_intent(&self, intent: NewIntent) -> anyhow::Result<CreatedIntent> {
        self.simulate_network().await?;
        // Same idempotency key, same intent
        let id = format!("pi_{}", intent.idempotency_key.replace('-', "_"));
        self.control
            .intents
            .lock()
            .unwrap()
            .insert(id.clone(), intent);
        Ok(CreatedIntent {
            client_secret: format!("{id}_secret"),
            id,
        })
    }

    async fn retrieve_intent(&self, id: &str) -> anyhow::Result<RetrievedIntent> {
        self.simulate_network().await?;
        let status = *self.control.status.lock().unwrap();
        Ok(RetrievedIntent {
            id: id.to_string(),
            status,
            charge_id: (status == IntentStatus::Succeeded).then(|| format!("ch_{id}")),
            failure_reason: self.control.failure_reason.lock().unwrap().clone(),
        })
    }

    async fn refund_intent(&self, id: &str, idempotency_key: &str) -> anyhow::Result<String> {
        self.simulate_network().await?;
        self.control
            .refunds
            .lock()
            .unwrap()
            .push((id.to_string(), idempotency_key.to_string()));
        Ok(format!("re_{id}"))
    }
}

pub fn test_config() -> AppConfig {
    AppConfig {
        port: 3000,
        database_url: ":memory:".to_string(),
        stripe_secret_key: "sk_test".to_string(),
        stripe_api_base: "http://localhost:12111".to_string(),
        currency: "usd".to_string(),
        provider_timeout_secs: 1,
        db_busy_timeout_ms: 100,
    }
}

pub fn test_state() -> (AppState, Arc<MockControl>) {
    let config = test_config();
    let conn = db::init_db(":memory:", config.db_busy_timeout()).unwrap();
    let control = Arc::new(MockControl {
        status: Mutex::new(IntentStatus::Succeeded),
        failure_reason: Mutex::new(None),
        unavailable: AtomicBool::new(false),
        delay: Mutex::new(None),
        intents: Mutex::new(HashMap::new()),
        refunds: Mutex::new(vec![]),
    });
    let (events_tx, _) = broadcast::channel(64);

    let state = AppState {
        db: Arc::new(Mutex::new(conn)),
        config,
        payments: Box::new(MockProvider {
            control: Arc::clone(&control),
        }),
        notifier: Box::new(BroadcastNotifier::new(events_tx.clone())),
        events_tx,
    };
    (state, control)
}

/// `fac-1` owned by `owner-1`, with bookable `court-1` and inactive `court-closed`.
pub fn seed_facility(state: &AppState, price_per_hour: Decimal) {
    let facility = Facility {
        id: "fac-1".to_string(),
        name: "Riverside Sports".to_string(),
        owner_id: "owner-1".to_string(),
        address: "1 River Rd".to_string(),
        is_active: true,
        courts: vec![
            Court {
                id: "court-1".to_string(),
                name: "Court A".to_string(),
                sport_type: "tennis".to_string(),
                price_per_hour,
                is_active: true,
                operating_hours: None,
            },
            Court {
                id: "court-closed".to_string(),
                name: "Court Z".to_string(),
                sport_type: "tennis".to_string(),
                price_per_hour,
                is_active: false,
                operating_hours: None,
            },
        ],
    };
    let conn = state.conn().unwrap();
    queries::insert_facility(&conn, &facility).unwrap();
}

fn update_court(state: &AppState, f: impl FnOnce(&mut Court)) {
    let conn = state.conn().unwrap();
    let facility = queries::get_facility(&conn, "fac-1").unwrap().unwrap();
    let mut court = facility.court("court-1").cloned().unwrap();
    f(&mut court);
    queries::upsert_court(&conn, "fac-1", &court).unwrap();
}

pub fn set_court_price(state: &AppState, price_per_hour: Decimal) {
    update_court(state, |c| c.price_per_hour = price_per_hour);
}

pub fn set_court_hours(state: &AppState, hours: OperatingHours) {
    update_court(state, |c| c.operating_hours = Some(hours));
}
