pub mod bridge;
pub mod stripe;

use std::collections::HashMap;
use std::future::Future;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::state::AppState;

/// Provider-side state of a payment intent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    RequiresPaymentMethod,
    RequiresConfirmation,
    RequiresAction,
    Processing,
    RequiresCapture,
    Canceled,
    Succeeded,
}

impl IntentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentStatus::RequiresPaymentMethod => "requires_payment_method",
            IntentStatus::RequiresConfirmation => "requires_confirmation",
            IntentStatus::RequiresAction => "requires_action",
            IntentStatus::Processing => "processing",
            IntentStatus::RequiresCapture => "requires_capture",
            IntentStatus::Canceled => "canceled",
            IntentStatus::Succeeded => "succeeded",
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewIntent {
    pub amount_minor: i64,
    pub currency: String,
    pub metadata: HashMap<String, String>,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedIntent {
    pub id: String,
    pub client_secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedIntent {
    pub id: String,
    pub status: IntentStatus,
    pub charge_id: Option<String>,
    pub failure_reason: Option<String>,
}

/// The narrow slice of a payment provider the booking core depends on.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn create_intent(&self, intent: NewIntent) -> anyhow::Result<CreatedIntent>;

    async fn retrieve_intent(&self, id: &str) -> anyhow::Result<RetrievedIntent>;

    /// Refunds a succeeded intent in full and returns the refund id.
    async fn refund_intent(&self, id: &str, idempotency_key: &str) -> anyhow::Result<String>;
}

/// Runs a provider call under the configured deadline. Provider failures and
/// timeouts both surface as `ProviderUnavailable`.
pub(crate) async fn call_provider<T>(
    state: &AppState,
    operation: &'static str,
    call: impl Future<Output = anyhow::Result<T>>,
) -> Result<T, AppError> {
    match tokio::time::timeout(state.config.provider_timeout(), call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(AppError::ProviderUnavailable(format!("{operation}: {e:#}"))),
        Err(_) => Err(AppError::ProviderUnavailable(format!(
            "{operation}: timed out after {}s",
            state.config.provider_timeout_secs
        ))),
    }
}
