use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use serde::Deserialize;

use super::{CreatedIntent, IntentStatus, NewIntent, PaymentProvider, RetrievedIntent};

/// Payment intents over the Stripe REST API.
pub struct StripeProvider {
    secret_key: String,
    api_base: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct StripeErrorEnvelope {
    error: StripeErrorDetails,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetails {
    #[serde(rename = "type")]
    type_: Option<String>,
    code: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IntentResponse {
    id: String,
    status: IntentStatus,
    client_secret: Option<String>,
    latest_charge: Option<serde_json::Value>,
    last_payment_error: Option<LastPaymentError>,
}

#[derive(Debug, Deserialize)]
struct LastPaymentError {
    message: Option<String>,
    code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RefundResponse {
    id: String,
}

impl IntentResponse {
    fn into_retrieved(self) -> RetrievedIntent {
        // latest_charge is an id unless the caller asked Stripe to expand it
        let charge_id = self.latest_charge.and_then(|c| match c {
            serde_json::Value::String(id) => Some(id),
            other => other.get("id").and_then(|id| id.as_str()).map(str::to_string),
        });
        let failure_reason = self
            .last_payment_error
            .and_then(|e| e.message.or(e.code));

        RetrievedIntent {
            id: self.id,
            status: self.status,
            charge_id,
            failure_reason,
        }
    }
}

impl StripeProvider {
    pub fn new(secret_key: String, api_base: String, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build Stripe HTTP client")?;

        Ok(Self {
            secret_key,
            api_base: api_base.trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn ensure_success(
        resp: reqwest::Response,
        context: &str,
    ) -> anyhow::Result<reqwest::Response> {
        if resp.status().is_success() {
            return Ok(resp);
        }

        let status = resp.status();
        let request_id = resp
            .headers()
            .get("request-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = resp.text().await.unwrap_or_default();

        let (error_type, error_code, error_message) =
            match serde_json::from_str::<StripeErrorEnvelope>(&body) {
                Ok(envelope) => (
                    envelope.error.type_,
                    envelope.error.code,
                    envelope.error.message,
                ),
                Err(_) => (None, None, None),
            };

        tracing::error!(
            status = %status,
            stripe_request_id = ?request_id,
            stripe_error_type = ?error_type,
            stripe_error_code = ?error_code,
            stripe_error_message = ?error_message,
            context,
            "stripe api request failed"
        );

        anyhow::bail!(
            "Stripe API request failed: {context} (status {status}, request_id={request_id:?})"
        );
    }
}

#[async_trait]
impl PaymentProvider for StripeProvider {
    fn name(&self) -> &'static str {
        "stripe"
    }

    async fn create_intent(&self, intent: NewIntent) -> anyhow::Result<CreatedIntent> {
        let mut form: Vec<(String, String)> = vec![
            ("amount".to_string(), intent.amount_minor.to_string()),
            ("currency".to_string(), intent.currency),
            (
                "automatic_payment_methods[enabled]".to_string(),
                "true".to_string(),
            ),
        ];
        for (key, value) in intent.metadata {
            form.push((format!("metadata[{key}]"), value));
        }

        let resp = self
            .client
            .post(format!("{}/v1/payment_intents", self.api_base))
            .header(AUTHORIZATION, format!("Bearer {}", self.secret_key))
            .header("Idempotency-Key", intent.idempotency_key)
            .form(&form)
            .send()
            .await
            .context("failed to call Stripe create payment intent")?;
        let resp = Self::ensure_success(resp, "create payment intent").await?;

        let parsed: IntentResponse = resp
            .json()
            .await
            .context("failed to parse Stripe payment intent")?;
        let client_secret = parsed
            .client_secret
            .ok_or_else(|| anyhow::anyhow!("Stripe payment intent has no client_secret"))?;

        Ok(CreatedIntent {
            id: parsed.id,
            client_secret,
        })
    }

    async fn retrieve_intent(&self, id: &str) -> anyhow::Result<RetrievedIntent> {
        let resp = self
            .client
            .get(format!("{}/v1/payment_intents/{id}", self.api_base))
            .header(AUTHORIZATION, format!("Bearer {}", self.secret_key))
            .send()
            .await
            .context("failed to call Stripe retrieve payment intent")?;
        let resp = Self::ensure_success(resp, "retrieve payment intent").await?;

        let parsed: IntentResponse = resp
            .json()
            .await
            .context("failed to parse Stripe payment intent")?;
        Ok(parsed.into_retrieved())
    }

    async fn refund_intent(&self, id: &str, idempotency_key: &str) -> anyhow::Result<String> {
        let resp = self
            .client
            .post(format!("{}/v1/refunds", self.api_base))
            .header(AUTHORIZATION, format!("Bearer {}", self.secret_key))
            .header("Idempotency-Key", idempotency_key)
            .form(&[("payment_intent", id)])
            .send()
            .await
            .context("failed to call Stripe create refund")?;
        let resp = Self::ensure_success(resp, "create refund").await?;

        let parsed: RefundResponse = resp
            .json()
            .await
            .context("failed to parse Stripe refund")?;
        Ok(parsed.id)
    }
}
