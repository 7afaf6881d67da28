use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One payment attempt against a booking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: String,
    pub booking_id: String,
    pub user_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub provider: String,
    pub provider_intent_id: String,
    pub provider_charge_id: Option<String>,
    pub status: PaymentRecordStatus,
    pub failure_reason: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PaymentRecordStatus {
    Created,
    Processing,
    Succeeded,
    Failed,
    Refunded,
}

impl PaymentRecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentRecordStatus::Created => "created",
            PaymentRecordStatus::Processing => "processing",
            PaymentRecordStatus::Succeeded => "succeeded",
            PaymentRecordStatus::Failed => "failed",
            PaymentRecordStatus::Refunded => "refunded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created" => Some(PaymentRecordStatus::Created),
            "processing" => Some(PaymentRecordStatus::Processing),
            "succeeded" => Some(PaymentRecordStatus::Succeeded),
            "failed" => Some(PaymentRecordStatus::Failed),
            "refunded" => Some(PaymentRecordStatus::Refunded),
            _ => None,
        }
    }
}
