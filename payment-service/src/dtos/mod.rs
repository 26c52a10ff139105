//! Request and response bodies for the payment HTTP surface.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::{FailureReason, Payment, PaymentStatus};

#[derive(Debug, Deserialize, Validate)]
pub struct CreatePaymentRequest {
    pub amount: Decimal,
    #[validate(length(min = 1, message = "currency is required"))]
    pub currency: String,
    #[validate(length(min = 1, max = 128, message = "reference must be 1-128 characters"))]
    pub reference: String,
}

#[derive(Debug, Serialize)]
pub struct CreatePaymentResponse {
    pub id: Uuid,
    pub status: PaymentStatus,
}

impl From<&Payment> for CreatePaymentResponse {
    fn from(payment: &Payment) -> Self {
        Self {
            id: payment.id,
            status: payment.status,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct GetPaymentResponse {
    pub amount: Decimal,
    pub currency: String,
    pub reference: String,
    pub status: PaymentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<FailureReason>,
    pub created_at: DateTime<Utc>,
}

impl From<Payment> for GetPaymentResponse {
    fn from(payment: Payment) -> Self {
        Self {
            amount: payment.amount,
            currency: payment.currency,
            reference: payment.reference,
            status: payment.status,
            failure_reason: payment.failure_reason,
            created_at: payment.created_at,
        }
    }
}
