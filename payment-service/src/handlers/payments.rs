//! Intake endpoints: idempotent create and status reads.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use rust_decimal::Decimal;
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dtos::{CreatePaymentRequest, CreatePaymentResponse, GetPaymentResponse},
    models::NewPayment,
    services::metrics,
    startup::AppState,
};

/// `POST /payments`.
///
/// A fresh reference persists a `PENDING` payment, enqueues one settlement
/// task and answers `201`. A replayed reference answers `200` with the
/// original payment unchanged and enqueues nothing.
pub async fn create_payment(
    State(state): State<AppState>,
    Json(payload): Json<CreatePaymentRequest>,
) -> Result<(StatusCode, Json<CreatePaymentResponse>), AppError> {
    payload.validate()?;

    if payload.amount <= Decimal::ZERO {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "amount must be greater than zero"
        )));
    }
    if payload.amount.scale() > 2 {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "amount supports at most 2 decimal places"
        )));
    }
    if !state.config.currencies.is_supported(&payload.currency) {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "unsupported currency: {}",
            payload.currency
        )));
    }

    let (payment, created) = state
        .store
        .insert_if_absent(NewPayment {
            reference: payload.reference,
            amount: payload.amount,
            currency: payload.currency,
        })
        .await?;

    if created {
        // One settlement task per persisted payment. Should this enqueue be
        // lost, the reconciliation sweep re-submits the pending record.
        state.queue.enqueue(payment.id).await?;
        tracing::info!(
            payment_id = %payment.id,
            reference = %payment.reference,
            amount = %payment.amount,
            currency = %payment.currency,
            "Payment accepted"
        );
    } else {
        tracing::info!(
            payment_id = %payment.id,
            reference = %payment.reference,
            "Replayed idempotent create"
        );
    }
    metrics::record_created(&payment.currency, !created);

    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(CreatePaymentResponse::from(&payment))))
}

/// `GET /payments/{id}`. Snapshot read; never waits on settlement.
pub async fn get_payment(
    State(state): State<AppState>,
    Path(payment_id): Path<Uuid>,
) -> Result<Json<GetPaymentResponse>, AppError> {
    let payment = state
        .store
        .get(payment_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("payment {} not found", payment_id)))?;

    Ok(Json(GetPaymentResponse::from(payment)))
}
