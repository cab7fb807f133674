//! Signed payment processor callbacks.
//!
//! The processor signs `"{timestamp}.{body}"` with HMAC-SHA256 using the
//! shared secret and sends `t=<unix seconds>,v1=<hex digest>` in the
//! [`SIGNATURE_HEADER`]. Signatures older or newer than the tolerance are
//! refused.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::{AggregateId, CorrelationContext};
use domain::{Aggregate, Payment, PaymentStatus};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use thiserror::Error;

use crate::error::{Result, SagaError};
use crate::repository::Repository;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-payment-signature";

pub const DEFAULT_TOLERANCE: Duration = Duration::from_secs(300);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WebhookError {
    #[error("missing signature header")]
    MissingSignature,

    #[error("malformed signature header")]
    MalformedHeader,

    #[error("signature timestamp outside tolerance")]
    Expired,

    #[error("signature mismatch")]
    SignatureMismatch,

    #[error("invalid webhook payload: {0}")]
    InvalidPayload(String),

    #[error("webhook secret is missing or not a valid HMAC key")]
    InvalidSecret,
}

/// Builds a header value for `payload` signed at `timestamp`.
pub fn sign(secret: &[u8], timestamp: i64, payload: &[u8]) -> std::result::Result<String, WebhookError> {
    let signature = digest(secret, timestamp, payload)?.finalize().into_bytes();
    Ok(format!("t={timestamp},v1={}", hex::encode(signature)))
}

/// Checks a signature header against `payload` at time `now`.
pub fn verify(
    secret: &[u8],
    header: &str,
    payload: &[u8],
    now: i64,
    tolerance: Duration,
) -> std::result::Result<(), WebhookError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => {
                timestamp = Some(value.parse::<i64>().map_err(|_| WebhookError::MalformedHeader)?);
            }
            Some(("v1", value)) => {
                signatures.push(hex::decode(value).map_err(|_| WebhookError::MalformedHeader)?);
            }
            _ => {}
        }
    }
    let timestamp = timestamp.ok_or(WebhookError::MalformedHeader)?;
    if signatures.is_empty() {
        return Err(WebhookError::MalformedHeader);
    }

    if now.abs_diff(timestamp) > tolerance.as_secs() {
        return Err(WebhookError::Expired);
    }

    let expected = digest(secret, timestamp, payload)?;
    if signatures
        .iter()
        .any(|candidate| expected.clone().verify_slice(candidate).is_ok())
    {
        Ok(())
    } else {
        Err(WebhookError::SignatureMismatch)
    }
}

fn digest(secret: &[u8], timestamp: i64, payload: &[u8]) -> std::result::Result<HmacSha256, WebhookError> {
    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| WebhookError::InvalidSecret)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac)
}

/// Processor notifications about a charge.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum WebhookEvent {
    #[serde(rename = "charge.succeeded")]
    ChargeSucceeded(ChargeData),
    #[serde(rename = "charge.failed")]
    ChargeFailed(ChargeData),
    #[serde(rename = "charge.refunded")]
    ChargeRefunded(ChargeData),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargeData {
    pub payment_id: AggregateId,
    #[serde(default)]
    pub charge_id: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Verifies callbacks and applies them to payments.
pub struct PaymentWebhookProcessor {
    payments: Arc<dyn Repository<Payment>>,
    secret: Vec<u8>,
    tolerance: Duration,
}

impl PaymentWebhookProcessor {
    pub fn new(payments: Arc<dyn Repository<Payment>>, secret: impl Into<Vec<u8>>) -> Self {
        Self {
            payments,
            secret: secret.into(),
            tolerance: DEFAULT_TOLERANCE,
        }
    }

    pub fn with_tolerance(mut self, tolerance: Duration) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Verifies and applies one callback. Returns the payment's status after it.
    #[tracing::instrument(skip_all)]
    pub async fn handle(&self, signature: Option<&str>, body: &[u8], ctx: &CorrelationContext) -> Result<PaymentStatus> {
        if self.secret.is_empty() {
            return Err(WebhookError::InvalidSecret.into());
        }
        let header = signature.ok_or(WebhookError::MissingSignature)?;
        verify(&self.secret, header, body, Utc::now().timestamp(), self.tolerance)?;

        let event: WebhookEvent =
            serde_json::from_slice(body).map_err(|e| WebhookError::InvalidPayload(e.to_string()))?;
        let data = match &event {
            WebhookEvent::ChargeSucceeded(d) | WebhookEvent::ChargeFailed(d) | WebhookEvent::ChargeRefunded(d) => d,
        };

        let mut payment = self
            .payments
            .load(data.payment_id)
            .await?
            .ok_or(SagaError::NotFound {
                aggregate_type: Payment::aggregate_type(),
                id: data.payment_id,
            })?;

        match &event {
            WebhookEvent::ChargeSucceeded(d) => {
                let charge_id = d
                    .charge_id
                    .clone()
                    .ok_or_else(|| WebhookError::InvalidPayload("chargeId is required".into()))?;
                payment.mark_as_succeeded(charge_id)?;
            }
            WebhookEvent::ChargeFailed(d) => {
                payment.mark_as_failed(d.reason.clone().unwrap_or_else(|| "charge failed".to_string()))?;
            }
            WebhookEvent::ChargeRefunded(d) => payment.refund(d.reason.clone())?,
        }
        self.payments.save(&mut payment, ctx).await?;

        tracing::info!(payment_id = %payment.id(), status = %payment.status(), "payment webhook applied");
        Ok(payment.status())
    }
}
