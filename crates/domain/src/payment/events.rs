//! Payment domain events.

use chrono::{DateTime, Utc};
use common::AggregateId;
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;
use crate::money::Money;
use crate::order::CustomerId;
use crate::subjects;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PaymentEvent {
    PaymentCreated(PaymentCreatedData),
    PaymentProcessing(PaymentProcessingData),
    PaymentSucceeded(PaymentSucceededData),
    PaymentFailed(PaymentFailedData),
    PaymentRefunded(PaymentRefundedData),
}

impl PaymentEvent {
    /// The order every payment event refers to.
    pub fn order_id(&self) -> AggregateId {
        match self {
            PaymentEvent::PaymentCreated(d) => d.order_id,
            PaymentEvent::PaymentProcessing(d) => d.order_id,
            PaymentEvent::PaymentSucceeded(d) => d.order_id,
            PaymentEvent::PaymentFailed(d) => d.order_id,
            PaymentEvent::PaymentRefunded(d) => d.order_id,
        }
    }
}

impl DomainEvent for PaymentEvent {
    const EVENT_NAMES: &'static [&'static str] = &[
        "PaymentCreated",
        "PaymentProcessing",
        "PaymentSucceeded",
        "PaymentFailed",
        "PaymentRefunded",
    ];

    fn event_name(&self) -> &'static str {
        match self {
            PaymentEvent::PaymentCreated(_) => "PaymentCreated",
            PaymentEvent::PaymentProcessing(_) => "PaymentProcessing",
            PaymentEvent::PaymentSucceeded(_) => "PaymentSucceeded",
            PaymentEvent::PaymentFailed(_) => "PaymentFailed",
            PaymentEvent::PaymentRefunded(_) => "PaymentRefunded",
        }
    }

    fn subject(&self) -> &'static str {
        match self {
            PaymentEvent::PaymentCreated(_) => subjects::PAYMENT_CREATED,
            PaymentEvent::PaymentProcessing(_) => subjects::PAYMENT_PROCESSING,
            PaymentEvent::PaymentSucceeded(_) => subjects::PAYMENT_SUCCEEDED,
            PaymentEvent::PaymentFailed(_) => subjects::PAYMENT_FAILED,
            PaymentEvent::PaymentRefunded(_) => subjects::PAYMENT_REFUNDED,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentCreatedData {
    pub order_id: AggregateId,
    pub customer_id: CustomerId,
    pub amount: Money,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentProcessingData {
    pub order_id: AggregateId,
    pub amount: Money,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentSucceededData {
    pub order_id: AggregateId,
    pub amount: Money,
    /// Charge reference from the payment processor.
    pub external_charge_id: String,
    pub succeeded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentFailedData {
    pub order_id: AggregateId,
    pub amount: Money,
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRefundedData {
    pub order_id: AggregateId,
    pub refund_amount: Money,
    pub reason: Option<String>,
    pub refunded_at: DateTime<Utc>,
}
