use std::collections::HashMap;

use chrono::{DateTime, Utc};
use common::AggregateId;
use messaging::Version;

use super::events::{
    PaymentCreatedData, PaymentFailedData, PaymentProcessingData, PaymentRefundedData,
    PaymentSucceededData,
};
use super::{PaymentError, PaymentEvent, PaymentStatus};
use crate::aggregate::{Aggregate, RecordedEvent};
use crate::money::Money;
use crate::order::CustomerId;

pub const FAILURE_REASON_KEY: &str = "failureReason";
pub const REFUND_REASON_KEY: &str = "refundReason";

/// A charge against a customer for one order.
///
/// Handlers may see the same trigger more than once, so repeating a
/// transition that already happened is a no-op rather than an error.
#[derive(Debug, Clone)]
pub struct Payment {
    id: AggregateId,
    version: Version,
    order_id: AggregateId,
    customer_id: CustomerId,
    amount: Money,
    status: PaymentStatus,
    external_charge_id: Option<String>,
    metadata: HashMap<String, String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    pending: Vec<RecordedEvent<PaymentEvent>>,
}

impl Aggregate for Payment {
    type Event = PaymentEvent;
    type Error = PaymentError;

    fn aggregate_type() -> &'static str {
        "Payment"
    }

    fn id(&self) -> AggregateId {
        self.id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn apply(&mut self, event: &PaymentEvent) {
        match event {
            PaymentEvent::PaymentCreated(_) => self.status = PaymentStatus::Pending,
            PaymentEvent::PaymentProcessing(_) => self.status = PaymentStatus::Processing,
            PaymentEvent::PaymentSucceeded(data) => {
                self.status = PaymentStatus::Succeeded;
                self.external_charge_id = Some(data.external_charge_id.clone());
            }
            PaymentEvent::PaymentFailed(data) => {
                self.status = PaymentStatus::Failed;
                self.metadata
                    .insert(FAILURE_REASON_KEY.to_string(), data.reason.clone());
            }
            PaymentEvent::PaymentRefunded(data) => {
                self.status = PaymentStatus::Refunded;
                if let Some(reason) = &data.reason {
                    self.metadata
                        .insert(REFUND_REASON_KEY.to_string(), reason.clone());
                }
            }
        }
    }

    fn touch(&mut self, at: DateTime<Utc>) {
        self.updated_at = at;
    }

    fn pending_mut(&mut self) -> &mut Vec<RecordedEvent<PaymentEvent>> {
        &mut self.pending
    }

    fn pending_events(&self) -> &[RecordedEvent<PaymentEvent>] {
        &self.pending
    }
}

impl Payment {
    pub fn order_id(&self) -> AggregateId {
        self.order_id
    }

    pub fn customer_id(&self) -> &CustomerId {
        &self.customer_id
    }

    pub fn amount(&self) -> &Money {
        &self.amount
    }

    pub fn status(&self) -> PaymentStatus {
        self.status
    }

    pub fn external_charge_id(&self) -> Option<&str> {
        self.external_charge_id.as_deref()
    }

    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

impl Payment {
    /// Creates a PENDING payment and records `PaymentCreated`.
    pub fn create(
        order_id: AggregateId,
        customer_id: CustomerId,
        amount: Money,
    ) -> Result<Payment, PaymentError> {
        if order_id.is_nil() {
            return Err(PaymentError::InvalidArgument("order id is required".into()));
        }
        if customer_id.is_blank() {
            return Err(PaymentError::InvalidArgument("customer id is required".into()));
        }
        if !amount.is_positive() {
            return Err(PaymentError::InvalidArgument(format!(
                "amount must be positive, got {amount}"
            )));
        }

        let now = Utc::now();
        let mut payment = Payment {
            id: AggregateId::new(),
            version: Version::initial(),
            order_id,
            customer_id: customer_id.clone(),
            amount: amount.clone(),
            status: PaymentStatus::Pending,
            external_charge_id: None,
            metadata: HashMap::new(),
            created_at: now,
            updated_at: now,
            pending: Vec::new(),
        };
        payment.record(PaymentEvent::PaymentCreated(PaymentCreatedData {
            order_id,
            customer_id,
            amount,
            created_at: now,
        }));
        Ok(payment)
    }

    /// PENDING → PROCESSING. Repeating while PROCESSING is a no-op.
    pub fn process(&mut self) -> Result<(), PaymentError> {
        if self.status == PaymentStatus::Processing {
            return Ok(());
        }
        self.ensure_transition(PaymentStatus::Processing)?;
        self.record(PaymentEvent::PaymentProcessing(PaymentProcessingData {
            order_id: self.order_id,
            amount: self.amount.clone(),
            started_at: Utc::now(),
        }));
        Ok(())
    }

    /// PROCESSING → SUCCEEDED with the processor's charge id.
    ///
    /// A SUCCEEDED payment always holds the id it succeeded with. Repeating
    /// that id is a no-op; any other id is a conflict.
    pub fn mark_as_succeeded(&mut self, external_charge_id: impl Into<String>) -> Result<(), PaymentError> {
        let external_charge_id = external_charge_id.into();
        if self.status == PaymentStatus::Succeeded {
            return if self.external_charge_id.as_deref() == Some(external_charge_id.as_str()) {
                Ok(())
            } else {
                Err(PaymentError::InvalidTransition {
                    from: self.status,
                    to: PaymentStatus::Succeeded,
                })
            };
        }
        self.ensure_transition(PaymentStatus::Succeeded)?;
        self.record(PaymentEvent::PaymentSucceeded(PaymentSucceededData {
            order_id: self.order_id,
            amount: self.amount.clone(),
            external_charge_id,
            succeeded_at: Utc::now(),
        }));
        Ok(())
    }

    /// Moves to FAILED and stores the reason under `failureReason`.
    /// A no-op once the payment is terminal.
    pub fn mark_as_failed(&mut self, reason: impl Into<String>) -> Result<(), PaymentError> {
        if self.status.is_terminal() {
            return Ok(());
        }
        self.ensure_transition(PaymentStatus::Failed)?;
        self.record(PaymentEvent::PaymentFailed(PaymentFailedData {
            order_id: self.order_id,
            amount: self.amount.clone(),
            reason: reason.into(),
            failed_at: Utc::now(),
        }));
        Ok(())
    }

    /// SUCCEEDED → REFUNDED for the full amount. Repeating is a no-op.
    pub fn refund(&mut self, reason: Option<String>) -> Result<(), PaymentError> {
        if self.status == PaymentStatus::Refunded {
            return Ok(());
        }
        self.ensure_transition(PaymentStatus::Refunded)?;
        self.record(PaymentEvent::PaymentRefunded(PaymentRefundedData {
            order_id: self.order_id,
            refund_amount: self.amount.clone(),
            reason,
            refunded_at: Utc::now(),
        }));
        Ok(())
    }

    fn ensure_transition(&self, to: PaymentStatus) -> Result<(), PaymentError> {
        if self.status.can_transition_to(to) {
            Ok(())
        } else {
            Err(PaymentError::InvalidTransition {
                from: self.status,
                to,
            })
        }
    }
}
