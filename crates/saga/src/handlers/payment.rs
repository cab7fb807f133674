//! Payment service: charges reserved orders and refunds cancelled ones.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{AggregateId, CorrelationContext};
use domain::{
    Aggregate, CatalogueEvent, CustomerId, InventoryEvent, Money, OrderEvent, Payment,
    PaymentStatus,
};
use messaging::EventEnvelope;
use resilience::{RetryError, RetryPolicy};
use tokio::sync::RwLock;

use super::{Reactor, order_id_of};
use crate::error::{Result, SagaError};
use crate::gateway::{ChargeOutcome, ChargeRequest, GatewayError, PaymentGateway};
use crate::repository::Repository;

pub const SERVICE: &str = "payment-service";

/// Reason recorded when the processor could not be reached.
pub const PROCESSOR_UNAVAILABLE: &str = "Payment service temporarily unavailable";

#[derive(Debug, Clone)]
struct OrderTerms {
    customer_id: CustomerId,
    amount: Money,
}

/// What the payment service has learned about orders from the order stream.
#[derive(Debug, Default)]
struct KnownOrders {
    terms: HashMap<AggregateId, OrderTerms>,
    cancelled: HashSet<AggregateId>,
}

pub struct PaymentReactor {
    payments: Arc<dyn Repository<Payment>>,
    gateway: Arc<dyn PaymentGateway>,
    orders: RwLock<KnownOrders>,
    retry: RetryPolicy,
    charge_timeout: Duration,
}

impl PaymentReactor {
    pub fn new(payments: Arc<dyn Repository<Payment>>, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self {
            payments,
            gateway,
            orders: RwLock::new(KnownOrders::default()),
            retry: RetryPolicy::default(),
            charge_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Deadline for a single charge or refund attempt.
    pub fn with_charge_timeout(mut self, timeout: Duration) -> Self {
        self.charge_timeout = timeout;
        self
    }

    async fn payment_for(&self, order_id: AggregateId) -> Result<Option<Payment>> {
        self.payments
            .find(&move |p: &Payment| p.order_id() == order_id)
            .await
    }

    async fn is_cancelled(&self, order_id: AggregateId) -> bool {
        self.orders.read().await.cancelled.contains(&order_id)
    }

    #[tracing::instrument(skip(self, ctx))]
    async fn charge(&self, order_id: AggregateId, ctx: &CorrelationContext) -> Result<()> {
        let terms = {
            let orders = self.orders.read().await;
            if orders.cancelled.contains(&order_id) {
                tracing::info!("order cancelled before payment, not charging");
                return Ok(());
            }
            orders.terms.get(&order_id).cloned()
        };
        let Some(terms) = terms else {
            return Err(SagaError::NotYetKnown(format!("order {order_id} has not been seen yet")));
        };

        let mut payment = match self.payment_for(order_id).await? {
            Some(existing) if existing.status().is_terminal() => {
                tracing::debug!(status = %existing.status(), "payment already settled");
                return Ok(());
            }
            Some(existing) => existing,
            None => Payment::create(order_id, terms.customer_id, terms.amount)?,
        };
        payment.process()?;
        self.payments.save(&mut payment, ctx).await?;

        let request = ChargeRequest {
            idempotency_key: payment.id().to_string(),
            order_id,
            customer_id: payment.customer_id().clone(),
            amount: payment.amount().clone(),
        };
        let gateway = &self.gateway;
        let timeout = self.charge_timeout;
        let outcome = self
            .retry
            .execute(|_| {
                let request = request.clone();
                async move {
                    tokio::time::timeout(timeout, gateway.charge(request))
                        .await
                        .unwrap_or(Err(GatewayError::Timeout))
                }
            })
            .await;

        match outcome {
            Ok(ChargeOutcome::Approved { charge_id }) => {
                payment.mark_as_succeeded(charge_id)?;
                tracing::info!(payment_id = %payment.id(), "payment succeeded");
            }
            Ok(ChargeOutcome::Declined { reason }) => {
                tracing::info!(payment_id = %payment.id(), %reason, "payment declined");
                payment.mark_as_failed(reason)?;
            }
            Err(RetryError::Exhausted { attempts, last_error }) => {
                tracing::warn!(payment_id = %payment.id(), attempts, error = %last_error, "payment processor unreachable");
                payment.mark_as_failed(PROCESSOR_UNAVAILABLE)?;
            }
            Err(RetryError::NonRetryable(error)) => {
                tracing::warn!(payment_id = %payment.id(), error = %error, "payment rejected by processor");
                payment.mark_as_failed(error.to_string())?;
            }
        }
        self.payments.save(&mut payment, ctx).await?;

        // Cancelled while the charge was in flight.
        if payment.status() == PaymentStatus::Succeeded && self.is_cancelled(order_id).await {
            self.refund(order_id, "order cancelled during payment", ctx).await?;
        }
        Ok(())
    }

    #[tracing::instrument(skip(self, reason, ctx))]
    async fn refund(&self, order_id: AggregateId, reason: &str, ctx: &CorrelationContext) -> Result<()> {
        let Some(mut payment) = self.payment_for(order_id).await? else {
            tracing::debug!("no payment to refund");
            return Ok(());
        };
        if payment.status() != PaymentStatus::Succeeded {
            tracing::debug!(status = %payment.status(), "payment not refundable");
            return Ok(());
        }

        if let Some(charge_id) = payment.external_charge_id().map(str::to_string) {
            let gateway = &self.gateway;
            let amount = payment.amount().clone();
            let timeout = self.charge_timeout;
            self.retry
                .execute(|_| {
                    let charge_id = charge_id.clone();
                    let amount = amount.clone();
                    async move {
                        tokio::time::timeout(timeout, gateway.refund(&charge_id, &amount))
                            .await
                            .unwrap_or(Err(GatewayError::Timeout))
                    }
                })
                .await
                .map_err(RetryError::into_inner)?;
        }

        payment.refund(Some(reason.to_string()))?;
        self.payments.save(&mut payment, ctx).await?;
        metrics::counter!("saga_compensations_total", "reason" => "refund").increment(1);
        tracing::info!(payment_id = %payment.id(), "payment refunded");
        Ok(())
    }
}

#[async_trait]
impl Reactor for PaymentReactor {
    fn service(&self) -> &'static str {
        SERVICE
    }

    async fn react(&self, event: CatalogueEvent, envelope: &EventEnvelope, ctx: &CorrelationContext) -> Result<()> {
        match event {
            CatalogueEvent::Order(OrderEvent::OrderCreated(data)) => {
                let order_id = order_id_of(envelope)?;
                self.orders.write().await.terms.entry(order_id).or_insert(OrderTerms {
                    customer_id: data.customer_id,
                    amount: data.total_amount,
                });
                tracing::debug!(%order_id, "order terms recorded");
                Ok(())
            }
            CatalogueEvent::Inventory(InventoryEvent::StockReserved(data)) => self.charge(data.order_id, ctx).await,
            CatalogueEvent::Order(OrderEvent::OrderCancelled(data)) => {
                let order_id = order_id_of(envelope)?;
                self.orders.write().await.cancelled.insert(order_id);
                self.refund(order_id, &data.reason, ctx).await
            }
            other => {
                tracing::debug!(event_name = other.event_name(), "event ignored by payment service");
                Ok(())
            }
        }
    }
}
