//! Order service: settles orders from payment and inventory outcomes.

use std::sync::Arc;

use async_trait::async_trait;
use common::{AggregateId, CorrelationContext};
use domain::{
    CatalogueEvent, FailureStage, InventoryEvent, Order, OrderStatus, PaymentEvent,
};
use messaging::EventEnvelope;

use super::Reactor;
use crate::error::Result;
use crate::repository::{Repository, load_existing};

pub const SERVICE: &str = "order-service";

pub struct OrderReactor {
    orders: Arc<dyn Repository<Order>>,
}

impl OrderReactor {
    pub fn new(orders: Arc<dyn Repository<Order>>) -> Self {
        Self { orders }
    }

    #[tracing::instrument(skip(self, ctx))]
    async fn confirm(&self, order_id: AggregateId, ctx: &CorrelationContext) -> Result<()> {
        let mut order = load_existing(self.orders.as_ref(), order_id).await?;
        match order.status() {
            OrderStatus::Pending => {
                order.confirm()?;
                self.orders.save(&mut order, ctx).await?;
                tracing::info!("order confirmed");
            }
            OrderStatus::Confirmed | OrderStatus::Shipped | OrderStatus::Delivered => {
                tracing::debug!("order already confirmed");
            }
            status @ (OrderStatus::Cancelled | OrderStatus::Failed) => {
                tracing::warn!(status = %status, "payment succeeded for a closed order");
            }
        }
        Ok(())
    }

    #[tracing::instrument(skip(self, reason, ctx))]
    async fn fail(
        &self,
        order_id: AggregateId,
        reason: &str,
        stage: FailureStage,
        compensation_required: bool,
        ctx: &CorrelationContext,
    ) -> Result<()> {
        let mut order = load_existing(self.orders.as_ref(), order_id).await?;
        match order.status() {
            OrderStatus::Pending => {
                order.mark_as_failed(reason, stage, compensation_required)?;
                self.orders.save(&mut order, ctx).await?;
                tracing::info!(stage = stage.as_str(), %reason, "order failed");
            }
            OrderStatus::Failed => tracing::debug!("order already failed"),
            status => tracing::warn!(status = %status, stage = stage.as_str(), "failure reported for a settled order"),
        }
        Ok(())
    }
}

#[async_trait]
impl Reactor for OrderReactor {
    fn service(&self) -> &'static str {
        SERVICE
    }

    async fn react(&self, event: CatalogueEvent, _envelope: &EventEnvelope, ctx: &CorrelationContext) -> Result<()> {
        match event {
            CatalogueEvent::Payment(PaymentEvent::PaymentSucceeded(data)) => self.confirm(data.order_id, ctx).await,
            CatalogueEvent::Payment(PaymentEvent::PaymentFailed(data)) => {
                self.fail(data.order_id, &data.reason, FailureStage::PaymentProcessing, true, ctx)
                    .await
            }
            CatalogueEvent::Inventory(InventoryEvent::StockReservationFailed(data)) => {
                self.fail(data.order_id, &data.reason, data.failure_stage, false, ctx)
                    .await
            }
            other => {
                tracing::debug!(event_name = other.event_name(), "event ignored by order service");
                Ok(())
            }
        }
    }
}
