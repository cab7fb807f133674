//! Commands the order service accepts from its callers.

use std::sync::Arc;

use common::{AggregateId, CorrelationContext};
use domain::{Aggregate, CustomerId, Order, OrderItem};

use crate::error::Result;
use crate::repository::{Repository, load_existing};

/// Entry point for starting and steering sagas from outside the event flow.
pub struct OrderCommandService {
    orders: Arc<dyn Repository<Order>>,
}

impl OrderCommandService {
    pub fn new(orders: Arc<dyn Repository<Order>>) -> Self {
        Self { orders }
    }

    /// Creates a PENDING order. Its `OrderCreated` event starts the saga.
    #[tracing::instrument(skip(self, items, ctx), fields(customer_id = %customer_id, items = items.len(), correlation_id = %ctx.correlation_id))]
    pub async fn place_order(
        &self,
        customer_id: CustomerId,
        items: Vec<OrderItem>,
        ctx: &CorrelationContext,
    ) -> Result<Order> {
        let mut order = Order::create(customer_id, items)?;
        self.orders.save(&mut order, ctx).await?;
        tracing::info!(order_id = %order.id(), total = %order.total_amount(), "order placed");
        Ok(order)
    }

    #[tracing::instrument(skip(self, reason, ctx))]
    pub async fn cancel_order(
        &self,
        order_id: AggregateId,
        reason: impl Into<String> + Send,
        ctx: &CorrelationContext,
    ) -> Result<Order> {
        let mut order = load_existing(self.orders.as_ref(), order_id).await?;
        order.cancel(reason)?;
        self.orders.save(&mut order, ctx).await?;
        Ok(order)
    }

    pub async fn ship_order(&self, order_id: AggregateId, ctx: &CorrelationContext) -> Result<Order> {
        let mut order = load_existing(self.orders.as_ref(), order_id).await?;
        order.mark_as_shipped()?;
        self.orders.save(&mut order, ctx).await?;
        Ok(order)
    }

    pub async fn deliver_order(&self, order_id: AggregateId, ctx: &CorrelationContext) -> Result<Order> {
        let mut order = load_existing(self.orders.as_ref(), order_id).await?;
        order.mark_as_delivered()?;
        self.orders.save(&mut order, ctx).await?;
        Ok(order)
    }

    pub async fn get_order(&self, order_id: AggregateId) -> Result<Option<Order>> {
        self.orders.load(order_id).await
    }
}
