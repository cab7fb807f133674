//! Inventory service: validates and reserves stock for new orders and
//! compensates when orders fail or are cancelled.

use std::sync::Arc;

use async_trait::async_trait;
use common::{AggregateId, CorrelationContext};
use domain::{CatalogueEvent, FailureStage, OrderEvent, ReleaseReason, ReservedItem};
use domain::order::OrderCreatedData;
use messaging::EventEnvelope;

use super::{Reactor, order_id_of};
use crate::error::Result;
use crate::inventory::StockLedger;
use crate::product::{ItemToValidate, ProductServiceAdapter};

pub const SERVICE: &str = "inventory-service";

pub struct InventoryReactor {
    ledger: Arc<StockLedger>,
    products: Arc<ProductServiceAdapter>,
}

impl InventoryReactor {
    pub fn new(ledger: Arc<StockLedger>, products: Arc<ProductServiceAdapter>) -> Self {
        Self { ledger, products }
    }

    #[tracing::instrument(skip(self, data, ctx))]
    async fn reserve(&self, order_id: AggregateId, data: &OrderCreatedData, ctx: &CorrelationContext) -> Result<()> {
        if self.ledger.is_settled(order_id).await {
            tracing::debug!("order already answered");
            return Ok(());
        }

        let to_validate: Vec<ItemToValidate> = data
            .items
            .iter()
            .map(|item| ItemToValidate {
                product_id: item.product_id.clone(),
                quantity: item.quantity,
            })
            .collect();
        let validation = self.products.validate_products(&to_validate).await;
        if !validation.valid {
            let reason = validation.rejection_reason();
            tracing::info!(%reason, "products rejected");
            self.ledger
                .reject(order_id, FailureStage::InventoryCheck, reason, ctx)
                .await?;
            return Ok(());
        }

        let items: Vec<ReservedItem> = data
            .items
            .iter()
            .map(|item| ReservedItem {
                product_id: item.product_id.clone(),
                quantity: item.quantity,
            })
            .collect();
        self.ledger.reserve(order_id, &items, ctx).await?;
        Ok(())
    }

    #[tracing::instrument(skip(self, ctx))]
    async fn release(&self, order_id: AggregateId, reason: ReleaseReason, ctx: &CorrelationContext) -> Result<()> {
        let released = self.ledger.release(order_id, reason, ctx).await?;
        if !released.is_empty() {
            tracing::info!(reason = reason.as_str(), "stock released");
            metrics::counter!("saga_compensations_total", "reason" => reason.as_str()).increment(1);
        }
        Ok(())
    }
}

#[async_trait]
impl Reactor for InventoryReactor {
    fn service(&self) -> &'static str {
        SERVICE
    }

    async fn react(&self, event: CatalogueEvent, envelope: &EventEnvelope, ctx: &CorrelationContext) -> Result<()> {
        let CatalogueEvent::Order(event) = event else {
            tracing::debug!(event_name = %envelope.event_name, "event ignored by inventory service");
            return Ok(());
        };
        let order_id = order_id_of(envelope)?;

        match event {
            OrderEvent::OrderCreated(data) => self.reserve(order_id, &data, ctx).await,
            OrderEvent::OrderConfirmed(_) => {
                self.ledger.confirm(order_id, ctx).await?;
                Ok(())
            }
            OrderEvent::OrderFailed(data) => {
                // Releases whatever is still held; no-op when nothing is.
                let reason = match data.failure_stage {
                    FailureStage::PaymentProcessing => ReleaseReason::PaymentFailed,
                    _ => ReleaseReason::OrderFailed,
                };
                self.release(order_id, reason, ctx).await
            }
            OrderEvent::OrderCancelled(_) => self.release(order_id, ReleaseReason::OrderCancelled, ctx).await,
            _ => {
                tracing::debug!(event_name = %envelope.event_name, "event ignored by inventory service");
                Ok(())
            }
        }
    }
}
