//! Order aggregate implementation.

use chrono::{DateTime, Utc};
use common::AggregateId;
use messaging::Version;

use super::events::{
    FailureStage, OrderCancelledData, OrderConfirmedData, OrderCreatedData, OrderFailedData,
    OrderItemAddedData, OrderItemRemovedData, OrderStatusChangedData,
};
use super::value_objects::total_of;
use super::{CustomerId, OrderError, OrderEvent, OrderItem, OrderStatus, ProductId};
use crate::aggregate::{Aggregate, RecordedEvent};
use crate::money::Money;

/// Order aggregate root.
///
/// Created PENDING with at least one item. The total always equals the sum
/// of item totals, and items change only while PENDING.
#[derive(Debug, Clone)]
pub struct Order {
    id: AggregateId,
    version: Version,
    customer_id: CustomerId,
    items: Vec<OrderItem>,
    status: OrderStatus,
    total_amount: Money,
    failure_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    pending: Vec<RecordedEvent<OrderEvent>>,
}

impl Aggregate for Order {
    type Event = OrderEvent;
    type Error = OrderError;

    fn aggregate_type() -> &'static str {
        "Order"
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

    fn apply(&mut self, event: &OrderEvent) {
        match event {
            OrderEvent::OrderCreated(data) => {
                self.customer_id = data.customer_id.clone();
                self.items = data.items.clone();
                self.total_amount = data.total_amount.clone();
                self.status = OrderStatus::Pending;
                self.created_at = data.created_at;
            }
            OrderEvent::OrderItemAdded(data) => {
                match self.items.iter_mut().find(|i| i.product_id == data.product_id) {
                    Some(existing) => existing.quantity = existing.quantity.saturating_add(data.quantity),
                    None => self.items.push(OrderItem {
                        product_id: data.product_id.clone(),
                        quantity: data.quantity,
                        unit_price: data.unit_price.clone(),
                    }),
                }
                self.total_amount = data.total_amount.clone();
            }
            OrderEvent::OrderItemRemoved(data) => {
                self.items.retain(|i| i.product_id != data.product_id);
                self.total_amount = data.total_amount.clone();
            }
            OrderEvent::OrderConfirmed(_) => self.status = OrderStatus::Confirmed,
            OrderEvent::OrderStatusChanged(data) => self.status = data.new_status,
            OrderEvent::OrderCancelled(_) => self.status = OrderStatus::Cancelled,
            OrderEvent::OrderFailed(data) => {
                self.status = OrderStatus::Failed;
                self.failure_reason = Some(data.reason.clone());
            }
        }
    }

    fn touch(&mut self, at: DateTime<Utc>) {
        self.updated_at = at;
    }

    fn pending_mut(&mut self) -> &mut Vec<RecordedEvent<OrderEvent>> {
        &mut self.pending
    }

    fn pending_events(&self) -> &[RecordedEvent<OrderEvent>] {
        &self.pending
    }
}

// Query methods
impl Order {
    pub fn customer_id(&self) -> &CustomerId {
        &self.customer_id
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    pub fn get_item(&self, product_id: &ProductId) -> Option<&OrderItem> {
        self.items.iter().find(|i| &i.product_id == product_id)
    }

    pub fn total_amount(&self) -> &Money {
        &self.total_amount
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

// Command methods
impl Order {
    /// Creates a PENDING order and records `OrderCreated`.
    pub fn create(customer_id: CustomerId, items: Vec<OrderItem>) -> Result<Order, OrderError> {
        Self::create_with_id(AggregateId::new(), customer_id, items)
    }

    pub fn create_with_id(
        id: AggregateId,
        customer_id: CustomerId,
        items: Vec<OrderItem>,
    ) -> Result<Order, OrderError> {
        if customer_id.is_blank() {
            return Err(OrderError::InvalidArgument("customer id is required".into()));
        }
        if items.is_empty() {
            return Err(OrderError::InvalidArgument("order must contain at least one item".into()));
        }
        let items = merge_lines(items)?;
        let total_amount = total_of(&items)?;
        let now = Utc::now();

        let mut order = Order {
            id,
            version: Version::initial(),
            customer_id: customer_id.clone(),
            items: Vec::new(),
            status: OrderStatus::Pending,
            total_amount: Money::zero(total_amount.currency())?,
            failure_reason: None,
            created_at: now,
            updated_at: now,
            pending: Vec::new(),
        };
        order.record(OrderEvent::OrderCreated(OrderCreatedData {
            customer_id,
            items,
            total_amount,
            created_at: now,
        }));
        Ok(order)
    }

    /// Adds an item, merging quantity into an existing line for the product.
    pub fn add_item(&mut self, item: OrderItem) -> Result<(), OrderError> {
        self.ensure_modifiable("add item")?;
        if item.quantity == 0 {
            return Err(OrderError::InvalidQuantity { quantity: 0 });
        }
        if !item.unit_price.same_currency(&self.total_amount) {
            return Err(OrderError::CurrencyMismatch {
                expected: self.total_amount.currency().to_string(),
                found: item.unit_price.currency().to_string(),
            });
        }

        let mut next_items = self.items.clone();
        merge_into(&mut next_items, item.clone())?;
        let total_amount = total_of(&next_items)?;

        self.record(OrderEvent::OrderItemAdded(OrderItemAddedData {
            product_id: item.product_id,
            quantity: item.quantity,
            unit_price: item.unit_price,
            total_amount,
        }));
        Ok(())
    }

    /// Removes the line for a product. The last line cannot be removed.
    pub fn remove_item(&mut self, product_id: &ProductId) -> Result<(), OrderError> {
        self.ensure_modifiable("remove item")?;
        if self.get_item(product_id).is_none() {
            return Err(OrderError::ItemNotFound {
                product_id: product_id.to_string(),
            });
        }
        if self.items.len() == 1 {
            return Err(OrderError::InvalidState {
                status: self.status,
                action: "remove the last item",
            });
        }

        let remaining: Vec<OrderItem> = self
            .items
            .iter()
            .filter(|i| &i.product_id != product_id)
            .cloned()
            .collect();
        let total_amount = total_of(&remaining)?;

        self.record(OrderEvent::OrderItemRemoved(OrderItemRemovedData {
            product_id: product_id.clone(),
            total_amount,
        }));
        Ok(())
    }

    pub fn confirm(&mut self) -> Result<(), OrderError> {
        self.ensure_transition(OrderStatus::Confirmed)?;
        self.record(OrderEvent::OrderConfirmed(OrderConfirmedData {
            customer_id: self.customer_id.clone(),
            total_amount: self.total_amount.clone(),
            confirmed_at: Utc::now(),
        }));
        Ok(())
    }

    pub fn cancel(&mut self, reason: impl Into<String>) -> Result<(), OrderError> {
        let reason = reason.into();
        if reason.trim().is_empty() {
            return Err(OrderError::InvalidArgument("cancellation reason is required".into()));
        }
        self.ensure_transition(OrderStatus::Cancelled)?;
        self.record(OrderEvent::OrderCancelled(OrderCancelledData {
            reason,
            previous_status: self.status,
            cancelled_at: Utc::now(),
        }));
        Ok(())
    }

    pub fn mark_as_shipped(&mut self) -> Result<(), OrderError> {
        self.change_status(OrderStatus::Shipped)
    }

    pub fn mark_as_delivered(&mut self) -> Result<(), OrderError> {
        self.change_status(OrderStatus::Delivered)
    }

    pub fn mark_as_failed(
        &mut self,
        reason: impl Into<String>,
        failure_stage: FailureStage,
        compensation_required: bool,
    ) -> Result<(), OrderError> {
        self.ensure_transition(OrderStatus::Failed)?;
        self.record(OrderEvent::OrderFailed(OrderFailedData {
            reason: reason.into(),
            failure_stage,
            compensation_required,
            failed_at: Utc::now(),
        }));
        Ok(())
    }

    fn change_status(&mut self, new_status: OrderStatus) -> Result<(), OrderError> {
        self.ensure_transition(new_status)?;
        self.record(OrderEvent::OrderStatusChanged(OrderStatusChangedData {
            previous_status: self.status,
            new_status,
            changed_at: Utc::now(),
        }));
        Ok(())
    }

    fn ensure_transition(&self, to: OrderStatus) -> Result<(), OrderError> {
        if self.status.can_transition_to(to) {
            Ok(())
        } else {
            Err(OrderError::InvalidTransition {
                from: self.status,
                to,
            })
        }
    }

    fn ensure_modifiable(&self, action: &'static str) -> Result<(), OrderError> {
        if self.status.can_modify_items() {
            Ok(())
        } else {
            Err(OrderError::InvalidState {
                status: self.status,
                action,
            })
        }
    }
}

/// Collapses repeated products into one line each, keeping first-seen order.
fn merge_lines(items: Vec<OrderItem>) -> Result<Vec<OrderItem>, OrderError> {
    let mut merged: Vec<OrderItem> = Vec::with_capacity(items.len());
    for item in items {
        merge_into(&mut merged, item)?;
    }
    Ok(merged)
}

fn merge_into(lines: &mut Vec<OrderItem>, item: OrderItem) -> Result<(), OrderError> {
    match lines.iter_mut().find(|i| i.product_id == item.product_id) {
        Some(existing) => {
            existing.quantity = existing
                .quantity
                .checked_add(item.quantity)
                .ok_or_else(|| OrderError::QuantityOverflow {
                    product_id: item.product_id.to_string(),
                })?;
        }
        None => lines.push(item),
    }
    Ok(())
}
