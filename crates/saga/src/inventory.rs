//! Stock ledger owned by the inventory service.
//!
//! Stock is tracked per product and location. A reservation holds stock
//! for one order until the order is confirmed (the stock leaves the
//! shelf), released, or the reservation expires. Every change is written
//! to the outbox together with the state it produced.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::{AggregateId, CorrelationContext};
use domain::inventory::{
    InventoryAdjustedData, LowStockData, OutOfStockData, StockReleasedData,
    StockReplenishedData, StockReservationConfirmedData, StockReservationFailedData,
    StockReservedData, StockTransferredData,
};
use domain::{
    DomainEvent, FailureStage, InventoryEvent, ProductId, ReleaseReason, ReservedItem,
    UnavailableItem,
};
use messaging::{EventEnvelope, Outbox, Version};
use tokio::sync::{Mutex, watch};
use uuid::Uuid;

use crate::error::{Result, SagaError};

pub const DEFAULT_LOCATION: &str = "main";

pub const LOW_STOCK_THRESHOLD: u32 = 10;

pub const RESERVATION_TTL: Duration = Duration::from_secs(15 * 60);

const AGGREGATE_TYPE: &str = "Inventory";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationStatus {
    Held,
    /// The order was confirmed and the stock deducted.
    Committed,
    Released,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reservation {
    pub id: Uuid,
    pub order_id: AggregateId,
    pub items: Vec<ReservedItem>,
    pub expires_at: DateTime<Utc>,
    pub status: ReservationStatus,
}

#[derive(Debug, Clone, Default)]
struct StockLevel {
    locations: BTreeMap<String, u32>,
    reserved: u32,
}

impl StockLevel {
    fn on_hand(&self) -> u32 {
        self.locations.values().sum()
    }

    fn available(&self) -> u32 {
        self.on_hand().saturating_sub(self.reserved)
    }

    /// Removes `quantity` from locations in name order.
    fn deduct(&mut self, mut quantity: u32) {
        for held in self.locations.values_mut() {
            let taken = (*held).min(quantity);
            *held -= taken;
            quantity -= taken;
            if quantity == 0 {
                break;
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
struct LedgerState {
    stock: HashMap<ProductId, StockLevel>,
    reservations: HashMap<AggregateId, Reservation>,
    rejected: HashSet<AggregateId>,
    versions: HashMap<String, Version>,
}

impl LedgerState {
    fn level(&mut self, product_id: &ProductId) -> &mut StockLevel {
        self.stock.entry(product_id.clone()).or_default()
    }

    fn available(&self, product_id: &ProductId) -> u32 {
        self.stock.get(product_id).map_or(0, StockLevel::available)
    }
}

type Emitted = Vec<(String, InventoryEvent)>;

/// In-memory stock ledger.
pub struct StockLedger {
    state: Mutex<LedgerState>,
    outbox: Arc<dyn Outbox>,
    low_stock_threshold: u32,
    reservation_ttl: Duration,
}

impl StockLedger {
    pub fn new(outbox: Arc<dyn Outbox>) -> Self {
        Self {
            state: Mutex::new(LedgerState::default()),
            outbox,
            low_stock_threshold: LOW_STOCK_THRESHOLD,
            reservation_ttl: RESERVATION_TTL,
        }
    }

    pub fn with_low_stock_threshold(mut self, threshold: u32) -> Self {
        self.low_stock_threshold = threshold;
        self
    }

    pub fn with_reservation_ttl(mut self, ttl: Duration) -> Self {
        self.reservation_ttl = ttl;
        self
    }

    pub async fn available(&self, product_id: &ProductId) -> u32 {
        self.state.lock().await.available(product_id)
    }

    pub async fn on_hand(&self, product_id: &ProductId) -> u32 {
        self.state
            .lock()
            .await
            .stock
            .get(product_id)
            .map_or(0, StockLevel::on_hand)
    }

    pub async fn at_location(&self, product_id: &ProductId, location: &str) -> u32 {
        self.state
            .lock()
            .await
            .stock
            .get(product_id)
            .and_then(|level| level.locations.get(location).copied())
            .unwrap_or(0)
    }

    /// True once the order was either reserved or turned away.
    pub async fn is_settled(&self, order_id: AggregateId) -> bool {
        let state = self.state.lock().await;
        state.reservations.contains_key(&order_id) || state.rejected.contains(&order_id)
    }

    pub async fn reservation(&self, order_id: AggregateId) -> Option<Reservation> {
        self.state.lock().await.reservations.get(&order_id).cloned()
    }

    /// Holds stock for every item of an order, or for none of them.
    ///
    /// Emits `StockReserved` plus low/out-of-stock alerts, or
    /// `StockReservationFailed` listing the short items. Repeating the call
    /// for an order that was already answered emits nothing.
    pub async fn reserve(
        &self,
        order_id: AggregateId,
        items: &[ReservedItem],
        ctx: &CorrelationContext,
    ) -> Result<Vec<InventoryEvent>> {
        let threshold = self.low_stock_threshold;
        let ttl = chrono::Duration::from_std(self.reservation_ttl)
            .map_err(|e| SagaError::Validation(format!("reservation ttl: {e}")))?;

        self.transact(ctx, |state| {
            if state.reservations.contains_key(&order_id) || state.rejected.contains(&order_id) {
                return Ok(Vec::new());
            }

            let requested = merge_items(items);
            let unavailable: Vec<UnavailableItem> = requested
                .iter()
                .filter_map(|item| {
                    let available = state.available(&item.product_id);
                    (available < item.quantity).then(|| UnavailableItem {
                        product_id: item.product_id.clone(),
                        requested: item.quantity,
                        available,
                    })
                })
                .collect();

            let now = Utc::now();
            if !unavailable.is_empty() {
                let short = unavailable
                    .iter()
                    .map(|i| i.product_id.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                state.rejected.insert(order_id);
                return Ok(vec![(
                    order_id.to_string(),
                    InventoryEvent::StockReservationFailed(StockReservationFailedData {
                        order_id,
                        failure_stage: FailureStage::StockReservation,
                        reason: format!("Insufficient stock for: {short}"),
                        unavailable_items: unavailable,
                        failed_at: now,
                    }),
                )]);
            }

            let mut alerts = Vec::new();
            for item in &requested {
                let level = state.level(&item.product_id);
                let before = level.available();
                level.reserved += item.quantity;
                alerts.extend(stock_alerts(&item.product_id, before, level.available(), threshold));
            }

            let reservation = Reservation {
                id: Uuid::new_v4(),
                order_id,
                items: requested.clone(),
                expires_at: now + ttl,
                status: ReservationStatus::Held,
            };
            let reserved = InventoryEvent::StockReserved(StockReservedData {
                order_id,
                reservation_id: reservation.id,
                items: requested,
                expires_at: reservation.expires_at,
            });
            state.reservations.insert(order_id, reservation);

            let mut emitted = vec![(order_id.to_string(), reserved)];
            emitted.extend(alerts);
            Ok(emitted)
        })
        .await
    }

    /// Records that an order was turned away before any stock was touched.
    pub async fn reject(
        &self,
        order_id: AggregateId,
        stage: FailureStage,
        reason: impl Into<String>,
        ctx: &CorrelationContext,
    ) -> Result<Vec<InventoryEvent>> {
        let reason = reason.into();
        self.transact(ctx, |state| {
            if state.reservations.contains_key(&order_id) || !state.rejected.insert(order_id) {
                return Ok(Vec::new());
            }
            Ok(vec![(
                order_id.to_string(),
                InventoryEvent::StockReservationFailed(StockReservationFailedData {
                    order_id,
                    failure_stage: stage,
                    reason,
                    unavailable_items: Vec::new(),
                    failed_at: Utc::now(),
                }),
            )])
        })
        .await
    }

    /// Deducts the held stock for a confirmed order.
    pub async fn confirm(&self, order_id: AggregateId, ctx: &CorrelationContext) -> Result<Vec<InventoryEvent>> {
        self.transact(ctx, |state| {
            let Some(reservation) = state.reservations.get(&order_id).cloned() else {
                tracing::warn!(%order_id, "confirmation for unknown reservation");
                return Ok(Vec::new());
            };
            if reservation.status != ReservationStatus::Held {
                return Ok(Vec::new());
            }

            for item in &reservation.items {
                let level = state.level(&item.product_id);
                level.reserved = level.reserved.saturating_sub(item.quantity);
                level.deduct(item.quantity);
            }
            if let Some(r) = state.reservations.get_mut(&order_id) {
                r.status = ReservationStatus::Committed;
            }

            Ok(vec![(
                order_id.to_string(),
                InventoryEvent::StockReservationConfirmed(StockReservationConfirmedData {
                    order_id,
                    reservation_id: reservation.id,
                    confirmed_at: Utc::now(),
                }),
            )])
        })
        .await
    }

    /// Puts an order's stock back. Committed stock returns to the default
    /// location. Nothing happens when nothing is held.
    pub async fn release(
        &self,
        order_id: AggregateId,
        reason: ReleaseReason,
        ctx: &CorrelationContext,
    ) -> Result<Vec<InventoryEvent>> {
        self.transact(ctx, |state| Ok(release_in(state, order_id, reason).into_iter().collect()))
            .await
    }

    /// Releases every held reservation whose expiry is at or before `now`.
    pub async fn expire_reservations(&self, now: DateTime<Utc>) -> Result<Vec<InventoryEvent>> {
        let ctx = CorrelationContext::new();
        self.transact(&ctx, |state| {
            let expired: Vec<AggregateId> = state
                .reservations
                .values()
                .filter(|r| r.status == ReservationStatus::Held && r.expires_at <= now)
                .map(|r| r.order_id)
                .collect();
            Ok(expired
                .into_iter()
                .filter_map(|order_id| release_in(state, order_id, ReleaseReason::ReservationExpired))
                .collect())
        })
        .await
    }

    /// Adds stock at a location.
    pub async fn replenish(
        &self,
        product_id: &ProductId,
        location: &str,
        quantity: u32,
        ctx: &CorrelationContext,
    ) -> Result<Vec<InventoryEvent>> {
        if quantity == 0 {
            return Err(SagaError::Validation("replenish quantity must be positive".into()));
        }
        self.transact(ctx, |state| {
            let level = state.level(product_id);
            *level.locations.entry(location.to_string()).or_default() += quantity;
            Ok(vec![(
                product_id.to_string(),
                InventoryEvent::StockReplenishedEvent(StockReplenishedData {
                    product_id: product_id.clone(),
                    quantity,
                    available: level.available(),
                }),
            )])
        })
        .await
    }

    /// Sets the counted quantity at a location, e.g. after a stock take.
    pub async fn adjust(
        &self,
        product_id: &ProductId,
        location: &str,
        new_quantity: u32,
        reason: impl Into<String>,
        ctx: &CorrelationContext,
    ) -> Result<Vec<InventoryEvent>> {
        let reason = reason.into();
        let threshold = self.low_stock_threshold;
        self.transact(ctx, |state| {
            let level = state.level(product_id);
            let before = level.available();
            let previous_quantity = level
                .locations
                .insert(location.to_string(), new_quantity)
                .unwrap_or(0);
            let after = level.available();

            let mut emitted = vec![(
                product_id.to_string(),
                InventoryEvent::InventoryAdjustedEvent(InventoryAdjustedData {
                    product_id: product_id.clone(),
                    previous_quantity,
                    new_quantity,
                    reason,
                }),
            )];
            emitted.extend(stock_alerts(product_id, before, after, threshold));
            Ok(emitted)
        })
        .await
    }

    /// Moves stock between locations. Availability is unchanged.
    pub async fn transfer(
        &self,
        product_id: &ProductId,
        quantity: u32,
        from: &str,
        to: &str,
        ctx: &CorrelationContext,
    ) -> Result<Vec<InventoryEvent>> {
        if quantity == 0 || from == to {
            return Err(SagaError::Validation(
                "transfer needs a positive quantity and two different locations".into(),
            ));
        }
        self.transact(ctx, |state| {
            let level = state.level(product_id);
            let held = level.locations.get(from).copied().unwrap_or(0);
            if held < quantity {
                return Err(SagaError::Validation(format!(
                    "location {from} holds {held} of {product_id}, cannot move {quantity}"
                )));
            }
            level.locations.insert(from.to_string(), held - quantity);
            *level.locations.entry(to.to_string()).or_default() += quantity;
            Ok(vec![(
                product_id.to_string(),
                InventoryEvent::StockTransferredEvent(StockTransferredData {
                    product_id: product_id.clone(),
                    quantity,
                    from_location: from.to_string(),
                    to_location: to.to_string(),
                }),
            )])
        })
        .await
    }

    /// Expires reservations every `interval` until `shutdown` flips.
    pub async fn run_expiry(self: Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.expire_reservations(Utc::now()).await {
                        Ok(released) if !released.is_empty() => {
                            tracing::info!(count = released.len(), "expired stock reservations released");
                        }
                        Ok(_) => {}
                        Err(e) => tracing::error!(error = %e, "reservation expiry failed"),
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    }

    /// Applies `op` to a draft of the state and commits the draft only once
    /// its events are in the outbox.
    async fn transact<F>(&self, ctx: &CorrelationContext, op: F) -> Result<Vec<InventoryEvent>>
    where
        F: FnOnce(&mut LedgerState) -> Result<Emitted>,
    {
        let mut state = self.state.lock().await;
        let mut draft = state.clone();
        let emitted = op(&mut draft)?;
        if emitted.is_empty() {
            return Ok(Vec::new());
        }

        let mut envelopes = Vec::with_capacity(emitted.len());
        for (aggregate_id, event) in &emitted {
            let version = draft
                .versions
                .get(aggregate_id)
                .copied()
                .unwrap_or_default()
                .next();
            draft.versions.insert(aggregate_id.clone(), version);
            envelopes.push(envelope_for(aggregate_id, version, event, ctx)?);
        }

        self.outbox.enqueue(envelopes).await?;
        *state = draft;

        for (aggregate_id, event) in &emitted {
            tracing::info!(aggregate_id = %aggregate_id, event_name = event.event_name(), "inventory event recorded");
        }
        Ok(emitted.into_iter().map(|(_, event)| event).collect())
    }
}

fn envelope_for(
    aggregate_id: &str,
    version: Version,
    event: &InventoryEvent,
    ctx: &CorrelationContext,
) -> Result<EventEnvelope> {
    let payload = event.to_payload()?;
    Ok(EventEnvelope::builder()
        .event_name(event.event_name())
        .subject(event.subject())
        .aggregate_id(aggregate_id)
        .aggregate_type(AGGREGATE_TYPE)
        .event_version(version)
        .payload_raw(payload)
        .correlation(ctx)
        .build()?)
}

fn release_in(
    state: &mut LedgerState,
    order_id: AggregateId,
    reason: ReleaseReason,
) -> Option<(String, InventoryEvent)> {
    let reservation = state.reservations.get(&order_id).cloned()?;
    match reservation.status {
        ReservationStatus::Released => return None,
        ReservationStatus::Held => {
            for item in &reservation.items {
                let level = state.level(&item.product_id);
                level.reserved = level.reserved.saturating_sub(item.quantity);
            }
        }
        ReservationStatus::Committed => {
            for item in &reservation.items {
                let level = state.level(&item.product_id);
                *level.locations.entry(DEFAULT_LOCATION.to_string()).or_default() += item.quantity;
            }
        }
    }
    if let Some(r) = state.reservations.get_mut(&order_id) {
        r.status = ReservationStatus::Released;
    }

    Some((
        order_id.to_string(),
        InventoryEvent::StockReleased(StockReleasedData {
            order_id,
            reservation_id: reservation.id,
            items: reservation.items,
            reason,
            released_at: Utc::now(),
        }),
    ))
}

/// Alerts for a product whose availability moved from `before` to `after`.
/// Each fires only when the boundary is crossed.
fn stock_alerts(product_id: &ProductId, before: u32, after: u32, threshold: u32) -> Emitted {
    let event = if after == 0 && before > 0 {
        InventoryEvent::OutOfStockEvent(OutOfStockData {
            product_id: product_id.clone(),
        })
    } else if after > 0 && after <= threshold && before > threshold {
        InventoryEvent::LowStockEvent(LowStockData {
            product_id: product_id.clone(),
            available: after,
            threshold,
        })
    } else {
        return Vec::new();
    };
    vec![(product_id.to_string(), event)]
}

/// Sums quantities of repeated products, keeping first-seen order.
/// A sum past `u32::MAX` saturates, which no stock level can cover.
fn merge_items(items: &[ReservedItem]) -> Vec<ReservedItem> {
    let mut merged: Vec<ReservedItem> = Vec::with_capacity(items.len());
    for item in items {
        match merged.iter_mut().find(|m| m.product_id == item.product_id) {
            Some(existing) => existing.quantity = existing.quantity.saturating_add(item.quantity),
            None => merged.push(item.clone()),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use messaging::InMemoryOutbox;

    use super::*;

    fn item(sku: &str, quantity: u32) -> ReservedItem {
        ReservedItem {
            product_id: sku.into(),
            quantity,
        }
    }

    async fn ledger_with(stock: &[(&str, u32)]) -> (StockLedger, Arc<InMemoryOutbox>) {
        let outbox = Arc::new(InMemoryOutbox::new());
        let ledger = StockLedger::new(outbox.clone());
        let ctx = CorrelationContext::new();
        for (sku, quantity) in stock {
            ledger
                .replenish(&(*sku).into(), DEFAULT_LOCATION, *quantity, &ctx)
                .await
                .unwrap();
        }
        (ledger, outbox)
    }

    fn names(events: &[InventoryEvent]) -> Vec<&'static str> {
        events.iter().map(|e| e.event_name()).collect()
    }

    #[tokio::test]
    async fn reservation_is_all_or_nothing() {
        let (ledger, _) = ledger_with(&[("A", 50), ("B", 1)]).await;
        let order_id = AggregateId::new();

        let events = ledger
            .reserve(order_id, &[item("A", 5), item("B", 2)], &CorrelationContext::new())
            .await
            .unwrap();

        match &events[..] {
            [InventoryEvent::StockReservationFailed(data)] => {
                assert_eq!(data.failure_stage, FailureStage::StockReservation);
                assert_eq!(data.unavailable_items.len(), 1);
                assert_eq!(data.unavailable_items[0].product_id.as_str(), "B");
                assert_eq!(data.unavailable_items[0].available, 1);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(ledger.available(&"A".into()).await, 50);
        assert!(ledger.reservation(order_id).await.is_none());
    }

    #[tokio::test]
    async fn oversized_repeated_lines_are_refused() {
        let (ledger, _) = ledger_with(&[("A", 10)]).await;
        let order_id = AggregateId::new();

        let events = ledger
            .reserve(order_id, &[item("A", u32::MAX), item("A", 1)], &CorrelationContext::new())
            .await
            .unwrap();

        match &events[..] {
            [InventoryEvent::StockReservationFailed(data)] => {
                assert_eq!(data.unavailable_items[0].requested, u32::MAX);
                assert_eq!(data.unavailable_items[0].available, 10);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(ledger.available(&"A".into()).await, 10);
    }

    #[tokio::test]
    async fn reserve_emits_low_and_out_of_stock_once() {
        let (ledger, _) = ledger_with(&[("A", 12), ("B", 3)]).await;
        let ctx = CorrelationContext::new();

        let events = ledger
            .reserve(AggregateId::new(), &[item("A", 2), item("B", 3)], &ctx)
            .await
            .unwrap();
        assert_eq!(names(&events), vec!["StockReserved", "LowStockEvent", "OutOfStockEvent"]);

        let events = ledger.reserve(AggregateId::new(), &[item("A", 1)], &ctx).await.unwrap();
        assert_eq!(names(&events), vec!["StockReserved"]);
    }

    #[tokio::test]
    async fn repeated_reserve_is_silent() {
        let (ledger, _) = ledger_with(&[("A", 20)]).await;
        let ctx = CorrelationContext::new();
        let order_id = AggregateId::new();

        ledger.reserve(order_id, &[item("A", 2)], &ctx).await.unwrap();
        let again = ledger.reserve(order_id, &[item("A", 2)], &ctx).await.unwrap();

        assert!(again.is_empty());
        assert_eq!(ledger.available(&"A".into()).await, 18);
    }

    #[tokio::test]
    async fn confirm_deducts_and_release_restores() {
        let (ledger, _) = ledger_with(&[("A", 20)]).await;
        let ctx = CorrelationContext::new();
        let confirmed = AggregateId::new();
        let released = AggregateId::new();

        ledger.reserve(confirmed, &[item("A", 4)], &ctx).await.unwrap();
        ledger.reserve(released, &[item("A", 3)], &ctx).await.unwrap();
        assert_eq!(ledger.available(&"A".into()).await, 13);

        let events = ledger.confirm(confirmed, &ctx).await.unwrap();
        assert_eq!(names(&events), vec!["StockReservationConfirmed"]);
        assert_eq!(ledger.on_hand(&"A".into()).await, 16);

        let events = ledger
            .release(released, ReleaseReason::PaymentFailed, &ctx)
            .await
            .unwrap();
        match &events[..] {
            [InventoryEvent::StockReleased(data)] => {
                assert_eq!(data.reason, ReleaseReason::PaymentFailed);
                assert_eq!(data.items, vec![item("A", 3)]);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(ledger.available(&"A".into()).await, 16);
        assert!(ledger
            .release(released, ReleaseReason::PaymentFailed, &ctx)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn reservations_expire() {
        let (ledger, _) = ledger_with(&[("A", 20)]).await;
        let order_id = AggregateId::new();
        ledger
            .reserve(order_id, &[item("A", 5)], &CorrelationContext::new())
            .await
            .unwrap();

        assert!(ledger.expire_reservations(Utc::now()).await.unwrap().is_empty());

        let later = Utc::now() + chrono::Duration::minutes(16);
        let events = ledger.expire_reservations(later).await.unwrap();
        assert!(matches!(
            &events[..],
            [InventoryEvent::StockReleased(StockReleasedData {
                reason: ReleaseReason::ReservationExpired,
                ..
            })]
        ));
        assert_eq!(ledger.available(&"A".into()).await, 20);
    }

    #[tokio::test]
    async fn transfer_and_adjust() {
        let (ledger, _) = ledger_with(&[("A", 20)]).await;
        let ctx = CorrelationContext::new();
        let sku: ProductId = "A".into();

        ledger.transfer(&sku, 15, DEFAULT_LOCATION, "east", &ctx).await.unwrap();
        assert_eq!(ledger.at_location(&sku, "east").await, 15);
        assert_eq!(ledger.on_hand(&sku).await, 20);
        assert!(ledger.transfer(&sku, 6, DEFAULT_LOCATION, "east", &ctx).await.is_err());

        let events = ledger.adjust(&sku, "east", 4, "cycle count", &ctx).await.unwrap();
        assert_eq!(names(&events), vec!["InventoryAdjustedEvent", "LowStockEvent"]);
        assert_eq!(ledger.on_hand(&sku).await, 9);
    }

    #[tokio::test]
    async fn envelopes_version_per_aggregate() {
        let (ledger, outbox) = ledger_with(&[("A", 20)]).await;
        let ctx = CorrelationContext::new();
        let order_id = AggregateId::new();
        ledger.reserve(order_id, &[item("A", 1)], &ctx).await.unwrap();
        ledger.confirm(order_id, &ctx).await.unwrap();

        let envelopes = outbox.all().await;
        let for_order: Vec<u64> = envelopes
            .iter()
            .filter(|e| e.aggregate_id == order_id.to_string())
            .map(|e| e.event_version.as_u64())
            .collect();
        assert_eq!(for_order, vec![1, 2]);
        assert_eq!(envelopes[0].aggregate_id, "A");
        assert_eq!(envelopes[0].subject, "inventory.replenished");
    }
}
