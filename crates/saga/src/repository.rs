//! Aggregate persistence with an optimistic version check and a
//! transactional outbox.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::{AggregateId, CorrelationContext};
use domain::Aggregate;
use messaging::{EventEnvelope, Outbox, Version};
use tokio::sync::RwLock;

use crate::error::{Result, SagaError};

type Predicate<'a, A> = &'a (dyn Fn(&A) -> bool + Send + Sync);

#[async_trait]
pub trait Repository<A: Aggregate>: Send + Sync {
    async fn load(&self, id: AggregateId) -> Result<Option<A>>;

    /// First aggregate matching `predicate`.
    async fn find(&self, predicate: Predicate<'_, A>) -> Result<Option<A>>;

    /// Commits the aggregate and its pending events.
    ///
    /// Fails with [`SagaError::Concurrency`] when the stored version is not
    /// the one the aggregate was loaded at. On success the pending events
    /// are drained into the outbox, tagged with `ctx`.
    async fn save(&self, aggregate: &mut A, ctx: &CorrelationContext) -> Result<()>;
}

/// Loads an aggregate or fails with [`SagaError::NotFound`].
pub async fn load_existing<A, R>(repository: &R, id: AggregateId) -> Result<A>
where
    A: Aggregate,
    R: Repository<A> + ?Sized,
{
    repository.load(id).await?.ok_or(SagaError::NotFound {
        aggregate_type: A::aggregate_type(),
        id,
    })
}

/// In-memory repository that shares an outbox with its service.
pub struct InMemoryRepository<A> {
    aggregates: RwLock<HashMap<AggregateId, A>>,
    outbox: Arc<dyn Outbox>,
}

impl<A> InMemoryRepository<A> {
    pub fn new(outbox: Arc<dyn Outbox>) -> Self {
        Self {
            aggregates: RwLock::new(HashMap::new()),
            outbox,
        }
    }

    pub async fn len(&self) -> usize {
        self.aggregates.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.aggregates.read().await.is_empty()
    }
}

#[async_trait]
impl<A> Repository<A> for InMemoryRepository<A>
where
    A: Aggregate + Clone + 'static,
{
    async fn load(&self, id: AggregateId) -> Result<Option<A>> {
        Ok(self.aggregates.read().await.get(&id).cloned())
    }

    async fn find(&self, predicate: Predicate<'_, A>) -> Result<Option<A>> {
        Ok(self
            .aggregates
            .read()
            .await
            .values()
            .find(|a| predicate(a))
            .cloned())
    }

    async fn save(&self, aggregate: &mut A, ctx: &CorrelationContext) -> Result<()> {
        if aggregate.pending_events().is_empty() {
            return Ok(());
        }

        let id = aggregate.id();
        let envelopes = aggregate
            .pending_events()
            .iter()
            .map(|recorded| recorded.to_envelope(A::aggregate_type(), &id, ctx))
            .collect::<std::result::Result<Vec<EventEnvelope>, _>>()?;

        let mut aggregates = self.aggregates.write().await;
        let expected = aggregate.persisted_version();
        let actual = aggregates
            .get(&id)
            .map(|stored| stored.version())
            .unwrap_or_else(Version::initial);
        if expected != actual {
            tracing::warn!(
                aggregate_type = A::aggregate_type(),
                aggregate_id = %id,
                expected = %expected,
                actual = %actual,
                "optimistic concurrency conflict"
            );
            return Err(SagaError::Concurrency {
                aggregate_type: A::aggregate_type(),
                aggregate_id: id,
                expected,
                actual,
            });
        }

        let count = envelopes.len();
        self.outbox.enqueue(envelopes).await?;
        aggregate.take_pending_events();
        aggregates.insert(id, aggregate.clone());

        tracing::debug!(
            aggregate_type = A::aggregate_type(),
            aggregate_id = %id,
            version = %aggregate.version(),
            events = count,
            "aggregate saved"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use domain::{CustomerId, Money, Order, OrderItem};
    use messaging::InMemoryOutbox;

    use super::*;

    fn order() -> Order {
        Order::create(
            CustomerId::new("c-1"),
            vec![OrderItem::new("SKU-1", 1, Money::new(10.0, "USD").unwrap()).unwrap()],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn save_moves_events_to_outbox() {
        let outbox = Arc::new(InMemoryOutbox::new());
        let repo = InMemoryRepository::<Order>::new(outbox.clone());
        let ctx = CorrelationContext::new();

        let mut order = order();
        repo.save(&mut order, &ctx).await.unwrap();

        assert!(order.pending_events().is_empty());
        let stored = outbox.all().await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].event_name, "OrderCreated");
        assert_eq!(stored[0].correlation().correlation_id, ctx.correlation_id);

        let loaded = repo.load(order.id()).await.unwrap().unwrap();
        assert_eq!(loaded.version(), Version::new(1));
    }

    #[tokio::test]
    async fn stale_writer_gets_conflict_and_nothing_is_enqueued() {
        let outbox = Arc::new(InMemoryOutbox::new());
        let repo = InMemoryRepository::<Order>::new(outbox.clone());
        let ctx = CorrelationContext::new();
        let mut order = order();
        repo.save(&mut order, &ctx).await.unwrap();

        let mut first = repo.load(order.id()).await.unwrap().unwrap();
        let mut second = repo.load(order.id()).await.unwrap().unwrap();
        first.confirm().unwrap();
        second.cancel("changed my mind").unwrap();

        repo.save(&mut first, &ctx).await.unwrap();
        let err = repo.save(&mut second, &ctx).await.unwrap_err();

        assert!(matches!(err, SagaError::Concurrency { .. }));
        assert!(err.is_transient());
        assert_eq!(outbox.all().await.len(), 2);
    }

    #[tokio::test]
    async fn find_and_load_existing() {
        let repo = InMemoryRepository::<Order>::new(Arc::new(InMemoryOutbox::new()));
        let mut order = order();
        repo.save(&mut order, &CorrelationContext::new()).await.unwrap();

        let found = repo
            .find(&|o: &Order| o.customer_id().as_str() == "c-1")
            .await
            .unwrap();
        assert_eq!(found.map(|o| o.id()), Some(order.id()));

        let missing = load_existing(&repo, AggregateId::new()).await.unwrap_err();
        assert!(matches!(missing, SagaError::NotFound { aggregate_type: "Order", .. }));
    }
}
