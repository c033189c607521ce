//! In-process event publisher.
//!
//! Handlers are registered per Rust event type and invoked sequentially in
//! registration order. The first failing handler stops delivery of the
//! current event and of every event after it in the batch.

use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use common::AggregateId;
use domain::DomainEvent;
use metrics::counter;

use crate::context::RequestContext;
use crate::error::{BoxError, ConfigurationError, DispatchError, DispatchResult};

/// A drained domain event on its way to handlers.
#[derive(Clone)]
pub struct PublishedEvent {
    aggregate_id: AggregateId,
    aggregate_type: &'static str,
    event_type: &'static str,
    type_id: TypeId,
    payload: Arc<dyn Any + Send + Sync>,
}

impl PublishedEvent {
    pub fn new<E: DomainEvent>(
        aggregate_id: AggregateId,
        aggregate_type: &'static str,
        event: E,
    ) -> Self {
        Self {
            aggregate_id,
            aggregate_type,
            event_type: event.event_type(),
            type_id: TypeId::of::<E>(),
            payload: Arc::new(event),
        }
    }

    /// The aggregate that raised the event.
    pub fn aggregate_id(&self) -> AggregateId {
        self.aggregate_id
    }

    pub fn aggregate_type(&self) -> &'static str {
        self.aggregate_type
    }

    /// The event's [`DomainEvent::event_type`] name.
    pub fn event_type(&self) -> &'static str {
        self.event_type
    }

    /// Borrows the event as its concrete type.
    pub fn downcast_ref<E: DomainEvent>(&self) -> Option<&E> {
        self.payload.downcast_ref::<E>()
    }
}

impl std::fmt::Debug for PublishedEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublishedEvent")
            .field("aggregate_id", &self.aggregate_id)
            .field("aggregate_type", &self.aggregate_type)
            .field("event_type", &self.event_type)
            .finish()
    }
}

/// Handler for one domain event type.
///
/// Handlers run inside the request that flushed the event, with its context,
/// so they may load aggregates or send nested requests that join the same
/// transaction.
#[async_trait]
pub trait EventHandler<E: DomainEvent>: Send + Sync + 'static {
    /// Handler name for logging, metrics and error reports.
    fn name(&self) -> &'static str;

    async fn handle(&self, event: &E, ctx: &mut RequestContext) -> Result<(), BoxError>;
}

#[async_trait]
trait ErasedEventHandler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(
        &self,
        event: &PublishedEvent,
        ctx: &mut RequestContext,
    ) -> Result<(), BoxError>;
}

struct Subscription<E, H> {
    handler: H,
    _event: PhantomData<fn(E)>,
}

#[async_trait]
impl<E, H> ErasedEventHandler for Subscription<E, H>
where
    E: DomainEvent,
    H: EventHandler<E>,
{
    fn name(&self) -> &'static str {
        self.handler.name()
    }

    async fn handle(
        &self,
        event: &PublishedEvent,
        ctx: &mut RequestContext,
    ) -> Result<(), BoxError> {
        match event.downcast_ref::<E>() {
            Some(event) => self.handler.handle(event, ctx).await,
            None => Ok(()),
        }
    }
}

/// Delivers published events to their registered handlers.
#[derive(Default)]
pub struct EventPublisher {
    handlers: HashMap<TypeId, Vec<Arc<dyn ErasedEventHandler>>>,
}

impl EventPublisher {
    pub fn builder() -> EventPublisherBuilder {
        EventPublisherBuilder::default()
    }

    /// Returns the number of handlers registered for an event type.
    pub fn handler_count<E: DomainEvent>(&self) -> usize {
        self.handlers
            .get(&TypeId::of::<E>())
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Invokes every handler registered for the event, in registration order.
    ///
    /// Returns the number of handlers that received the event.
    pub async fn publish(
        &self,
        event: &PublishedEvent,
        ctx: &mut RequestContext,
    ) -> DispatchResult<usize> {
        let Some(handlers) = self.handlers.get(&event.type_id) else {
            return Ok(0);
        };

        for handler in handlers {
            tracing::trace!(
                handler = handler.name(),
                event_type = event.event_type(),
                "invoking event handler"
            );
            handler.handle(event, ctx).await.map_err(|source| {
                DispatchError::EventHandler {
                    handler: handler.name(),
                    event_type: event.event_type(),
                    source,
                }
            })?;
        }

        if !handlers.is_empty() {
            counter!("pipeline_events_published", "event_type" => event.event_type()).increment(1);
        }
        Ok(handlers.len())
    }

    /// Publishes events in order, stopping at the first failure.
    ///
    /// Returns the number of events that reached at least one handler.
    #[tracing::instrument(skip_all, fields(count = events.len()))]
    pub async fn publish_batch(
        &self,
        events: &[PublishedEvent],
        ctx: &mut RequestContext,
    ) -> DispatchResult<usize> {
        let mut delivered = 0;
        for event in events {
            ctx.checkpoint()?;
            if self.publish(event, ctx).await? > 0 {
                delivered += 1;
            }
        }
        Ok(delivered)
    }
}

impl std::fmt::Debug for EventPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventPublisher")
            .field("event_types", &self.handlers.len())
            .finish()
    }
}

struct PendingSubscription {
    type_id: TypeId,
    event_type: &'static str,
    handler: Arc<dyn ErasedEventHandler>,
}

/// Collects event declarations and subscriptions at startup.
#[derive(Default)]
pub struct EventPublisherBuilder {
    declared: HashSet<TypeId>,
    subscriptions: Vec<PendingSubscription>,
}

impl EventPublisherBuilder {
    /// Declares an event type that aggregates may raise.
    pub fn declare<E: DomainEvent>(mut self) -> Self {
        self.declared.insert(TypeId::of::<E>());
        self
    }

    /// Appends a handler for an event type.
    pub fn subscribe<E, H>(mut self, handler: H) -> Self
    where
        E: DomainEvent,
        H: EventHandler<E>,
    {
        self.subscriptions.push(PendingSubscription {
            type_id: TypeId::of::<E>(),
            event_type: std::any::type_name::<E>(),
            handler: Arc::new(Subscription {
                handler,
                _event: PhantomData,
            }),
        });
        self
    }

    /// Resolves every subscription against the declared event types.
    pub fn build(self) -> Result<EventPublisher, ConfigurationError> {
        let mut handlers: HashMap<TypeId, Vec<Arc<dyn ErasedEventHandler>>> = HashMap::new();

        for subscription in self.subscriptions {
            if !self.declared.contains(&subscription.type_id) {
                return Err(ConfigurationError::UndeclaredEvent {
                    handler: subscription.handler.name(),
                    event_type: subscription.event_type,
                });
            }
            handlers
                .entry(subscription.type_id)
                .or_default()
                .push(subscription.handler);
        }

        Ok(EventPublisher { handlers })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::{AggregateId, CartEvent, CustomerId, OrderEvent};
    use store::InMemoryStore;
    use tokio_util::sync::CancellationToken;

    use crate::dispatcher::Dispatcher;
    use crate::request::{Request, RequestKind};

    struct Touch;

    impl Request for Touch {
        type Response = ();
        const KIND: RequestKind = RequestKind::Write;
    }

    fn context() -> RequestContext {
        let dispatcher = Dispatcher::builder(Arc::new(InMemoryStore::new()))
            .build()
            .unwrap();
        RequestContext::root::<Touch>(dispatcher, CancellationToken::new())
    }

    struct Named(&'static str);

    #[async_trait]
    impl EventHandler<CartEvent> for Named {
        fn name(&self) -> &'static str {
            self.0
        }

        async fn handle(
            &self,
            _event: &CartEvent,
            _ctx: &mut RequestContext,
        ) -> Result<(), BoxError> {
            Ok(())
        }
    }

    #[test]
    fn test_subscription_to_undeclared_event_fails() {
        let result = EventPublisher::builder()
            .declare::<OrderEvent>()
            .subscribe::<CartEvent, _>(Named("audit"))
            .build();

        assert!(matches!(
            result,
            Err(ConfigurationError::UndeclaredEvent { handler: "audit", .. })
        ));
    }

    #[test]
    fn test_handlers_are_counted_per_type() {
        let publisher = EventPublisher::builder()
            .declare::<CartEvent>()
            .subscribe::<CartEvent, _>(Named("first"))
            .subscribe::<CartEvent, _>(Named("second"))
            .build()
            .unwrap();

        assert_eq!(publisher.handler_count::<CartEvent>(), 2);
        assert_eq!(publisher.handler_count::<OrderEvent>(), 0);
    }

    #[test]
    fn test_published_event_downcasts_to_its_type() {
        let cart_id = AggregateId::new();
        let event = CartEvent::cart_cleared(cart_id, CustomerId::new(), 1);
        let published = PublishedEvent::new(cart_id, "Cart", event.clone());

        assert_eq!(published.event_type(), "CartCleared");
        assert_eq!(published.downcast_ref::<CartEvent>(), Some(&event));
        assert!(published.downcast_ref::<OrderEvent>().is_none());
        assert_eq!(published.aggregate_type(), "Cart");
    }

    #[tokio::test]
    async fn test_only_events_with_handlers_count_as_delivered() {
        let cart_id = AggregateId::new();
        let events = vec![
            PublishedEvent::new(cart_id, "Cart", CartEvent::cart_cleared(cart_id, CustomerId::new(), 1)),
            PublishedEvent::new(cart_id, "Cart", CartEvent::cart_cleared(cart_id, CustomerId::new(), 2)),
        ];
        let mut ctx = context();

        let silent = EventPublisher::builder().declare::<CartEvent>().build().unwrap();
        assert_eq!(silent.publish(&events[0], &mut ctx).await.unwrap(), 0);
        assert_eq!(silent.publish_batch(&events, &mut ctx).await.unwrap(), 0);

        let audited = EventPublisher::builder()
            .declare::<CartEvent>()
            .subscribe::<CartEvent, _>(Named("first"))
            .subscribe::<CartEvent, _>(Named("second"))
            .build()
            .unwrap();
        assert_eq!(audited.publish(&events[0], &mut ctx).await.unwrap(), 2);
        assert_eq!(audited.publish_batch(&events, &mut ctx).await.unwrap(), 2);
    }
}
