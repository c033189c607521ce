//! Core aggregate and domain event traits.

use common::AggregateId;
use serde::{Serialize, de::DeserializeOwned};
use store::Version;

/// Trait for domain events.
///
/// Domain events represent facts that have happened in the domain.
/// They are immutable and should be named in past tense.
pub trait DomainEvent:
    Serialize + DeserializeOwned + Clone + std::fmt::Debug + Send + Sync + 'static
{
    /// Returns the event type name.
    fn event_type(&self) -> &'static str;
}

/// Ordered queue of events raised by one aggregate instance.
///
/// The buffer is owned by the aggregate that raises into it and is never
/// persisted. [`drain`](EventBuffer::drain) hands out every pending event at
/// once and leaves the buffer empty.
#[derive(Debug, Clone)]
pub struct EventBuffer<E> {
    events: Vec<E>,
}

impl<E> Default for EventBuffer<E> {
    fn default() -> Self {
        Self { events: Vec::new() }
    }
}

impl<E> EventBuffer<E> {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an event.
    pub fn raise(&mut self, event: E) {
        self.events.push(event);
    }

    /// Returns the pending events in the order they were raised.
    pub fn pending(&self) -> &[E] {
        &self.events
    }

    /// Removes and returns every pending event.
    ///
    /// Draining an empty buffer returns an empty vector.
    pub fn drain(&mut self) -> Vec<E> {
        std::mem::take(&mut self.events)
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }
}

/// Trait for aggregates persisted through a unit of work.
///
/// An aggregate is a cluster of domain objects that can be treated as a single
/// unit. Its mutation methods update state and raise events into a private
/// [`EventBuffer`]; nothing outside the aggregate can add events to it.
///
/// The serialized form is the persisted state. Implementations skip the
/// version and the event buffer during serialization.
pub trait Aggregate: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// The type of events this aggregate raises.
    type Event: DomainEvent;

    /// Returns the aggregate type name.
    ///
    /// Used as the record type in the store.
    fn aggregate_type() -> &'static str;

    /// Returns the aggregate's unique identifier.
    fn id(&self) -> AggregateId;

    /// Returns the version of the record this instance was loaded from.
    ///
    /// A new aggregate that was never persisted is at `Version::initial()`.
    fn version(&self) -> Version;

    /// Sets the aggregate version.
    ///
    /// Called by the persistence session after loading and after each write.
    fn set_version(&mut self, version: Version);

    /// Returns the events raised since the last drain.
    fn pending_events(&self) -> &[Self::Event];

    /// Removes and returns the events raised since the last drain.
    ///
    /// Reserved for the persistence session, which drains every tracked
    /// aggregate once its flush has written. Request and event handlers must
    /// not call it: events drained anywhere else are never published.
    fn drain_events(&mut self) -> Vec<Self::Event>;

    /// Returns true if the aggregate has events waiting to be drained.
    fn has_pending_events(&self) -> bool {
        !self.pending_events().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    enum TestEvent {
        Created { id: String },
        Updated { value: i32 },
    }

    impl DomainEvent for TestEvent {
        fn event_type(&self) -> &'static str {
            match self {
                TestEvent::Created { .. } => "TestCreated",
                TestEvent::Updated { .. } => "TestUpdated",
            }
        }
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct TestAggregate {
        id: AggregateId,
        value: i32,
        #[serde(skip)]
        version: Version,
        #[serde(skip)]
        events: EventBuffer<TestEvent>,
    }

    impl TestAggregate {
        fn new() -> Self {
            Self {
                id: AggregateId::new(),
                value: 0,
                version: Version::initial(),
                events: EventBuffer::new(),
            }
        }

        fn update(&mut self, value: i32) {
            self.value = value;
            self.events.raise(TestEvent::Updated { value });
        }
    }

    impl Aggregate for TestAggregate {
        type Event = TestEvent;

        fn aggregate_type() -> &'static str {
            "TestAggregate"
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

        fn pending_events(&self) -> &[TestEvent] {
            self.events.pending()
        }

        fn drain_events(&mut self) -> Vec<TestEvent> {
            self.events.drain()
        }
    }

    #[test]
    fn test_buffer_preserves_raise_order() {
        let mut buffer = EventBuffer::new();
        buffer.raise(TestEvent::Created {
            id: "a".to_string(),
        });
        buffer.raise(TestEvent::Updated { value: 1 });

        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.pending()[0].event_type(), "TestCreated");
        assert_eq!(buffer.pending()[1].event_type(), "TestUpdated");
    }

    #[test]
    fn test_drain_empties_buffer() {
        let mut aggregate = TestAggregate::new();
        aggregate.update(1);
        aggregate.update(2);

        let drained = aggregate.drain_events();
        assert_eq!(
            drained,
            vec![TestEvent::Updated { value: 1 }, TestEvent::Updated { value: 2 }]
        );
        assert!(!aggregate.has_pending_events());
    }

    #[test]
    fn test_second_drain_is_empty() {
        let mut aggregate = TestAggregate::new();
        aggregate.update(7);

        assert_eq!(aggregate.drain_events().len(), 1);
        assert!(aggregate.drain_events().is_empty());
        assert!(aggregate.drain_events().is_empty());
    }

    #[test]
    fn test_events_are_not_serialized() {
        let mut aggregate = TestAggregate::new();
        aggregate.update(42);

        let json = serde_json::to_value(&aggregate).unwrap();
        assert_eq!(json["value"], 42);
        assert!(json.get("events").is_none());
        assert!(json.get("version").is_none());

        let restored: TestAggregate = serde_json::from_value(json).unwrap();
        assert!(restored.pending_events().is_empty());
        assert_eq!(restored.version(), Version::initial());
    }

    #[test]
    fn test_buffers_are_not_shared_between_instances() {
        let mut a = TestAggregate::new();
        let b = TestAggregate::new();
        a.update(3);

        assert_eq!(a.pending_events().len(), 1);
        assert!(b.pending_events().is_empty());
    }
}
