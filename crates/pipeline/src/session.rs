//! Persistence session: the unit of work of one request.
//!
//! The session owns every aggregate loaded or created while handling a
//! request. Aggregates live in an arena and are addressed by typed
//! [`Handle`]s. On flush the session computes the changes to write by
//! comparing each aggregate's serialized state with the state it last
//! persisted, then drains buffered events in tracking order.

use std::any::Any;
use std::collections::HashMap;
use std::marker::PhantomData;

use common::AggregateId;
use domain::Aggregate;
use serde_json::Value;
use store::{Change, StoredRecord, Version};

use crate::error::{DispatchError, DispatchResult};
use crate::publisher::PublishedEvent;

/// Typed reference to an aggregate tracked by a [`Session`].
pub struct Handle<A> {
    slot: usize,
    id: AggregateId,
    _aggregate: PhantomData<fn() -> A>,
}

impl<A> Handle<A> {
    fn new(slot: usize, id: AggregateId) -> Self {
        Self {
            slot,
            id,
            _aggregate: PhantomData,
        }
    }

    /// The tracked aggregate's identifier.
    pub fn id(&self) -> AggregateId {
        self.id
    }
}

impl<A> Clone for Handle<A> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<A> Copy for Handle<A> {}

impl<A> PartialEq for Handle<A> {
    fn eq(&self, other: &Self) -> bool {
        self.slot == other.slot && self.id == other.id
    }
}

impl<A> Eq for Handle<A> {}

impl<A> std::fmt::Debug for Handle<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle")
            .field("slot", &self.slot)
            .field("id", &self.id)
            .finish()
    }
}

/// Object-safe view of an aggregate.
trait Tracked: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn aggregate_id(&self) -> AggregateId;
    fn aggregate_type(&self) -> &'static str;
    fn current_version(&self) -> Version;
    fn assign_version(&mut self, version: Version);
    fn snapshot(&self) -> serde_json::Result<Value>;
    fn holds_events(&self) -> bool;
    fn drain(&mut self) -> Vec<PublishedEvent>;
}

impl<A: Aggregate> Tracked for A {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn aggregate_id(&self) -> AggregateId {
        self.id()
    }

    fn aggregate_type(&self) -> &'static str {
        A::aggregate_type()
    }

    fn current_version(&self) -> Version {
        Aggregate::version(self)
    }

    fn assign_version(&mut self, version: Version) {
        Aggregate::set_version(self, version);
    }

    fn snapshot(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }

    fn holds_events(&self) -> bool {
        Aggregate::has_pending_events(self)
    }

    fn drain(&mut self) -> Vec<PublishedEvent> {
        let id = self.id();
        self.drain_events()
            .into_iter()
            .map(|event| PublishedEvent::new(id, A::aggregate_type(), event))
            .collect()
    }
}

struct Entry {
    aggregate: Box<dyn Tracked>,
    /// State as last written or loaded. `None` until first persisted.
    persisted: Option<Value>,
    removed: bool,
}

impl Entry {
    fn is_live(&self) -> bool {
        !self.removed
    }

    /// Removed and already deleted from the store.
    fn is_gone(&self) -> bool {
        self.removed && self.persisted.is_none()
    }
}

/// A change computed by the session, remembered so the session can record
/// the outcome once the write succeeds.
#[derive(Debug, Clone)]
pub(crate) struct PendingWrite {
    slot: usize,
    change: Change,
}

impl PendingWrite {
    pub(crate) fn change(&self) -> &Change {
        &self.change
    }
}

/// Unit of work over the aggregates touched by one request.
#[derive(Default)]
pub struct Session {
    entries: Vec<Option<Entry>>,
    index: HashMap<AggregateId, usize>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking a new aggregate. It is inserted on the next flush.
    pub fn track<A: Aggregate>(&mut self, aggregate: A) -> DispatchResult<Handle<A>> {
        let id = aggregate.id();
        self.insert(id, Box::new(aggregate), None)
    }

    /// Tracks an aggregate rebuilt from its stored record.
    pub(crate) fn attach<A: Aggregate>(&mut self, record: StoredRecord) -> DispatchResult<Handle<A>> {
        let mut aggregate: A = record.to_state()?;
        Aggregate::set_version(&mut aggregate, record.version);

        let persisted = serde_json::to_value(&aggregate)?;
        self.insert(record.aggregate_id, Box::new(aggregate), Some(persisted))
    }

    fn insert<A: Aggregate>(
        &mut self,
        id: AggregateId,
        aggregate: Box<dyn Tracked>,
        persisted: Option<Value>,
    ) -> DispatchResult<Handle<A>> {
        if self.index.contains_key(&id) {
            return Err(DispatchError::AlreadyTracked { aggregate_id: id });
        }

        let slot = self.entries.len();
        self.entries.push(Some(Entry {
            aggregate,
            persisted,
            removed: false,
        }));
        self.index.insert(id, slot);
        Ok(Handle::new(slot, id))
    }

    /// Returns true if the session has an entry for the id, removed or not.
    pub fn contains(&self, id: AggregateId) -> bool {
        self.index.contains_key(&id)
    }

    /// Returns the handle of a live aggregate of type `A`.
    pub fn handle_for<A: Aggregate>(&self, id: AggregateId) -> Option<Handle<A>> {
        let slot = *self.index.get(&id)?;
        let entry = self.entries.get(slot)?.as_ref()?;
        (entry.is_live() && entry.aggregate.as_any().is::<A>()).then(|| Handle::new(slot, id))
    }

    fn entry(&self, slot: usize, id: AggregateId) -> DispatchResult<&Entry> {
        self.entries
            .get(slot)
            .and_then(Option::as_ref)
            .filter(|entry| entry.is_live() && entry.aggregate.aggregate_id() == id)
            .ok_or(DispatchError::UnknownHandle)
    }

    fn entry_mut(&mut self, slot: usize, id: AggregateId) -> DispatchResult<&mut Entry> {
        self.entries
            .get_mut(slot)
            .and_then(Option::as_mut)
            .filter(|entry| entry.is_live() && entry.aggregate.aggregate_id() == id)
            .ok_or(DispatchError::UnknownHandle)
    }

    pub fn get<A: Aggregate>(&self, handle: Handle<A>) -> DispatchResult<&A> {
        self.entry(handle.slot, handle.id)?
            .aggregate
            .as_any()
            .downcast_ref::<A>()
            .ok_or(DispatchError::UnknownHandle)
    }

    pub fn get_mut<A: Aggregate>(&mut self, handle: Handle<A>) -> DispatchResult<&mut A> {
        self.entry_mut(handle.slot, handle.id)?
            .aggregate
            .as_any_mut()
            .downcast_mut::<A>()
            .ok_or(DispatchError::UnknownHandle)
    }

    /// Schedules the aggregate for deletion on the next flush.
    ///
    /// An aggregate that was never persisted is dropped immediately, together
    /// with any events it raised.
    pub fn remove<A: Aggregate>(&mut self, handle: Handle<A>) -> DispatchResult<()> {
        self.get::<A>(handle)?;

        let never_persisted = self.entry(handle.slot, handle.id)?.persisted.is_none();
        if never_persisted {
            self.entries[handle.slot] = None;
            self.index.remove(&handle.id);
        } else {
            self.entry_mut(handle.slot, handle.id)?.removed = true;
        }
        Ok(())
    }

    /// Number of live aggregates.
    pub fn len(&self) -> usize {
        self.entries.iter().flatten().filter(|e| e.is_live()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if any tracked aggregate holds undrained events.
    pub fn has_pending_events(&self) -> bool {
        self.entries
            .iter()
            .flatten()
            .any(|entry| entry.aggregate.holds_events())
    }

    /// Returns true if a flush would write anything.
    pub fn has_pending_changes(&self) -> DispatchResult<bool> {
        Ok(!self.pending_writes()?.is_empty())
    }

    /// Computes the changes a flush would write, in tracking order.
    pub(crate) fn pending_writes(&self) -> DispatchResult<Vec<PendingWrite>> {
        let mut writes = Vec::new();

        for (slot, entry) in self.entries.iter().enumerate() {
            let Some(entry) = entry else { continue };
            if entry.is_gone() {
                continue;
            }

            let aggregate = &entry.aggregate;
            let id = aggregate.aggregate_id();
            let version = aggregate.current_version();

            let change = match (&entry.persisted, entry.removed) {
                (Some(_), true) => Change::Delete {
                    aggregate_id: id,
                    aggregate_type: aggregate.aggregate_type().to_string(),
                    expected: version,
                },
                (None, _) => Change::Insert(StoredRecord::new(
                    id,
                    aggregate.aggregate_type(),
                    Version::first(),
                    aggregate.snapshot()?,
                )),
                (Some(persisted), false) => {
                    let state = aggregate.snapshot()?;
                    if state == *persisted {
                        continue;
                    }
                    Change::Update {
                        record: StoredRecord::new(
                            id,
                            aggregate.aggregate_type(),
                            version.next(),
                            state,
                        ),
                        expected: version,
                    }
                }
            };

            writes.push(PendingWrite { slot, change });
        }

        Ok(writes)
    }

    /// Records the outcome of a successful write.
    pub(crate) fn mark_persisted(&mut self, writes: Vec<PendingWrite>) {
        for write in writes {
            let Some(Some(entry)) = self.entries.get_mut(write.slot) else {
                continue;
            };

            match write.change {
                Change::Insert(record) | Change::Update { record, .. } => {
                    entry.aggregate.assign_version(record.version);
                    entry.persisted = Some(record.state);
                }
                Change::Delete { .. } => {
                    entry.persisted = None;
                }
            }
        }
    }

    /// Drains every aggregate's events, aggregate by aggregate in tracking
    /// order, and forgets aggregates that were deleted.
    pub(crate) fn drain_events(&mut self) -> Vec<PublishedEvent> {
        let mut events = Vec::new();

        for entry in self.entries.iter_mut().flatten() {
            events.extend(entry.aggregate.drain());
        }

        for slot in 0..self.entries.len() {
            let gone = matches!(&self.entries[slot], Some(entry) if entry.is_gone());
            if gone && let Some(entry) = self.entries[slot].take() {
                self.index.remove(&entry.aggregate.aggregate_id());
            }
        }

        events
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("tracked", &self.len())
            .finish()
    }
}
