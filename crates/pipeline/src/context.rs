//! Explicit per-request context threaded through stages, handlers and event
//! handlers.

use common::{AggregateId, CorrelationId};
use domain::Aggregate;
use store::TransactionOptions;
use tokio_util::sync::CancellationToken;

use crate::config::PublishPolicy;
use crate::dispatcher::Dispatcher;
use crate::error::{DispatchError, DispatchResult};
use crate::request::{Request, RequestKind};
use crate::session::{Handle, PendingWrite, Session};
use crate::transaction::{AmbientTransaction, TransactionScope};

/// Everything a request needs while it runs.
///
/// A context is created by [`Dispatcher::send`] for the outermost request.
/// Nested requests sent with [`RequestContext::send`] get a child context
/// that shares the ambient transaction, cancellation token and correlation
/// id, but has its own [`Session`].
pub struct RequestContext {
    dispatcher: Dispatcher,
    transaction: Option<AmbientTransaction>,
    session: Session,
    token: CancellationToken,
    correlation_id: CorrelationId,
    depth: usize,
    request: &'static str,
    kind: RequestKind,
}

impl RequestContext {
    pub(crate) fn root<R: Request>(dispatcher: Dispatcher, token: CancellationToken) -> Self {
        Self {
            dispatcher,
            transaction: None,
            session: Session::new(),
            token,
            correlation_id: CorrelationId::new(),
            depth: 0,
            request: R::name(),
            kind: R::KIND,
        }
    }

    fn child<R: Request>(&self) -> Self {
        Self {
            dispatcher: self.dispatcher.clone(),
            transaction: self.transaction.clone(),
            session: Session::new(),
            token: self.token.clone(),
            correlation_id: self.correlation_id,
            depth: self.depth + 1,
            request: R::name(),
            kind: R::KIND,
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// The ambient transaction, if a write request is running.
    pub fn transaction(&self) -> Option<&AmbientTransaction> {
        self.transaction.as_ref()
    }

    pub(crate) fn set_transaction(&mut self, transaction: Option<AmbientTransaction>) {
        self.transaction = transaction;
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    /// Zero for the outermost request.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Name of the request this context belongs to.
    pub fn request_name(&self) -> &'static str {
        self.request
    }

    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    /// Fails with [`DispatchError::Cancelled`] once the request was cancelled.
    pub fn checkpoint(&self) -> DispatchResult<()> {
        if self.token.is_cancelled() {
            return Err(DispatchError::Cancelled);
        }
        Ok(())
    }

    /// Returns the tracked aggregate, loading it if this session has not seen
    /// it yet.
    ///
    /// Inside a transaction the load observes writes already flushed by this
    /// request or its parents. Returns `None` when the record does not exist,
    /// belongs to another aggregate type, or was removed in this session.
    pub async fn find<A: Aggregate>(&mut self, id: AggregateId) -> DispatchResult<Option<Handle<A>>> {
        if self.session.contains(id) {
            return Ok(self.session.handle_for::<A>(id));
        }

        self.checkpoint()?;
        let record = match &self.transaction {
            Some(transaction) => transaction.load(id).await?,
            None => self.dispatcher.store().load(id).await?,
        };

        match record {
            Some(record) if record.aggregate_type == A::aggregate_type() => {
                Ok(Some(self.session.attach::<A>(record)?))
            }
            _ => Ok(None),
        }
    }

    /// Like [`find`](Self::find), failing with [`DispatchError::NotFound`].
    pub async fn load<A: Aggregate>(&mut self, id: AggregateId) -> DispatchResult<Handle<A>> {
        self.find::<A>(id)
            .await?
            .ok_or(DispatchError::NotFound {
                aggregate_type: A::aggregate_type(),
                aggregate_id: id,
            })
    }

    /// Tracks every committed aggregate of type `A`.
    ///
    /// Aggregates already tracked keep their in-session state. Records written
    /// by the current, uncommitted transaction are not listed.
    pub async fn load_all<A: Aggregate>(&mut self) -> DispatchResult<Vec<Handle<A>>> {
        self.checkpoint()?;
        let records = self
            .dispatcher
            .store()
            .load_by_type(A::aggregate_type())
            .await?;

        let mut handles = Vec::with_capacity(records.len());
        for record in records {
            let id = record.aggregate_id;
            if self.session.contains(id) {
                handles.extend(self.session.handle_for::<A>(id));
            } else {
                handles.push(self.session.attach::<A>(record)?);
            }
        }
        Ok(handles)
    }

    /// Tracks a new aggregate. It is inserted on the next flush.
    pub fn track<A: Aggregate>(&mut self, aggregate: A) -> DispatchResult<Handle<A>> {
        self.session.track(aggregate)
    }

    pub fn get<A: Aggregate>(&self, handle: Handle<A>) -> DispatchResult<&A> {
        self.session.get(handle)
    }

    pub fn get_mut<A: Aggregate>(&mut self, handle: Handle<A>) -> DispatchResult<&mut A> {
        self.session.get_mut(handle)
    }

    /// Deletes the aggregate on the next flush.
    pub fn remove<A: Aggregate>(&mut self, handle: Handle<A>) -> DispatchResult<()> {
        self.session.remove(handle)
    }

    /// Sends a nested request.
    ///
    /// A nested write joins the ambient transaction; if it fails, the whole
    /// unit of work rolls back even when the caller handles the error.
    pub async fn send<R: Request>(&mut self, request: R) -> DispatchResult<R::Response> {
        let max = self.dispatcher.config().max_nesting_depth;
        if self.depth + 1 > max {
            return Err(DispatchError::NestingTooDeep {
                depth: self.depth + 1,
                max,
            });
        }

        let dispatcher = self.dispatcher.clone();
        let mut child = self.child::<R>();
        dispatcher.dispatch(request, &mut child).await
    }

    /// Writes every pending change in one batch, then publishes the events the
    /// tracked aggregates raised.
    ///
    /// Returns the number of records written. Events are drained only after
    /// the write succeeds, aggregate by aggregate in tracking order. With
    /// [`PublishPolicy::BeforeCommit`] handlers run before this returns,
    /// inside the still-open transaction. A failed flush dooms the
    /// transaction. Without an ambient transaction the flush opens, commits
    /// or rolls back one of its own.
    #[tracing::instrument(skip(self), fields(request = self.request, depth = self.depth))]
    pub async fn flush(&mut self) -> DispatchResult<usize> {
        self.checkpoint()?;

        let writes = self.session.pending_writes()?;
        if writes.is_empty() && !self.session.has_pending_events() {
            return Ok(0);
        }

        if !self.kind.is_write() {
            return Err(DispatchError::ReadOnlyRequest {
                request: self.request,
            });
        }

        let Some(transaction) = self.transaction.clone() else {
            return self.flush_in_own_transaction(writes).await;
        };

        let result = self.write_and_publish(&transaction, writes).await;
        if result.is_err() {
            transaction.doom();
        }
        result
    }

    /// Flushes a write context that has no ambient transaction, which is
    /// the case for event handlers running after the request committed.
    /// The flush becomes its own unit of work and commits before returning.
    async fn flush_in_own_transaction(&mut self, writes: Vec<PendingWrite>) -> DispatchResult<usize> {
        let dispatcher = self.dispatcher.clone();
        let options = TransactionOptions::with_isolation(dispatcher.config().isolation);
        let scope = TransactionScope::begin(dispatcher.store().as_ref(), options).await?;
        let transaction = scope.transaction();
        tracing::debug!(transaction_id = %transaction.id(), "flush opened its own transaction");

        self.transaction = Some(transaction.clone());
        let result = self.write_and_publish(&transaction, writes).await;
        self.transaction = None;

        match result {
            Ok(written) => {
                let deferred = scope.complete().await?;
                if !deferred.is_empty() {
                    dispatcher.publisher().publish_batch(&deferred, self).await?;
                }
                Ok(written)
            }
            Err(error) => {
                if let Err(rollback_error) = scope.rollback().await {
                    tracing::warn!(error = %rollback_error, "rollback failed after flush error");
                }
                Err(error)
            }
        }
    }

    async fn write_and_publish(
        &mut self,
        transaction: &AmbientTransaction,
        writes: Vec<PendingWrite>,
    ) -> DispatchResult<usize> {
        let written = if writes.is_empty() {
            0
        } else {
            let changes = writes.iter().map(|w| w.change().clone()).collect();
            transaction.write(changes).await?
        };
        self.session.mark_persisted(writes);

        let events = self.session.drain_events();
        tracing::debug!(written, events = events.len(), "session flushed");

        match self.dispatcher.config().publish_policy {
            PublishPolicy::BeforeCommit => {
                let publisher = self.dispatcher.publisher();
                publisher.publish_batch(&events, self).await?;
            }
            PublishPolicy::AfterCommit => transaction.defer(events),
        }

        Ok(written)
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("request", &self.request)
            .field("kind", &self.kind)
            .field("correlation_id", &self.correlation_id)
            .field("depth", &self.depth)
            .field("transaction", &self.transaction)
            .field("session", &self.session)
            .finish()
    }
}
