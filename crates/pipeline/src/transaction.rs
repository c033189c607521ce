//! Ambient transaction shared by a request and its nested requests, and the
//! stage that owns it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use common::AggregateId;
use metrics::counter;
use store::{Change, Store, StoreTransaction, StoredRecord, TransactionId, TransactionOptions};
use tokio::sync::Mutex;

use crate::config::PublishPolicy;
use crate::context::RequestContext;
use crate::error::{DispatchError, DispatchResult};
use crate::middleware::{Middleware, Next};
use crate::publisher::PublishedEvent;
use crate::request::{BoxResponse, RequestEnvelope};

struct Shared {
    id: TransactionId,
    store_tx: Mutex<Option<Box<dyn StoreTransaction>>>,
    doomed: AtomicBool,
    deferred: StdMutex<Vec<PublishedEvent>>,
}

/// Handle to the transaction a request runs in.
///
/// Cloning the handle borrows the transaction; only the
/// [`TransactionScope`] that began it can commit or roll it back.
#[derive(Clone)]
pub struct AmbientTransaction {
    shared: Arc<Shared>,
}

impl AmbientTransaction {
    pub fn id(&self) -> TransactionId {
        self.shared.id
    }

    /// Loads a record, observing writes already made in this transaction.
    pub async fn load(&self, aggregate_id: AggregateId) -> DispatchResult<Option<StoredRecord>> {
        let mut guard = self.shared.store_tx.lock().await;
        let tx = guard
            .as_mut()
            .ok_or(DispatchError::TransactionAborted {
                transaction_id: self.id(),
            })?;
        Ok(tx.load(aggregate_id).await?)
    }

    /// Writes a batch of changes atomically.
    pub async fn write(&self, changes: Vec<Change>) -> DispatchResult<usize> {
        let mut guard = self.shared.store_tx.lock().await;
        let tx = guard
            .as_mut()
            .ok_or(DispatchError::TransactionAborted {
                transaction_id: self.id(),
            })?;
        Ok(tx.write(changes).await?)
    }

    /// Marks the transaction as failed. The owner will roll it back.
    pub fn doom(&self) {
        if !self.shared.doomed.swap(true, Ordering::SeqCst) {
            tracing::debug!(transaction_id = %self.id(), "ambient transaction doomed");
        }
    }

    pub fn is_doomed(&self) -> bool {
        self.shared.doomed.load(Ordering::SeqCst)
    }

    /// Holds events until the owner has committed.
    pub(crate) fn defer(&self, events: Vec<PublishedEvent>) {
        if let Ok(mut deferred) = self.shared.deferred.lock() {
            deferred.extend(events);
        }
    }

    fn take_deferred(&self) -> Vec<PublishedEvent> {
        self.shared
            .deferred
            .lock()
            .map(|mut deferred| std::mem::take(&mut *deferred))
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for AmbientTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmbientTransaction")
            .field("id", &self.id())
            .field("doomed", &self.is_doomed())
            .finish()
    }
}

/// Owner of an ambient transaction.
///
/// Dropping a scope without calling [`complete`](TransactionScope::complete)
/// releases the store transaction, which rolls it back.
pub struct TransactionScope {
    transaction: AmbientTransaction,
    finished: bool,
}

impl TransactionScope {
    /// Begins a new store transaction.
    pub async fn begin(store: &dyn Store, options: TransactionOptions) -> DispatchResult<Self> {
        let store_tx = store.begin(options).await?;
        let id = store_tx.id();

        counter!("pipeline_transactions_opened").increment(1);
        tracing::debug!(transaction_id = %id, isolation = %options.isolation, "ambient transaction opened");

        Ok(Self {
            transaction: AmbientTransaction {
                shared: Arc::new(Shared {
                    id,
                    store_tx: Mutex::new(Some(store_tx)),
                    doomed: AtomicBool::new(false),
                    deferred: StdMutex::new(Vec::new()),
                }),
            },
            finished: false,
        })
    }

    /// Returns a borrowed handle for the request chain.
    pub fn transaction(&self) -> AmbientTransaction {
        self.transaction.clone()
    }

    /// Commits, unless a nested unit of work doomed the transaction.
    ///
    /// Returns the events deferred under [`PublishPolicy::AfterCommit`].
    pub async fn complete(mut self) -> DispatchResult<Vec<PublishedEvent>> {
        let id = self.transaction.id();

        if self.transaction.is_doomed() {
            self.release().await;
            return Err(DispatchError::TransactionAborted { transaction_id: id });
        }

        let store_tx = self.transaction.shared.store_tx.lock().await.take();
        self.finished = true;
        let store_tx = store_tx.ok_or(DispatchError::TransactionAborted { transaction_id: id })?;

        match store_tx.commit().await {
            Ok(()) => {
                counter!("pipeline_transactions_committed").increment(1);
                tracing::debug!(transaction_id = %id, "ambient transaction committed");
                Ok(self.transaction.take_deferred())
            }
            Err(error) => {
                counter!("pipeline_transactions_rolled_back").increment(1);
                Err(error.into())
            }
        }
    }

    /// Rolls back every write made in the transaction.
    pub async fn rollback(mut self) -> DispatchResult<()> {
        let id = self.transaction.id();
        let store_tx = self.transaction.shared.store_tx.lock().await.take();
        self.finished = true;

        counter!("pipeline_transactions_rolled_back").increment(1);
        tracing::debug!(transaction_id = %id, "ambient transaction rolled back");

        match store_tx {
            Some(store_tx) => Ok(store_tx.rollback().await?),
            None => Ok(()),
        }
    }

    async fn release(&mut self) {
        let id = self.transaction.id();
        let store_tx = self.transaction.shared.store_tx.lock().await.take();
        self.finished = true;

        counter!("pipeline_transactions_rolled_back").increment(1);
        if let Some(store_tx) = store_tx
            && let Err(error) = store_tx.rollback().await
        {
            tracing::warn!(transaction_id = %id, %error, "rollback of doomed transaction failed");
        }
        tracing::debug!(transaction_id = %id, "doomed ambient transaction rolled back");
    }
}

impl Drop for TransactionScope {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        counter!("pipeline_transactions_rolled_back").increment(1);
        tracing::debug!(transaction_id = %self.transaction.id(), "ambient transaction dropped, rolling back");
        if let Ok(mut guard) = self.transaction.shared.store_tx.try_lock() {
            guard.take();
        }
    }
}

/// Second stage of the chain: runs write requests inside an ambient
/// transaction.
///
/// Read requests pass through. A write request that already runs inside an
/// ambient transaction (a nested send) joins it; a failure dooms the shared
/// transaction so the owner rolls back even if the failure was swallowed.
pub struct TransactionStage {
    store: Arc<dyn Store>,
    options: TransactionOptions,
    timeout: Duration,
    publish_policy: PublishPolicy,
}

impl TransactionStage {
    pub fn new(
        store: Arc<dyn Store>,
        options: TransactionOptions,
        timeout: Duration,
        publish_policy: PublishPolicy,
    ) -> Self {
        Self {
            store,
            options,
            timeout,
            publish_policy,
        }
    }

    async fn run_owned(
        &self,
        request: RequestEnvelope,
        ctx: &mut RequestContext,
        next: Next<'_>,
    ) -> DispatchResult<BoxResponse> {
        ctx.checkpoint()?;

        let scope = TransactionScope::begin(self.store.as_ref(), self.options).await?;
        let transaction_id = scope.transaction().id();
        ctx.set_transaction(Some(scope.transaction()));

        let token = ctx.cancellation_token().clone();
        let timeout = self.timeout;
        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => Err(DispatchError::Cancelled),
            result = tokio::time::timeout(timeout, next.run(request, ctx)) => {
                result.unwrap_or(Err(DispatchError::TransactionTimeout { timeout }))
            }
        };

        ctx.set_transaction(None);

        match outcome {
            Ok(response) => {
                let deferred = scope.complete().await?;
                if self.publish_policy == PublishPolicy::AfterCommit && !deferred.is_empty() {
                    let publisher = ctx.dispatcher().publisher();
                    publisher.publish_batch(&deferred, ctx).await?;
                }
                Ok(response)
            }
            Err(error) => {
                if let Err(rollback_error) = scope.rollback().await {
                    tracing::warn!(
                        %transaction_id,
                        error = %rollback_error,
                        "rollback failed after request error"
                    );
                }
                Err(error)
            }
        }
    }
}

#[async_trait]
impl Middleware for TransactionStage {
    fn name(&self) -> &'static str {
        "transaction"
    }

    async fn handle(
        &self,
        request: RequestEnvelope,
        ctx: &mut RequestContext,
        next: Next<'_>,
    ) -> DispatchResult<BoxResponse> {
        if !request.kind().is_write() {
            return next.run(request, ctx).await;
        }

        if let Some(transaction) = ctx.transaction().cloned() {
            tracing::debug!(
                transaction_id = %transaction.id(),
                request = request.name(),
                "joining ambient transaction"
            );
            let result = next.run(request, ctx).await;
            if result.is_err() {
                transaction.doom();
            }
            return result;
        }

        self.run_owned(request, ctx, next).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use store::{InMemoryStore, Version};

    fn record(id: AggregateId) -> StoredRecord {
        StoredRecord::new(id, "Cart", Version::first(), serde_json::json!({}))
    }

    #[tokio::test]
    async fn test_complete_commits_writes() {
        let store = InMemoryStore::new();
        let scope = TransactionScope::begin(&store, TransactionOptions::new())
            .await
            .unwrap();
        let id = AggregateId::new();

        scope
            .transaction()
            .write(vec![Change::Insert(record(id))])
            .await
            .unwrap();
        scope.complete().await.unwrap();

        assert!(store.load(id).await.unwrap().is_some());
        assert_eq!(store.stats().commits(), 1);
    }

    #[tokio::test]
    async fn test_doomed_transaction_is_aborted_on_complete() {
        let store = InMemoryStore::new();
        let scope = TransactionScope::begin(&store, TransactionOptions::new())
            .await
            .unwrap();
        let id = AggregateId::new();
        let transaction = scope.transaction();

        transaction
            .write(vec![Change::Insert(record(id))])
            .await
            .unwrap();
        transaction.doom();

        let result = scope.complete().await;
        assert!(matches!(result, Err(DispatchError::TransactionAborted { .. })));
        assert!(store.load(id).await.unwrap().is_none());
        assert_eq!(store.stats().rollbacks(), 1);
    }

    #[tokio::test]
    async fn test_dropped_scope_rolls_back() {
        let store = InMemoryStore::new();
        let id = AggregateId::new();
        let transaction = {
            let scope = TransactionScope::begin(&store, TransactionOptions::new())
                .await
                .unwrap();
            let transaction = scope.transaction();
            transaction
                .write(vec![Change::Insert(record(id))])
                .await
                .unwrap();
            transaction
        };

        assert!(store.load(id).await.unwrap().is_none());
        assert_eq!(store.stats().rollbacks(), 1);

        // A borrowed handle outliving its scope can no longer write.
        let result = transaction.write(vec![Change::Insert(record(id))]).await;
        assert!(matches!(result, Err(DispatchError::TransactionAborted { .. })));
    }

    #[tokio::test]
    async fn test_loads_see_own_writes() {
        let store = InMemoryStore::new();
        let scope = TransactionScope::begin(&store, TransactionOptions::new())
            .await
            .unwrap();
        let id = AggregateId::new();
        let transaction = scope.transaction();

        transaction
            .write(vec![Change::Insert(record(id))])
            .await
            .unwrap();

        assert!(transaction.load(id).await.unwrap().is_some());
        assert!(store.load(id).await.unwrap().is_none());
        scope.rollback().await.unwrap();
    }
}
