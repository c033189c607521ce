use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    AggregateId, Change, Result, StoreError, StoredRecord, TransactionId, Version,
    store::{Store, StoreTransaction, TransactionOptions, validate_changes},
};

/// A uniqueness constraint over one top-level JSON field of an aggregate type.
#[derive(Debug, Clone)]
pub struct UniqueIndex {
    pub name: String,
    pub aggregate_type: String,
    pub field: String,
}

/// Counters describing transaction activity on an [`InMemoryStore`].
#[derive(Debug, Default)]
pub struct StoreStats {
    begun: AtomicU64,
    committed: AtomicU64,
    rolled_back: AtomicU64,
}

impl StoreStats {
    /// Number of transactions opened so far.
    pub fn transactions_begun(&self) -> u64 {
        self.begun.load(Ordering::SeqCst)
    }

    /// Number of transactions committed so far.
    pub fn commits(&self) -> u64 {
        self.committed.load(Ordering::SeqCst)
    }

    /// Number of transactions rolled back, explicitly or by being dropped.
    pub fn rollbacks(&self) -> u64 {
        self.rolled_back.load(Ordering::SeqCst)
    }
}

/// In-memory record store for tests and local runs.
///
/// Transactions stage their writes privately and publish them on commit,
/// which gives read-committed visibility to everyone else. Versions are
/// re-checked at commit time so two transactions racing on the same record
/// cannot both win.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    records: Arc<RwLock<HashMap<AggregateId, StoredRecord>>>,
    unique_indexes: Arc<Vec<UniqueIndex>>,
    stats: Arc<StoreStats>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a uniqueness constraint on `field` for records of `aggregate_type`.
    pub fn with_unique_index(
        mut self,
        name: impl Into<String>,
        aggregate_type: impl Into<String>,
        field: impl Into<String>,
    ) -> Self {
        Arc::make_mut(&mut self.unique_indexes).push(UniqueIndex {
            name: name.into(),
            aggregate_type: aggregate_type.into(),
            field: field.into(),
        });
        self
    }

    /// Returns the transaction counters.
    pub fn stats(&self) -> &StoreStats {
        &self.stats
    }

    /// Returns the number of committed records.
    pub async fn record_count(&self) -> usize {
        self.records.read().await.len()
    }

    /// Removes every committed record.
    pub async fn clear(&self) {
        self.records.write().await.clear();
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn begin(&self, options: TransactionOptions) -> Result<Box<dyn StoreTransaction>> {
        self.stats.begun.fetch_add(1, Ordering::SeqCst);
        let transaction = InMemoryTransaction {
            id: TransactionId::new(),
            store: self.clone(),
            staged: HashMap::new(),
            order: Vec::new(),
            finished: false,
        };
        tracing::trace!(transaction_id = %transaction.id, isolation = %options.isolation, "in-memory transaction begun");
        Ok(Box::new(transaction))
    }

    async fn load(&self, aggregate_id: AggregateId) -> Result<Option<StoredRecord>> {
        Ok(self.records.read().await.get(&aggregate_id).cloned())
    }

    async fn load_by_type(&self, aggregate_type: &str) -> Result<Vec<StoredRecord>> {
        let records = self.records.read().await;
        let mut matching: Vec<_> = records
            .values()
            .filter(|r| r.aggregate_type == aggregate_type)
            .cloned()
            .collect();
        matching.sort_by_key(|r| r.updated_at);
        Ok(matching)
    }
}

/// A staged write: the committed version observed when the record was first
/// touched, and the record as it will look after commit (`None` = deleted).
#[derive(Debug, Clone)]
struct Staged {
    base: Version,
    record: Option<StoredRecord>,
}

struct InMemoryTransaction {
    id: TransactionId,
    store: InMemoryStore,
    staged: HashMap<AggregateId, Staged>,
    order: Vec<AggregateId>,
    finished: bool,
}

impl InMemoryTransaction {
    fn ensure_active(&self) -> Result<()> {
        if self.finished {
            return Err(StoreError::TransactionClosed(self.id));
        }
        Ok(())
    }
}

#[async_trait]
impl StoreTransaction for InMemoryTransaction {
    fn id(&self) -> TransactionId {
        self.id
    }

    async fn load(&mut self, aggregate_id: AggregateId) -> Result<Option<StoredRecord>> {
        self.ensure_active()?;
        if let Some(staged) = self.staged.get(&aggregate_id) {
            return Ok(staged.record.clone());
        }
        Ok(self.store.records.read().await.get(&aggregate_id).cloned())
    }

    async fn write(&mut self, changes: Vec<Change>) -> Result<usize> {
        self.ensure_active()?;
        validate_changes(&changes)?;

        let committed = self.store.records.read().await;
        let mut staged = self.staged.clone();
        let mut order = self.order.clone();

        for change in &changes {
            let aggregate_id = change.aggregate_id();
            let committed_version = committed
                .get(&aggregate_id)
                .map(|r| r.version)
                .unwrap_or(Version::initial());
            let current = match staged.get(&aggregate_id) {
                Some(s) => s.record.as_ref().map(|r| r.version),
                None => committed.get(&aggregate_id).map(|r| r.version),
            };
            let actual = current.unwrap_or(Version::initial());

            let expected = change.expected_version();
            let conflict = match change {
                Change::Insert(_) => current.is_some(),
                Change::Update { .. } | Change::Delete { .. } => {
                    current.is_none() || actual != expected
                }
            };
            if conflict {
                return Err(StoreError::ConcurrencyConflict {
                    aggregate_id,
                    expected,
                    actual,
                });
            }

            let base = staged
                .get(&aggregate_id)
                .map(|s| s.base)
                .unwrap_or(committed_version);
            let record = match change {
                Change::Insert(record) | Change::Update { record, .. } => Some(record.clone()),
                Change::Delete { .. } => None,
            };
            if !staged.contains_key(&aggregate_id) {
                order.push(aggregate_id);
            }
            staged.insert(aggregate_id, Staged { base, record });
        }

        check_unique(&self.store.unique_indexes, &committed, &staged)?;
        drop(committed);

        self.staged = staged;
        self.order = order;
        Ok(changes.len())
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        self.ensure_active()?;

        let mut committed = self.store.records.write().await;
        for aggregate_id in &self.order {
            let Some(staged) = self.staged.get(aggregate_id) else {
                continue;
            };
            let actual = committed
                .get(aggregate_id)
                .map(|r| r.version)
                .unwrap_or(Version::initial());
            if actual != staged.base {
                return Err(StoreError::ConcurrencyConflict {
                    aggregate_id: *aggregate_id,
                    expected: staged.base,
                    actual,
                });
            }
        }
        check_unique(&self.store.unique_indexes, &committed, &self.staged)?;

        for aggregate_id in &self.order {
            match self.staged.get(aggregate_id).and_then(|s| s.record.clone()) {
                Some(record) => {
                    committed.insert(*aggregate_id, record);
                }
                None => {
                    committed.remove(aggregate_id);
                }
            }
        }
        drop(committed);

        self.finished = true;
        self.store.stats.committed.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(transaction_id = %self.id, records = self.order.len(), "in-memory transaction committed");
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<()> {
        self.ensure_active()?;
        self.finished = true;
        self.store.stats.rolled_back.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for InMemoryTransaction {
    fn drop(&mut self) {
        if !self.finished {
            self.store.stats.rolled_back.fetch_add(1, Ordering::SeqCst);
            tracing::trace!(transaction_id = %self.id, "in-memory transaction dropped without commit");
        }
    }
}

/// Checks every unique index against the committed records overlaid with
/// the staged writes.
fn check_unique(
    indexes: &[UniqueIndex],
    committed: &HashMap<AggregateId, StoredRecord>,
    staged: &HashMap<AggregateId, Staged>,
) -> Result<()> {
    for index in indexes {
        let mut owners: HashMap<String, AggregateId> = HashMap::new();

        let visible = committed
            .iter()
            .filter(|(id, _)| !staged.contains_key(id))
            .map(|(_, record)| record)
            .chain(staged.values().filter_map(|s| s.record.as_ref()));

        for record in visible.filter(|r| r.aggregate_type == index.aggregate_type) {
            let Some(value) = record.state.get(&index.field).filter(|v| !v.is_null()) else {
                continue;
            };
            let key = value.to_string();
            if let Some(owner) = owners.insert(key.clone(), record.aggregate_id)
                && owner != record.aggregate_id
            {
                return Err(StoreError::ConstraintViolation {
                    constraint: index.name.clone(),
                    detail: format!("{}.{} = {key} already exists", index.aggregate_type, index.field),
                });
            }
        }
    }
    Ok(())
}
