use std::collections::HashSet;

use async_trait::async_trait;

use crate::{AggregateId, Change, Result, StoreError, StoredRecord, TransactionId};

/// Transaction isolation level requested when a transaction begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// Each statement sees data committed before it started.
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    /// Returns the SQL keyword for this level.
    pub fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

impl std::fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_sql())
    }
}

impl std::str::FromStr for IsolationLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace(['-', '_', ' '], "").as_str() {
            "readcommitted" => Ok(IsolationLevel::ReadCommitted),
            "repeatableread" => Ok(IsolationLevel::RepeatableRead),
            "serializable" => Ok(IsolationLevel::Serializable),
            other => Err(format!("unknown isolation level: {other}")),
        }
    }
}

/// Options for beginning a transaction.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransactionOptions {
    pub isolation: IsolationLevel,
}

impl TransactionOptions {
    /// Creates options with the default (read committed) isolation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates options with the given isolation level.
    pub fn with_isolation(isolation: IsolationLevel) -> Self {
        Self { isolation }
    }
}

/// Core trait for record store implementations.
///
/// A store persists the latest state of each aggregate as a versioned record.
/// Reads made directly on the store only observe committed data; writes go
/// through a [`StoreTransaction`].
#[async_trait]
pub trait Store: Send + Sync {
    /// Begins a new transaction.
    async fn begin(&self, options: TransactionOptions) -> Result<Box<dyn StoreTransaction>>;

    /// Loads the committed record for an aggregate.
    async fn load(&self, aggregate_id: AggregateId) -> Result<Option<StoredRecord>>;

    /// Loads every committed record of the given aggregate type.
    async fn load_by_type(&self, aggregate_type: &str) -> Result<Vec<StoredRecord>>;
}

/// A single open transaction against a [`Store`].
///
/// Dropping a transaction without calling [`commit`](StoreTransaction::commit)
/// discards everything written through it.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Returns the transaction's identifier.
    fn id(&self) -> TransactionId;

    /// Loads a record, observing this transaction's own uncommitted writes.
    async fn load(&mut self, aggregate_id: AggregateId) -> Result<Option<StoredRecord>>;

    /// Applies a batch of changes atomically.
    ///
    /// Either every change applies or none does. Returns the number of
    /// records written.
    async fn write(&mut self, changes: Vec<Change>) -> Result<usize>;

    /// Makes every write of this transaction durable.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discards every write of this transaction.
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Validates a change set before it reaches storage.
///
/// Every aggregate may appear at most once and written records must carry a
/// version one past the expected version.
pub fn validate_changes(changes: &[Change]) -> Result<()> {
    let mut seen = HashSet::with_capacity(changes.len());

    for change in changes {
        if !seen.insert(change.aggregate_id()) {
            return Err(StoreError::InvalidChange(format!(
                "aggregate {} appears more than once in one write",
                change.aggregate_id()
            )));
        }

        match change {
            Change::Insert(record) | Change::Update { record, .. } => {
                let expected = change.expected_version();
                if record.version != expected.next() {
                    return Err(StoreError::InvalidChange(format!(
                        "aggregate {} must be written at version {}, got {}",
                        record.aggregate_id,
                        expected.next(),
                        record.version
                    )));
                }
            }
            Change::Delete { .. } => {}
        }
    }

    Ok(())
}
