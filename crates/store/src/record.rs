use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::AggregateId;

/// Unique identifier for a store transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(Uuid);

impl TransactionId {
    /// Creates a new random transaction ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Version number of a stored record, used for optimistic concurrency control.
///
/// A record that has never been written is at version 0. The first write
/// produces version 1 and every later write increments it by one.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    /// Creates a new version from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the initial version (0) for a record that was never persisted.
    pub fn initial() -> Self {
        Self(0)
    }

    /// Returns the first version (1) for the first write.
    pub fn first() -> Self {
        Self(1)
    }

    /// Returns the next version.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the raw version value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Version {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<Version> for i64 {
    fn from(version: Version) -> Self {
        version.0
    }
}

/// The persisted state of one aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    /// The aggregate this record belongs to.
    pub aggregate_id: AggregateId,

    /// The type of aggregate (e.g., "Cart", "Order").
    pub aggregate_type: String,

    /// The version of the record after the write that produced it.
    pub version: Version,

    /// When the record was last written.
    pub updated_at: DateTime<Utc>,

    /// The serialized aggregate state.
    pub state: serde_json::Value,
}

impl StoredRecord {
    /// Creates a new record.
    pub fn new(
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        version: Version,
        state: serde_json::Value,
    ) -> Self {
        Self {
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            version,
            updated_at: Utc::now(),
            state,
        }
    }

    /// Creates a record from a serializable state.
    pub fn from_state<T: Serialize>(
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        version: Version,
        state: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(
            aggregate_id,
            aggregate_type,
            version,
            serde_json::to_value(state)?,
        ))
    }

    /// Deserializes the stored state into a concrete type.
    pub fn to_state<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.state.clone())
    }
}

/// A single pending write against the store.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    /// Creates a record that must not exist yet.
    Insert(StoredRecord),

    /// Replaces a record that must currently be at `expected`.
    Update {
        record: StoredRecord,
        expected: Version,
    },

    /// Removes a record that must currently be at `expected`.
    Delete {
        aggregate_id: AggregateId,
        aggregate_type: String,
        expected: Version,
    },
}

impl Change {
    /// Returns the aggregate targeted by this change.
    pub fn aggregate_id(&self) -> AggregateId {
        match self {
            Change::Insert(record) | Change::Update { record, .. } => record.aggregate_id,
            Change::Delete { aggregate_id, .. } => *aggregate_id,
        }
    }

    /// Returns the aggregate type targeted by this change.
    pub fn aggregate_type(&self) -> &str {
        match self {
            Change::Insert(record) | Change::Update { record, .. } => &record.aggregate_type,
            Change::Delete { aggregate_type, .. } => aggregate_type,
        }
    }

    /// Returns the version the record must be at before this change applies.
    pub fn expected_version(&self) -> Version {
        match self {
            Change::Insert(_) => Version::initial(),
            Change::Update { expected, .. } | Change::Delete { expected, .. } => *expected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_ordering() {
        let v1 = Version::new(1);
        let v2 = Version::new(2);
        assert!(v1 < v2);
        assert_eq!(v1.next(), v2);
    }

    #[test]
    fn version_initial_and_first() {
        assert_eq!(Version::initial().as_i64(), 0);
        assert_eq!(Version::first().as_i64(), 1);
        assert_eq!(Version::initial().next(), Version::first());
    }

    #[test]
    fn record_from_state_round_trips_through_json() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Counter {
            value: i32,
        }

        let id = AggregateId::new();
        let record =
            StoredRecord::from_state(id, "Counter", Version::first(), &Counter { value: 7 })
                .unwrap();

        assert_eq!(record.aggregate_type, "Counter");
        assert_eq!(record.to_state::<Counter>().unwrap(), Counter { value: 7 });
    }

    #[test]
    fn change_reports_expected_version() {
        let id = AggregateId::new();
        let record = StoredRecord::new(id, "Cart", Version::new(3), serde_json::json!({}));

        assert_eq!(
            Change::Insert(record.clone()).expected_version(),
            Version::initial()
        );
        assert_eq!(
            Change::Update {
                record,
                expected: Version::new(2)
            }
            .expected_version(),
            Version::new(2)
        );

        let delete = Change::Delete {
            aggregate_id: id,
            aggregate_type: "Cart".to_string(),
            expected: Version::new(5),
        };
        assert_eq!(delete.aggregate_id(), id);
        assert_eq!(delete.aggregate_type(), "Cart");
    }
}
