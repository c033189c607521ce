pub mod error;
pub mod memory;
pub mod postgres;
pub mod record;
pub mod store;

pub use common::AggregateId;
pub use error::{Result, StoreError};
pub use memory::{InMemoryStore, StoreStats, UniqueIndex};
pub use postgres::PostgresStore;
pub use record::{Change, StoredRecord, TransactionId, Version};
pub use store::{IsolationLevel, Store, StoreTransaction, TransactionOptions};
