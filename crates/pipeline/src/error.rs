//! Error types for the request pipeline.

use std::time::Duration;

use common::AggregateId;
use domain::{CartError, CatalogError, DomainError, OrderError};
use store::{StoreError, TransactionId};
use thiserror::Error;

use crate::validation::ValidationError;

/// Boxed error returned by event handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type for pipeline operations.
pub type DispatchResult<T> = std::result::Result<T, DispatchError>;

/// Errors detected while assembling or routing through the dispatcher.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("No handler registered for request {request}")]
    MissingHandler { request: &'static str },

    #[error("More than one handler registered for request {request}")]
    DuplicateHandler { request: &'static str },

    #[error("Validation rules registered for request {request}, which has no handler")]
    RulesWithoutHandler { request: &'static str },

    #[error(
        "Event handler {handler} subscribes to {event_type}, which no registered aggregate raises"
    )]
    UndeclaredEvent {
        handler: &'static str,
        event_type: &'static str,
    },

    #[error("Transaction timeout must be greater than zero")]
    ZeroTimeout,

    #[error("Handler for {request} produced a response of the wrong type")]
    ResponseTypeMismatch { request: &'static str },
}

/// Errors returned by [`Dispatcher::send`](crate::Dispatcher::send).
///
/// Every failure reaches the caller unchanged; the pipeline never retries.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// One or more validation rules failed. No transaction was opened.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The store rejected a write or failed.
    #[error("Persistence error: {0}")]
    Persistence(#[source] StoreError),

    /// A stale version was detected on write.
    #[error("Concurrency conflict: {0}")]
    Concurrency(#[source] StoreError),

    /// An event handler failed while reacting to a published event.
    #[error("Event handler {handler} failed on {event_type}: {source}")]
    EventHandler {
        handler: &'static str,
        event_type: &'static str,
        #[source]
        source: BoxError,
    },

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    #[error("{aggregate_type} not found: {aggregate_id}")]
    NotFound {
        aggregate_type: &'static str,
        aggregate_id: AggregateId,
    },

    /// A read-classified request tried to persist changes.
    #[error("Read request {request} cannot persist changes")]
    ReadOnlyRequest { request: &'static str },

    #[error("Request was cancelled")]
    Cancelled,

    #[error("Transaction timed out after {timeout:?}")]
    TransactionTimeout { timeout: Duration },

    /// A nested unit of work failed, so the shared transaction was rolled back.
    #[error("Transaction {transaction_id} was aborted by a failed nested request")]
    TransactionAborted { transaction_id: TransactionId },

    #[error("Nesting depth {depth} exceeds the limit of {max}")]
    NestingTooDeep { depth: usize, max: usize },

    /// A handle was used with a session that does not track it.
    #[error("Handle does not refer to an aggregate tracked by this session")]
    UnknownHandle,

    #[error("Aggregate {aggregate_id} is already tracked by this session")]
    AlreadyTracked { aggregate_id: AggregateId },
}

impl From<StoreError> for DispatchError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::ConcurrencyConflict { .. } => DispatchError::Concurrency(error),
            other => DispatchError::Persistence(other),
        }
    }
}

impl From<serde_json::Error> for DispatchError {
    fn from(error: serde_json::Error) -> Self {
        DispatchError::Persistence(StoreError::Serialization(error))
    }
}

impl From<CartError> for DispatchError {
    fn from(error: CartError) -> Self {
        DispatchError::Domain(error.into())
    }
}

impl From<OrderError> for DispatchError {
    fn from(error: OrderError) -> Self {
        DispatchError::Domain(error.into())
    }
}

impl From<CatalogError> for DispatchError {
    fn from(error: CatalogError) -> Self {
        DispatchError::Domain(error.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use store::Version;

    #[test]
    fn test_conflicts_map_to_concurrency() {
        let error: DispatchError = StoreError::ConcurrencyConflict {
            aggregate_id: AggregateId::new(),
            expected: Version::first(),
            actual: Version::new(2),
        }
        .into();
        assert!(matches!(error, DispatchError::Concurrency(_)));
    }

    #[test]
    fn test_constraint_violations_map_to_persistence() {
        let error: DispatchError = StoreError::ConstraintViolation {
            constraint: "products_sku_key".to_string(),
            detail: "duplicate".to_string(),
        }
        .into();
        assert!(matches!(error, DispatchError::Persistence(_)));
        assert!(error.to_string().contains("products_sku_key"));
    }

    #[test]
    fn test_domain_errors_convert() {
        let error: DispatchError = CartError::InvalidQuantity { quantity: 0 }.into();
        assert!(matches!(
            error,
            DispatchError::Domain(DomainError::Cart(CartError::InvalidQuantity { .. }))
        ));
    }
}
