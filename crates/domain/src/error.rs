//! Domain error types.

use thiserror::Error;

use crate::{cart::CartError, catalog::CatalogError, order::OrderError};

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Cart error: {0}")]
    Cart(#[from] CartError),

    #[error("Order error: {0}")]
    Order(#[from] OrderError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),
}
