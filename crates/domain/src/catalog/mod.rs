//! Catalog product aggregate and related types.

mod aggregate;
mod events;

pub use aggregate::Product;
pub use events::{
    PriceChangedData, ProductEvent, ProductListedData, StockReleasedData, StockReservedData,
};

use thiserror::Error;

/// Errors that can occur during catalog operations.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("SKU must not be empty")]
    EmptySku,

    #[error("Product name must not be empty")]
    EmptyName,

    #[error("Invalid price: {price} (must be greater than 0)")]
    InvalidPrice { price: i64 },

    #[error("Invalid quantity: {quantity} (must be greater than 0)")]
    InvalidQuantity { quantity: u32 },

    #[error("Insufficient stock for {sku}: requested {requested}, available {available}")]
    InsufficientStock {
        sku: String,
        requested: u32,
        available: u32,
    },
}
