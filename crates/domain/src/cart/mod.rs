//! Shopping cart aggregate and related types.

mod aggregate;
mod events;

pub use aggregate::Cart;
pub use events::{CartClearedData, CartEvent, ItemAddedData, ItemRemovedData};

use thiserror::Error;

/// Errors that can occur during cart operations.
#[derive(Debug, Error)]
pub enum CartError {
    #[error("Invalid quantity: {quantity} (must be greater than 0)")]
    InvalidQuantity { quantity: u32 },

    #[error("Invalid price: {price} (must be greater than 0)")]
    InvalidPrice { price: i64 },

    #[error("Adding {added} of {sku} would overflow the cart's quantity or total")]
    Overflow { sku: String, added: u32 },

    #[error("Item not found: {sku}")]
    ItemNotFound { sku: String },
}
