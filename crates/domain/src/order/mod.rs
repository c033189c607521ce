//! Order aggregate and related types.

mod aggregate;
mod events;
mod status;

pub use aggregate::Order;
pub use events::{OrderEvent, OrderPlacedData, OrderStatusChangedData};
pub use status::OrderStatus;

use thiserror::Error;

/// Errors that can occur during order operations.
#[derive(Debug, Error)]
pub enum OrderError {
    /// Order is not in the expected status.
    #[error("Invalid status transition: cannot {action} from {current_status} status")]
    InvalidStatusTransition {
        current_status: OrderStatus,
        action: &'static str,
    },

    #[error("Invalid quantity: {quantity} for {sku} (must be greater than 0)")]
    InvalidQuantity { sku: String, quantity: u32 },

    #[error("Invalid price: {price} for {sku} (must be greater than 0)")]
    InvalidPrice { sku: String, price: i64 },

    #[error("Order has no items")]
    NoItems,
}
