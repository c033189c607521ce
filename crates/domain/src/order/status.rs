//! Order status machine.

use serde::{Deserialize, Serialize};

/// The status of an order in its lifecycle.
///
/// Status transitions:
/// ```text
/// Placed ──► Paid ──► Shipped
///   │         │
///   └─────────┴──► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum OrderStatus {
    /// Order was placed and stock reserved, awaiting payment.
    #[default]
    Placed,

    /// Payment confirmed, awaiting shipment.
    Paid,

    /// Order has been shipped (terminal status).
    Shipped,

    /// Order was cancelled (terminal status).
    Cancelled,
}

impl OrderStatus {
    pub fn can_pay(&self) -> bool {
        matches!(self, OrderStatus::Placed)
    }

    pub fn can_ship(&self) -> bool {
        matches!(self, OrderStatus::Paid)
    }

    /// Returns true if the order can be cancelled in this status.
    pub fn can_cancel(&self) -> bool {
        matches!(self, OrderStatus::Placed | OrderStatus::Paid)
    }

    /// Returns true if this is a terminal status (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Shipped | OrderStatus::Cancelled)
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Placed => "Placed",
            OrderStatus::Paid => "Paid",
            OrderStatus::Shipped => "Shipped",
            OrderStatus::Cancelled => "Cancelled",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
