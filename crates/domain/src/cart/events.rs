//! Cart domain events.

use common::AggregateId;
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;
use crate::values::{CustomerId, LineItem, Money, ProductId};

/// Events raised by the cart aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum CartEvent {
    /// A product was added to the cart, or its quantity increased.
    ItemAdded(ItemAddedData),

    /// A product line was removed from the cart.
    ItemRemoved(ItemRemovedData),

    /// Every line was removed from the cart.
    CartCleared(CartClearedData),
}

impl DomainEvent for CartEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CartEvent::ItemAdded(_) => "ItemAdded",
            CartEvent::ItemRemoved(_) => "ItemRemoved",
            CartEvent::CartCleared(_) => "CartCleared",
        }
    }
}

/// Data for ItemAdded event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemAddedData {
    pub cart_id: AggregateId,
    pub customer_id: CustomerId,
    pub product: AggregateId,
    pub sku: ProductId,
    pub name: String,

    /// Quantity added by this mutation.
    pub quantity: u32,

    /// Unit price at the time of adding.
    pub unit_price: Money,
}

/// Data for ItemRemoved event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRemovedData {
    pub cart_id: AggregateId,
    pub sku: ProductId,

    /// Quantity the line held before removal.
    pub quantity: u32,
}

/// Data for CartCleared event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartClearedData {
    pub cart_id: AggregateId,
    pub customer_id: CustomerId,

    /// Number of lines removed.
    pub line_count: usize,
}

impl CartEvent {
    /// Creates an ItemAdded event.
    pub fn item_added(cart_id: AggregateId, customer_id: CustomerId, item: &LineItem) -> Self {
        CartEvent::ItemAdded(ItemAddedData {
            cart_id,
            customer_id,
            product: item.product,
            sku: item.sku.clone(),
            name: item.name.clone(),
            quantity: item.quantity,
            unit_price: item.unit_price,
        })
    }

    /// Creates an ItemRemoved event.
    pub fn item_removed(cart_id: AggregateId, sku: ProductId, quantity: u32) -> Self {
        CartEvent::ItemRemoved(ItemRemovedData {
            cart_id,
            sku,
            quantity,
        })
    }

    /// Creates a CartCleared event.
    pub fn cart_cleared(cart_id: AggregateId, customer_id: CustomerId, line_count: usize) -> Self {
        CartEvent::CartCleared(CartClearedData {
            cart_id,
            customer_id,
            line_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type() {
        let cart_id = AggregateId::new();
        let item = LineItem::new(
            AggregateId::new(),
            "SKU-001",
            "Widget",
            2,
            Money::from_cents(1000),
        );

        let event = CartEvent::item_added(cart_id, CustomerId::new(), &item);
        assert_eq!(event.event_type(), "ItemAdded");

        let event = CartEvent::item_removed(cart_id, ProductId::new("SKU-001"), 2);
        assert_eq!(event.event_type(), "ItemRemoved");

        let event = CartEvent::cart_cleared(cart_id, CustomerId::new(), 3);
        assert_eq!(event.event_type(), "CartCleared");
    }

    #[test]
    fn test_event_serialization() {
        let item = LineItem::new(
            AggregateId::new(),
            "SKU-001",
            "Widget",
            3,
            Money::from_cents(1500),
        );
        let event = CartEvent::item_added(AggregateId::new(), CustomerId::new(), &item);

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"ItemAdded\""));

        let deserialized: CartEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, event);
    }
}
