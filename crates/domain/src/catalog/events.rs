//! Catalog domain events.

use common::AggregateId;
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;
use crate::values::{Money, ProductId};

/// Events raised by the product aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ProductEvent {
    /// Product was added to the catalog.
    ProductListed(ProductListedData),

    /// Unit price changed.
    PriceChanged(PriceChangedData),

    /// Stock was set aside for an order.
    StockReserved(StockReservedData),

    /// Previously reserved stock was returned.
    StockReleased(StockReleasedData),
}

impl DomainEvent for ProductEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ProductEvent::ProductListed(_) => "ProductListed",
            ProductEvent::PriceChanged(_) => "PriceChanged",
            ProductEvent::StockReserved(_) => "StockReserved",
            ProductEvent::StockReleased(_) => "StockReleased",
        }
    }
}

/// Data for ProductListed event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductListedData {
    pub product_id: AggregateId,
    pub sku: ProductId,
    pub name: String,
    pub price: Money,
    pub stock: u32,
}

/// Data for PriceChanged event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceChangedData {
    pub product_id: AggregateId,
    pub sku: ProductId,
    pub old_price: Money,
    pub new_price: Money,
}

/// Data for StockReserved event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockReservedData {
    pub product_id: AggregateId,
    pub sku: ProductId,

    /// The order the stock was reserved for.
    pub order_id: AggregateId,

    pub quantity: u32,

    /// Stock left after the reservation.
    pub remaining: u32,
}

/// Data for StockReleased event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockReleasedData {
    pub product_id: AggregateId,
    pub sku: ProductId,
    pub order_id: AggregateId,
    pub quantity: u32,

    /// Stock available after the release.
    pub remaining: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type() {
        let event = ProductEvent::StockReserved(StockReservedData {
            product_id: AggregateId::new(),
            sku: ProductId::new("SKU-001"),
            order_id: AggregateId::new(),
            quantity: 2,
            remaining: 8,
        });
        assert_eq!(event.event_type(), "StockReserved");

        let json = serde_json::to_string(&event).unwrap();
        let deserialized: ProductEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, event);
    }
}
