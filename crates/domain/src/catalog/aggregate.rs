//! Product aggregate implementation.

use common::AggregateId;
use serde::{Deserialize, Serialize};
use store::Version;

use crate::aggregate::{Aggregate, EventBuffer};
use crate::values::{Money, ProductId};

use super::{
    CatalogError, PriceChangedData, ProductEvent, ProductListedData, StockReleasedData,
    StockReservedData,
};

/// Catalog product aggregate root.
///
/// Tracks the unit price and the stock available for new orders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    id: AggregateId,

    #[serde(skip)]
    version: Version,

    sku: ProductId,
    name: String,
    price: Money,
    stock: u32,

    #[serde(skip)]
    events: EventBuffer<ProductEvent>,
}

impl Aggregate for Product {
    type Event = ProductEvent;

    fn aggregate_type() -> &'static str {
        "Product"
    }

    fn id(&self) -> AggregateId {
        self.id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn pending_events(&self) -> &[ProductEvent] {
        self.events.pending()
    }

    fn drain_events(&mut self) -> Vec<ProductEvent> {
        self.events.drain()
    }
}

// Query methods
impl Product {
    pub fn sku(&self) -> &ProductId {
        &self.sku
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn price(&self) -> Money {
        self.price
    }

    pub fn stock(&self) -> u32 {
        self.stock
    }
}

// Mutation methods (raise events)
impl Product {
    /// Lists a new product in the catalog.
    pub fn list(
        id: AggregateId,
        sku: impl Into<ProductId>,
        name: impl Into<String>,
        price: Money,
        stock: u32,
    ) -> Result<Self, CatalogError> {
        let sku = sku.into();
        let name = name.into();

        if sku.is_blank() {
            return Err(CatalogError::EmptySku);
        }
        if name.trim().is_empty() {
            return Err(CatalogError::EmptyName);
        }
        if !price.is_positive() {
            return Err(CatalogError::InvalidPrice {
                price: price.cents(),
            });
        }

        let mut product = Self {
            id,
            version: Version::initial(),
            sku: sku.clone(),
            name: name.clone(),
            price,
            stock,
            events: EventBuffer::new(),
        };
        product.events.raise(ProductEvent::ProductListed(ProductListedData {
            product_id: id,
            sku,
            name,
            price,
            stock,
        }));
        Ok(product)
    }

    /// Changes the unit price. Setting the current price is a no-op.
    pub fn change_price(&mut self, new_price: Money) -> Result<(), CatalogError> {
        if !new_price.is_positive() {
            return Err(CatalogError::InvalidPrice {
                price: new_price.cents(),
            });
        }
        if new_price == self.price {
            return Ok(());
        }

        self.record(ProductEvent::PriceChanged(PriceChangedData {
            product_id: self.id,
            sku: self.sku.clone(),
            old_price: self.price,
            new_price,
        }));
        Ok(())
    }

    /// Reserves stock for an order.
    pub fn reserve(&mut self, quantity: u32, order_id: AggregateId) -> Result<(), CatalogError> {
        if quantity == 0 {
            return Err(CatalogError::InvalidQuantity { quantity });
        }
        if quantity > self.stock {
            return Err(CatalogError::InsufficientStock {
                sku: self.sku.to_string(),
                requested: quantity,
                available: self.stock,
            });
        }

        self.record(ProductEvent::StockReserved(StockReservedData {
            product_id: self.id,
            sku: self.sku.clone(),
            order_id,
            quantity,
            remaining: self.stock - quantity,
        }));
        Ok(())
    }

    /// Returns reserved stock, e.g. when an order is cancelled.
    pub fn release(&mut self, quantity: u32, order_id: AggregateId) -> Result<(), CatalogError> {
        if quantity == 0 {
            return Err(CatalogError::InvalidQuantity { quantity });
        }

        self.record(ProductEvent::StockReleased(StockReleasedData {
            product_id: self.id,
            sku: self.sku.clone(),
            order_id,
            quantity,
            remaining: self.stock.saturating_add(quantity),
        }));
        Ok(())
    }

    fn record(&mut self, event: ProductEvent) {
        self.apply(&event);
        self.events.raise(event);
    }

    fn apply(&mut self, event: &ProductEvent) {
        match event {
            ProductEvent::ProductListed(_) => {}
            ProductEvent::PriceChanged(data) => self.price = data.new_price,
            ProductEvent::StockReserved(data) => self.stock = data.remaining,
            ProductEvent::StockReleased(data) => self.stock = data.remaining,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::DomainEvent;

    fn widget(stock: u32) -> Product {
        Product::list(
            AggregateId::new(),
            "SKU-001",
            "Widget",
            Money::from_cents(1000),
            stock,
        )
        .unwrap()
    }

    #[test]
    fn test_list_product() {
        let product = widget(10);

        assert_eq!(product.sku().as_str(), "SKU-001");
        assert_eq!(product.stock(), 10);
        assert_eq!(product.pending_events().len(), 1);
        assert_eq!(product.pending_events()[0].event_type(), "ProductListed");
    }

    #[test]
    fn test_list_validates_input() {
        let id = AggregateId::new();
        assert!(matches!(
            Product::list(id, " ", "Widget", Money::from_cents(1), 1),
            Err(CatalogError::EmptySku)
        ));
        assert!(matches!(
            Product::list(id, "SKU-1", "", Money::from_cents(1), 1),
            Err(CatalogError::EmptyName)
        ));
        assert!(matches!(
            Product::list(id, "SKU-1", "Widget", Money::zero(), 1),
            Err(CatalogError::InvalidPrice { price: 0 })
        ));
    }

    #[test]
    fn test_reserve_and_release_stock() {
        let mut product = widget(10);
        let order_id = AggregateId::new();

        product.reserve(4, order_id).unwrap();
        assert_eq!(product.stock(), 6);

        product.release(4, order_id).unwrap();
        assert_eq!(product.stock(), 10);

        let types: Vec<_> = product
            .drain_events()
            .iter()
            .map(|e| e.event_type())
            .collect();
        assert_eq!(types, vec!["ProductListed", "StockReserved", "StockReleased"]);
    }

    #[test]
    fn test_reserve_more_than_available_fails() {
        let mut product = widget(2);
        let result = product.reserve(3, AggregateId::new());

        assert!(matches!(
            result,
            Err(CatalogError::InsufficientStock {
                requested: 3,
                available: 2,
                ..
            })
        ));
        assert_eq!(product.stock(), 2);
    }

    #[test]
    fn test_change_price() {
        let mut product = widget(1);
        product.drain_events();

        product.change_price(Money::from_cents(1000)).unwrap();
        assert!(!product.has_pending_events());

        product.change_price(Money::from_cents(1200)).unwrap();
        assert_eq!(product.price().cents(), 1200);
        assert_eq!(product.pending_events().len(), 1);
    }
}
