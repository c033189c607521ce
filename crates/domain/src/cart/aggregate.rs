//! Cart aggregate implementation.

use std::collections::BTreeMap;

use common::AggregateId;
use serde::{Deserialize, Serialize};
use store::Version;

use crate::aggregate::{Aggregate, EventBuffer};
use crate::values::{CustomerId, LineItem, Money, ProductId};

use super::{CartError, CartEvent};

/// Shopping cart aggregate root.
///
/// Holds one line per SKU. Adding a SKU that is already present increases
/// the quantity of its line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cart {
    id: AggregateId,

    #[serde(skip)]
    version: Version,

    customer_id: CustomerId,

    /// Lines keyed by SKU.
    items: BTreeMap<ProductId, LineItem>,

    #[serde(skip)]
    events: EventBuffer<CartEvent>,
}

impl Aggregate for Cart {
    type Event = CartEvent;

    fn aggregate_type() -> &'static str {
        "Cart"
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

    fn pending_events(&self) -> &[CartEvent] {
        self.events.pending()
    }

    fn drain_events(&mut self) -> Vec<CartEvent> {
        self.events.drain()
    }
}

impl Cart {
    /// Creates an empty cart for a customer.
    pub fn new(id: AggregateId, customer_id: CustomerId) -> Self {
        Self {
            id,
            version: Version::initial(),
            customer_id,
            items: BTreeMap::new(),
            events: EventBuffer::new(),
        }
    }
}

// Query methods
impl Cart {
    pub fn customer_id(&self) -> CustomerId {
        self.customer_id
    }

    /// Returns all lines ordered by SKU.
    pub fn items(&self) -> impl Iterator<Item = &LineItem> {
        self.items.values()
    }

    /// Returns the line for a SKU.
    pub fn item(&self, sku: &ProductId) -> Option<&LineItem> {
        self.items.get(sku)
    }

    /// Returns the number of lines.
    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    /// Returns the total quantity across all lines.
    pub fn total_quantity(&self) -> u32 {
        self.items
            .values()
            .fold(0, |total, item| total.saturating_add(item.quantity))
    }

    /// Returns the cart total.
    pub fn total(&self) -> Money {
        self.items.values().map(LineItem::total_price).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

// Mutation methods (raise events)
impl Cart {
    /// Adds a line to the cart.
    ///
    /// If the SKU is already in the cart its quantity is increased.
    pub fn add_item(&mut self, item: LineItem) -> Result<(), CartError> {
        if item.quantity == 0 {
            return Err(CartError::InvalidQuantity {
                quantity: item.quantity,
            });
        }

        if !item.unit_price.is_positive() {
            return Err(CartError::InvalidPrice {
                price: item.unit_price.cents(),
            });
        }

        // A merged line keeps the unit price it was first added at.
        let unit_price = self
            .items
            .get(&item.sku)
            .map_or(item.unit_price, |line| line.unit_price);
        let fits = self.total_quantity().checked_add(item.quantity).is_some()
            && unit_price
                .checked_times(item.quantity)
                .and_then(|added| self.total().checked_add(added))
                .is_some();
        if !fits {
            return Err(CartError::Overflow {
                sku: item.sku.to_string(),
                added: item.quantity,
            });
        }

        self.record(CartEvent::item_added(self.id, self.customer_id, &item));
        Ok(())
    }

    /// Removes the line for a SKU.
    pub fn remove_item(&mut self, sku: &ProductId) -> Result<(), CartError> {
        let existing = self
            .items
            .get(sku)
            .ok_or_else(|| CartError::ItemNotFound {
                sku: sku.to_string(),
            })?;

        let event = CartEvent::item_removed(self.id, sku.clone(), existing.quantity);
        self.record(event);
        Ok(())
    }

    /// Removes every line.
    ///
    /// Clearing an empty cart changes nothing and raises no event.
    pub fn clear(&mut self) {
        if self.items.is_empty() {
            return;
        }
        self.record(CartEvent::cart_cleared(
            self.id,
            self.customer_id,
            self.items.len(),
        ));
    }

    fn record(&mut self, event: CartEvent) {
        self.apply(&event);
        self.events.raise(event);
    }

    fn apply(&mut self, event: &CartEvent) {
        match event {
            CartEvent::ItemAdded(data) => {
                self.items
                    .entry(data.sku.clone())
                    .and_modify(|line| line.quantity = line.quantity.saturating_add(data.quantity))
                    .or_insert_with(|| {
                        LineItem::new(
                            data.product,
                            data.sku.clone(),
                            data.name.clone(),
                            data.quantity,
                            data.unit_price,
                        )
                    });
            }
            CartEvent::ItemRemoved(data) => {
                self.items.remove(&data.sku);
            }
            CartEvent::CartCleared(_) => {
                self.items.clear();
            }
        }
    }
}
