//! Order aggregate implementation.

use chrono::{DateTime, Utc};
use common::AggregateId;
use serde::{Deserialize, Serialize};
use store::Version;

use crate::aggregate::{Aggregate, EventBuffer};
use crate::values::{CustomerId, LineItem, Money};

use super::{OrderError, OrderEvent, OrderStatus};

/// Order aggregate root.
///
/// An order is created already placed, from the lines of a cart, and moves
/// through [`OrderStatus`] until it is shipped or cancelled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    id: AggregateId,

    #[serde(skip)]
    version: Version,

    customer_id: CustomerId,
    status: OrderStatus,
    lines: Vec<LineItem>,
    total: Money,
    placed_at: DateTime<Utc>,

    #[serde(skip)]
    events: EventBuffer<OrderEvent>,
}

impl Aggregate for Order {
    type Event = OrderEvent;

    fn aggregate_type() -> &'static str {
        "Order"
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

    fn pending_events(&self) -> &[OrderEvent] {
        self.events.pending()
    }

    fn drain_events(&mut self) -> Vec<OrderEvent> {
        self.events.drain()
    }
}

// Query methods
impl Order {
    pub fn customer_id(&self) -> CustomerId {
        self.customer_id
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn lines(&self) -> &[LineItem] {
        &self.lines
    }

    pub fn total(&self) -> Money {
        self.total
    }

    pub fn placed_at(&self) -> DateTime<Utc> {
        self.placed_at
    }

    /// Returns the total quantity of all lines.
    pub fn total_quantity(&self) -> u32 {
        self.lines
            .iter()
            .fold(0, |total: u32, line| total.saturating_add(line.quantity))
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

// Mutation methods (raise events)
impl Order {
    /// Places a new order.
    pub fn place(
        id: AggregateId,
        customer_id: CustomerId,
        lines: Vec<LineItem>,
    ) -> Result<Self, OrderError> {
        if lines.is_empty() {
            return Err(OrderError::NoItems);
        }

        for line in &lines {
            if line.quantity == 0 {
                return Err(OrderError::InvalidQuantity {
                    sku: line.sku.to_string(),
                    quantity: line.quantity,
                });
            }
            if !line.unit_price.is_positive() {
                return Err(OrderError::InvalidPrice {
                    sku: line.sku.to_string(),
                    price: line.unit_price.cents(),
                });
            }
        }

        let mut order = Self {
            id,
            version: Version::initial(),
            customer_id,
            status: OrderStatus::Placed,
            lines: Vec::new(),
            total: Money::zero(),
            placed_at: Utc::now(),
            events: EventBuffer::new(),
        };
        order.record(OrderEvent::order_placed(id, customer_id, lines));
        Ok(order)
    }

    /// Marks the order as paid.
    pub fn mark_paid(&mut self) -> Result<(), OrderError> {
        if !self.status.can_pay() {
            return Err(self.invalid_transition("pay"));
        }
        self.transition(OrderStatus::Paid, None);
        Ok(())
    }

    /// Marks the order as shipped.
    pub fn ship(&mut self) -> Result<(), OrderError> {
        if !self.status.can_ship() {
            return Err(self.invalid_transition("ship"));
        }
        self.transition(OrderStatus::Shipped, None);
        Ok(())
    }

    /// Cancels the order.
    pub fn cancel(&mut self, reason: impl Into<String>) -> Result<(), OrderError> {
        if !self.status.can_cancel() {
            return Err(self.invalid_transition("cancel"));
        }
        self.transition(OrderStatus::Cancelled, Some(reason.into()));
        Ok(())
    }

    fn invalid_transition(&self, action: &'static str) -> OrderError {
        OrderError::InvalidStatusTransition {
            current_status: self.status,
            action,
        }
    }

    fn transition(&mut self, to: OrderStatus, reason: Option<String>) {
        self.record(OrderEvent::status_changed(
            self.id,
            self.customer_id,
            self.status,
            to,
            reason,
        ));
    }

    fn record(&mut self, event: OrderEvent) {
        self.apply(&event);
        self.events.raise(event);
    }

    fn apply(&mut self, event: &OrderEvent) {
        match event {
            OrderEvent::OrderPlaced(data) => {
                self.lines = data.lines.clone();
                self.total = data.total;
                self.placed_at = data.placed_at;
                self.status = OrderStatus::Placed;
            }
            OrderEvent::OrderStatusChanged(data) => {
                self.status = data.to;
            }
        }
    }
}
