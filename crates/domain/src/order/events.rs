//! Order domain events.

use chrono::{DateTime, Utc};
use common::AggregateId;
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;
use crate::values::{CustomerId, LineItem, Money};

use super::OrderStatus;

/// Events raised by the order aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum OrderEvent {
    /// Order was placed from a set of lines.
    OrderPlaced(OrderPlacedData),

    /// Order moved from one status to another.
    OrderStatusChanged(OrderStatusChangedData),
}

impl DomainEvent for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderPlaced(_) => "OrderPlaced",
            OrderEvent::OrderStatusChanged(_) => "OrderStatusChanged",
        }
    }
}

/// Data for OrderPlaced event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderPlacedData {
    pub order_id: AggregateId,
    pub customer_id: CustomerId,
    pub lines: Vec<LineItem>,

    /// Total amount at placement time.
    pub total: Money,

    pub placed_at: DateTime<Utc>,
}

/// Data for OrderStatusChanged event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderStatusChangedData {
    pub order_id: AggregateId,
    pub customer_id: CustomerId,
    pub from: OrderStatus,
    pub to: OrderStatus,

    /// Free-form reason, set for cancellations.
    pub reason: Option<String>,

    pub changed_at: DateTime<Utc>,
}

impl OrderEvent {
    /// Creates an OrderPlaced event.
    pub fn order_placed(order_id: AggregateId, customer_id: CustomerId, lines: Vec<LineItem>) -> Self {
        let total = lines.iter().map(LineItem::total_price).sum();
        OrderEvent::OrderPlaced(OrderPlacedData {
            order_id,
            customer_id,
            lines,
            total,
            placed_at: Utc::now(),
        })
    }

    /// Creates an OrderStatusChanged event.
    pub fn status_changed(
        order_id: AggregateId,
        customer_id: CustomerId,
        from: OrderStatus,
        to: OrderStatus,
        reason: Option<String>,
    ) -> Self {
        OrderEvent::OrderStatusChanged(OrderStatusChangedData {
            order_id,
            customer_id,
            from,
            to,
            reason,
            changed_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_placed_computes_total() {
        let lines = vec![
            LineItem::new(AggregateId::new(), "SKU-001", "Widget", 2, Money::from_cents(1000)),
            LineItem::new(AggregateId::new(), "SKU-002", "Gadget", 1, Money::from_cents(500)),
        ];
        let event = OrderEvent::order_placed(AggregateId::new(), CustomerId::new(), lines);

        assert_eq!(event.event_type(), "OrderPlaced");
        match event {
            OrderEvent::OrderPlaced(data) => assert_eq!(data.total.cents(), 2500),
            other => panic!("Expected OrderPlaced, got {other:?}"),
        }
    }

    #[test]
    fn test_status_changed_serialization() {
        let event = OrderEvent::status_changed(
            AggregateId::new(),
            CustomerId::new(),
            OrderStatus::Placed,
            OrderStatus::Cancelled,
            Some("Out of stock".to_string()),
        );

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("OrderStatusChanged"));

        let deserialized: OrderEvent = serde_json::from_str(&json).unwrap();
        if let OrderEvent::OrderStatusChanged(data) = deserialized {
            assert_eq!(data.to, OrderStatus::Cancelled);
            assert_eq!(data.reason.as_deref(), Some("Out of stock"));
        } else {
            panic!("Expected OrderStatusChanged event");
        }
    }
}
