//! Event handlers reacting to order and catalog events.

use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use common::AggregateId;
use domain::{OrderEvent, OrderStatus, ProductEvent, ProductId};
use metrics::counter;
use pipeline::{BoxError, EventHandler, RequestContext};

use crate::notifier::{Notification, NotificationKind, Notifier};

/// Tells customers about their orders.
///
/// Runs inside the request's transaction. A notification already sent stays
/// sent if the transaction later rolls back.
pub struct CustomerNotifier {
    notifier: Arc<dyn Notifier>,
}

impl CustomerNotifier {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }
}

fn status_notification(status: OrderStatus) -> Option<NotificationKind> {
    match status {
        OrderStatus::Placed => None,
        OrderStatus::Paid => Some(NotificationKind::PaymentReceived),
        OrderStatus::Shipped => Some(NotificationKind::OrderShipped),
        OrderStatus::Cancelled => Some(NotificationKind::OrderCancelled),
    }
}

#[async_trait]
impl EventHandler<OrderEvent> for CustomerNotifier {
    fn name(&self) -> &'static str {
        "customer-notifier"
    }

    async fn handle(&self, event: &OrderEvent, _ctx: &mut RequestContext) -> Result<(), BoxError> {
        let notification = match event {
            OrderEvent::OrderPlaced(data) => Notification {
                customer_id: data.customer_id,
                order_id: data.order_id,
                kind: NotificationKind::OrderConfirmation,
                message: format!(
                    "Thanks for your order of {} item(s), total {}",
                    data.lines.iter().map(|l| l.quantity).sum::<u32>(),
                    data.total
                ),
            },
            OrderEvent::OrderStatusChanged(data) => {
                let Some(kind) = status_notification(data.to) else {
                    return Ok(());
                };
                let message = match &data.reason {
                    Some(reason) => format!("Your order is now {} ({reason})", data.to),
                    None => format!("Your order is now {}", data.to),
                };
                Notification {
                    customer_id: data.customer_id,
                    order_id: data.order_id,
                    kind,
                    message,
                }
            }
        };

        self.notifier.notify(notification).await?;
        counter!("shop_notifications_sent").increment(1);
        Ok(())
    }
}

/// Stock level that fell under the monitor's threshold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LowStockAlert {
    pub product_id: AggregateId,
    pub sku: ProductId,
    pub remaining: u32,
    pub order_id: AggregateId,
}

/// Records an alert whenever a reservation leaves a product below the
/// threshold.
#[derive(Debug, Clone)]
pub struct LowStockMonitor {
    threshold: u32,
    alerts: Arc<RwLock<Vec<LowStockAlert>>>,
}

impl LowStockMonitor {
    pub const DEFAULT_THRESHOLD: u32 = 5;

    pub fn new(threshold: u32) -> Self {
        Self {
            threshold,
            alerts: Arc::default(),
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn alerts(&self) -> Vec<LowStockAlert> {
        self.alerts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Default for LowStockMonitor {
    fn default() -> Self {
        Self::new(Self::DEFAULT_THRESHOLD)
    }
}

#[async_trait]
impl EventHandler<ProductEvent> for LowStockMonitor {
    fn name(&self) -> &'static str {
        "low-stock-monitor"
    }

    async fn handle(&self, event: &ProductEvent, _ctx: &mut RequestContext) -> Result<(), BoxError> {
        let ProductEvent::StockReserved(data) = event else {
            return Ok(());
        };
        if data.remaining >= self.threshold {
            return Ok(());
        }

        tracing::warn!(
            product_id = %data.product_id,
            sku = %data.sku,
            remaining = data.remaining,
            threshold = self.threshold,
            "stock running low"
        );
        counter!("shop_low_stock_alerts").increment(1);

        self.alerts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(LowStockAlert {
                product_id: data.product_id,
                sku: data.sku.clone(),
                remaining: data.remaining,
                order_id: data.order_id,
            });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placed_status_sends_nothing() {
        assert_eq!(status_notification(OrderStatus::Placed), None);
        assert_eq!(
            status_notification(OrderStatus::Cancelled),
            Some(NotificationKind::OrderCancelled)
        );
    }

    #[test]
    fn test_monitor_defaults() {
        let monitor = LowStockMonitor::default();
        assert_eq!(monitor.threshold(), LowStockMonitor::DEFAULT_THRESHOLD);
        assert!(monitor.alerts().is_empty());
    }
}
