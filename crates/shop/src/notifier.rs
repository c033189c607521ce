//! Customer notification port and in-memory implementation.

use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use common::AggregateId;
use domain::CustomerId;
use serde::Serialize;

use crate::error::NotifyError;

/// What a notification is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NotificationKind {
    OrderConfirmation,
    PaymentReceived,
    OrderShipped,
    OrderCancelled,
}

/// A message sent to a customer about one of their orders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub customer_id: CustomerId,
    pub order_id: AggregateId,
    pub kind: NotificationKind,
    pub message: String,
}

/// Outbound channel to customers (email, SMS, push).
///
/// Sending is an externally visible side effect: it is not undone when the
/// transaction that triggered it rolls back.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<(), NotifyError>;
}

#[derive(Debug, Default)]
struct InMemoryNotifierState {
    sent: Vec<Notification>,
    fail: bool,
}

/// In-memory notifier for tests and local runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNotifier {
    state: Arc<RwLock<InMemoryNotifierState>>,
}

impl InMemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following send fail until reset.
    pub fn set_fail(&self, fail: bool) {
        self.state.write().unwrap_or_else(PoisonError::into_inner).fail = fail;
    }

    /// Notifications delivered so far, oldest first.
    pub fn sent(&self) -> Vec<Notification> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .sent
            .clone()
    }

    /// Notifications of one kind delivered so far.
    pub fn sent_of(&self, kind: NotificationKind) -> Vec<Notification> {
        self.sent().into_iter().filter(|n| n.kind == kind).collect()
    }
}

#[async_trait]
impl Notifier for InMemoryNotifier {
    async fn notify(&self, notification: Notification) -> Result<(), NotifyError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.fail {
            return Err(NotifyError::Unavailable { channel: "memory" });
        }
        state.sent.push(notification);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notification(kind: NotificationKind) -> Notification {
        Notification {
            customer_id: CustomerId::new(),
            order_id: AggregateId::new(),
            kind,
            message: "hello".to_string(),
        }
    }

    #[tokio::test]
    async fn test_records_sent_notifications() {
        let notifier = InMemoryNotifier::new();
        notifier
            .notify(notification(NotificationKind::OrderConfirmation))
            .await
            .unwrap();
        notifier
            .notify(notification(NotificationKind::OrderShipped))
            .await
            .unwrap();

        assert_eq!(notifier.sent().len(), 2);
        assert_eq!(notifier.sent_of(NotificationKind::OrderShipped).len(), 1);
    }

    #[tokio::test]
    async fn test_failing_notifier_sends_nothing() {
        let notifier = InMemoryNotifier::new();
        notifier.set_fail(true);

        let result = notifier
            .notify(notification(NotificationKind::OrderCancelled))
            .await;

        assert!(matches!(result, Err(NotifyError::Unavailable { .. })));
        assert!(notifier.sent().is_empty());
    }
}
