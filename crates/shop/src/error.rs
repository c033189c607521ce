use thiserror::Error;

/// Failures of the customer notification channel.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Notification channel '{channel}' is unavailable")]
    Unavailable { channel: &'static str },
}
