use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("delivery failed: {0}")]
    Delivery(String),
    #[error("sink not configured")]
    NotConfigured,
}

/// Outbound email. Failures are logged by the caller, never escalated.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(
        &self,
        to: &str,
        subject: &str,
        html_body: &str,
        text_body: &str,
    ) -> Result<(), NotifyError>;
}

/// Lifecycle event bus for read-only consumers
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, topic: &str, key: &str, payload: &str) -> Result<(), NotifyError>;
}
