//! Outbound mail seam.
//!
//! Delivery belongs to an external transport; the core only enqueues.

use async_trait::async_trait;

use crate::errors::AppResult;
use crate::models::NotificationType;

#[async_trait]
pub trait Mailer: Send + Sync {
    /// Hand a message to the transport. Completion of delivery is not awaited.
    async fn enqueue(
        &self,
        recipients: &[String],
        subject: &str,
        body: &str,
        kind: NotificationType,
    ) -> AppResult<()>;
}

/// Writes every message to the log instead of sending it.
#[derive(Debug, Default, Clone)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn enqueue(
        &self,
        recipients: &[String],
        subject: &str,
        body: &str,
        kind: NotificationType,
    ) -> AppResult<()> {
        tracing::info!(
            target: "mail",
            recipients = recipients.len(),
            kind = kind.as_str(),
            "{}: {}",
            subject,
            body
        );
        Ok(())
    }
}
