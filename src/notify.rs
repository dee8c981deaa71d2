//! Order notification sink.
//!
//! Delivery (email, SMS) belongs to a collaborator service. Failures are
//! surfaced as explicit errors so call sites can log and continue; nothing
//! in the payment flow may block or fail on notification problems.

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use crate::payments::PaymentRecord;

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Notification channel unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn payment_completed(&self, record: &PaymentRecord) -> Result<(), NotifyError>;
}

/// Logs the confirmation instead of delivering it.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn payment_completed(&self, record: &PaymentRecord) -> Result<(), NotifyError> {
        info!(
            "Order confirmed for user {}: payment {}, receipt {}",
            record.user_id,
            record.id,
            record.mpesa_receipt_number.as_deref().unwrap_or("n/a")
        );
        Ok(())
    }
}
