//! Turns booking notices into messages for both parties.
//!
//! Runs apart from the booking path: a slow or failing notifier only costs
//! log lines and a metric, never a booking.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::directory::{Identity, IdentityDirectory};
use crate::model::BookingNotice;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub to_name: String,
    pub to_email: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug)]
pub struct DeliveryError(pub String);

impl std::fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "delivery failed: {}", self.0)
    }
}

impl std::error::Error for DeliveryError {}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, delivery: &Delivery) -> Result<(), DeliveryError>;
}

/// Writes deliveries to the log instead of sending them anywhere.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn deliver(&self, delivery: &Delivery) -> Result<(), DeliveryError> {
        tracing::info!(
            "notify {} <{}>: {} | {}",
            delivery.to_name,
            delivery.to_email,
            delivery.subject,
            delivery.body
        );
        Ok(())
    }
}

/// A confirmation for the client and a heads-up for the provider.
pub fn compose(notice: &BookingNotice, client: &Identity, provider: &Identity) -> [Delivery; 2] {
    let when = notice.instant.to_rfc3339();
    [
        Delivery {
            to_name: client.name.clone(),
            to_email: client.email.clone(),
            subject: "Booking confirmed".into(),
            body: format!(
                "Hello {}, your booking for {} with {} is confirmed for {when}.",
                client.name, notice.service_label, provider.name
            ),
        },
        Delivery {
            to_name: provider.name.clone(),
            to_email: provider.email.clone(),
            subject: "New booking".into(),
            body: format!(
                "Hello {}, you have a new booking for {} with {} at {when}.",
                provider.name, notice.service_label, client.name
            ),
        },
    ]
}

fn count(status: &'static str) {
    metrics::counter!(crate::observability::NOTIFICATIONS_TOTAL, "status" => status).increment(1);
}

async fn dispatch_one(notice: &BookingNotice, directory: &dyn IdentityDirectory, notifier: &dyn Notifier) {
    let (Some(client), Some(provider)) = (
        directory.lookup(notice.client_id).await,
        directory.lookup(notice.provider_id).await,
    ) else {
        tracing::warn!("booking {}: parties no longer in directory, not notifying", notice.booking_id);
        count("unresolved");
        return;
    };
    for delivery in compose(notice, &client, &provider) {
        match notifier.deliver(&delivery).await {
            Ok(()) => count("sent"),
            Err(e) => {
                tracing::warn!("booking {}: notifying {}: {e}", notice.booking_id, delivery.to_email);
                count("failed");
            }
        }
    }
}

/// Consume notices until the hub is dropped.
pub async fn run_dispatcher(
    mut rx: broadcast::Receiver<BookingNotice>,
    directory: Arc<dyn IdentityDirectory>,
    notifier: Arc<dyn Notifier>,
) {
    loop {
        match rx.recv().await {
            Ok(notice) => dispatch_one(&notice, directory.as_ref(), notifier.as_ref()).await,
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!("notification dispatcher lagged, {skipped} notices skipped");
                metrics::counter!(crate::observability::NOTIFICATIONS_TOTAL, "status" => "lagged")
                    .increment(skipped);
            }
            Err(RecvError::Closed) => break,
        }
    }
    tracing::debug!("notification dispatcher stopped");
}
