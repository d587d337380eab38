//! Notification channels.
//!
//! A channel turns an [`AlertRequest`] into one delivery attempt. Email is
//! the only channel today; the trait is the seam for adding others.

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::alert::AlertRequest;
use crate::config::RelayConfig;
use crate::delivery::{OutboundMessage, SendOutcome, send_email};

/// Delivers alerts over one medium.
pub trait NotificationChannel: Send + Sync {
    /// Performs one delivery attempt for `request`.
    fn deliver(
        &self,
        request: &AlertRequest,
        cancel: &CancellationToken,
    ) -> impl Future<Output = SendOutcome> + Send;
}

/// Delivers alerts as email through the configured relay.
#[derive(Debug, Clone)]
pub struct EmailChannel {
    config: Arc<RelayConfig>,
}

impl EmailChannel {
    /// Creates a channel backed by `config`.
    #[must_use]
    pub const fn new(config: Arc<RelayConfig>) -> Self {
        Self { config }
    }

    /// Returns the relay configuration.
    #[must_use]
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }
}

impl NotificationChannel for EmailChannel {
    async fn deliver(&self, request: &AlertRequest, cancel: &CancellationToken) -> SendOutcome {
        let message = OutboundMessage::from_alert(request, self.config.sender_address.as_str());
        send_email(&self.config, &message, cancel).await
    }
}
