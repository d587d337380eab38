//! Alert composition and dispatch.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::alert::AlertRequest;
use crate::channel::{EmailChannel, NotificationChannel};
use crate::config::RelayConfig;
use crate::delivery::SendOutcome;

/// Status text returned when delivery succeeds.
pub const SUCCESS_STATUS: &str = "Submission successful";

/// Prefix of the status text returned when delivery fails.
pub const FAILURE_STATUS: &str = "Error sending email:";

/// Builds alerts and hands them to a channel.
///
/// Holds no per-alert state; one composer can serve concurrent dispatches.
#[derive(Debug, Clone)]
pub struct AlertComposer<C = EmailChannel> {
    channel: C,
}

impl AlertComposer<EmailChannel> {
    /// Creates a composer that sends email through `config`.
    #[must_use]
    pub const fn new(config: Arc<RelayConfig>) -> Self {
        Self {
            channel: EmailChannel::new(config),
        }
    }
}

impl<C: NotificationChannel> AlertComposer<C> {
    /// Creates a composer over a custom channel.
    #[must_use]
    pub const fn with_channel(channel: C) -> Self {
        Self { channel }
    }

    /// Returns the underlying channel.
    #[must_use]
    pub const fn channel(&self) -> &C {
        &self.channel
    }

    /// Stamps the current local time onto the alert, delivers it once and
    /// returns the outcome with a caller-facing status line.
    ///
    /// The status is [`SUCCESS_STATUS`] on success. On failure it is
    /// [`FAILURE_STATUS`] followed by a short description of the failed
    /// stage; the full error stays in the logs and the outcome.
    pub async fn dispatch_alert<I, S>(
        &self,
        subject: &str,
        message: &str,
        recipients: I,
        cancel: &CancellationToken,
    ) -> (SendOutcome, String)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let request = AlertRequest::new(subject, message, recipients);
        self.dispatch(&request, cancel).await
    }

    /// Delivers an already composed request.
    pub async fn dispatch(
        &self,
        request: &AlertRequest,
        cancel: &CancellationToken,
    ) -> (SendOutcome, String) {
        let outcome = self.channel.deliver(request, cancel).await;
        let status = match &outcome {
            Ok(()) => {
                info!(
                    subject = %request.subject,
                    recipients = request.recipient_emails.len(),
                    "alert dispatched"
                );
                SUCCESS_STATUS.to_string()
            }
            Err(e) => {
                warn!(subject = %request.subject, stage = %e.stage(), "alert dispatch failed");
                format!("{FAILURE_STATUS} {}", e.stage().failure_summary())
            }
        };
        (outcome, status)
    }
}
