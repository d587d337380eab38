//! SMTP delivery driver.
//!
//! One call runs one session on one fresh connection:
//! connect (+ TLS) → greeting/EHLO → AUTH PLAIN → MAIL FROM → RCPT TO (each,
//! in order) → DATA → QUIT. The first failing stage ends the attempt; there
//! is no retry and no partial delivery. The client owns the socket, so every
//! early return closes the connection.

use std::fmt;
use std::future::Future;

use alertmail_smtp::connection::{connect, connect_tls};
use alertmail_smtp::{Address, Client, Error as SmtpError};
use chrono::{DateTime, Local};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::alert::AlertRequest;
use crate::config::{RelayConfig, Security};

/// Result of one delivery attempt.
pub type SendOutcome = Result<(), DeliveryError>;

/// Protocol stage a delivery attempt reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStage {
    /// TCP dial and implicit TLS handshake.
    Connect,
    /// Greeting, EHLO and STARTTLS.
    Handshake,
    /// AUTH PLAIN.
    Authenticate,
    /// MAIL FROM.
    Sender,
    /// RCPT TO.
    Recipient,
    /// DATA, payload and terminator.
    Transfer,
}

impl DeliveryStage {
    /// Short operator-facing description of a failure at this stage.
    #[must_use]
    pub const fn failure_summary(self) -> &'static str {
        match self {
            Self::Connect => "could not connect to the mail relay",
            Self::Handshake => "SMTP session setup failed",
            Self::Authenticate => "authentication was rejected",
            Self::Sender => "sender address was rejected",
            Self::Recipient => "a recipient was rejected",
            Self::Transfer => "message transfer failed",
        }
    }

    /// Stage name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Handshake => "handshake",
            Self::Authenticate => "authenticate",
            Self::Sender => "sender",
            Self::Recipient => "recipient",
            Self::Transfer => "transfer",
        }
    }
}

impl fmt::Display for DeliveryStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a delivery attempt failed.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// Dial or TLS handshake failed.
    #[error("failed to establish connection to relay: {0}")]
    Connect(#[source] SmtpError),

    /// Greeting, EHLO or STARTTLS failed.
    #[error("failed to initialize SMTP session: {0}")]
    Handshake(#[source] SmtpError),

    /// Credentials were rejected.
    #[error("authentication failed: {0}")]
    Authenticate(#[source] SmtpError),

    /// Sender address invalid or rejected.
    #[error("sender {address} rejected: {source}")]
    Sender {
        /// Sender address.
        address: String,
        /// Underlying error.
        source: SmtpError,
    },

    /// A recipient address was invalid or rejected.
    #[error("recipient {address} rejected: {source}")]
    Recipient {
        /// The first address that failed.
        address: String,
        /// Underlying error.
        source: SmtpError,
    },

    /// The recipient list was empty.
    #[error("no recipients specified")]
    NoRecipients,

    /// DATA, payload write or terminator failed.
    #[error("message transfer failed: {0}")]
    Transfer(#[source] SmtpError),

    /// The caller cancelled the attempt.
    #[error("delivery cancelled during {stage} stage")]
    Cancelled {
        /// Stage that was running.
        stage: DeliveryStage,
    },
}

impl DeliveryError {
    /// Returns the stage at which the attempt stopped.
    #[must_use]
    pub const fn stage(&self) -> DeliveryStage {
        match self {
            Self::Connect(_) => DeliveryStage::Connect,
            Self::Handshake(_) => DeliveryStage::Handshake,
            Self::Authenticate(_) => DeliveryStage::Authenticate,
            Self::Sender { .. } => DeliveryStage::Sender,
            Self::Recipient { .. } | Self::NoRecipients => DeliveryStage::Recipient,
            Self::Transfer(_) => DeliveryStage::Transfer,
            Self::Cancelled { stage } => *stage,
        }
    }

    /// Returns the underlying SMTP error, if any.
    #[must_use]
    pub const fn smtp_error(&self) -> Option<&SmtpError> {
        match self {
            Self::Connect(e) | Self::Handshake(e) | Self::Authenticate(e) | Self::Transfer(e) => {
                Some(e)
            }
            Self::Sender { source, .. } | Self::Recipient { source, .. } => Some(source),
            Self::NoRecipients | Self::Cancelled { .. } => None,
        }
    }

    /// Returns true if the underlying failure looks temporary (4xx reply or
    /// timeout). Informational only; the driver never retries.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.smtp_error().is_some_and(SmtpError::is_transient)
    }
}

/// A message ready for the wire. Lives for one send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Envelope sender.
    pub from: String,
    /// Recipients, in RCPT order.
    pub to: Vec<String>,
    /// Subject line.
    pub subject: String,
    /// Body text.
    pub body: String,
    /// When the message was composed.
    pub sent_at_local: DateTime<Local>,
}

impl OutboundMessage {
    /// Derives the message from an alert and the configured sender.
    #[must_use]
    pub fn from_alert(alert: &AlertRequest, from: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: alert.recipient_emails.clone(),
            subject: alert.subject.clone(),
            body: alert.body(),
            sent_at_local: alert.generated_at,
        }
    }

    /// Renders the DATA payload: `To` and `Subject` headers, a blank line
    /// and the body, each line CRLF-terminated.
    ///
    /// Line breaks inside the subject are flattened to spaces so the
    /// subject cannot add headers.
    #[must_use]
    pub fn to_wire(&self) -> String {
        let subject: String = self
            .subject
            .chars()
            .map(|c| if c == '\r' || c == '\n' { ' ' } else { c })
            .collect();
        format!(
            "To: {}\r\nSubject: {subject}\r\n\r\n{}\r\n",
            self.to.join(", "),
            self.body
        )
    }
}

/// Delivers `message` through the relay described by `config`.
///
/// Cancelling `cancel` aborts the running stage and drops the connection.
///
/// # Errors
///
/// Returns the first failure, tagged with its stage. Every failure is also
/// logged.
pub async fn send_email(
    config: &RelayConfig,
    message: &OutboundMessage,
    cancel: &CancellationToken,
) -> SendOutcome {
    let result = run_session(config, message, cancel).await;
    match &result {
        Ok(()) => info!(
            relay = %config.host,
            recipients = message.to.len(),
            "email sent successfully"
        ),
        Err(e) => error!(
            relay = %config.host,
            stage = %e.stage(),
            transient = e.is_transient(),
            error = %e,
            "error sending email"
        ),
    }
    result
}

async fn run_session(
    config: &RelayConfig,
    message: &OutboundMessage,
    cancel: &CancellationToken,
) -> SendOutcome {
    use DeliveryStage as Stage;

    let options = config.connect_options();
    let (host, port) = (config.host.as_str(), config.port);

    debug!(relay = %host, port, security = config.security.display_name(), "connecting");
    let stream = stage(
        cancel,
        Stage::Connect,
        async {
            match config.security {
                Security::Tls => connect_tls(host, port, &options).await,
                Security::StartTls | Security::None => connect(host, port, &options).await,
            }
        },
        DeliveryError::Connect,
    )
    .await?;

    if config.security == Security::None {
        warn!(relay = %host, "relay connection is not encrypted");
    }

    let client = stage(
        cancel,
        Stage::Handshake,
        async {
            let client = Client::from_stream(stream, config.io_timeout)
                .await?
                .ehlo(&config.helo_name)
                .await?;
            if config.security == Security::StartTls {
                client.starttls(host, &config.helo_name, &options).await
            } else {
                Ok(client)
            }
        },
        DeliveryError::Handshake,
    )
    .await?;

    let client = stage(
        cancel,
        Stage::Authenticate,
        client.auth_plain(&config.sender_address, config.credential()),
        DeliveryError::Authenticate,
    )
    .await?;

    let sender = config.sender_address.as_str();
    let client = stage(
        cancel,
        Stage::Sender,
        async move { client.mail_from(Address::new(sender)?).await },
        |source| DeliveryError::Sender {
            address: sender.to_string(),
            source,
        },
    )
    .await?;

    let Some((first, rest)) = message.to.split_first() else {
        return Err(DeliveryError::NoRecipients);
    };
    debug!(recipient = %first, "adding recipient");
    let mut client = stage(
        cancel,
        Stage::Recipient,
        async move { client.rcpt_to(Address::new(first)?).await },
        |source| DeliveryError::Recipient {
            address: first.clone(),
            source,
        },
    )
    .await?;
    for recipient in rest {
        debug!(%recipient, "adding recipient");
        client = stage(
            cancel,
            Stage::Recipient,
            async move { client.rcpt_to(Address::new(recipient)?).await },
            |source| DeliveryError::Recipient {
                address: recipient.clone(),
                source,
            },
        )
        .await?;
    }

    let payload = message.to_wire();
    let client = stage(
        cancel,
        Stage::Transfer,
        async move { client.data().await?.send_message(payload.as_bytes()).await },
        DeliveryError::Transfer,
    )
    .await?;

    // Already accepted by the relay; QUIT is a courtesy
    tokio::select! {
        biased;
        () = cancel.cancelled() => debug!("cancelled before QUIT completed, dropping connection"),
        result = client.quit() => {
            if let Err(e) = result {
                debug!(error = %e, "QUIT after delivery failed");
            }
        }
    }

    Ok(())
}

/// Runs one stage, racing it against cancellation and tagging failures.
async fn stage<T, F, W>(
    cancel: &CancellationToken,
    stage: DeliveryStage,
    step: F,
    wrap: W,
) -> Result<T, DeliveryError>
where
    F: Future<Output = alertmail_smtp::Result<T>>,
    W: FnOnce(SmtpError) -> DeliveryError,
{
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(DeliveryError::Cancelled { stage }),
        result = step => result.map_err(wrap),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn message(to: &[&str], subject: &str) -> OutboundMessage {
        let at = Local.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap();
        let alert = AlertRequest::new(subject, "Hello", to.iter().copied()).generated_at(at);
        OutboundMessage::from_alert(&alert, "alerts@example.com")
    }

    #[test]
    fn wire_format_matches_framing() {
        let msg = message(&["a@example.com", "b@example.com"], "Test");
        assert_eq!(
            msg.to_wire(),
            "To: a@example.com, b@example.com\r\nSubject: Test\r\n\r\n\
             Hello. This request was generated at 2024-01-15 10:30:00\r\n"
        );
        assert_eq!(msg.from, "alerts@example.com");
    }

    #[test]
    fn subject_line_breaks_are_flattened() {
        let msg = message(&["a@example.com"], "Disk\r\nBcc: evil@example.com");
        assert!(
            msg.to_wire()
                .starts_with("To: a@example.com\r\nSubject: Disk  Bcc: evil@example.com\r\n\r\n")
        );
    }

    #[test]
    fn error_stages() {
        let smtp = || SmtpError::smtp_error(550, "no");
        assert_eq!(
            DeliveryError::Connect(SmtpError::ConnectionClosed).stage(),
            DeliveryStage::Connect
        );
        assert_eq!(
            DeliveryError::Recipient {
                address: "x@example.com".into(),
                source: smtp()
            }
            .stage(),
            DeliveryStage::Recipient
        );
        assert_eq!(DeliveryError::NoRecipients.stage(), DeliveryStage::Recipient);
        assert_eq!(
            DeliveryError::Cancelled {
                stage: DeliveryStage::Transfer
            }
            .stage(),
            DeliveryStage::Transfer
        );
    }

    #[test]
    fn transient_classification() {
        assert!(DeliveryError::Transfer(SmtpError::smtp_error(451, "later")).is_transient());
        assert!(!DeliveryError::Authenticate(SmtpError::smtp_error(535, "bad")).is_transient());
        assert!(DeliveryError::Handshake(SmtpError::Timeout("greeting".into())).is_transient());
        assert!(!DeliveryError::NoRecipients.is_transient());
    }

    #[test]
    fn recipient_error_names_address() {
        let err = DeliveryError::Recipient {
            address: "ghost@example.com".into(),
            source: SmtpError::smtp_error(550, "No such user"),
        };
        assert_eq!(
            err.to_string(),
            "recipient ghost@example.com rejected: SMTP error 550: No such user"
        );
    }

    #[test]
    fn stage_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&DeliveryStage::Authenticate).unwrap(),
            "\"authenticate\""
        );
        assert_eq!(DeliveryStage::Sender.to_string(), "sender");
    }
}
