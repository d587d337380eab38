//! Alert request model.

use chrono::{DateTime, Local};

/// Local timestamp layout used in message bodies.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One alert to dispatch. Created per invocation and consumed once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertRequest {
    /// Subject line.
    pub subject: String,
    /// Caller-supplied message text.
    pub message: String,
    /// Recipient addresses, in delivery order.
    pub recipient_emails: Vec<String>,
    /// When the alert was generated (local time).
    pub generated_at: DateTime<Local>,
}

impl AlertRequest {
    /// Creates a request stamped with the current local time.
    #[must_use]
    pub fn new<I, S>(subject: impl Into<String>, message: impl Into<String>, recipients: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            subject: subject.into(),
            message: message.into(),
            recipient_emails: recipients.into_iter().map(Into::into).collect(),
            generated_at: Local::now(),
        }
    }

    /// Overrides the generation time.
    #[must_use]
    pub fn generated_at(mut self, at: DateTime<Local>) -> Self {
        self.generated_at = at;
        self
    }

    /// Renders the body: the message followed by the generation clause.
    #[must_use]
    pub fn body(&self) -> String {
        format!(
            "{}. This request was generated at {}",
            self.message,
            self.generated_at.format(TIMESTAMP_FORMAT)
        )
    }
}
