//! JSON responses for the HTTP boundary.

use serde::Serialize;
use tracing::error;

use crate::delivery::{DeliveryStage, SendOutcome};

/// A serialized JSON response ready to be written by an HTTP layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonResponse {
    /// HTTP status code.
    pub status: u16,
    /// Always `application/json`.
    pub content_type: &'static str,
    /// Serialized payload, newline-terminated. Empty if encoding failed.
    pub body: String,
}

impl JsonResponse {
    /// Content type of every response.
    pub const CONTENT_TYPE: &'static str = "application/json";

    /// Encodes `payload`. An encoding failure is logged and leaves the body
    /// empty; the status is kept.
    #[must_use]
    pub fn new<T: Serialize + ?Sized>(status: u16, payload: &T) -> Self {
        let body = match serde_json::to_string(payload) {
            Ok(mut body) => {
                body.push('\n');
                body
            }
            Err(e) => {
                error!(error = %e, "error encoding JSON response");
                String::new()
            }
        };
        Self {
            status,
            content_type: Self::CONTENT_TYPE,
            body,
        }
    }
}

/// Payload describing a dispatch result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchResponse {
    /// Whether the relay accepted the message.
    pub success: bool,
    /// Status text from the composer.
    pub message: String,
    /// Failed stage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<DeliveryStage>,
    /// Full error text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DispatchResponse {
    /// Builds the payload from a composer result.
    #[must_use]
    pub fn from_outcome(outcome: &SendOutcome, status: impl Into<String>) -> Self {
        match outcome {
            Ok(()) => Self {
                success: true,
                message: status.into(),
                stage: None,
                error: None,
            },
            Err(e) => Self {
                success: false,
                message: status.into(),
                stage: Some(e.stage()),
                error: Some(e.to_string()),
            },
        }
    }

    /// HTTP status for this payload: 200 on success, 502 when the relay
    /// failed.
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        if self.success { 200 } else { 502 }
    }

    /// Wraps the payload in a [`JsonResponse`].
    #[must_use]
    pub fn into_response(self) -> JsonResponse {
        JsonResponse::new(self.http_status(), &self)
    }
}
