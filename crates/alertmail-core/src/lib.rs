//! # alertmail-core
//!
//! Outbound alert delivery over SMTP.
//!
//! This crate provides:
//! - **Relay configuration** loaded once at startup from the environment,
//!   with the credential taken from the environment or the system keyring
//! - **Delivery driver** running one SMTP session per alert with per-stage
//!   failure reporting, deadlines and cancellation
//! - **Alert composer** stamping the generation time onto the message and
//!   translating the outcome into an `(outcome, status text)` pair
//! - **Boundary helpers** for JSON responses, phone normalization and
//!   timestamp conversion

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod alert;
pub mod channel;
pub mod composer;
pub mod config;
pub mod credentials;
pub mod delivery;
mod error;
pub mod format;
pub mod response;

pub use alert::AlertRequest;
pub use channel::{EmailChannel, NotificationChannel};
pub use composer::{AlertComposer, FAILURE_STATUS, SUCCESS_STATUS};
pub use config::{ConfigError, RelayConfig, RelayConfigBuilder, Security};
pub use credentials::{CredentialError, CredentialResult};
pub use delivery::{DeliveryError, DeliveryStage, OutboundMessage, SendOutcome, send_email};
pub use error::{Error, Result};
pub use format::{normalize_phone, to_iso};
pub use response::{DispatchResponse, JsonResponse};

pub use tokio_util::sync::CancellationToken;
