//! # alertmail-smtp
//!
//! A small SMTP submission client implementing the subset of RFC 5321 an
//! alert dispatcher needs.
//!
//! ## Features
//!
//! - **Type-state session**: the compiler rejects out-of-order commands
//!   (no `DATA` before a recipient, no `RCPT TO` before `MAIL FROM`)
//! - **Implicit TLS and STARTTLS** over rustls, with certificate validation
//!   on by default
//! - **Deadlines**: a connect timeout covering dial and TLS handshake, and an
//!   I/O timeout applied to every command round trip
//! - **AUTH PLAIN** with an initial response
//!
//! ## Quick Start
//!
//! ```ignore
//! use alertmail_smtp::{Address, Client, ConnectOptions};
//! use alertmail_smtp::connection::connect_tls;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> alertmail_smtp::Result<()> {
//!     let options = ConnectOptions::default();
//!     let stream = connect_tls("smtp.example.com", 465, &options).await?;
//!
//!     let client = Client::from_stream(stream, Duration::from_secs(60)).await?;
//!     let client = client.ehlo("localhost").await?;
//!     let client = client.auth_plain("alerts@example.com", "secret").await?;
//!
//!     let client = client.mail_from(Address::new("alerts@example.com")?).await?;
//!     let client = client.rcpt_to(Address::new("ops@example.com")?).await?;
//!     let client = client.data().await?;
//!
//!     let client = client
//!         .send_message(b"To: ops@example.com\r\nSubject: Disk\r\n\r\nFull\r\n")
//!         .await?;
//!     client.quit().await
//! }
//! ```
//!
//! ## Session States
//!
//! ```text
//! Connected ── auth_plain() ──→ Authenticated ── mail_from() ──→ MailTransaction
//!                                                                     │
//!                                                                rcpt_to()
//!                                                                     ↓
//! Connected ←── send_message() ── Data ←── data() ── RecipientAdded ⟲ rcpt_to()
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod command;
pub mod connection;
mod error;
pub mod parser;
pub mod types;

pub use connection::{
    Authenticated, Client, ConnectOptions, Connected, Data, MailTransaction, RecipientAdded,
    ServerInfo, SmtpConnection, SmtpStream,
};
pub use error::{Error, Result};
pub use types::{Address, AuthMechanism, Extension, Reply, ReplyCode};
