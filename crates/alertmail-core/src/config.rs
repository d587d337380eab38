//! Relay configuration.
//!
//! The configuration is read once at process start and shared immutably
//! afterwards. The relay credential is never part of the source: it comes
//! from `ALERTMAIL_SMTP_PASSWORD` or, when that is unset, from the system
//! keyring entry for the sender address.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use alertmail_smtp::ConnectOptions;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::credentials::{self, CredentialError};

/// Environment variable names.
pub mod vars {
    /// Relay hostname (required).
    pub const HOST: &str = "ALERTMAIL_SMTP_HOST";
    /// Relay port.
    pub const PORT: &str = "ALERTMAIL_SMTP_PORT";
    /// `tls`, `starttls` or `none`.
    pub const SECURITY: &str = "ALERTMAIL_SMTP_SECURITY";
    /// Sender address, also the AUTH username (required).
    pub const SENDER: &str = "ALERTMAIL_SENDER";
    /// Relay password.
    pub const PASSWORD: &str = "ALERTMAIL_SMTP_PASSWORD";
    /// Disable certificate validation.
    pub const DANGER_ACCEPT_INVALID_CERTS: &str = "ALERTMAIL_DANGER_ACCEPT_INVALID_CERTS";
    /// Name sent with EHLO.
    pub const HELO_NAME: &str = "ALERTMAIL_HELO_NAME";
    /// Dial + TLS handshake deadline in seconds.
    pub const CONNECT_TIMEOUT_SECS: &str = "ALERTMAIL_CONNECT_TIMEOUT_SECS";
    /// Per round trip deadline in seconds.
    pub const IO_TIMEOUT_SECS: &str = "ALERTMAIL_IO_TIMEOUT_SECS";
}

const DEFAULT_HELO_NAME: &str = "localhost";
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(60);

/// Errors raised while loading or validating the relay configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required variable is not set.
    #[error("{0} is not set")]
    Missing(&'static str),

    /// A variable is set to an unusable value.
    #[error("{var}={value:?} is invalid: {reason}")]
    Invalid {
        /// Variable name.
        var: &'static str,
        /// Offending value.
        value: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A required field is empty.
    #[error("{0} must not be empty")]
    Empty(&'static str),

    /// Port 0 was configured.
    #[error("relay port must be 1-65535")]
    ZeroPort,

    /// No credential in the environment or the keyring.
    #[error("no relay credential for {sender}: set ALERTMAIL_SMTP_PASSWORD or store one in the keyring")]
    MissingCredential {
        /// Sender address the credential was looked up for.
        sender: String,
    },

    /// Keyring lookup failed.
    #[error("credential lookup failed: {0}")]
    Credential(#[from] CredentialError),
}

/// Transport security mode for the relay connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Security {
    /// No encryption. Only for local test relays.
    None,
    /// Implicit TLS (connect directly with TLS).
    #[default]
    Tls,
    /// STARTTLS upgrade after plaintext connect.
    StartTls,
}

impl Security {
    /// Get display name for the security mode.
    #[must_use]
    pub const fn display_name(&self) -> &'static str {
        match self {
            Self::None => "None (insecure)",
            Self::Tls => "SSL/TLS",
            Self::StartTls => "STARTTLS",
        }
    }

    /// Get default port for the security mode.
    #[must_use]
    pub const fn default_port(self) -> u16 {
        match self {
            Self::None => 25,
            Self::StartTls => 587,
            Self::Tls => 465,
        }
    }
}

impl FromStr for Security {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "tls" | "ssl" | "implicit" => Ok(Self::Tls),
            "starttls" => Ok(Self::StartTls),
            "none" | "plain" => Ok(Self::None),
            other => Err(format!("unknown security mode {other:?}, expected tls, starttls or none")),
        }
    }
}

/// Mail relay configuration. Immutable once built.
#[derive(Debug)]
pub struct RelayConfig {
    /// Relay hostname, also the TLS server name.
    pub host: String,
    /// Relay port.
    pub port: u16,
    /// Transport security.
    pub security: Security,
    /// Envelope sender and AUTH username.
    pub sender_address: String,
    /// AUTH password.
    pub sender_credential: SecretString,
    /// Accept any server certificate. **Dangerous.**
    pub danger_accept_invalid_certs: bool,
    /// Name sent with EHLO.
    pub helo_name: String,
    /// Deadline for dial + TLS handshake.
    pub connect_timeout: Duration,
    /// Deadline for each protocol round trip.
    pub io_timeout: Duration,
}

impl RelayConfig {
    /// Creates a configuration builder.
    #[must_use]
    pub fn builder(
        host: impl Into<String>,
        sender_address: impl Into<String>,
    ) -> RelayConfigBuilder {
        RelayConfigBuilder::new(host, sender_address)
    }

    /// Loads the configuration from the process environment, falling back
    /// to the keyring for the credential.
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing or invalid, or no
    /// credential can be found.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(|key| env::var(key).ok(), credentials::get_relay_password)
    }

    /// Loads the configuration from an arbitrary variable source. The
    /// keyring is not consulted.
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing or invalid, or
    /// the password variable is unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Self::load(lookup, |_| Ok(None))
    }

    fn load<F, C>(lookup: F, credential_fallback: C) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
        C: FnOnce(&str) -> Result<Option<String>, CredentialError>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let host = get(vars::HOST).ok_or(ConfigError::Missing(vars::HOST))?;
        let sender = get(vars::SENDER).ok_or(ConfigError::Missing(vars::SENDER))?;
        let mut builder = Self::builder(host.trim(), sender.trim());

        if let Some(value) = get(vars::SECURITY) {
            let security: Security = value.parse().map_err(|reason| ConfigError::Invalid {
                var: vars::SECURITY,
                value: value.clone(),
                reason,
            })?;
            builder = builder.security(security);
        }
        if let Some(value) = get(vars::PORT) {
            builder = builder.port(parse_var(vars::PORT, &value)?);
        }
        if let Some(value) = get(vars::DANGER_ACCEPT_INVALID_CERTS) {
            builder = builder.danger_accept_invalid_certs(parse_flag(
                vars::DANGER_ACCEPT_INVALID_CERTS,
                &value,
            )?);
        }
        if let Some(value) = get(vars::HELO_NAME) {
            builder = builder.helo_name(value.trim());
        }
        if let Some(value) = get(vars::CONNECT_TIMEOUT_SECS) {
            builder = builder.connect_timeout(Duration::from_secs(parse_var(
                vars::CONNECT_TIMEOUT_SECS,
                &value,
            )?));
        }
        if let Some(value) = get(vars::IO_TIMEOUT_SECS) {
            builder = builder.io_timeout(Duration::from_secs(parse_var(
                vars::IO_TIMEOUT_SECS,
                &value,
            )?));
        }

        // Password is taken verbatim; surrounding spaces may be significant
        match lookup(vars::PASSWORD).filter(|p| !p.is_empty()) {
            Some(password) => builder = builder.credential(password),
            None => {
                debug!(sender = %sender.trim(), "relay password not in environment, trying keyring");
                if let Some(password) = credential_fallback(sender.trim())? {
                    builder = builder.credential(password);
                }
            }
        }

        builder.build()
    }

    /// Returns the relay password.
    #[must_use]
    pub fn credential(&self) -> &str {
        self.sender_credential.expose_secret()
    }

    /// Returns the connection options derived from this configuration.
    #[must_use]
    pub const fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            connect_timeout: self.connect_timeout,
            danger_accept_invalid_certs: self.danger_accept_invalid_certs,
        }
    }
}

/// Builder for [`RelayConfig`].
#[derive(Debug)]
pub struct RelayConfigBuilder {
    host: String,
    sender_address: String,
    port: Option<u16>,
    security: Security,
    credential: Option<SecretString>,
    danger_accept_invalid_certs: bool,
    helo_name: String,
    connect_timeout: Duration,
    io_timeout: Duration,
}

impl RelayConfigBuilder {
    /// Creates a new builder with implicit TLS and default deadlines.
    #[must_use]
    pub fn new(host: impl Into<String>, sender_address: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            sender_address: sender_address.into(),
            port: None,
            security: Security::Tls,
            credential: None,
            danger_accept_invalid_certs: false,
            helo_name: DEFAULT_HELO_NAME.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            io_timeout: DEFAULT_IO_TIMEOUT,
        }
    }

    /// Sets the port. Defaults to the security mode's port.
    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Sets the security mode.
    #[must_use]
    pub const fn security(mut self, security: Security) -> Self {
        self.security = security;
        self
    }

    /// Sets the relay password.
    #[must_use]
    pub fn credential(mut self, password: impl Into<String>) -> Self {
        self.credential = Some(SecretString::new(password.into()));
        self
    }

    /// Disables certificate validation. **Dangerous.**
    #[must_use]
    pub const fn danger_accept_invalid_certs(mut self, accept: bool) -> Self {
        self.danger_accept_invalid_certs = accept;
        self
    }

    /// Sets the name sent with EHLO.
    #[must_use]
    pub fn helo_name(mut self, name: impl Into<String>) -> Self {
        self.helo_name = name.into();
        self
    }

    /// Sets the connect deadline.
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the per round trip deadline.
    #[must_use]
    pub const fn io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    /// Validates and builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error for an empty host, sender or EHLO name, port 0, or
    /// a missing credential.
    pub fn build(self) -> Result<RelayConfig, ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::Empty("relay host"));
        }
        if self.sender_address.trim().is_empty() {
            return Err(ConfigError::Empty("sender address"));
        }
        if self.helo_name.trim().is_empty() {
            return Err(ConfigError::Empty("EHLO name"));
        }
        let port = self.port.unwrap_or_else(|| self.security.default_port());
        if port == 0 {
            return Err(ConfigError::ZeroPort);
        }
        let sender_credential = self.credential.ok_or_else(|| ConfigError::MissingCredential {
            sender: self.sender_address.clone(),
        })?;

        Ok(RelayConfig {
            host: self.host,
            port,
            security: self.security,
            sender_address: self.sender_address,
            sender_credential,
            danger_accept_invalid_certs: self.danger_accept_invalid_certs,
            helo_name: self.helo_name,
            connect_timeout: self.connect_timeout,
            io_timeout: self.io_timeout,
        })
    }
}

fn parse_var<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn parse_flag(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            var,
            value: value.to_string(),
            reason: "expected true or false".to_string(),
        }),
    }
}
