//! Envelope address type.

use crate::error::{Error, Result};

/// Mailbox every SMTP server must accept without a domain.
const POSTMASTER: &str = "postmaster";

/// Email address as used in `MAIL FROM` / `RCPT TO`.
///
/// Validation is deliberately shallow: it guarantees the address can be
/// placed between angle brackets on a command line, not that it is
/// deliverable. Surrounding whitespace is trimmed. The bare `Postmaster`
/// mailbox (any case) is accepted without a domain.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address(String);

impl Address {
    /// Creates a new address from a string.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is empty, lacks exactly one `@`
    /// separating non-empty parts (unless it is `Postmaster`), or contains characters that would break
    /// the command line (`<`, `>`, whitespace, control characters).
    pub fn new(addr: impl AsRef<str>) -> Result<Self> {
        let addr = addr.as_ref().trim();
        Self::validate(addr)?;
        Ok(Self(addr.to_string()))
    }

    /// Returns the address as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(addr: &str) -> Result<()> {
        if addr.is_empty() {
            return Err(Error::InvalidAddress("Address cannot be empty".into()));
        }

        if addr
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || c == '<' || c == '>')
        {
            return Err(Error::InvalidAddress(format!(
                "Address contains forbidden characters: {addr:?}"
            )));
        }

        if addr.eq_ignore_ascii_case(POSTMASTER) {
            return Ok(());
        }

        match addr.split_once('@') {
            Some((local, domain)) if !local.is_empty() && !domain.is_empty() => {
                if domain.contains('@') {
                    Err(Error::InvalidAddress(format!(
                        "Address must have exactly one @: {addr}"
                    )))
                } else {
                    Ok(())
                }
            }
            Some(_) => Err(Error::InvalidAddress(format!(
                "Local and domain parts cannot be empty: {addr}"
            ))),
            None => Err(Error::InvalidAddress(format!("Address must contain @: {addr}"))),
        }
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}
