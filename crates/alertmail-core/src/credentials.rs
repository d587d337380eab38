//! Relay credential storage in the system keyring.
//!
//! One entry per sender address under the `alertmail` service:
//! - Linux: Secret Service (GNOME Keyring, `KWallet`)
//! - macOS: Keychain
//! - Windows: Credential Manager

use keyring::Entry;
use tracing::debug;

/// Service name used for keyring entries.
const SERVICE_NAME: &str = "alertmail";

/// Error type for credential operations.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    /// Failed to access keyring.
    #[error("Keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    /// Sender address is required to key the entry.
    #[error("Sender address is required for credential storage")]
    MissingSender,
}

/// Result type for credential operations.
pub type CredentialResult<T> = std::result::Result<T, CredentialError>;

fn relay_entry(sender: &str) -> CredentialResult<Entry> {
    let sender = sender.trim();
    if sender.is_empty() {
        return Err(CredentialError::MissingSender);
    }
    Ok(Entry::new(SERVICE_NAME, &format!("smtp:{sender}"))?)
}

/// Stores the relay password for `sender` in the system keyring.
///
/// # Errors
///
/// Returns an error if the sender is empty or the keyring operation fails.
pub fn store_relay_password(sender: &str, password: &str) -> CredentialResult<()> {
    relay_entry(sender)?.set_password(password)?;
    debug!(%sender, "stored relay password");
    Ok(())
}

/// Retrieves the relay password for `sender`, or `None` if no entry exists.
///
/// # Errors
///
/// Returns an error if the sender is empty or the keyring operation fails.
pub fn get_relay_password(sender: &str) -> CredentialResult<Option<String>> {
    match relay_entry(sender)?.get_password() {
        Ok(password) => Ok(Some(password)),
        Err(keyring::Error::NoEntry) => {
            debug!(%sender, "no relay password in keyring");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

/// Deletes the relay password for `sender`. A missing entry is not an error.
///
/// # Errors
///
/// Returns an error if the sender is empty or the keyring operation fails.
pub fn delete_relay_password(sender: &str) -> CredentialResult<()> {
    match relay_entry(sender)?.delete_credential() {
        Ok(()) | Err(keyring::Error::NoEntry) => {
            debug!(%sender, "deleted relay password");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
