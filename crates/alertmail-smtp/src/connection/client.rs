//! Type-state SMTP client.
//!
//! Every command round trip (write plus full reply) runs under the
//! client's I/O timeout. The client owns the stream; dropping it in any
//! state closes the connection.

use super::{ConnectOptions, ServerInfo, SmtpStream};
use crate::command::{Command, encode_data};
use crate::error::{Error, Result};
use crate::parser::{is_last_reply_line, parse_reply};
use crate::types::{Address, AuthMechanism, Extension, Reply, ReplyCode};
use base64::Engine;
use std::collections::HashSet;
use std::marker::PhantomData;
use std::time::Duration;
use tracing::debug;

/// Upper bound on lines in a single reply.
const MAX_REPLY_LINES: usize = 512;

/// Type-state marker for connected state.
#[derive(Debug)]
pub struct Connected;

/// Type-state marker for authenticated state.
#[derive(Debug)]
pub struct Authenticated;

/// Type-state marker for mail transaction started.
#[derive(Debug)]
pub struct MailTransaction;

/// Type-state marker for at least one accepted recipient.
#[derive(Debug)]
pub struct RecipientAdded;

/// Type-state marker for data mode.
#[derive(Debug)]
pub struct Data;

/// SMTP client with type-state pattern.
#[derive(Debug)]
pub struct Client<State> {
    stream: SmtpStream,
    server_info: ServerInfo,
    io_timeout: Duration,
    loopback_peer: bool,
    _state: PhantomData<State>,
}

/// Connection trait for all states.
pub trait SmtpConnection {
    /// Returns the server information.
    fn server_info(&self) -> &ServerInfo;
}

impl<S> SmtpConnection for Client<S> {
    fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }
}

impl Client<Connected> {
    /// Creates a client from a stream and reads the server greeting.
    ///
    /// `io_timeout` bounds the greeting and every later round trip.
    ///
    /// # Errors
    ///
    /// Returns an error if reading the greeting fails, times out, or the
    /// server refuses service.
    pub async fn from_stream(mut stream: SmtpStream, io_timeout: Duration) -> Result<Self> {
        let greeting = tokio::time::timeout(io_timeout, read_reply(&mut stream))
            .await
            .map_err(|_| Error::Timeout("greeting".into()))??
            .expect_success()?;

        let hostname = greeting
            .message
            .first()
            .and_then(|msg| msg.split_whitespace().next())
            .unwrap_or("unknown")
            .to_string();
        debug!(server = %hostname, "received SMTP greeting");

        let loopback_peer = stream.peer_is_loopback();
        Ok(Self {
            stream,
            server_info: ServerInfo {
                hostname,
                extensions: HashSet::new(),
            },
            io_timeout,
            loopback_peer,
            _state: PhantomData,
        })
    }

    /// Sends EHLO and records the advertised extensions.
    ///
    /// # Errors
    ///
    /// Returns an error if the EHLO command fails.
    pub async fn ehlo(mut self, client_hostname: &str) -> Result<Self> {
        let reply = self
            .send_command(Command::Ehlo {
                hostname: client_hostname.to_string(),
            })
            .await?
            .expect_success()?;

        // First line is the server's greeting text, the rest are extensions
        self.server_info.extensions = reply
            .message
            .iter()
            .skip(1)
            .map(String::as_str)
            .map(Extension::parse)
            .collect();
        Ok(self)
    }

    /// Upgrades the connection to TLS using STARTTLS, then repeats EHLO.
    ///
    /// # Errors
    ///
    /// Returns an error if STARTTLS is not advertised or the upgrade fails.
    pub async fn starttls(
        mut self,
        server_name: &str,
        client_hostname: &str,
        options: &ConnectOptions,
    ) -> Result<Self> {
        if !self.server_info.supports_starttls() {
            return Err(Error::NotSupported("STARTTLS".into()));
        }

        self.send_command(Command::StartTls)
            .await?
            .expect_success()?;

        self.stream = self.stream.upgrade_to_tls(server_name, options).await?;
        self.ehlo(client_hostname).await
    }

    /// Authenticates using the PLAIN mechanism.
    ///
    /// Sends the credentials as an initial response; a `334` continuation
    /// from servers without SASL-IR is answered with the same payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotSupported`] without sending anything if the
    /// connection is unencrypted and the peer is not a loopback address, or
    /// if the server advertises AUTH without PLAIN. Returns an error if the
    /// server rejects the credentials.
    pub async fn auth_plain(
        mut self,
        username: &str,
        password: &str,
    ) -> Result<Client<Authenticated>> {
        if !self.stream.is_tls() && !self.loopback_peer {
            return Err(Error::NotSupported(
                "AUTH PLAIN over an unencrypted connection".into(),
            ));
        }

        let mechanisms = self.server_info.auth_mechanisms();
        if !mechanisms.is_empty() && !mechanisms.contains(&AuthMechanism::Plain) {
            return Err(Error::NotSupported("AUTH PLAIN".into()));
        }

        // authzid \0 authcid \0 passwd
        let encoded = base64::engine::general_purpose::STANDARD
            .encode(format!("\0{username}\0{password}").as_bytes());

        let mut reply = self
            .send_command(Command::Auth {
                mechanism: AuthMechanism::Plain,
                initial_response: Some(encoded.clone()),
            })
            .await?;

        if reply.code == ReplyCode::AUTH_CONTINUE {
            reply = self.send_raw("AUTH response", format!("{encoded}\r\n").as_bytes()).await?;
        }
        reply.expect_success()?;

        Ok(self.into_state())
    }

    /// Starts a mail transaction without authentication (if the server allows).
    ///
    /// # Errors
    ///
    /// Returns an error if the MAIL FROM command fails.
    pub async fn mail_from(self, from: Address) -> Result<Client<MailTransaction>> {
        self.start_transaction(from).await
    }
}

impl Client<Authenticated> {
    /// Starts a mail transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the MAIL FROM command fails.
    pub async fn mail_from(self, from: Address) -> Result<Client<MailTransaction>> {
        self.start_transaction(from).await
    }
}

impl Client<MailTransaction> {
    /// Adds the first recipient to the transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the RCPT TO command fails.
    pub async fn rcpt_to(mut self, to: Address) -> Result<Client<RecipientAdded>> {
        self.add_recipient(to).await?;
        Ok(self.into_state())
    }
}

impl Client<RecipientAdded> {
    /// Adds another recipient to the transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the RCPT TO command fails.
    pub async fn rcpt_to(mut self, to: Address) -> Result<Self> {
        self.add_recipient(to).await?;
        Ok(self)
    }

    /// Begins sending message data.
    ///
    /// # Errors
    ///
    /// Returns an error unless the server answers `354`.
    pub async fn data(mut self) -> Result<Client<Data>> {
        self.send_command(Command::Data)
            .await?
            .expect(ReplyCode::START_DATA)?;
        Ok(self.into_state())
    }
}

impl Client<Data> {
    /// Sends the message content and completes the transaction.
    ///
    /// Line endings are normalized to CRLF, leading dots are stuffed and
    /// the terminating `.` line is added.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails, times out, or the server rejects
    /// the message.
    pub async fn send_message(mut self, message: &[u8]) -> Result<Client<Connected>> {
        let payload = encode_data(message);
        debug!(bytes = payload.len(), "sending message data");
        self.send_raw("message data", &payload)
            .await?
            .expect_success()?;
        Ok(self.into_state())
    }
}

// Common implementation for all states
impl<S> Client<S> {
    fn into_state<T>(self) -> Client<T> {
        Client {
            stream: self.stream,
            server_info: self.server_info,
            io_timeout: self.io_timeout,
            loopback_peer: self.loopback_peer,
            _state: PhantomData,
        }
    }

    async fn start_transaction(mut self, from: Address) -> Result<Client<MailTransaction>> {
        self.send_command(Command::MailFrom { from })
            .await?
            .expect_success()?;
        Ok(self.into_state())
    }

    async fn add_recipient(&mut self, to: Address) -> Result<()> {
        self.send_command(Command::RcptTo { to })
            .await?
            .expect_success()?;
        Ok(())
    }

    async fn send_command(&mut self, cmd: Command) -> Result<Reply> {
        debug!(command = cmd.name(), "sending SMTP command");
        let reply = self.send_raw(cmd.name(), &cmd.serialize()).await?;
        debug!(command = cmd.name(), code = %reply.code, "received SMTP reply");
        Ok(reply)
    }

    /// Writes `data` and reads one reply, bounded by the I/O timeout.
    async fn send_raw(&mut self, operation: &str, data: &[u8]) -> Result<Reply> {
        let stream = &mut self.stream;
        tokio::time::timeout(self.io_timeout, async move {
            stream.write_all(data).await?;
            read_reply(stream).await
        })
        .await
        .map_err(|_| Error::Timeout(operation.to_string()))?
    }

    /// Sends QUIT and closes the connection (available in any state).
    ///
    /// # Errors
    ///
    /// Returns an error if the QUIT command fails.
    pub async fn quit(mut self) -> Result<()> {
        let reply = self.send_command(Command::Quit).await?;
        if reply.code != ReplyCode::CLOSING {
            reply.expect_success()?;
        }
        Ok(())
    }
}

async fn read_reply(stream: &mut SmtpStream) -> Result<Reply> {
    let mut lines = Vec::new();
    loop {
        let line = stream.read_line().await?;
        if line.is_empty() {
            continue;
        }

        // Short lines cannot continue a reply; let the parser reject them
        let is_last = line.len() < 4 || is_last_reply_line(&line);
        lines.push(line);

        if is_last {
            break;
        }
        if lines.len() >= MAX_REPLY_LINES {
            return Err(Error::Protocol(format!(
                "Reply exceeds {MAX_REPLY_LINES} lines"
            )));
        }
    }

    parse_reply(&lines)
}
