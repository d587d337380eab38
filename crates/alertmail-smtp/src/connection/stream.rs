//! Low-level SMTP stream handling.

use crate::error::{Error, Result};
use rustls::DigitallySignedStruct;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_rustls::{
    TlsConnector,
    rustls::{ClientConfig, RootCertStore},
};
use tracing::warn;

/// Longest reply line accepted, line ending included.
pub const MAX_LINE_LENGTH: u64 = 4096;

/// Options applied while establishing a connection.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Deadline for the TCP dial plus the TLS handshake.
    pub connect_timeout: Duration,
    /// Skip server certificate validation. **Dangerous**: only for relays
    /// with self-signed certificates on a trusted network.
    pub danger_accept_invalid_certs: bool,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            danger_accept_invalid_certs: false,
        }
    }
}

/// SMTP stream (TCP or TLS).
#[derive(Debug)]
pub enum SmtpStream {
    /// Plain TCP connection.
    Tcp(BufReader<TcpStream>),
    /// TLS-encrypted connection.
    Tls(Box<BufReader<tokio_rustls::client::TlsStream<TcpStream>>>),
}

impl SmtpStream {
    /// Reads one line from the stream, without its line ending.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] on end of stream, a protocol
    /// error for lines longer than [`MAX_LINE_LENGTH`], or an I/O error.
    pub async fn read_line(&mut self) -> Result<String> {
        let mut line = String::new();
        let read = match self {
            Self::Tcp(reader) => {
                (&mut *reader)
                    .take(MAX_LINE_LENGTH)
                    .read_line(&mut line)
                    .await?
            }
            Self::Tls(reader) => {
                (&mut **reader)
                    .take(MAX_LINE_LENGTH)
                    .read_line(&mut line)
                    .await?
            }
        };
        if read == 0 {
            return Err(Error::ConnectionClosed);
        }
        if !line.ends_with('\n') && read as u64 >= MAX_LINE_LENGTH {
            return Err(Error::Protocol(format!(
                "Reply line exceeds {MAX_LINE_LENGTH} bytes"
            )));
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    /// Writes data to the stream and flushes it.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        match self {
            Self::Tcp(reader) => {
                reader.get_mut().write_all(data).await?;
                reader.get_mut().flush().await?;
            }
            Self::Tls(reader) => {
                reader.get_mut().write_all(data).await?;
                reader.get_mut().flush().await?;
            }
        }
        Ok(())
    }

    /// Returns true if the stream is TLS-encrypted.
    #[must_use]
    pub const fn is_tls(&self) -> bool {
        matches!(self, Self::Tls(_))
    }

    /// Returns true if the peer is a loopback address.
    #[must_use]
    pub fn peer_is_loopback(&self) -> bool {
        let peer = match self {
            Self::Tcp(reader) => reader.get_ref().peer_addr(),
            Self::Tls(reader) => reader.get_ref().get_ref().0.peer_addr(),
        };
        peer.is_ok_and(|addr| addr.ip().to_canonical().is_loopback())
    }

    /// Upgrades a TCP stream to TLS (after a successful `STARTTLS`).
    ///
    /// # Errors
    ///
    /// Returns an error if already encrypted, or if the handshake fails or
    /// exceeds `options.connect_timeout`.
    pub async fn upgrade_to_tls(self, hostname: &str, options: &ConnectOptions) -> Result<Self> {
        let tcp_stream = match self {
            Self::Tcp(reader) => reader.into_inner(),
            Self::Tls(_) => return Err(Error::Protocol("Already using TLS".into())),
        };

        let tls_stream = tokio::time::timeout(
            options.connect_timeout,
            handshake(hostname, tcp_stream, options),
        )
        .await
        .map_err(|_| Error::Timeout("TLS handshake".into()))??;
        Ok(Self::Tls(Box::new(BufReader::new(tls_stream))))
    }
}

/// Connects to an SMTP server over plain TCP.
///
/// # Errors
///
/// Returns an error if the connection fails or exceeds the connect timeout.
pub async fn connect(hostname: &str, port: u16, options: &ConnectOptions) -> Result<SmtpStream> {
    let stream = tokio::time::timeout(options.connect_timeout, dial(hostname, port))
        .await
        .map_err(|_| Error::Timeout(format!("connect to {hostname}:{port}")))??;
    Ok(SmtpStream::Tcp(BufReader::new(stream)))
}

/// Connects to an SMTP server over TLS (implicit TLS, usually port 465).
///
/// The deadline in `options` covers both the TCP dial and the handshake.
///
/// # Errors
///
/// Returns an error if the connection or TLS handshake fails or times out.
pub async fn connect_tls(
    hostname: &str,
    port: u16,
    options: &ConnectOptions,
) -> Result<SmtpStream> {
    let tls_stream = tokio::time::timeout(options.connect_timeout, async {
        let tcp_stream = dial(hostname, port).await?;
        handshake(hostname, tcp_stream, options).await
    })
    .await
    .map_err(|_| Error::Timeout(format!("TLS connect to {hostname}:{port}")))??;
    Ok(SmtpStream::Tls(Box::new(BufReader::new(tls_stream))))
}

async fn dial(hostname: &str, port: u16) -> Result<TcpStream> {
    let stream = TcpStream::connect((hostname, port)).await?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

async fn handshake(
    hostname: &str,
    tcp_stream: TcpStream,
    options: &ConnectOptions,
) -> Result<tokio_rustls::client::TlsStream<TcpStream>> {
    let connector = create_tls_connector(options.danger_accept_invalid_certs);
    let server_name = ServerName::try_from(hostname.to_string())
        .map_err(|_| Error::Protocol(format!("Invalid hostname: {hostname}")))?;

    connector
        .connect(server_name, tcp_stream)
        .await
        .map_err(tls_error)
}

/// Surfaces rustls failures carried inside the socket error as
/// [`Error::Tls`].
fn tls_error(err: std::io::Error) -> Error {
    match err
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<rustls::Error>())
    {
        Some(tls) => Error::Tls(tls.clone()),
        None => Error::Io(err),
    }
}

/// Creates a TLS connector, validating against the webpki roots unless the
/// caller explicitly opted out.
fn create_tls_connector(danger_accept_invalid_certs: bool) -> TlsConnector {
    let config = if danger_accept_invalid_certs {
        warn!("TLS certificate validation is DISABLED for this connection");
        ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate))
            .with_no_client_auth()
    } else {
        let root_store = RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        };
        ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth()
    };

    TlsConnector::from(Arc::new(config))
}

/// Verifier that trusts every certificate. Only reachable through
/// [`ConnectOptions::danger_accept_invalid_certs`].
#[derive(Debug)]
struct AcceptAnyCertificate;

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::ED25519,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
        ]
    }
}
