//! In-process fake relay shared by the integration tests.

// Each test file is its own crate and uses a different subset
#![allow(dead_code, clippy::unwrap_used)]

use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alertmail_core::{AlertRequest, OutboundMessage, RelayConfig, Security};
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;

pub const SENDER: &str = "alerts@example.com";

/// Name on the relay's self-signed certificate.
pub const TLS_HOST: &str = "localhost";

/// What the fake relay should do differently from accepting everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct Behavior {
    /// Reject the Nth `RCPT TO` (1-based).
    pub reject_rcpt: Option<usize>,
    /// Reject every AUTH attempt.
    pub reject_auth: bool,
    /// Accept connections but never send a greeting.
    pub silent: bool,
    /// Queue the message, then never answer QUIT.
    pub silent_quit: bool,
    /// Wrap every connection in TLS before the greeting.
    pub implicit_tls: bool,
    /// Advertise and honour STARTTLS.
    pub starttls: bool,
}

/// What the relay observed on one connection.
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub commands: Vec<String>,
    pub data: Option<String>,
    /// SNI sent by the client, once a TLS handshake completed.
    pub sni: Option<String>,
    pub tls: bool,
}

impl Session {
    pub fn count(&self, verb: &str) -> usize {
        self.commands.iter().filter(|c| c.starts_with(verb)).count()
    }

    pub fn rcpts(&self) -> Vec<&str> {
        self.commands
            .iter()
            .filter_map(|c| c.strip_prefix("RCPT TO:"))
            .collect()
    }
}

#[derive(Clone)]
struct SessionLog {
    sessions: Arc<Mutex<Vec<Session>>>,
    index: usize,
}

impl SessionLog {
    fn update(&self, f: impl FnOnce(&mut Session)) {
        f(&mut self.sessions.lock().unwrap()[self.index]);
    }
}

pub struct FakeRelay {
    pub addr: IpAddr,
    pub port: u16,
    sessions: Arc<Mutex<Vec<Session>>>,
}

impl FakeRelay {
    pub async fn start(behavior: Behavior) -> Self {
        Self::start_on(IpAddr::V4(Ipv4Addr::LOCALHOST), behavior).await
    }

    pub async fn start_on(addr: IpAddr, behavior: Behavior) -> Self {
        let listener = TcpListener::bind((addr, 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let sessions = Arc::new(Mutex::new(Vec::new()));
        let acceptor = (behavior.implicit_tls || behavior.starttls).then(self_signed_acceptor);

        let shared = Arc::clone(&sessions);
        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    break;
                };
                let log = {
                    let mut sessions = shared.lock().unwrap();
                    sessions.push(Session::default());
                    SessionLog {
                        sessions: Arc::clone(&shared),
                        index: sessions.len() - 1,
                    }
                };
                tokio::spawn(serve(socket, behavior, acceptor.clone(), log));
            }
        });

        Self {
            addr,
            port,
            sessions,
        }
    }

    pub fn sessions(&self) -> Vec<Session> {
        self.sessions.lock().unwrap().clone()
    }

    pub fn only_session(&self) -> Session {
        let sessions = self.sessions();
        assert_eq!(sessions.len(), 1, "expected exactly one connection");
        sessions.into_iter().next().unwrap()
    }

    /// Plain-TCP configuration pointing at this relay.
    pub fn config(&self, io_timeout: Duration) -> RelayConfig {
        relay_config(&self.addr.to_string(), self.port, Security::None, io_timeout)
    }
}

pub fn relay_config(host: &str, port: u16, security: Security, io_timeout: Duration) -> RelayConfig {
    RelayConfig::builder(host, SENDER)
        .port(port)
        .security(security)
        .credential("relay-secret")
        .connect_timeout(Duration::from_secs(5))
        .io_timeout(io_timeout)
        .build()
        .unwrap()
}

pub fn outbound(to: &[&str]) -> OutboundMessage {
    let alert = AlertRequest::new("Disk full", "Volume /data is at 100%", to.iter().copied());
    OutboundMessage::from_alert(&alert, SENDER)
}

/// TLS acceptor with a fresh self-signed certificate for [`TLS_HOST`].
pub fn self_signed_acceptor() -> TlsAcceptor {
    let mut params = CertificateParams::new(vec![TLS_HOST.to_string()]).unwrap();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, "fake.relay");
    params.distinguished_name = dn;

    let key_pair = KeyPair::generate().unwrap();
    let cert = params.self_signed(&key_pair).unwrap();
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(vec![cert.der().clone()], key)
        .unwrap();
    TlsAcceptor::from(Arc::new(config))
}

async fn serve(socket: TcpStream, behavior: Behavior, acceptor: Option<TlsAcceptor>, log: SessionLog) {
    if behavior.silent {
        // Hold the connection open until the client goes away
        let mut sink = String::new();
        let _ = BufReader::new(socket).read_line(&mut sink).await;
        return;
    }

    if behavior.implicit_tls {
        let Some(acceptor) = acceptor else { return };
        let Ok(tls) = acceptor.accept(socket).await else {
            return;
        };
        let sni = tls.get_ref().1.server_name().map(str::to_string);
        log.update(|s| {
            s.tls = true;
            s.sni = sni;
        });
        converse(tls, behavior, &log, true, false).await;
        return;
    }

    let Some(socket) = converse(socket, behavior, &log, true, behavior.starttls).await else {
        return;
    };
    let Some(acceptor) = acceptor else { return };
    let Ok(tls) = acceptor.accept(socket).await else {
        return;
    };
    let sni = tls.get_ref().1.server_name().map(str::to_string);
    log.update(|s| {
        s.tls = true;
        s.sni = sni;
    });
    converse(tls, behavior, &log, false, false).await;
}

async fn reply<S: AsyncRead + AsyncWrite + Unpin>(stream: &mut BufReader<S>, bytes: &[u8]) -> bool {
    let writer = stream.get_mut();
    writer.write_all(bytes).await.is_ok() && writer.flush().await.is_ok()
}

/// Runs one SMTP dialogue. Returns the raw stream when the client asked
/// for STARTTLS.
async fn converse<S>(
    stream: S,
    behavior: Behavior,
    log: &SessionLog,
    greet: bool,
    offer_starttls: bool,
) -> Option<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut stream = BufReader::new(stream);
    if greet && !reply(&mut stream, b"220 fake.relay ESMTP\r\n").await {
        return None;
    }
    let mut rcpt_count = 0;

    loop {
        let mut line = String::new();
        match stream.read_line(&mut line).await {
            Ok(0) | Err(_) => return None,
            Ok(_) => {}
        }
        let line = line.trim_end().to_string();
        log.update(|s| s.commands.push(line.clone()));

        let upper = line.to_ascii_uppercase();
        let answer: &[u8] = if upper.starts_with("EHLO") {
            if offer_starttls {
                b"250-fake.relay\r\n250-STARTTLS\r\n250-AUTH PLAIN LOGIN\r\n250 8BITMIME\r\n"
            } else {
                b"250-fake.relay\r\n250-AUTH PLAIN LOGIN\r\n250 8BITMIME\r\n"
            }
        } else if upper == "STARTTLS" && offer_starttls {
            if !reply(&mut stream, b"220 2.0.0 Ready to start TLS\r\n").await {
                return None;
            }
            return Some(stream.into_inner());
        } else if upper.starts_with("AUTH") {
            if behavior.reject_auth {
                b"535 5.7.8 Authentication credentials invalid\r\n"
            } else {
                b"235 2.7.0 Authentication successful\r\n"
            }
        } else if upper.starts_with("MAIL FROM") {
            b"250 2.1.0 Ok\r\n"
        } else if upper.starts_with("RCPT TO") {
            rcpt_count += 1;
            if behavior.reject_rcpt == Some(rcpt_count) {
                b"550 5.1.1 No such user\r\n"
            } else {
                b"250 2.1.5 Ok\r\n"
            }
        } else if upper == "DATA" {
            if !reply(&mut stream, b"354 End data with <CR><LF>.<CR><LF>\r\n").await {
                return None;
            }
            let mut data = Vec::new();
            loop {
                let mut chunk = String::new();
                if stream.read_line(&mut chunk).await.unwrap_or(0) == 0 {
                    return None;
                }
                let chunk = chunk.trim_end_matches(['\r', '\n']);
                if chunk == "." {
                    break;
                }
                data.push(chunk.strip_prefix('.').unwrap_or(chunk).to_string());
            }
            let data = data.join("\r\n");
            log.update(|s| s.data = Some(data));
            b"250 2.0.0 Queued\r\n"
        } else if upper == "QUIT" {
            if behavior.silent_quit {
                let mut sink = String::new();
                let _ = stream.read_line(&mut sink).await;
                return None;
            }
            reply(&mut stream, b"221 2.0.0 Bye\r\n").await;
            return None;
        } else {
            b"500 5.5.2 Unrecognized command\r\n"
        };
        if !reply(&mut stream, answer).await {
            return None;
        }
    }
}

/// A non-loopback address of this host, if it has one. No packet is sent.
pub fn non_loopback_local_ip() -> Option<IpAddr> {
    let socket = std::net::UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("192.0.2.1:9").ok()?;
    let ip = socket.local_addr().ok()?.ip();
    (!ip.is_loopback() && !ip.is_unspecified()).then_some(ip)
}
