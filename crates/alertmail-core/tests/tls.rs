//! Delivery over TLS against a relay with a self-signed certificate.

#![allow(clippy::unwrap_used)]

mod common;

use std::time::Duration;

use alertmail_core::{CancellationToken, DeliveryError, DeliveryStage, RelayConfig, Security, send_email};
use alertmail_smtp::Error as SmtpError;
use common::{Behavior, FakeRelay, SENDER, TLS_HOST, outbound};

fn tls_config(relay: &FakeRelay, security: Security, accept_invalid: bool) -> RelayConfig {
    RelayConfig::builder(TLS_HOST, SENDER)
        .port(relay.port)
        .security(security)
        .credential("relay-secret")
        .danger_accept_invalid_certs(accept_invalid)
        .connect_timeout(Duration::from_secs(5))
        .io_timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}

#[tokio::test]
async fn implicit_tls_validates_certificates_by_default() {
    let relay = FakeRelay::start(Behavior {
        implicit_tls: true,
        ..Behavior::default()
    })
    .await;

    let err = send_email(
        &tls_config(&relay, Security::Tls, false),
        &outbound(&["a@example.com"]),
        &CancellationToken::new(),
    )
    .await
    .unwrap_err();

    assert!(
        matches!(err, DeliveryError::Connect(SmtpError::Tls(_))),
        "got {err:?}"
    );
    assert!(relay.sessions().iter().all(|s| s.commands.is_empty() && !s.tls));
}

#[tokio::test]
async fn implicit_tls_with_override_delivers() {
    let relay = FakeRelay::start(Behavior {
        implicit_tls: true,
        ..Behavior::default()
    })
    .await;

    send_email(
        &tls_config(&relay, Security::Tls, true),
        &outbound(&["a@example.com", "b@example.com"]),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    let session = relay.only_session();
    assert!(session.tls);
    assert_eq!(session.sni.as_deref(), Some(TLS_HOST));
    assert!(session.commands[1].starts_with("AUTH PLAIN "));
    assert_eq!(session.count("RCPT TO"), 2);
    assert!(
        session
            .data
            .unwrap()
            .starts_with("To: a@example.com, b@example.com\r\n")
    );
}

#[tokio::test]
async fn starttls_upgrades_before_authenticating() {
    let relay = FakeRelay::start(Behavior {
        starttls: true,
        ..Behavior::default()
    })
    .await;

    send_email(
        &tls_config(&relay, Security::StartTls, true),
        &outbound(&["a@example.com"]),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    let session = relay.only_session();
    assert!(session.tls);
    assert_eq!(session.sni.as_deref(), Some(TLS_HOST));
    assert_eq!(&session.commands[..3], ["EHLO localhost", "STARTTLS", "EHLO localhost"]);
    assert!(session.commands[3].starts_with("AUTH PLAIN "));
    assert!(session.data.is_some());
}

#[tokio::test]
async fn starttls_rejects_untrusted_certificate() {
    let relay = FakeRelay::start(Behavior {
        starttls: true,
        ..Behavior::default()
    })
    .await;

    let err = send_email(
        &tls_config(&relay, Security::StartTls, false),
        &outbound(&["a@example.com"]),
        &CancellationToken::new(),
    )
    .await
    .unwrap_err();

    assert!(
        matches!(err, DeliveryError::Handshake(SmtpError::Tls(_))),
        "got {err:?}"
    );
    assert_eq!(err.stage(), DeliveryStage::Handshake);
    let session = relay.only_session();
    assert_eq!(session.commands, vec!["EHLO localhost", "STARTTLS"]);
    assert_eq!(session.count("AUTH"), 0);
}
