//! alertmail
//!
//! Sends alert emails through an authenticated SMTP relay. Relay settings
//! come from `ALERTMAIL_*` environment variables (a `.env` file is read if
//! present); the password may live in the system keyring instead.

use std::io::{self, BufRead};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use alertmail_core::config::vars;
use alertmail_core::credentials::{delete_relay_password, store_relay_password};
use alertmail_core::{
    AlertComposer, CancellationToken, DispatchResponse, RelayConfig, normalize_phone, to_iso,
};

/// alertmail - send alerts by email
#[derive(Parser)]
#[command(name = "alertmail")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable debug logging (overridden by `RUST_LOG`)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one alert and print the result as JSON
    Send {
        /// Subject line
        #[arg(short, long)]
        subject: String,

        /// Alert text; the generation time is appended
        #[arg(short, long)]
        message: String,

        /// Recipient address (repeat or separate with commas)
        #[arg(short, long = "to", value_delimiter = ',', required = true)]
        to: Vec<String>,
    },

    /// Store the relay password in the system keyring (read from stdin)
    StoreCredential {
        /// Sender address the password belongs to
        #[arg(long, env = vars::SENDER)]
        sender: String,
    },

    /// Remove the relay password from the system keyring
    DeleteCredential {
        /// Sender address the password belongs to
        #[arg(long, env = vars::SENDER)]
        sender: String,
    },

    /// Normalize a phone number to +254 form
    Phone {
        /// Raw number
        number: String,
    },

    /// Convert a `YYYY-MM-DD HH:MM:SS` local timestamp to RFC 3339
    Iso {
        /// Raw timestamp
        timestamp: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "alertmail=debug,alertmail_core=debug,alertmail_smtp=debug"
    } else {
        "alertmail=info,alertmail_core=info,alertmail_smtp=info"
    };
    // stdout carries the JSON result
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    match run(cli.command).await {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands) -> anyhow::Result<ExitCode> {
    match command {
        Commands::Send {
            subject,
            message,
            to,
        } => send(&subject, &message, to).await,
        Commands::StoreCredential { sender } => {
            let password = read_password()?;
            store_relay_password(&sender, &password)
                .map_err(alertmail_core::Error::from)
                .context("failed to store relay password")?;
            info!(%sender, "relay password stored");
            Ok(ExitCode::SUCCESS)
        }
        Commands::DeleteCredential { sender } => {
            delete_relay_password(&sender)
                .map_err(alertmail_core::Error::from)
                .context("failed to delete relay password")?;
            info!(%sender, "relay password removed");
            Ok(ExitCode::SUCCESS)
        }
        Commands::Phone { number } => {
            let normalized = normalize_phone(&number);
            if normalized.is_empty() {
                bail!("invalid phone number: {number}");
            }
            println!("{normalized}");
            Ok(ExitCode::SUCCESS)
        }
        Commands::Iso { timestamp } => {
            println!("{}", to_iso(&timestamp));
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn send(subject: &str, message: &str, to: Vec<String>) -> anyhow::Result<ExitCode> {
    let config = RelayConfig::from_env()
        .map_err(alertmail_core::Error::from)
        .context("failed to load relay configuration")?;
    info!(
        relay = %config.host,
        port = config.port,
        security = config.security.display_name(),
        "relay configured"
    );

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling delivery");
            trigger.cancel();
        }
    });

    let composer = AlertComposer::new(Arc::new(config));
    let (outcome, status) = composer.dispatch_alert(subject, message, to, &cancel).await;

    let response = DispatchResponse::from_outcome(&outcome, status).into_response();
    print!("{}", response.body);

    Ok(if outcome.is_ok() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn read_password() -> anyhow::Result<String> {
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("failed to read password from stdin")?;
    let password = line.trim_end_matches(['\r', '\n']);
    if password.is_empty() {
        bail!("no password given on stdin");
    }
    Ok(password.to_string())
}
