//! Storefront API command-line client
//!
//! Drives the authenticated client from a TOML config:
//! 1. Loads config (`--config` > `CONFIG_PATH` > `storefront-api.toml`)
//! 2. Restores the stored session from the credentials file
//! 3. Runs one command (sign-in, sign-out, status, refresh, request)
//!
//! Logs go to stderr as JSON; response bodies go to stdout.

mod cli;
mod config;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use api_client::{AuthenticatedClient, HttpRefresher, RefreshCoordinator};
use session::{CredentialStore, FileStorage};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transport::{TransportClient, TransportError};

use crate::cli::{Command, RequestArgs};
use crate::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
        .init();

    let cli = match cli::parse(std::env::args().skip(1)) {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("{e:#}");
            std::process::exit(2);
        }
    };

    let config_path = Config::resolve_path(cli.config.as_deref());
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    info!(
        base_url = %config.api.base_url,
        storage_path = %config.session.storage_path.display(),
        headers = config.headers.len(),
        "configuration loaded"
    );

    let client = build_client(&config)?;

    match cli.command {
        Command::SignIn {
            access_token,
            refresh_token,
        } => {
            client.sign_in(&access_token, &refresh_token);
            print_status(&client);
        }
        Command::SignOut => client.sign_out(),
        Command::Status => print_status(&client),
        Command::Refresh => {
            client
                .coordinator()
                .refresh()
                .await
                .context("token refresh failed")?;
            print_status(&client);
        }
        Command::Request(args) => send(&client, &args).await?,
    }

    Ok(())
}

fn build_client(config: &Config) -> Result<AuthenticatedClient> {
    let storage = FileStorage::load(config.session.storage_path.clone()).with_context(|| {
        format!(
            "failed to open credentials file {}",
            config.session.storage_path.display()
        )
    })?;
    let store = Arc::new(CredentialStore::load(Arc::new(storage)));

    let transport =
        TransportClient::new(config.transport_config()).context("failed to build HTTP client")?;
    let refresher = Arc::new(HttpRefresher::new(
        transport.clone(),
        config.session.refresh_path.clone(),
    ));
    let coordinator = RefreshCoordinator::new(store, refresher, config.refresh_timeout());

    let client = AuthenticatedClient::new(transport, coordinator);
    Ok(match config.proactive_refresh() {
        Some(buffer) => client.with_proactive_refresh(buffer),
        None => client,
    })
}

async fn send(client: &AuthenticatedClient, args: &RequestArgs) -> Result<()> {
    let response = match client.request(&args.descriptor()).await {
        Ok(response) => response,
        Err(api_client::Error::Transport(TransportError::Status(http))) => {
            let status = http.status();
            let body = http.text().await.unwrap_or_default();
            bail!("{} {} returned {status}: {body}", args.method, args.path);
        }
        Err(e) if e.is_session_ended() => {
            return Err(e).context("session ended, sign in again");
        }
        Err(e) => return Err(e).context("request failed"),
    };

    info!(status = response.status().as_u16(), "request succeeded");
    let body = response.text().await.context("failed to read response body")?;
    match serde_json::from_str::<serde_json::Value>(&body) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{body}"),
    }
    Ok(())
}

fn print_status(client: &AuthenticatedClient) {
    let store = client.store();
    let status = match store.get() {
        Some(credential) => serde_json::json!({
            "signed_in": credential.refresh_token.is_some(),
            "access_token_valid": credential.access_token.is_some(),
            "access_token_expires_at_ms": credential.access_token_expires_at_ms,
            "expiring_within_60s": store.is_expiring_soon(Duration::from_secs(60)),
        }),
        None => serde_json::json!({ "signed_in": false }),
    };
    println!("{status}");
}
