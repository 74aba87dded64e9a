//! Ironic probe binary entry point.
//!
//! Negotiates an API version with a Bare Metal endpoint or lists one of its
//! resource collections. Credentials come from the environment (see
//! `SessionConfig::from_env`).

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ironic_client::{
    ClientConfig, HttpClient, RequestedVersion, ReqwestSession, ResourceKind, ResourceManager,
    SessionConfig,
};
use std::sync::Arc;

#[derive(Debug, Parser)]
#[command(
    name = "ironic-probe",
    about = "Probe a Bare Metal API endpoint",
    version
)]
struct Cli {
    /// Bare Metal API endpoint
    #[arg(long, env = "OS_ENDPOINT")]
    endpoint: String,

    /// API version: `1.31`, `latest`, or a comma-separated list
    #[arg(long, env = "OS_BAREMETAL_API_VERSION")]
    api_version: Option<RequestedVersion>,

    /// Retries for transient failures
    #[arg(long, env = "IRONIC_MAX_RETRIES")]
    max_retries: Option<u32>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the API version the server agrees to
    Negotiate,

    /// List a resource collection as JSON
    List {
        /// Collection to list, e.g. `nodes` or `volume-targets`
        kind: ResourceKind,

        /// Stop after this many items
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut session_config = SessionConfig::from_env().context("loading session settings")?;
    session_config.endpoint = Some(cli.endpoint.clone());
    let session = Arc::new(ReqwestSession::new(&session_config)?);

    let mut config = ClientConfig::from_env().context("loading client settings")?;
    config.endpoint_override = Some(cli.endpoint);
    if let Some(version) = cli.api_version {
        config.api_version = Some(version);
    }
    if let Some(max_retries) = cli.max_retries {
        config.retry.max_retries = Some(max_retries);
    }

    let client = HttpClient::builder(session).config(&config).build().await?;
    tracing::debug!("Client ready for {}", client.endpoint());

    match cli.command {
        Command::Negotiate => {
            let version = client.negotiate_api_version().await?;
            println!("{version} ({})", client.select_state());
        }
        Command::List { kind, limit } => {
            let items = ResourceManager::new(Arc::new(client), kind)
                .list(limit, None)
                .await?;
            println!("{}", serde_json::to_string_pretty(&items)?);
        }
    }

    Ok(())
}
