//! Weaviate connection probe
//!
//! Connects with whatever credential the flags or `WEAVIATE_*` environment
//! variables describe, prints what discovery found, and fetches `/v1/meta`.
//! With `--watch` it keeps polling so background token refreshes show up in
//! the logs (`RUST_LOG=weaviate_auth=debug`).

use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use weaviate_auth::{Connection, ConnectionConfig, Credential, DiscoveryOutcome};

/// Probe a Weaviate server's authentication setup
#[derive(Parser, Debug)]
#[command(name = "weaviate-auth-demo", version, about)]
struct Cli {
    /// Server base URL
    #[arg(long, env = "WEAVIATE_URL")]
    url: String,

    /// API key
    #[arg(long, env = "WEAVIATE_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Client secret for the client credentials grant
    #[arg(long, env = "WEAVIATE_CLIENT_SECRET", hide_env_values = true)]
    client_secret: Option<String>,

    /// Username for the password grant
    #[arg(long, env = "WEAVIATE_USERNAME", requires = "password")]
    username: Option<String>,

    /// Password for the password grant
    #[arg(long, env = "WEAVIATE_PASSWORD", hide_env_values = true, requires = "username")]
    password: Option<String>,

    /// Pre-issued access token
    #[arg(long, env = "WEAVIATE_BEARER_TOKEN", hide_env_values = true)]
    bearer_token: Option<String>,

    /// Refresh token for --bearer-token
    #[arg(long, env = "WEAVIATE_REFRESH_TOKEN", hide_env_values = true)]
    refresh_token: Option<String>,

    /// Remaining lifetime of --bearer-token in seconds
    #[arg(long)]
    expires_in: Option<u64>,

    /// Scopes to request (comma separated)
    #[arg(long, env = "WEAVIATE_SCOPES", value_delimiter = ',')]
    scopes: Vec<String>,

    /// Extra header sent with every request, as NAME=VALUE
    #[arg(long = "header", short = 'H')]
    headers: Vec<String>,

    /// Startup timeout in seconds
    #[arg(long, default_value_t = 30)]
    startup_timeout: u64,

    /// Keep polling /v1/meta at this interval (seconds)
    #[arg(long)]
    watch: Option<u64>,

    /// Enable debug logging
    #[arg(long, short = 'v')]
    verbose: bool,
}

impl Cli {
    fn credential(&self) -> Option<Credential> {
        let credential = if let Some(key) = &self.api_key {
            Credential::api_key(key.clone())
        } else if let Some(secret) = &self.client_secret {
            Credential::client_credentials(secret.clone())
        } else if let (Some(username), Some(password)) = (&self.username, &self.password) {
            Credential::password(username.clone(), password.clone())
        } else if let Some(token) = &self.bearer_token {
            Credential::bearer_token(token.clone(), self.refresh_token.clone(), self.expires_in)
        } else {
            return None;
        };

        if self.scopes.is_empty() {
            Some(credential)
        } else {
            Some(credential.with_scopes(self.scopes.iter().map(|s| s.trim().to_string())))
        }
    }

    fn config(&self) -> Result<ConnectionConfig> {
        let mut config = ConnectionConfig::new(&self.url)?
            .with_startup_timeout(Duration::from_secs(self.startup_timeout));

        if let Some(credential) = self.credential() {
            config = config.with_credential(credential);
        }

        for header in &self.headers {
            let Some((name, value)) = header.split_once('=') else {
                bail!("header '{header}' is not in NAME=VALUE form");
            };
            config = config.with_header(name.trim(), value.trim());
        }

        Ok(config)
    }
}

async fn fetch_meta(connection: &Connection) -> Result<serde_json::Value> {
    let response = connection
        .transport()
        .get("/v1/meta")
        .await?
        .send()
        .await
        .context("GET /v1/meta failed")?;

    let status = response.status();
    if !status.is_success() {
        bail!("GET /v1/meta returned {status}");
    }
    response.json().await.context("invalid /v1/meta response")
}

async fn run(cli: Cli) -> Result<()> {
    let config = cli.config()?;
    let connection = Connection::connect(config)
        .await
        .context("failed to connect")?;

    match connection.discovery() {
        DiscoveryOutcome::NoAuthConfigured => println!("Authentication: disabled on server"),
        DiscoveryOutcome::Unparseable => println!("Authentication: discovery response unreadable"),
        DiscoveryOutcome::Discovered {
            client_id,
            token_endpoint,
            scopes,
            ..
        } => {
            println!("Authentication: OIDC");
            println!("  client id:      {client_id}");
            println!("  token endpoint: {token_endpoint}");
            println!("  scopes:         {}", scopes.join(" "));
        }
    }
    println!(
        "Background refresh: {}",
        if connection.is_refreshing() { "running" } else { "off" }
    );

    let meta = fetch_meta(&connection).await?;
    println!("{}", serde_json::to_string_pretty(&meta)?);

    if let Some(interval) = cli.watch {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval.max(1)));
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupted, shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let meta = fetch_meta(&connection).await?;
                    info!(version = %meta["version"], "Server reachable");
                }
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
