//! tunekey CLI
//!
//! Command-line interface for the tunekey credential manager.
//!
//! # Usage
//!
//! ```bash
//! # Authorize once (opens the consent URL, captures the redirect)
//! tunekey login
//!
//! # Print a fresh access token
//! tunekey token
//!
//! # Inspect the credential state
//! tunekey status
//!
//! # Discard the stored credentials
//! tunekey logout
//! ```
//!
//! Configuration comes from the environment: `TUNEKEY_CLIENT_ID`,
//! `TUNEKEY_CLIENT_SECRET`, `TUNEKEY_REDIRECT_URI`, and optionally
//! `TUNEKEY_SCOPES`.

mod callback;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::FmtSubscriber;

use tunekey_core::{AuthConfig, FileCache, TokenManager};

#[derive(Parser)]
#[command(name = "tunekey")]
#[command(about = "OAuth2 credential manager for unattended API access")]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the interactive authorization flow
    Login,

    /// Print a fresh access token
    Token {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show the current credential state
    Status,

    /// Discard the stored credentials
    Logout,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        FmtSubscriber::builder()
            .with_max_level(tracing::Level::DEBUG)
            .init();
    }

    let config = AuthConfig::from_env().context(
        "set TUNEKEY_CLIENT_ID, TUNEKEY_CLIENT_SECRET, and TUNEKEY_REDIRECT_URI",
    )?;
    let manager = TokenManager::restore(config, FileCache::at_default_location()).await?;

    match cli.command {
        Commands::Login => login(&manager).await,
        Commands::Token { format } => token(&manager, &format).await,
        Commands::Status => status(&manager).await,
        Commands::Logout => logout(&manager).await,
    }
}

async fn login(manager: &TokenManager<FileCache>) -> Result<()> {
    let (pending, sender) = manager.begin_authorization()?;

    let redirect_uri = manager.config().redirect_uri.clone();
    let listener = tokio::spawn(async move {
        callback::receive_callback(&redirect_uri, sender).await
    });

    println!("Open this URL in your browser to authorize:");
    println!();
    println!("  {}", pending.consent_url());
    println!();

    let credentials = manager.authorize(pending).await?;
    listener.abort();

    println!("Authorized. Scopes: {}", credentials.scopes);
    println!("Access token valid until {}", credentials.expires_at);
    Ok(())
}

async fn token(manager: &TokenManager<FileCache>, format: &str) -> Result<()> {
    let token = manager.valid_token().await?;

    match format {
        "json" => {
            let status = manager.status().await;
            println!(
                "{}",
                serde_json::json!({
                    "access_token": token.expose(),
                    "expires_at": status.expires_at,
                    "scopes": status.scopes,
                })
            );
        }
        _ => println!("{}", token.expose()),
    }
    Ok(())
}

async fn status(manager: &TokenManager<FileCache>) -> Result<()> {
    let status = manager.status().await;

    if !status.authenticated {
        println!("Not authenticated. Run `tunekey login` first.");
        return Ok(());
    }

    println!("Authenticated: yes");
    println!(
        "Token active:  {}",
        if status.active { "yes" } else { "no (will refresh on next use)" }
    );
    if let Some(expires_at) = status.expires_at {
        println!("Expires at:    {}", expires_at);
    }
    println!("Scopes:        {}", status.scopes.join(" "));
    Ok(())
}

async fn logout(manager: &TokenManager<FileCache>) -> Result<()> {
    manager.invalidate().await?;
    println!("Credentials discarded.");
    Ok(())
}
