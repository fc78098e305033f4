//! Eventify CLI - command-line client for the Eventify event-analytics API
//!
//! Sign in once; the session is restored from the refresh cookie on later runs
//! and the short-lived access credential is renewed transparently.

mod api;
mod auth;
mod config;
mod models;
mod stream;
#[cfg(test)]
mod testing;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::api::cookies::CookieJar;
use crate::api::retry::{RetryPolicy, RetryTransport};
use crate::api::transport::HttpTransport;
use crate::auth::{FileFlag, Session, SessionSettings};
use crate::config::Config;
use crate::models::{EventSeverity, EventsFilters};

#[derive(Parser)]
#[command(name = "eventify")]
#[command(about = "Command-line client for the Eventify analytics API", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an account
    Signup {
        #[arg(short, long)]
        name: String,
        #[arg(short, long)]
        email: String,
        /// Prompted for when omitted
        #[arg(short, long)]
        password: Option<String>,
    },

    /// Verify an email address with the emailed code
    Verify {
        #[arg(short, long)]
        email: String,
        otp: String,
    },

    /// Send a new verification code
    ResendOtp {
        #[arg(short, long)]
        email: String,
    },

    /// Sign in
    Login {
        #[arg(short, long)]
        email: String,
        /// Prompted for when omitted
        #[arg(short, long)]
        password: Option<String>,
        /// Sign in even if a session can be restored
        #[arg(short, long)]
        force: bool,
    },

    /// Sign out and forget the session
    Logout,

    /// Show current session status
    Status,

    /// Show the signed-in user's profile
    Whoami,

    /// Change name and/or email
    UpdateProfile {
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        email: Option<String>,
    },

    /// Delete the account permanently
    DeleteAccount {
        /// Confirm deletion
        #[arg(long)]
        yes: bool,
    },

    /// List stored events
    Events {
        #[arg(long, default_value = "1")]
        page: u32,
        /// Maximum 200
        #[arg(short, long, default_value = "25")]
        limit: u32,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        category: Option<String>,
        /// INFO, WARN, ERROR or SEVERITY_UNSPECIFIED
        #[arg(long)]
        severity: Option<EventSeverity>,
        /// ISO-8601 lower bound
        #[arg(long)]
        from: Option<String>,
        /// ISO-8601 upper bound
        #[arg(long)]
        to: Option<String>,
        /// May be repeated
        #[arg(long = "tag")]
        tags: Vec<String>,
        #[arg(long)]
        sort_by: Option<String>,
        /// asc or desc
        #[arg(long)]
        sort_order: Option<String>,
    },

    /// Delete events by ID
    DeleteEvents {
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Manage API keys
    Keys {
        #[command(subcommand)]
        command: KeyCommands,
    },

    /// Stream the live dashboard
    Watch,
}

#[derive(Subcommand)]
enum KeyCommands {
    /// List API keys
    List,
    /// Create a new API key
    Create { name: String },
    /// Check an API key
    Validate { key: String },
    /// Delete an API key
    Delete { key: String },
    /// Re-enable an API key
    Activate { key: String },
    /// Disable an API key without deleting it
    Deactivate { key: String },
}

/// Wire the session to its persistent state and HTTP transport.
fn build_session(config: &Config) -> Result<Session> {
    let data_dir = Config::data_dir()?;
    let jar = Arc::new(
        CookieJar::load(data_dir.join("cookies.json")).context("Failed to load cookie jar")?,
    );
    let transport = HttpTransport::new(&config.api_base_url, config.request_timeout(), jar)?;
    let transport = RetryTransport::new(Arc::new(transport), RetryPolicy::from(config));
    let flag = FileFlag::new(data_dir.join("state.toml"));

    Ok(Session::new(
        Arc::new(transport),
        Arc::new(flag),
        SessionSettings::from(config),
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config = Config::load()?;
    tracing::debug!("Using API at {}", config.api_base_url);
    let session = build_session(&config)?;

    match cli.command {
        Commands::Signup {
            name,
            email,
            password,
        } => {
            auth::signup(&session, &name, &email, password).await?;
        }
        Commands::Verify { email, otp } => {
            auth::verify(&session, &email, &otp).await?;
        }
        Commands::ResendOtp { email } => {
            auth::resend_otp(&session, &email).await?;
        }
        Commands::Login {
            email,
            password,
            force,
        } => {
            auth::login(&session, &email, password, force).await?;
        }
        Commands::Logout => {
            tracing::info!("Logging out...");
            auth::logout(&session).await?;
        }
        Commands::Status => {
            auth::status(&session).await?;
        }
        Commands::Whoami => {
            api::whoami(&session).await?;
        }
        Commands::UpdateProfile { name, email } => {
            api::update_profile(&session, name, email).await?;
        }
        Commands::DeleteAccount { yes } => {
            api::delete_account(&session, yes).await?;
        }
        Commands::Events {
            page,
            limit,
            name,
            category,
            severity,
            from,
            to,
            tags,
            sort_by,
            sort_order,
        } => {
            let filters = EventsFilters {
                page: Some(page),
                limit: Some(limit),
                event_name: name,
                category,
                severity,
                from_date: from,
                to_date: to,
                tags,
                sort_by,
                sort_order,
            };
            api::list_events(&session, &filters).await?;
        }
        Commands::DeleteEvents { ids } => {
            api::delete_events(&session, ids).await?;
        }
        Commands::Keys { command } => match command {
            KeyCommands::List => api::list_keys(&session).await?,
            KeyCommands::Create { name } => api::create_key(&session, &name).await?,
            KeyCommands::Validate { key } => api::validate_key(&session, &key).await?,
            KeyCommands::Delete { key } => api::delete_key(&session, &key).await?,
            KeyCommands::Activate { key } => api::set_key_active(&session, &key, true).await?,
            KeyCommands::Deactivate { key } => {
                api::set_key_active(&session, &key, false).await?
            }
        },
        Commands::Watch => {
            stream::watch(&session, &config).await?;
        }
    }

    Ok(())
}
