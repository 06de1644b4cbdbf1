//! Liftpass CLI
//!
//! Command-line client for a liftpass server. The session is kept between
//! runs in the configured storage backend.
//!
//! # Usage
//!
//! ```bash
//! # Sign in (password may also come from LIFTPASS_PASSWORD)
//! liftpass sign-in --email ana@example.com --password secret
//!
//! # Show who is signed in
//! liftpass status
//!
//! # Call any endpoint with the stored session
//! liftpass get /exercises/groups
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use liftpass_core::{
    ApiClient, Avatar, KeyValueStore, ProfileUpdate, SessionError, SessionManager, create_store,
};
use tracing::{debug, warn};
use tracing_subscriber::{EnvFilter, fmt};

use liftpass_cli::config;

#[derive(Parser)]
#[command(name = "liftpass")]
#[command(about = "Sign in to a liftpass server and call it with the stored session")]
#[command(version)]
struct Cli {
    /// Path to config.toml
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the current session
    Status,

    /// Sign in with email and password
    SignIn {
        #[arg(long)]
        email: String,

        #[arg(long, env = "LIFTPASS_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Create an account and sign in with it
    SignUp {
        #[arg(long)]
        name: String,

        #[arg(long)]
        email: String,

        #[arg(long, env = "LIFTPASS_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Sign out and forget the stored session
    SignOut,

    /// Change the display name and, optionally, the password
    UpdateProfile {
        #[arg(long)]
        name: String,

        /// New password
        #[arg(long, requires = "old_password")]
        password: Option<String>,

        /// Current password, required to set a new one
        #[arg(long, requires = "password")]
        old_password: Option<String>,
    },

    /// Upload a new avatar image
    Avatar {
        /// Image file (at most 5 MiB)
        file: PathBuf,
    },

    /// Authorized GET of any endpoint, printing the JSON reply
    Get {
        /// Endpoint path (e.g., /history)
        path: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = config::load_config(cli.config.as_deref())?;
    init_logging(&config.log_level, cli.verbose);
    debug!("Loaded configuration from {:?}", config.config_path);

    let store = create_store(config.storage, &config.data_dir)
        .context("Failed to open session storage")?;
    let api = ApiClient::new(config.api_config()?).context("Failed to build API client")?;

    let session = SessionManager::start(store, api);
    session.wait_until_restored().await;
    if let Some(message) = session.last_restore_error() {
        warn!("Stored session could not be read: {}", message);
    }

    let result = run(&session, cli.command).await;
    session.shutdown();
    result
}

fn init_logging(default_level: &str, verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
    };

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run<S: KeyValueStore + 'static>(session: &SessionManager<S>, command: Commands) -> Result<()> {
    match command {
        Commands::Status => status(session),
        Commands::SignIn { email, password } => {
            session.sign_in(&email, &password).await.map_err(friendly)?;
            print_signed_in(session);
            Ok(())
        }
        Commands::SignUp { name, email, password } => {
            session.sign_up(&name, &email, &password).await.map_err(friendly)?;
            print_signed_in(session);
            Ok(())
        }
        Commands::SignOut => {
            session.sign_out().await;
            println!("Signed out");
            Ok(())
        }
        Commands::UpdateProfile { name, password, old_password } => {
            let mut update = ProfileUpdate::rename(name);
            if let (Some(old), Some(new)) = (old_password, password) {
                update = update.with_password(old, new);
            }
            let profile = session.save_profile(update).await.map_err(friendly)?;
            println!("Profile updated: {}", profile.name);
            Ok(())
        }
        Commands::Avatar { file } => upload_avatar(session, &file).await,
        Commands::Get { path } => {
            let body: serde_json::Value = session
                .get_json(&path)
                .await
                .map_err(|e| friendly(e.into()))?;
            println!("{}", serde_json::to_string_pretty(&body)?);
            Ok(())
        }
    }
}

fn status<S: KeyValueStore + 'static>(session: &SessionManager<S>) -> Result<()> {
    let snapshot = session.snapshot();
    match snapshot.user {
        Some(user) => {
            println!("Signed in as {} <{}>", user.name, user.email);
            println!("  User id: {}", user.id);
            if let Some(avatar) = user.avatar_path {
                println!("  Avatar: {}", avatar);
            }
            if let Some(at) = snapshot.signed_in_at {
                println!("  Signed in at: {}", at.to_rfc3339());
            }
        }
        None => println!("Not signed in"),
    }
    Ok(())
}

async fn upload_avatar<S: KeyValueStore + 'static>(session: &SessionManager<S>, file: &Path) -> Result<()> {
    let bytes = tokio::fs::read(file)
        .await
        .with_context(|| format!("Failed to read {:?}", file))?;
    let file_name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "avatar".to_string());

    let profile = session
        .update_avatar(Avatar::new(file_name, bytes))
        .await
        .map_err(friendly)?;
    println!(
        "Avatar updated: {}",
        profile.avatar_path.as_deref().unwrap_or("(none)")
    );
    Ok(())
}

fn print_signed_in<S: KeyValueStore + 'static>(session: &SessionManager<S>) {
    if let Some(user) = session.user() {
        println!("Signed in as {} <{}>", user.name, user.email);
    }
}

/// Lead with the message meant for people; the cause follows.
fn friendly(error: SessionError) -> anyhow::Error {
    let message = error.user_message();
    anyhow::Error::new(error).context(message)
}
