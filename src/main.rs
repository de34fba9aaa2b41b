#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::unnecessary_literal_bound,
    clippy::module_name_repetitions,
    clippy::struct_field_names
)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use palaver::channels::WhatsAppChannel;
use palaver::config::Config;
use palaver::gateway::{self, AppState};
use palaver::providers;
use palaver::session::SessionRegistry;
use palaver::store;

/// `Palaver` - WhatsApp chat relay backed by OpenAI-compatible completions.
#[derive(Parser, Debug)]
#[command(name = "palaver")]
#[command(version = "0.1.0")]
#[command(about = "WhatsApp chat relay backed by OpenAI-compatible completions.", long_about = None)]
struct Cli {
    /// Path to config.toml (default: ~/.palaver/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the relay gateway (webhook endpoints + eviction sweeper)
    Serve {
        /// Port to listen on (use 0 for a random available port)
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to
        #[arg(long)]
        host: Option<String>,
    },

    /// Send a one-off WhatsApp message
    Send {
        /// Recipient in E.164 format (+15551234567)
        #[arg(long)]
        to: String,

        /// Message text
        #[arg(short, long)]
        message: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Pin the TLS crypto provider before any HTTP client is built; with both
    // aws-lc-rs and ring in the dependency graph rustls cannot pick one itself.
    if let Err(e) = rustls::crypto::ring::default_provider().install_default() {
        eprintln!("Warning: failed to install default crypto provider: {e:?}");
    }

    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve { port, host } => serve(config, host, port).await,
        Commands::Send { to, message } => send(&config, &to, &message).await,
    }
}

async fn serve(config: Config, host: Option<String>, port: Option<u16>) -> Result<()> {
    let backend = providers::create_backend(&config.completion)?;
    let transcripts = store::create_transcript_store(&config.storage).await?;

    let registry = Arc::new(SessionRegistry::new(
        &config.session,
        config.completion.system_prompt.clone(),
        Duration::from_secs(config.completion.request_timeout_secs),
        backend,
        transcripts,
    ));

    let whatsapp = config
        .whatsapp
        .enabled
        .then(|| Arc::new(WhatsAppChannel::new(&config.whatsapp)));

    let sweeper = gateway::spawn_eviction_sweeper(
        Arc::clone(&registry),
        Duration::from_secs(config.gateway.sweep_interval_secs),
    );

    let host = host.unwrap_or_else(|| config.gateway.host.clone());
    let port = port.unwrap_or(config.gateway.port);
    let state = AppState::new(&config, registry, whatsapp);

    let result = gateway::run_gateway(&host, port, state).await;
    sweeper.abort();
    result
}

async fn send(config: &Config, to: &str, message: &str) -> Result<()> {
    anyhow::ensure!(
        config.whatsapp.enabled,
        "whatsapp is not configured; set [whatsapp] enabled = true in config.toml"
    );

    let channel = WhatsAppChannel::new(&config.whatsapp);
    channel.send(to, message).await?;
    println!("Sent to {to}");
    Ok(())
}
