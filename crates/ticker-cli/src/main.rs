// ABOUTME: CLI entry point for the ticker research dashboard backend.
// ABOUTME: Sends chat messages through the send orchestrator and inspects jobs.

mod config;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use config::Config;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use ticker_client::{
    CredentialProvider, HttpJobStore, HttpTransport, JobStore, SendOrchestrator, SseStreamChannel,
    StaticToken,
};

#[derive(Parser)]
#[command(name = "ticker")]
#[command(about = "Chat with the ticker research dashboard from the command line")]
#[command(version)]
struct Cli {
    /// Path to configuration file (default: ~/.config/ticker/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a chat message and stream the response
    Send {
        /// Conversation to post into
        chat_id: String,

        /// Message content
        message: String,

        /// Model hint forwarded to the backend
        #[arg(short, long)]
        model: Option<String>,
    },

    /// Show a job record
    Job {
        /// Job identifier
        job_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    ticker_log::init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.clone()).context("failed to load configuration")?;
    let credentials: Arc<dyn CredentialProvider> =
        Arc::new(StaticToken::new(config.server.token.clone()));

    match cli.command {
        Commands::Send {
            chat_id,
            message,
            model,
        } => send(&config, credentials, &chat_id, &message, model.as_deref()).await,
        Commands::Job { job_id } => show_job(&config, credentials, &job_id).await,
    }
}

async fn send(
    config: &Config,
    credentials: Arc<dyn CredentialProvider>,
    chat_id: &str,
    message: &str,
    model: Option<&str>,
) -> Result<()> {
    let base = &config.server.base_url;
    let orchestrator = SendOrchestrator::new(
        HttpTransport::new(base.clone(), credentials.clone())?,
        HttpJobStore::new(base.clone(), credentials.clone())?,
        SseStreamChannel::new(base.clone(), credentials)?,
    );

    let mut updates = orchestrator.subscribe();
    let tracked = orchestrator.send_message(chat_id, message, model).await?;
    if let Some(job_id) = &tracked {
        eprintln!("tracking job {job_id}");
    }

    let mut printed = 0;
    let mut announced_tools: Vec<String> = Vec::new();
    loop {
        let snapshot = updates.borrow_and_update().clone();

        if snapshot.streaming_text.len() > printed {
            print!("{}", &snapshot.streaming_text[printed..]);
            std::io::stdout().flush().ok();
            printed = snapshot.streaming_text.len();
        }
        if snapshot.active_tools != announced_tools {
            if !snapshot.active_tools.is_empty() {
                eprintln!("[running: {}]", snapshot.active_tools.join(", "));
            }
            announced_tools = snapshot.active_tools.clone();
        }

        if snapshot.is_terminal() {
            if printed > 0 {
                println!();
            }
            match snapshot.error {
                Some(error) => bail!(error),
                None => {
                    let message_id = snapshot
                        .result
                        .as_ref()
                        .and_then(|r| r.message_id.as_deref())
                        .unwrap_or("-");
                    eprintln!("completed (message {message_id})");
                    return Ok(());
                }
            }
        }

        if updates.changed().await.is_err() {
            return Ok(());
        }
    }
}

async fn show_job(
    config: &Config,
    credentials: Arc<dyn CredentialProvider>,
    job_id: &str,
) -> Result<()> {
    let store = HttpJobStore::new(config.server.base_url.clone(), credentials)?;

    match store.fetch(job_id).await? {
        Some(job) => {
            println!("{}", serde_json::to_string_pretty(&job)?);
            Ok(())
        }
        None => bail!("job {job_id} not found"),
    }
}
