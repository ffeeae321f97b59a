use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "tempo")]
#[command(about = "Tempo - one active work session, shared across tabs and devices", long_about = None)]
struct Cli {
    /// Directory holding config.toml and session state
    #[arg(long, global = true, value_name = "DIR")]
    config: Option<PathBuf>,

    /// Owner id to sync as (overrides TEMPO_OWNER_ID and config.toml)
    #[arg(long, global = true)]
    owner: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start timing a subject
    Start {
        subject: String,
        #[arg(long)]
        note: Option<String>,
    },
    /// Pause the running session
    Pause,
    /// Resume the paused session
    Resume,
    /// Stop the session and record a completed entry
    Stop,
    /// Discard the session without recording anything
    Reset,
    /// Show the current session
    Status {
        /// Print the raw record as JSON
        #[arg(long)]
        json: bool,
    },
    /// Follow the session until Ctrl-C
    Watch,
    /// List completed entries
    History,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "tempo=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let app = commands::App::open(cli.config, cli.owner).await?;
    let result = match cli.command {
        Commands::Start { subject, note } => commands::session::start(&app, subject, note).await,
        Commands::Pause => commands::session::pause(&app).await,
        Commands::Resume => commands::session::resume(&app).await,
        Commands::Stop => commands::session::stop(&app).await,
        Commands::Reset => commands::session::reset(&app).await,
        Commands::Status { json } => commands::status::show(&app, json),
        Commands::Watch => commands::status::watch(&app).await,
        Commands::History => commands::status::history(&app).await,
    };
    app.close().await;

    result
}
