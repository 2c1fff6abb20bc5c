use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use recall_core::AnnounceMode;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "recall", version, about = "Remember the people you meet")]
struct Cli {
    /// Config file (default: $XDG_CONFIG_HOME/recall/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Answer yes to confirmation prompts
    #[arg(short, long, global = true)]
    yes: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a new person from one or more photos
    Enroll {
        /// Photos showing exactly one face each
        #[arg(required = true)]
        photos: Vec<PathBuf>,
        #[arg(short, long)]
        name: String,
        /// Relationship to you (e.g., "daughter", "neighbour")
        #[arg(short, long)]
        relationship: Option<String>,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Edit a person's details, optionally replacing their photos
    Edit {
        id: String,
        /// New photos; the stored ones are kept when omitted
        #[arg(long = "photo")]
        photos: Vec<PathBuf>,
        #[arg(short, long)]
        name: Option<String>,
        /// New relationship; pass "" to clear
        #[arg(short, long)]
        relationship: Option<String>,
        /// New notes; pass "" to clear
        #[arg(long)]
        notes: Option<String>,
    },
    /// Recognize the person in front of the camera (or in a photo)
    Recognize {
        /// Use a still image instead of the camera
        #[arg(long)]
        image: Option<PathBuf>,
        /// Maximum match distance (default from config, 0.6)
        #[arg(long)]
        threshold: Option<f32>,
        /// What to announce: none, name, or full
        #[arg(long)]
        announce: Option<AnnounceMode>,
        /// Keep recognizing until interrupted
        #[arg(long, conflicts_with = "image")]
        watch: bool,
        /// Delay between attempts in watch mode
        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,
    },
    /// List enrolled people
    List,
    /// Show one person in detail
    Show { id: String },
    /// Remove an enrolled person
    Remove { id: String },
    /// Remove every enrolled person
    Clear,
    /// Export all people to a JSON file
    Export { path: PathBuf },
    /// Import people from a JSON export
    Import {
        path: PathBuf,
        /// Delete existing people first
        #[arg(long)]
        replace: bool,
    },
    /// List video capture devices
    Devices,
    /// Show configuration, model, store and camera status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_env("RECALL_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    tracing::debug!(?config, "configuration loaded");

    match cli.command {
        Commands::Enroll {
            photos,
            name,
            relationship,
            notes,
        } => commands::enroll(&config, photos, name, relationship, notes).await,
        Commands::Edit {
            id,
            photos,
            name,
            relationship,
            notes,
        } => commands::edit(&config, &id, photos, name, relationship, notes).await,
        Commands::Recognize {
            image,
            threshold,
            announce,
            watch,
            interval_ms,
        } => {
            let options = commands::RecognizeOptions {
                image,
                threshold,
                announce,
                watch,
                interval_ms,
            };
            commands::recognize(&config, options).await
        }
        Commands::List => commands::list(&config).await,
        Commands::Show { id } => commands::show(&config, &id).await,
        Commands::Remove { id } => commands::remove(&config, &id, cli.yes).await,
        Commands::Clear => commands::clear(&config, cli.yes).await,
        Commands::Export { path } => commands::export(&config, &path).await,
        Commands::Import { path, replace } => {
            commands::import(&config, &path, replace, cli.yes).await
        }
        Commands::Devices => commands::devices(),
        Commands::Status => commands::status(&config).await,
    }
}
