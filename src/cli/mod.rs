use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing::info;

use tradereview::review::ReviewSource;
use tradereview::Config;

pub mod commands;

#[derive(Parser)]
#[command(
    name = "tradereview",
    about = "Review and accuracy scoring for AI trading calls",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Kind of record a review is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SourceKind {
    Conversation,
    Analysis,
}

/// Scoring formula selectable from the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PresetArg {
    LevelBands,
    DirectionOnly,
}

#[derive(clap::Args, Debug, Clone)]
pub struct SourceArgs {
    /// Conversation or analysis id
    pub id: String,

    /// What the id refers to
    #[arg(short, long, value_enum, default_value = "conversation")]
    pub kind: SourceKind,
}

impl SourceArgs {
    pub fn source(&self) -> ReviewSource {
        match self.kind {
            SourceKind::Conversation => ReviewSource::Conversation(self.id.clone()),
            SourceKind::Analysis => ReviewSource::Analysis(self.id.clone()),
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run database migrations
    Migrate,

    /// Start a review for a chat conversation
    Start {
        /// Conversation id
        conversation_id: String,
    },

    /// Open (or create) the review for a stored chart analysis
    OpenAnalysis {
        /// Analysis id
        analysis_id: String,
    },

    /// Post a message to a review, optionally with a chart image
    Message {
        #[command(flatten)]
        source: SourceArgs,

        /// Message text
        #[arg(short, long, default_value = "")]
        text: String,

        /// Chart screenshot to attach
        #[arg(short, long)]
        image: Option<PathBuf>,
    },

    /// Submit actual high/low/close for a review
    Outcome {
        #[command(flatten)]
        source: SourceArgs,

        #[arg(long)]
        high: f64,

        #[arg(long)]
        low: f64,

        #[arg(long)]
        close: f64,
    },

    /// Complete a review and print its final scores
    Complete {
        #[command(flatten)]
        source: SourceArgs,
    },

    /// Show a review session
    Show {
        #[command(flatten)]
        source: SourceArgs,
    },

    /// List recent review sessions
    List {
        /// Maximum number of sessions to print
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Extract predictions from a text or JSON message file (offline)
    Extract {
        /// Plain text (one assistant message) or a JSON array of messages
        file: PathBuf,

        /// Label vocabulary (zh or en); defaults to REVIEW_LABELS
        #[arg(short, long)]
        labels: Option<String>,

        /// Parse fenced JSON analysis blocks instead of labeled text
        #[arg(long)]
        structured: bool,
    },

    /// Score one prediction against an outcome (offline)
    Score {
        #[arg(long)]
        support: f64,

        #[arg(long)]
        resistance: f64,

        /// long, short, hold (or 做多, 做空, 观望)
        #[arg(long)]
        direction: String,

        #[arg(long, default_value_t = 0.0)]
        stop_loss: f64,

        #[arg(long, default_value_t = 0.0)]
        target: f64,

        #[arg(long)]
        high: f64,

        #[arg(long)]
        low: f64,

        #[arg(long)]
        close: f64,

        #[arg(short, long, value_enum, default_value = "level-bands")]
        preset: PresetArg,
    },
}

/// Execute CLI command. Offline commands never touch the database.
pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Extract { file, labels, structured } => {
            info!("Extracting predictions from {}", file.display());
            commands::extract(file, labels, structured).await?;
        }
        Commands::Score {
            support,
            resistance,
            direction,
            stop_loss,
            target,
            high,
            low,
            close,
            preset,
        } => {
            commands::score(
                commands::ScoreInput {
                    support,
                    resistance,
                    direction,
                    stop_loss,
                    target,
                    high,
                    low,
                    close,
                },
                preset,
            )?;
        }
        command => {
            let config = Config::load()?;
            let db = tradereview::db::Database::new(&config.database).await?;
            db.health_check().await?;
            info!("Database pool ready: {}", db.pool_stats());

            match command {
                Commands::Migrate => {
                    db.run_migrations().await?;
                    println!("Database migrations completed successfully");
                }
                Commands::Start { conversation_id } => {
                    info!("Starting review for conversation {}", conversation_id);
                    let engine = commands::build_engine(&config, db.pool.clone())?;
                    commands::start(&engine, &conversation_id).await?;
                }
                Commands::OpenAnalysis { analysis_id } => {
                    info!("Opening review for analysis {}", analysis_id);
                    let engine = commands::build_engine(&config, db.pool.clone())?;
                    commands::open_analysis(&engine, &analysis_id).await?;
                }
                Commands::Message { source, text, image } => {
                    let engine = commands::build_engine(&config, db.pool.clone())?;
                    commands::message(&engine, &source.source(), &text, image).await?;
                }
                Commands::Outcome { source, high, low, close } => {
                    let engine = commands::build_engine(&config, db.pool.clone())?;
                    commands::outcome(&engine, &source.source(), high, low, close).await?;
                }
                Commands::Complete { source } => {
                    let engine = commands::build_engine(&config, db.pool.clone())?;
                    commands::complete(&engine, &source.source()).await?;
                }
                Commands::Show { source } => {
                    let engine = commands::build_engine(&config, db.pool.clone())?;
                    commands::show(&engine, &source.source()).await?;
                }
                Commands::List { limit } => {
                    let engine = commands::build_engine(&config, db.pool.clone())?;
                    commands::list(&engine, limit).await?;
                }
                Commands::Extract { .. } | Commands::Score { .. } => {}
            }

            db.close().await;
        }
    }
    Ok(())
}
