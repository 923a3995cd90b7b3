use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "twit-muncher",
    version,
    about = "Polls list feeds, classifies posts with an LLM and bundles them into briefings"
)]
pub struct Cli {
    /// Path to config.toml (defaults to the platform config directory)
    #[arg(long, global = true, env = "TWIT_MUNCHER_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq, Subcommand)]
pub enum Command {
    /// Run the poll and briefing jobs until interrupted
    Serve,
    /// Poll every list and classify new posts now
    Poll,
    /// Bundle every classified, unassigned post into a new briefing
    Brief,
    /// List briefings, newest first
    Briefings,
    /// Show the posts of one briefing as JSON
    Posts {
        briefing_id: i64,
        /// Only posts in this category
        #[arg(long)]
        category: Option<String>,
    },
    /// Override the category of one post
    Reclassify { post_id: String, category: String },
    /// Regenerate the classification prompt from the category table
    ResetPrompt,
    /// Inspect or change stored settings
    #[command(subcommand)]
    Settings(SettingsCommand),
}

#[derive(Debug, Clone, PartialEq, Subcommand)]
pub enum SettingsCommand {
    List,
    Get {
        key: String,
    },
    /// Store a JSON value, e.g. `settings set poll_interval_minutes 5`
    Set {
        key: String,
        value: String,
    },
}
