//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;

use crate::roles::PipelineMode;

/// Scoreloop - multi-role content refinement loop
#[derive(Parser)]
#[command(
    name = "sl",
    about = "Iterate a multi-role content pipeline until a target score is reached",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the convergence loop for a topic
    Run {
        /// Topic to write about
        #[arg(value_name = "TOPIC")]
        topic: String,

        /// Target score (0-10)
        #[arg(short, long)]
        target: Option<u8>,

        /// Keyword to work into the content (repeatable)
        #[arg(short, long = "keyword")]
        keywords: Vec<String>,

        /// Maximum rounds
        #[arg(short = 'r', long)]
        max_rounds: Option<u32>,

        /// Model override
        #[arg(long)]
        model: Option<String>,

        /// Pipeline mode
        #[arg(long, value_enum)]
        mode: Option<PipelineMode>,

        /// Ground research in web search results
        #[arg(long)]
        search: bool,

        /// Only display these roles (repeatable)
        #[arg(long = "role")]
        roles: Vec<String>,

        /// Do not save the result
        #[arg(long)]
        no_save: bool,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// List saved posts, newest first
    Posts {
        /// Number of posts to show
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Show one saved post
    Show {
        /// Post ID
        id: i64,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Check configuration and credentials
    Check {
        /// Also make a one-line LLM request
        #[arg(long)]
        ping: bool,
    },
}

/// Get the path to the log file
pub fn get_log_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("scoreloop")
        .join("logs")
        .join("scoreloop.log")
}

/// Output format for loop progress and posts
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        debug!(%s, "OutputFormat::from_str: called");
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => {
                debug!(%s, "OutputFormat::from_str: unknown format");
                Err(format!("Unknown format: {}. Use: text or json", s))
            }
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}
