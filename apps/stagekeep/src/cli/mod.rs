//! # stagekeep CLI Module
//!
//! This module implements the CLI interface for stagekeep.
//!
//! ## Available Commands
//!
//! - `active` - Show the active stage (default)
//! - `time` - Show when a stage started
//! - `stages` - List every recorded stage
//! - `status` - Show the active stage with its times and status
//!
//! All commands are read-only.

mod commands;

use crate::config::{Config, ConfigError};
use clap::{Parser, Subcommand};
use stagekeep_core::{StageError, StoreError};
use std::path::PathBuf;
use thiserror::Error;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// stagekeep - provisioning stage state
///
/// Reads which imaging stage is active and when it started from a
/// registry-shaped stage database.
#[derive(Parser, Debug)]
#[command(name = "stagekeep")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Path to a TOML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Path to the stage database
    #[arg(short = 'D', long, global = true)]
    pub database: Option<PathBuf>,

    /// Root key of the stage tree
    #[arg(short, long, global = true)]
    pub root: Option<String>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Show the active stage ("0" if none has started)
    Active,

    /// Show when a stage started
    Time {
        /// Stage identifier (defaults to the active stage)
        #[arg(short, long)]
        stage: Option<String>,
    },

    /// List every recorded stage with its start and end
    Stages,

    /// Show the active stage, its times and status
    Status,
}

// =============================================================================
// ERRORS
// =============================================================================

/// Errors surfaced by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Stage(#[from] StageError),

    /// The database exists but could not be opened.
    #[error("Cannot open stage database {}: {source}", .path.display())]
    Database {
        path: PathBuf,
        #[source]
        source: StoreError,
    },

    /// A command needs an active stage and none has started.
    #[error("No stage has started under {0}")]
    NoActiveStage(String),

    #[error("JSON output failed: {0}")]
    Json(#[from] serde_json::Error),
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub fn execute(cli: Cli) -> Result<(), CliError> {
    let config = Config::resolve(cli.config.as_deref(), |key| std::env::var(key).ok())?
        .with_overrides(cli.database, cli.root);
    config.validate()?;

    let command = cli.command.unwrap_or(Commands::Active);
    let now = chrono::Local::now().naive_local();

    let output = run(&config, &command, cli.json_mode, now)?;
    println!("{output}");
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================
