//! Command-line interface.

pub mod handlers;

use crate::config::DEFAULT_CONFIG_PATH;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "datatask")]
#[command(about = "Change tracking and freshness checks for database-backed tasks")]
#[command(version)]
pub struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Environment to use (defaults to $DATATASK_ENV, then `development`)
    #[arg(long, global = true)]
    pub env: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Install change tracking
    Setup {
        /// Schema to install into (defaults to the head of the search order)
        #[arg(long)]
        scope: Option<String>,
        /// Recreate the tracking relation even when already installed
        #[arg(long)]
        force: bool,
    },

    /// Remove change tracking from a schema
    Teardown {
        #[arg(long)]
        scope: Option<String>,
    },

    /// Remove database-wide tracking artifacts
    TeardownGlobal,

    /// Forget every tracked operation
    Reset {
        #[arg(long)]
        scope: Option<String>,
    },

    /// Report whether tracking is installed
    Status {
        #[arg(long)]
        scope: Option<String>,
    },

    /// Print whether a relation exists
    Exists {
        /// Relation name, optionally schema-qualified
        name: String,
    },

    /// Print the time of the last tracked operation on a relation
    Mtime {
        name: String,
        #[arg(long)]
        json: bool,
    },

    /// Print the tracked operations for a relation
    History {
        name: String,
        #[arg(long)]
        json: bool,
    },

    /// Print whether a relation must be rebuilt from its prerequisites
    Needed {
        name: String,
        /// Prerequisite relation (repeatable)
        #[arg(long = "prereq")]
        prereqs: Vec<String>,
    },
}
