//! CLI commands and argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Resumable form data integration
#[derive(Parser, Debug)]
#[command(name = "formsync")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file (YAML)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the integration, resuming from the saved status
    Run,

    /// Print the saved run status
    Status,

    /// Validate the database tables against the pipeline definition
    CheckSchema,

    /// Run a pipeline definition on its own and print the link reports
    Pipeline {
        /// Built-in definition name or YAML path
        #[arg(short, long)]
        definition: String,
    },

    /// List built-in pipeline definitions
    Definitions,
}
