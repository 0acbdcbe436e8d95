//! CLI module
//!
//! Command-line interface for running integrations.
//!
//! # Commands
//!
//! - `run` - Run the integration, resuming where the last run stopped
//! - `status` - Print the saved status
//! - `check-schema` - Validate existing tables without writing
//! - `pipeline` - Run one pipeline definition standalone
//! - `definitions` - List built-in definitions

mod commands;
mod runner;

pub use commands::{Cli, Commands};
pub use runner::Runner;

#[cfg(test)]
mod tests;
