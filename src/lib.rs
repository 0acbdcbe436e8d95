//! # formsync
//!
//! Resumable extraction of workflow form data from a rate-limited REST API
//! into a DuckDB store.
//!
//! ## Features
//!
//! - **Throttled fetching**: one permit per request, retries on transient failures
//! - **Schema toolkit**: CREATE TABLE parsing and live-table validation
//! - **Declarative pipelines**: YAML definitions mapping API records onto tables
//! - **Resumable runs**: persisted progress, failure records and a crash-safe temp index
//! - **Cooperative cancellation**: the item in flight always finishes
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use formsync::{config::IntegratorConfig, integrator::Integrator};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> formsync::Result<()> {
//!     let config = Arc::new(IntegratorConfig::load("formsync.yaml")?);
//!     let integrator = Integrator::from_config(config)?;
//!
//!     let outcome = integrator.run().await;
//!     std::process::exit(outcome.exit_code());
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                           Integrator                             │
//! │  INITIALIZING → BASIC_DATA → FORM_OUTLINE → FORM_DETAIL → TERM.  │
//! └──────────────────────────────────────────────────────────────────┘
//!                                 │
//! ┌─────────────┬─────────────────┴──┬──────────────┬────────────────┐
//! │    HTTP     │      Pipeline      │    Schema    │     State      │
//! ├─────────────┼────────────────────┼──────────────┼────────────────┤
//! │ RemoteApi   │ Definition loader  │ DDL parser   │ Progress       │
//! │ Throttle    │ Sources            │ Validator    │ FailureRecord  │
//! │ Retry       │ Transform          │ DuckDB Store │ AppStatus      │
//! │ Pagination  │ Engine             │              │ TempIndex      │
//! └─────────────┴────────────────────┴──────────────┴────────────────┘
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]

// ============================================================================
// Module declarations
// ============================================================================

/// Error types
pub mod error;

/// Common types and type aliases
pub mod types;

/// Remote API, throttling and pagination
pub mod http;

/// Table structures, DDL parsing and validation
pub mod schema;

/// DuckDB store
pub mod database;

/// Declarative extract/transform/load
pub mod pipeline;

/// Built-in pipeline definitions
pub mod definitions;

/// Persisted run state
pub mod state;

/// Integrator configuration
pub mod config;

/// The resumable run
pub mod integrator;

/// Command-line interface
pub mod cli;

// ============================================================================
// Re-exports
// ============================================================================

pub use error::{Error, Result};
pub use types::*;

pub use config::IntegratorConfig;
pub use integrator::{CancelHandle, Integrator, RunOutcome};
pub use pipeline::{load_definition, load_definition_from_str, PipelineDefinition};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
