//! Declarative pipeline engine
//!
//! Interprets a YAML pipeline definition (target tables plus data links) and
//! runs extract, transform and load for each link.
//!
//! # Features
//!
//! - **Sources**: network listings, JSON/JSON Lines/CSV files, SQL queries, inline constant rows
//! - **Field paths**: nested access with `-1` expansion into one row per element
//! - **Column rules**: copy, composite keys, constants, defaults, casts
//! - **Idempotent loads**: rows are upserted on the table's declared key
//!
//! # Example
//!
//! ```yaml
//! name: directory
//! tables: |
//!   CREATE TABLE positions (position_code TEXT PRIMARY KEY, position_name TEXT);
//! links:
//!   - name: positions
//!     sources:
//!       - type: network
//!         name: positions_api
//!         endpoint: /v1/positions/
//!     profiles:
//!       positions:
//!         key: position_code
//!         columns:
//!           position_code: position_code
//!           position_name: { from: name, default: "" }
//! ```

mod engine;
mod loader;
mod source;
mod transform;
mod types;

pub use engine::{LinkFailure, LinkReport, PipelineEngine, SkippedRecord};
pub use loader::{load_definition, load_definition_from_str, validate_definition};
pub use source::{RecordStream, SourceContext};
pub use transform::{cast_value, record_key, transform_record};
pub use types::{
    CastType, ColumnRule, DataLink, DataSource, FieldPath, FileFormat, InsertionProfile,
    PipelineDefinition, Segment,
};

#[cfg(test)]
mod tests;
