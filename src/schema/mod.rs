//! Schema toolkit
//!
//! Parses table definitions into a structural model and validates a live
//! database against that model before any data is written.
//!
//! # Features
//!
//! - **Parser**: CREATE TABLE statements into `TableStructure`
//! - **Type aliases**: declared types normalized to a `LogicalType`
//! - **Validator**: structural comparison with an enumerated discrepancy list

mod parser;
mod types;
mod validator;

pub use parser::{
    parse_create_table, parse_sql, parse_sql_with, parse_table, split_statements, SqlDialect,
};
pub use types::{
    ColumnStructure, Discrepancy, KeyKind, LogicalType, TableStructure, ValidationResult,
};
pub use validator::{check, compare};

#[cfg(test)]
mod tests;
