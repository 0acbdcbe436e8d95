//! Relational store via DuckDB
//!
//! The load target for every pipeline: table creation, introspection for the
//! schema validator, and keyed upserts.

mod store;

pub use store::{create_table_sql, upsert_sql, Row, Store};
