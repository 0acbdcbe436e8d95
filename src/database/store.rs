//! DuckDB-backed relational store
//!
//! Owns the single connection a run writes through. Tables are created from
//! [`TableStructure`]s, rows are upserted on their primary or unique key, and
//! failures are split into constraint errors (bad row) and database errors
//! (everything else, including connectivity).

use crate::error::{Error, Result};
use crate::schema::{self, ColumnStructure, LogicalType, TableStructure, ValidationResult};
use duckdb::types::Value as SqlValue;
use duckdb::{params, params_from_iter, AccessMode, Config, Connection};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, warn};

/// One transformed row: column name to value
pub type Row = BTreeMap<String, Value>;

/// Relational store used as the load target
pub struct Store {
    conn: Connection,
    location: String,
}

impl Store {
    /// Open (or create) a database file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(|e| {
            Error::database(format!(
                "Failed to open DuckDB database at '{}': {e}",
                path.display()
            ))
        })?;
        info!("Opened database {}", path.display());
        Ok(Self {
            conn,
            location: path.display().to_string(),
        })
    }

    /// Open an existing database file without write access
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let fail = |e: duckdb::Error| {
            Error::database(format!(
                "Failed to open DuckDB database at '{}' read-only: {e}",
                path.display()
            ))
        };
        let config = Config::default()
            .access_mode(AccessMode::ReadOnly)
            .map_err(fail)?;
        let conn = Connection::open_with_flags(path, config).map_err(fail)?;
        debug!("Opened database {} read-only", path.display());
        Ok(Self {
            conn,
            location: path.display().to_string(),
        })
    }

    /// Open a transient in-memory database
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::database(format!("Failed to create DuckDB connection: {e}")))?;
        Ok(Self {
            conn,
            location: ":memory:".to_string(),
        })
    }

    /// Underlying connection
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Where the database lives
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Run one or more statements
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.conn
            .execute_batch(sql)
            .map_err(|e| Error::database(format!("Failed to execute SQL: {e}")))
    }

    // ========================================================================
    // Tables
    // ========================================================================

    /// Names of the tables in the main schema
    pub fn table_names(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT table_name FROM information_schema.tables \
                 WHERE table_schema = 'main' ORDER BY table_name",
            )
            .map_err(|e| Error::database(format!("Failed to prepare query: {e}")))?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| Error::database(format!("Failed to query tables: {e}")))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::database(format!("Failed to read table name: {e}")))?;
        Ok(names)
    }

    /// Whether a table exists (case-insensitive)
    pub fn table_exists(&self, name: &str) -> Result<bool> {
        Ok(self
            .table_names()?
            .iter()
            .any(|t| t.eq_ignore_ascii_case(name)))
    }

    /// Create a table (and sequences for its autoincrement columns)
    pub fn create_table(&self, table: &TableStructure) -> Result<()> {
        let ddl = create_table_sql(table);
        debug!("Creating table '{}':\n{}", table.name, ddl);
        self.execute_batch(&ddl)
    }

    /// Read the live structure of a table, or `None` if it does not exist
    pub fn describe_table(&self, name: &str) -> Result<Option<TableStructure>> {
        if !self.table_exists(name)? {
            return Ok(None);
        }

        let sql = format!(
            "SELECT name, type, \"notnull\", dflt_value, pk FROM pragma_table_info('{}')",
            escape_literal(name)
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .map_err(|e| Error::database(format!("Failed to describe '{name}': {e}")))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, bool>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, bool>(4)?,
                ))
            })
            .map_err(|e| Error::database(format!("Failed to describe '{name}': {e}")))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::database(format!("Failed to read column info: {e}")))?;

        let mut table = TableStructure::new(name);
        for (column, data_type, not_null, default, pk) in rows {
            if pk {
                table.primary_key.push(column.clone());
            }
            table.columns.push(ColumnStructure {
                autoincrement: default.as_deref().is_some_and(|d| d.contains("nextval(")),
                name: column,
                data_type,
                not_null,
                default,
            });
        }

        let mut stmt = self
            .conn
            .prepare(
                "SELECT array_to_string(constraint_column_names, ',') FROM duckdb_constraints() \
                 WHERE table_name = ? AND constraint_type = 'UNIQUE'",
            )
            .map_err(|e| Error::database(format!("Failed to read constraints: {e}")))?;
        let keys = stmt
            .query_map(params![name], |row| row.get::<_, String>(0))
            .map_err(|e| Error::database(format!("Failed to read constraints: {e}")))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::database(format!("Failed to read constraints: {e}")))?;
        for key in keys {
            let cols: Vec<String> = key.split(',').map(|c| c.trim().to_string()).collect();
            if !table.unique_keys.contains(&cols) {
                table.unique_keys.push(cols);
            }
        }

        Ok(Some(table))
    }

    /// Create missing tables and validate the ones that already exist
    ///
    /// Returns the validation result for every table that pre-existed.
    pub fn prepare_tables(
        &self,
        tables: &[TableStructure],
    ) -> Result<Vec<(String, ValidationResult)>> {
        let mut results = Vec::new();
        for table in tables {
            if self.table_exists(&table.name)? {
                results.push((table.name.clone(), schema::check(self, table)?));
            } else {
                self.create_table(table)?;
                info!("Created table '{}'", table.name);
            }
        }
        Ok(results)
    }

    // ========================================================================
    // Rows
    // ========================================================================

    /// Insert a row, replacing the non-key columns of an existing row with the same key
    pub fn upsert(&self, table: &TableStructure, row: &Row) -> Result<()> {
        let columns: Vec<&str> = row.keys().map(String::as_str).collect();
        if columns.is_empty() {
            return Ok(());
        }
        let sql = upsert_sql(table, &columns);
        let values = columns.iter().map(|c| to_sql_value(&row[*c]));

        let mut stmt = self
            .conn
            .prepare_cached(&sql)
            .map_err(|e| classify(&table.name, e))?;
        stmt.execute(params_from_iter(values))
            .map_err(|e| classify(&table.name, e))?;
        Ok(())
    }

    /// Integer values of one column, ascending, nulls skipped
    pub fn select_ids(&self, table: &str, column: &str) -> Result<Vec<i64>> {
        let sql = format!(
            "SELECT DISTINCT CAST({col} AS BIGINT) FROM {tbl} WHERE {col} IS NOT NULL ORDER BY 1",
            col = quote_ident(column),
            tbl = quote_ident(table)
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .map_err(|e| Error::database(format!("Failed to query '{table}': {e}")))?;
        let ids = stmt
            .query_map([], |row| row.get::<_, i64>(0))
            .map_err(|e| Error::database(format!("Failed to query '{table}': {e}")))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::database(format!("Failed to read '{table}': {e}")))?;
        Ok(ids)
    }

    /// Run a query, returning each row as a JSON object keyed by column name
    pub fn query_json(&self, sql: &str) -> Result<Vec<Value>> {
        let fail = |e: duckdb::Error| Error::database(format!("Query failed: {e}"));
        let mut stmt = self.conn.prepare(sql).map_err(fail)?;
        let mut rows = stmt.query([]).map_err(fail)?;
        let columns = rows
            .as_ref()
            .map(duckdb::Statement::column_names)
            .unwrap_or_default();

        let mut records = Vec::new();
        while let Some(row) = rows.next().map_err(fail)? {
            let mut record = serde_json::Map::with_capacity(columns.len());
            for (idx, column) in columns.iter().enumerate() {
                let value: SqlValue = row.get(idx).map_err(fail)?;
                record.insert(column.clone(), from_sql_value(value));
            }
            records.push(Value::Object(record));
        }
        debug!("Query returned {} rows from {}", records.len(), self.location);
        Ok(records)
    }

    /// Number of rows in a table
    pub fn count_rows(&self, table: &str) -> Result<u64> {
        let sql = format!("SELECT count(*) FROM {}", quote_ident(table));
        let count: i64 = self
            .conn
            .query_row(&sql, [], |row| row.get(0))
            .map_err(|e| Error::database(format!("Failed to count '{table}': {e}")))?;
        Ok(count as u64)
    }

    /// Close the connection, flushing it to disk
    pub fn close(self) -> Result<()> {
        let location = self.location;
        self.conn.close().map_err(|(_, e)| {
            Error::database(format!("Failed to close database '{location}': {e}"))
        })?;
        debug!("Closed database {location}");
        Ok(())
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("location", &self.location)
            .finish()
    }
}

// ============================================================================
// SQL rendering
// ============================================================================

/// Render the DDL for `table`
///
/// Autoincrement columns get a dedicated sequence used as their default.
pub fn create_table_sql(table: &TableStructure) -> String {
    let mut sql = String::new();
    let mut lines = Vec::new();

    for column in &table.columns {
        let data_type = if column.data_type.is_empty() {
            "BLOB"
        } else {
            column.data_type.as_str()
        };
        let mut line = format!("    {} {}", quote_ident(&column.name), data_type);
        if column.not_null {
            line.push_str(" NOT NULL");
        }
        if column.autoincrement {
            let seq = sequence_name(&table.name, &column.name);
            sql.push_str(&format!("CREATE SEQUENCE IF NOT EXISTS {};\n", quote_ident(&seq)));
            line.push_str(&format!(" DEFAULT nextval('{}')", escape_literal(&seq)));
        } else if let Some(ref default) = column.default {
            line.push_str(&format!(" DEFAULT {default}"));
        }
        lines.push(line);
    }

    if !table.primary_key.is_empty() {
        lines.push(format!("    PRIMARY KEY ({})", ident_list(&table.primary_key)));
    }
    for key in &table.unique_keys {
        lines.push(format!("    UNIQUE ({})", ident_list(key)));
    }

    sql.push_str(&format!(
        "CREATE TABLE IF NOT EXISTS {} (\n{}\n);",
        quote_ident(&table.name),
        lines.join(",\n")
    ));
    sql
}

/// Render an upsert for the given columns
pub fn upsert_sql(table: &TableStructure, columns: &[&str]) -> String {
    let placeholders: Vec<&str> = columns
        .iter()
        .map(|c| {
            match table.column(c).map(ColumnStructure::logical_type) {
                Some(LogicalType::Date) => "CAST(? AS DATE)",
                Some(LogicalType::Timestamp) => "CAST(? AS TIMESTAMP)",
                _ => "?",
            }
        })
        .collect();

    let mut sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(&table.name),
        columns.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", "),
        placeholders.join(", ")
    );

    let Some(key) = table.conflict_key(columns) else {
        warn!(
            "Table '{}' has no usable key for the supplied columns; rows are appended",
            table.name
        );
        return sql;
    };

    // Indexed columns cannot be reassigned by DO UPDATE
    let indexed = |c: &str| {
        table.is_primary_key(c)
            || table
                .unique_keys
                .iter()
                .flatten()
                .any(|k| k.eq_ignore_ascii_case(c))
    };
    let updates: Vec<String> = columns
        .iter()
        .filter(|c| !indexed(c))
        .map(|c| format!("{0} = excluded.{0}", quote_ident(c)))
        .collect();

    sql.push_str(&format!(" ON CONFLICT ({})", ident_list(key)));
    if updates.is_empty() {
        sql.push_str(" DO NOTHING");
    } else {
        sql.push_str(&format!(" DO UPDATE SET {}", updates.join(", ")));
    }
    sql
}

fn sequence_name(table: &str, column: &str) -> String {
    format!("{table}_{column}_seq")
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn ident_list(idents: &[String]) -> String {
    idents
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ")
}

fn escape_literal(text: &str) -> String {
    text.replace('\'', "''")
}

fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Boolean(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                SqlValue::BigInt(i)
            } else if let Some(u) = n.as_u64() {
                SqlValue::UBigInt(u)
            } else {
                SqlValue::Double(n.as_f64().unwrap_or_default())
            }
        }
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn from_sql_value(value: SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Boolean(b) => Value::Bool(b),
        SqlValue::TinyInt(i) => Value::from(i),
        SqlValue::SmallInt(i) => Value::from(i),
        SqlValue::Int(i) => Value::from(i),
        SqlValue::BigInt(i) => Value::from(i),
        SqlValue::UTinyInt(i) => Value::from(i),
        SqlValue::USmallInt(i) => Value::from(i),
        SqlValue::UInt(i) => Value::from(i),
        SqlValue::UBigInt(i) => Value::from(i),
        SqlValue::HugeInt(i) => Value::String(i.to_string()),
        SqlValue::Float(f) => {
            serde_json::Number::from_f64(f64::from(f)).map_or(Value::Null, Value::Number)
        }
        SqlValue::Double(f) => {
            serde_json::Number::from_f64(f).map_or(Value::Null, Value::Number)
        }
        SqlValue::Text(s) => Value::String(s),
        // Days since the epoch
        SqlValue::Date32(days) => chrono::NaiveDate::from_num_days_from_ce_opt(days + 719_163)
            .map_or(Value::from(days), |d| Value::String(d.format("%Y-%m-%d").to_string())),
        // Microseconds since the epoch
        SqlValue::Timestamp(_, micros) => {
            let secs = micros.div_euclid(1_000_000);
            let nanos = (micros.rem_euclid(1_000_000) * 1000) as u32;
            chrono::DateTime::from_timestamp(secs, nanos).map_or(Value::from(micros), |dt| {
                Value::String(dt.naive_utc().format("%Y-%m-%d %H:%M:%S").to_string())
            })
        }
        other => Value::String(format!("{other:?}")),
    }
}

/// Split row-level rejections from everything else
fn classify(table: &str, e: duckdb::Error) -> Error {
    let message = e.to_string();
    let rejected = ["Constraint Error", "Conversion Error", "Mismatch Type Error"]
        .iter()
        .any(|marker| message.contains(marker));
    if rejected {
        Error::Constraint {
            table: table.to_string(),
            message,
        }
    } else {
        Error::database(format!("Write to '{table}' failed: {message}"))
    }
}
