//! Schema types

use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

// ============================================================================
// Logical types
// ============================================================================

/// Logical type a declared column type resolves to
///
/// Declared type tokens differ between dialects (`INT`, `INTEGER`, `BIGINT`,
/// `TEXT`, `VARCHAR(255)` ...); comparisons happen on this normalized form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogicalType {
    Integer,
    Real,
    Text,
    Blob,
    Boolean,
    Date,
    Timestamp,
    Numeric,
    Other(String),
}

impl LogicalType {
    /// Resolve a declared type token
    ///
    /// Explicit boolean/date/time aliases are checked first, then SQLite-style
    /// affinity rules on the remaining text.
    pub fn from_declared(declared: &str) -> Self {
        let upper = declared.trim().to_uppercase();
        let base = upper.split('(').next().unwrap_or("").trim();

        match base {
            "BOOL" | "BOOLEAN" | "LOGICAL" => return LogicalType::Boolean,
            "DATE" => return LogicalType::Date,
            "DATETIME" | "TIMESTAMP" | "TIMESTAMPTZ" => return LogicalType::Timestamp,
            "DECIMAL" | "NUMERIC" => return LogicalType::Numeric,
            "INTERVAL" | "UUID" | "TIME" => return LogicalType::Other(base.to_string()),
            _ => {}
        }
        if base.starts_with("TIMESTAMP") {
            return LogicalType::Timestamp;
        }

        if base.contains("INT") {
            LogicalType::Integer
        } else if ["CHAR", "CLOB", "TEXT", "STRING"]
            .iter()
            .any(|t| base.contains(t))
        {
            LogicalType::Text
        } else if base.is_empty() || base.contains("BLOB") || base.contains("BYTEA") {
            LogicalType::Blob
        } else if ["REAL", "FLOA", "DOUB"].iter().any(|t| base.contains(t)) {
            LogicalType::Real
        } else {
            LogicalType::Numeric
        }
    }
}

impl fmt::Display for LogicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogicalType::Integer => write!(f, "INTEGER"),
            LogicalType::Real => write!(f, "REAL"),
            LogicalType::Text => write!(f, "TEXT"),
            LogicalType::Blob => write!(f, "BLOB"),
            LogicalType::Boolean => write!(f, "BOOLEAN"),
            LogicalType::Date => write!(f, "DATE"),
            LogicalType::Timestamp => write!(f, "TIMESTAMP"),
            LogicalType::Numeric => write!(f, "NUMERIC"),
            LogicalType::Other(name) => write!(f, "{name}"),
        }
    }
}

// ============================================================================
// Table structure
// ============================================================================

/// One column of a table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnStructure {
    /// Column name
    pub name: String,
    /// Declared type token, uppercased (e.g. `INTEGER`, `VARCHAR(255)`)
    pub data_type: String,
    /// NOT NULL constraint
    pub not_null: bool,
    /// Autoincrement marker
    pub autoincrement: bool,
    /// DEFAULT expression as written
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

impl ColumnStructure {
    /// Create a nullable column with no default
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            not_null: false,
            autoincrement: false,
            default: None,
        }
    }

    /// Logical type of the declared type
    pub fn logical_type(&self) -> LogicalType {
        LogicalType::from_declared(&self.data_type)
    }
}

/// Structural description of a table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableStructure {
    /// Table name
    pub name: String,
    /// Columns in declaration order
    pub columns: Vec<ColumnStructure>,
    /// Primary-key columns
    pub primary_key: Vec<String>,
    /// Unique-key column groups
    pub unique_keys: Vec<Vec<String>>,
    /// Definition text the structure was parsed from
    #[serde(skip)]
    pub raw_sql: String,
}

impl TableStructure {
    /// Create an empty table structure
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            unique_keys: Vec::new(),
            raw_sql: String::new(),
        }
    }

    /// Look up a column by name (case-insensitive)
    pub fn column(&self, name: &str) -> Option<&ColumnStructure> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Whether `name` is part of the primary key
    pub fn is_primary_key(&self, name: &str) -> bool {
        self.primary_key.iter().any(|c| c.eq_ignore_ascii_case(name))
    }

    /// Whether a row must carry a non-null value for `name`
    pub fn requires_value(&self, name: &str) -> bool {
        self.column(name).is_some_and(|c| {
            (c.not_null || self.is_primary_key(name)) && !c.autoincrement && c.default.is_none()
        })
    }

    /// Key used to detect an existing row, given the columns a row supplies
    ///
    /// The primary key is preferred when fully supplied, otherwise the first
    /// fully supplied unique key.
    pub fn conflict_key<S: AsRef<str>>(&self, supplied: &[S]) -> Option<&[String]> {
        let has = |col: &String| supplied.iter().any(|s| s.as_ref().eq_ignore_ascii_case(col));

        if !self.primary_key.is_empty() && self.primary_key.iter().all(has) {
            return Some(&self.primary_key);
        }
        self.unique_keys
            .iter()
            .find(|key| !key.is_empty() && key.iter().all(has))
            .map(Vec::as_slice)
    }

    /// Primary key as a lowercase set
    pub fn primary_key_set(&self) -> BTreeSet<String> {
        self.primary_key.iter().map(|c| c.to_lowercase()).collect()
    }

    /// Unique keys as lowercase sets, excluding one identical to the primary key
    pub fn unique_key_sets(&self) -> BTreeSet<BTreeSet<String>> {
        let pk = self.primary_key_set();
        self.unique_keys
            .iter()
            .map(|key| key.iter().map(|c| c.to_lowercase()).collect::<BTreeSet<_>>())
            .filter(|key| !key.is_empty() && *key != pk)
            .collect()
    }
}

// ============================================================================
// Validation result
// ============================================================================

/// Kind of key a discrepancy refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyKind {
    Primary,
    Unique,
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyKind::Primary => write!(f, "primary key"),
            KeyKind::Unique => write!(f, "unique key"),
        }
    }
}

/// One structural difference between a definition and a live table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Discrepancy {
    MissingTable {
        table: String,
    },
    MissingColumn {
        column: String,
    },
    UnexpectedColumn {
        column: String,
    },
    TypeMismatch {
        column: String,
        expected: String,
        found: String,
    },
    NullabilityMismatch {
        column: String,
        expected_not_null: bool,
    },
    AutoincrementMismatch {
        column: String,
        expected: bool,
    },
    MissingKey {
        key: KeyKind,
        columns: Vec<String>,
    },
    ExtraKey {
        key: KeyKind,
        columns: Vec<String>,
    },
}

impl fmt::Display for Discrepancy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Discrepancy::MissingTable { table } => write!(f, "table '{table}' does not exist"),
            Discrepancy::MissingColumn { column } => write!(f, "missing column '{column}'"),
            Discrepancy::UnexpectedColumn { column } => {
                write!(f, "unexpected column '{column}'")
            }
            Discrepancy::TypeMismatch {
                column,
                expected,
                found,
            } => write!(f, "column '{column}' has type {found}, expected {expected}"),
            Discrepancy::NullabilityMismatch {
                column,
                expected_not_null,
            } => {
                if *expected_not_null {
                    write!(f, "column '{column}' should be NOT NULL")
                } else {
                    write!(f, "column '{column}' should be nullable")
                }
            }
            Discrepancy::AutoincrementMismatch { column, expected } => {
                if *expected {
                    write!(f, "column '{column}' should autoincrement")
                } else {
                    write!(f, "column '{column}' should not autoincrement")
                }
            }
            Discrepancy::MissingKey { key, columns } => {
                write!(f, "missing {key} ({})", columns.join(", "))
            }
            Discrepancy::ExtraKey { key, columns } => {
                write!(f, "unexpected {key} ({})", columns.join(", "))
            }
        }
    }
}

/// Outcome of validating a live table against its definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationResult {
    Matches,
    Mismatch(Vec<Discrepancy>),
}

impl ValidationResult {
    /// Build a result from a discrepancy list
    pub fn from_discrepancies(discrepancies: Vec<Discrepancy>) -> Self {
        if discrepancies.is_empty() {
            ValidationResult::Matches
        } else {
            ValidationResult::Mismatch(discrepancies)
        }
    }

    /// Whether the table matched
    pub fn is_match(&self) -> bool {
        matches!(self, ValidationResult::Matches)
    }

    /// Discrepancies found (empty on match)
    pub fn discrepancies(&self) -> &[Discrepancy] {
        match self {
            ValidationResult::Matches => &[],
            ValidationResult::Mismatch(d) => d,
        }
    }
}
