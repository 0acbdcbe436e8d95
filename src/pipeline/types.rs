//! Pipeline definition types
//!
//! A definition is purely declarative: the tables the pipeline writes to and
//! the links that say where records come from and how they become rows.

use crate::error::{Error, Result};
use crate::schema::{self, TableStructure};
use crate::types::JsonValue;
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

// ============================================================================
// Definition
// ============================================================================

/// Tables plus the links that fill them
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineDefinition {
    /// Definition name
    pub name: String,

    /// Free-form description
    #[serde(default)]
    pub description: Option<String>,

    /// Target tables, parsed from CREATE TABLE statements
    #[serde(deserialize_with = "deserialize_tables")]
    pub tables: Vec<TableStructure>,

    /// Extraction/insertion units, run in order
    #[serde(default)]
    pub links: Vec<DataLink>,
}

impl PipelineDefinition {
    /// Look up a declared table by name (case-insensitive)
    pub fn table(&self, name: &str) -> Option<&TableStructure> {
        self.tables
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name))
    }

    /// Look up a link by name
    pub fn link(&self, name: &str) -> Result<&DataLink> {
        self.links
            .iter()
            .find(|l| l.name == name)
            .ok_or_else(|| Error::LinkNotFound {
                link: name.to_string(),
            })
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TableSql {
    One(String),
    Many(Vec<String>),
}

fn deserialize_tables<'de, D>(
    deserializer: D,
) -> std::result::Result<Vec<TableStructure>, D::Error>
where
    D: Deserializer<'de>,
{
    let statements = match TableSql::deserialize(deserializer)? {
        TableSql::One(sql) => vec![sql],
        TableSql::Many(list) => list,
    };
    let mut tables = Vec::new();
    for sql in &statements {
        tables.extend(schema::parse_sql(sql).map_err(serde::de::Error::custom)?);
    }
    Ok(tables)
}

/// Sources to extract from and the profiles applied to what they yield
#[derive(Debug, Clone, Deserialize)]
pub struct DataLink {
    /// Link name
    pub name: String,

    /// Where records come from; empty when records are supplied by the caller
    #[serde(default)]
    pub sources: Vec<DataSource>,

    /// Target table name to insertion profile
    #[serde(default)]
    pub profiles: BTreeMap<String, InsertionProfile>,
}

impl DataLink {
    /// Profiles that apply to records from `source` (`None` for caller-supplied records)
    pub fn profiles_for<'a>(
        &'a self,
        source: Option<&'a str>,
    ) -> impl Iterator<Item = (&'a str, &'a InsertionProfile)> + 'a {
        self.profiles
            .iter()
            .filter(move |(_, profile)| match (&profile.source, source) {
                (None, _) => true,
                (Some(wanted), Some(actual)) => wanted == actual,
                (Some(_), None) => false,
            })
            .map(|(table, profile)| (table.as_str(), profile))
    }
}

// ============================================================================
// Sources
// ============================================================================

/// How records are extracted
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DataSource {
    /// Paginated listing on the remote API
    Network {
        name: String,
        endpoint: String,
        /// Path to the record array within each page, if not the default
        #[serde(default)]
        records_path: Option<String>,
    },
    /// Local JSON, JSON Lines or CSV file
    File {
        name: String,
        path: PathBuf,
        #[serde(default)]
        format: FileFormat,
        #[serde(default)]
        records_path: Option<String>,
    },
    /// SQL query against a DuckDB database
    ///
    /// Without `database` the query runs against the store being loaded.
    Query {
        name: String,
        sql: String,
        #[serde(default)]
        database: Option<PathBuf>,
    },
    /// Rows given inline
    Constant {
        name: String,
        #[serde(default)]
        rows: Vec<JsonValue>,
    },
}

impl DataSource {
    pub fn name(&self) -> &str {
        match self {
            Self::Network { name, .. }
            | Self::File { name, .. }
            | Self::Query { name, .. }
            | Self::Constant { name, .. } => name,
        }
    }

    /// Source kind, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Network { .. } => "network",
            Self::File { .. } => "file",
            Self::Query { .. } => "query",
            Self::Constant { .. } => "constant",
        }
    }
}

/// File source encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    /// One JSON document
    #[default]
    Json,
    /// One JSON document per line
    Jsonl,
    /// Comma-separated values with a header row; every value is text
    Csv,
}

// ============================================================================
// Insertion profiles
// ============================================================================

/// How one raw record becomes rows of one table
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InsertionProfile {
    /// Restrict the profile to one source of the link
    #[serde(default)]
    pub source: Option<String>,

    /// Field naming the record in diagnostics and failure records
    #[serde(default)]
    pub key: Option<FieldPath>,

    /// Column name to rule
    pub columns: BTreeMap<String, ColumnRule>,
}

/// How one column's value is produced
///
/// Written either as a bare field path or as a map with exactly one of
/// `from`, `composite` or `value`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "ColumnRuleRepr")]
pub struct ColumnRule {
    pub from: Option<FieldPath>,
    pub composite: Option<Vec<FieldPath>>,
    pub separator: String,
    pub value: Option<JsonValue>,
    pub cast: Option<CastType>,
    pub default: Option<JsonValue>,
}

impl ColumnRule {
    /// Copy a field verbatim
    pub fn copy(path: FieldPath) -> Self {
        Self {
            from: Some(path),
            composite: None,
            separator: default_separator(),
            value: None,
            cast: None,
            default: None,
        }
    }

    /// Number of value producers set (`from`, `composite`, `value`)
    pub(crate) fn producer_count(&self) -> usize {
        [
            self.from.is_some(),
            self.composite.is_some(),
            self.value.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ColumnRuleRepr {
    Path(FieldPath),
    Full(ColumnRuleFields),
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ColumnRuleFields {
    #[serde(default)]
    from: Option<FieldPath>,
    #[serde(default)]
    composite: Option<Vec<FieldPath>>,
    #[serde(default = "default_separator")]
    separator: String,
    #[serde(default)]
    value: Option<JsonValue>,
    #[serde(default)]
    cast: Option<CastType>,
    #[serde(default)]
    default: Option<JsonValue>,
}

fn default_separator() -> String {
    ":".to_string()
}

impl From<ColumnRuleRepr> for ColumnRule {
    fn from(repr: ColumnRuleRepr) -> Self {
        match repr {
            ColumnRuleRepr::Path(path) => Self::copy(path),
            ColumnRuleRepr::Full(f) => Self {
                from: f.from,
                composite: f.composite,
                separator: f.separator,
                value: f.value,
                cast: f.cast,
                default: f.default,
            },
        }
    }
}

/// Target type of a column cast
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CastType {
    Integer,
    Float,
    Text,
    Boolean,
    Date,
    Timestamp,
    /// Serialize the value as JSON text
    Json,
}

// ============================================================================
// Field paths
// ============================================================================

/// One step of a [`FieldPath`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Object key (or array index when written as digits)
    Key(String),
    /// Array index
    Index(usize),
    /// Every element of an array (`-1`)
    Each,
    /// Position of the current element within the array being expanded
    Position,
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(key) => f.write_str(key),
            Self::Index(i) => write!(f, "{i}"),
            Self::Each => f.write_str("-1"),
            Self::Position => f.write_str("$index"),
        }
    }
}

/// Location of a value inside a raw record
///
/// Written as a dotted string (`user_positions.-1.group_code`) or a list
/// (`[user_positions, -1, group_code]`). `-1` selects every element of an
/// array; `$index` right after it yields the element's position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath(pub Vec<Segment>);

impl FieldPath {
    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    /// Parse a dotted path
    pub fn parse(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Err(Error::config("Field path cannot be empty"));
        }
        let segments = text.split('.').map(parse_text_segment).collect();
        Ok(Self(segments))
    }

    fn from_parts(parts: Vec<PathPart>) -> std::result::Result<Self, String> {
        if parts.is_empty() {
            return Err("field path cannot be empty".to_string());
        }
        parts
            .into_iter()
            .map(|part| match part {
                PathPart::Key(key) => Ok(parse_text_segment(&key)),
                PathPart::Index(-1) => Ok(Segment::Each),
                PathPart::Index(i) => usize::try_from(i)
                    .map(Segment::Index)
                    .map_err(|_| format!("invalid index {i} in field path")),
            })
            .collect::<std::result::Result<Vec<_>, _>>()
            .map(Self)
    }
}

fn parse_text_segment(text: &str) -> Segment {
    match text {
        "-1" => Segment::Each,
        "$index" => Segment::Position,
        key => Segment::Key(key.to_string()),
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        f.write_str(&parts.join("."))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PathPart {
    Index(i64),
    Key(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PathRepr {
    Dotted(String),
    Parts(Vec<PathPart>),
}

impl<'de> Deserialize<'de> for FieldPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        match PathRepr::deserialize(deserializer)? {
            PathRepr::Dotted(text) => FieldPath::parse(&text).map_err(serde::de::Error::custom),
            PathRepr::Parts(parts) => {
                FieldPath::from_parts(parts).map_err(serde::de::Error::custom)
            }
        }
    }
}
