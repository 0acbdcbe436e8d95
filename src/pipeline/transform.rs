//! Record to row transformation
//!
//! Column paths that pass through `-1` expand a record into one row per array
//! element. Paths sharing the same prefix up to a `-1` walk the same array
//! together; independent arrays combine as a cartesian product.

use super::types::{CastType, ColumnRule, FieldPath, InsertionProfile, Segment};
use crate::database::Row;
use crate::error::{Error, Result};
use crate::schema::TableStructure;
use crate::types::JsonValue;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use std::collections::BTreeMap;

/// Transform one raw record into the rows of one table
pub fn transform_record(
    record: &JsonValue,
    profile: &InsertionProfile,
    table: &TableStructure,
) -> Result<Vec<Row>> {
    let mut lookups = Vec::new();
    for (column, rule) in &profile.columns {
        if let Some(ref path) = rule.from {
            lookups.push((Slot::whole(column), path.segments()));
        }
        for (i, path) in rule.composite.iter().flatten().enumerate() {
            lookups.push((Slot::part(column, i), path.segments()));
        }
    }

    let mut rows = Vec::new();
    for resolved in expand(record, &lookups)? {
        let mut row = Row::new();
        for (column, rule) in &profile.columns {
            let value = produce(column, rule, &resolved)?;
            let value = match (value, &rule.default) {
                (JsonValue::Null, Some(default)) => default.clone(),
                (value, _) => value,
            };
            let value = match rule.cast {
                Some(cast) => cast_value(column, &value, cast)?,
                None => value,
            };
            if value.is_null() && table.requires_value(column) {
                return Err(Error::transform(column, "required value is missing"));
            }
            row.insert(column.clone(), value);
        }
        rows.push(row);
    }
    Ok(rows)
}

/// Name of a record for diagnostics
///
/// Uses the profile's `key` path when set. Otherwise the source of the first
/// primary-key column, and finally the record's position.
pub fn record_key(
    record: &JsonValue,
    profile: &InsertionProfile,
    table: &TableStructure,
    position: usize,
) -> String {
    let path = profile.key.as_ref().or_else(|| {
        let pk = table.primary_key.first()?;
        profile.columns.get(pk)?.from.as_ref()
    });
    path.and_then(|p| resolve(record, p.segments(), "key").ok())
        .and_then(|v| scalar_text(&v))
        .unwrap_or_else(|| format!("#{position}"))
}

// ============================================================================
// Expansion
// ============================================================================

/// Where a resolved value goes: a whole column or one part of a composite
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Slot {
    column: String,
    part: Option<usize>,
}

impl Slot {
    fn whole(column: &str) -> Self {
        Self {
            column: column.to_string(),
            part: None,
        }
    }

    fn part(column: &str, index: usize) -> Self {
        Self {
            column: column.to_string(),
            part: Some(index),
        }
    }
}

type Resolved = BTreeMap<Slot, JsonValue>;

fn expand(value: &JsonValue, lookups: &[(Slot, &[Segment])]) -> Result<Vec<Resolved>> {
    let mut base = Resolved::new();
    let mut groups: Vec<(&[Segment], Vec<(Slot, &[Segment])>)> = Vec::new();

    for (slot, path) in lookups {
        match path.iter().position(|s| *s == Segment::Each) {
            None => {
                base.insert(slot.clone(), resolve(value, path, &slot.column)?);
            }
            Some(i) => {
                let (prefix, rest) = (&path[..i], &path[i + 1..]);
                match groups.iter_mut().find(|(p, _)| *p == prefix) {
                    Some((_, members)) => members.push((slot.clone(), rest)),
                    None => groups.push((prefix, vec![(slot.clone(), rest)])),
                }
            }
        }
    }

    let mut combined = vec![base];
    for (prefix, members) in groups {
        let column = &members[0].0.column;
        let items = match resolve(value, prefix, column)? {
            JsonValue::Array(items) => items,
            JsonValue::Null => Vec::new(),
            other => {
                return Err(Error::transform(
                    column,
                    format!("expected a list at '{}', found {}", join(prefix), kind(&other)),
                ))
            }
        };

        let mut expanded = Vec::new();
        for (position, item) in items.iter().enumerate() {
            let (positional, nested): (Vec<_>, Vec<_>) = members
                .iter()
                .cloned()
                .partition(|(_, rest)| *rest == [Segment::Position]);
            for mut partial in expand(item, &nested)? {
                for (slot, _) in &positional {
                    partial.insert(slot.clone(), JsonValue::from(position));
                }
                expanded.push(partial);
            }
        }

        combined = combined
            .iter()
            .flat_map(|left| {
                expanded.iter().map(move |right| {
                    let mut merged = left.clone();
                    merged.extend(right.iter().map(|(k, v)| (k.clone(), v.clone())));
                    merged
                })
            })
            .collect();
    }

    Ok(combined)
}

/// Follow a path without `-1` segments; missing values resolve to null
fn resolve(value: &JsonValue, path: &[Segment], column: &str) -> Result<JsonValue> {
    let mut current = value;
    for segment in path {
        current = match (segment, current) {
            (_, JsonValue::Null) => return Ok(JsonValue::Null),
            (Segment::Key(key), JsonValue::Object(map)) => match map.get(key) {
                Some(v) => v,
                None => return Ok(JsonValue::Null),
            },
            (Segment::Key(key), JsonValue::Array(items)) if key.parse::<usize>().is_ok() => {
                match key.parse::<usize>().ok().and_then(|i| items.get(i)) {
                    Some(v) => v,
                    None => return Ok(JsonValue::Null),
                }
            }
            (Segment::Index(i), JsonValue::Array(items)) => match items.get(*i) {
                Some(v) => v,
                None => return Ok(JsonValue::Null),
            },
            (segment, other) => {
                return Err(Error::transform(
                    column,
                    format!("cannot read '{segment}' from {}", kind(other)),
                ))
            }
        };
    }
    Ok(current.clone())
}

fn produce(column: &str, rule: &ColumnRule, resolved: &Resolved) -> Result<JsonValue> {
    if let Some(ref value) = rule.value {
        return Ok(value.clone());
    }
    if rule.from.is_some() {
        return Ok(resolved
            .get(&Slot::whole(column))
            .cloned()
            .unwrap_or(JsonValue::Null));
    }
    let Some(ref parts) = rule.composite else {
        return Ok(JsonValue::Null);
    };

    let mut texts = Vec::with_capacity(parts.len());
    for i in 0..parts.len() {
        let value = resolved
            .get(&Slot::part(column, i))
            .unwrap_or(&JsonValue::Null);
        if value.is_null() {
            return Ok(JsonValue::Null);
        }
        let text = scalar_text(value).ok_or_else(|| {
            Error::transform(column, format!("composite part {i} is not a scalar"))
        })?;
        texts.push(text);
    }
    Ok(JsonValue::String(texts.join(&rule.separator)))
}

// ============================================================================
// Casting
// ============================================================================

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d"];
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y/%m/%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y/%m/%d %H:%M",
];

/// Coerce a value to the given type; null stays null
pub fn cast_value(column: &str, value: &JsonValue, cast: CastType) -> Result<JsonValue> {
    if value.is_null() {
        return Ok(JsonValue::Null);
    }
    let fail = |target: &str| {
        Error::transform(
            column,
            format!("cannot cast {} to {target}", truncate(&value.to_string())),
        )
    };

    match cast {
        CastType::Integer => match value {
            JsonValue::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
                .map(JsonValue::from)
                .ok_or_else(|| fail("integer")),
            JsonValue::String(s) => s
                .trim()
                .parse::<i64>()
                .map(JsonValue::from)
                .map_err(|_| fail("integer")),
            JsonValue::Bool(b) => Ok(JsonValue::from(i64::from(*b))),
            _ => Err(fail("integer")),
        },
        CastType::Float => match value {
            JsonValue::Number(n) => n.as_f64().map(JsonValue::from).ok_or_else(|| fail("float")),
            JsonValue::String(s) => s
                .trim()
                .parse::<f64>()
                .map(JsonValue::from)
                .map_err(|_| fail("float")),
            _ => Err(fail("float")),
        },
        CastType::Text => Ok(JsonValue::String(match value {
            JsonValue::String(s) => s.clone(),
            other => other.to_string(),
        })),
        CastType::Boolean => match value {
            JsonValue::Bool(b) => Ok(JsonValue::Bool(*b)),
            JsonValue::Number(n) => Ok(JsonValue::Bool(n.as_f64().is_some_and(|f| f != 0.0))),
            JsonValue::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Ok(JsonValue::Bool(true)),
                "false" | "0" | "no" | "off" => Ok(JsonValue::Bool(false)),
                _ => Err(fail("boolean")),
            },
            _ => Err(fail("boolean")),
        },
        CastType::Date => {
            let text = value.as_str().ok_or_else(|| fail("date"))?;
            parse_date(text)
                .map(|d| JsonValue::String(d.format("%Y-%m-%d").to_string()))
                .ok_or_else(|| fail("date"))
        }
        CastType::Timestamp => {
            let text = value.as_str().ok_or_else(|| fail("timestamp"))?;
            parse_datetime(text)
                .map(|t| JsonValue::String(t.format("%Y-%m-%d %H:%M:%S").to_string()))
                .ok_or_else(|| fail("timestamp"))
        }
        CastType::Json => Ok(JsonValue::String(value.to_string())),
    }
}

fn parse_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    DATE_FORMATS
        .iter()
        .find_map(|f| NaiveDate::parse_from_str(text, f).ok())
        .or_else(|| parse_datetime(text).map(|t| t.date()))
}

fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(text) {
        return Some(t.naive_local());
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(text, f).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|f| NaiveDate::parse_from_str(text, f).ok())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

// ============================================================================
// Helpers
// ============================================================================

fn scalar_text(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "a list",
        JsonValue::Object(_) => "an object",
    }
}

fn join(path: &[Segment]) -> String {
    FieldPath(path.to_vec()).to_string()
}

fn truncate(text: &str) -> String {
    if text.chars().count() > 40 {
        format!("{}...", text.chars().take(40).collect::<String>())
    } else {
        text.to_string()
    }
}
