//! CREATE TABLE parser
//!
//! Turns table-definition statements into [`TableStructure`]s. Parsing is
//! permissive: constructs it does not model (CHECK, FOREIGN KEY, COLLATE,
//! table options) are skipped, but primary and unique keys are always kept.
//! Structural problems (unbalanced parentheses, no table name, no column
//! list) fail with [`Error::SchemaParse`] carrying the offending text.

use super::types::{ColumnStructure, TableStructure};
use crate::error::{Error, Result};
use regex::Regex;
use std::sync::LazyLock;

/// SQL dialect the definitions are written for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SqlDialect {
    /// Primary-key columns are implicitly NOT NULL
    #[default]
    DuckDb,
    /// Primary-key columns keep their declared nullability
    Sqlite,
}

static CREATE_TABLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bCREATE\s+(?:TEMP(?:ORARY)?\s+)?TABLE\b").expect("valid regex")
});

static HEADER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?is)^\s*CREATE\s+(?:TEMP(?:ORARY)?\s+)?TABLE\s+(?:IF\s+NOT\s+EXISTS\s+)?("[^"]+"|`[^`]+`|\[[^\]]+\]|[\w.]+)"#,
    )
    .expect("valid regex")
});

static CONSTRAINT_PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)^CONSTRAINT\s+("[^"]+"|`[^`]+`|\w+)\s+"#).expect("valid regex")
});

static COLUMN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)^("[^"]+"|`[^`]+`|\[[^\]]+\]|\w+)\s*(.*)$"#).expect("valid regex")
});

static TYPE_END_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(CONSTRAINT|PRIMARY|NOT|NULL|UNIQUE|DEFAULT|CHECK|REFERENCES|AUTOINCREMENT|AUTO_INCREMENT|COLLATE|GENERATED|AS)\b",
    )
    .expect("valid regex")
});

static NOT_NULL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bNOT\s+NULL\b").expect("valid regex"));
static PRIMARY_KEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bPRIMARY\s+KEY\b").expect("valid regex"));
static UNIQUE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bUNIQUE\b").expect("valid regex"));
static AUTOINCREMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bAUTO_?INCREMENT\b").expect("valid regex"));
static DEFAULT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)\bDEFAULT\s+('(?:[^']|'')*'|\([^)]*\)|[^\s,]+)").expect("valid regex")
});

/// Parse every CREATE TABLE statement in `sql` (DuckDB dialect)
pub fn parse_sql(sql: &str) -> Result<Vec<TableStructure>> {
    parse_sql_with(sql, SqlDialect::default())
}

/// Parse every CREATE TABLE statement in `sql` for the given dialect
pub fn parse_sql_with(sql: &str, dialect: SqlDialect) -> Result<Vec<TableStructure>> {
    split_statements(sql)?
        .iter()
        .map(|stmt| parse_create_table(stmt, dialect))
        .collect()
}

/// Parse a text that must hold exactly one CREATE TABLE statement
pub fn parse_table(sql: &str) -> Result<TableStructure> {
    let mut tables = parse_sql(sql)?;
    match tables.len() {
        1 => Ok(tables.remove(0)),
        0 => Err(Error::schema_parse(sql, "no CREATE TABLE statement found")),
        n => Err(Error::schema_parse(
            sql,
            format!("expected one CREATE TABLE statement, found {n}"),
        )),
    }
}

/// Cut `sql` into individual CREATE TABLE statements
///
/// Comments are removed first. A statement ends at a top-level `;`, at the
/// start of the next CREATE TABLE, or at the end of input.
pub fn split_statements(sql: &str) -> Result<Vec<String>> {
    let cleaned = strip_comments(sql);
    let starts: Vec<usize> = CREATE_TABLE_RE
        .find_iter(&cleaned)
        .map(|m| m.start())
        .collect();

    let mut statements = Vec::new();
    for (i, &start) in starts.iter().enumerate() {
        let bound = starts.get(i + 1).copied().unwrap_or(cleaned.len());
        let text = &cleaned[start..bound];
        let end = statement_end(text)?;
        statements.push(text[..end].trim().to_string());
    }
    Ok(statements)
}

/// Byte length of the statement at the start of `text`
fn statement_end(text: &str) -> Result<usize> {
    let mut depth = 0i32;
    let mut quote: Option<char> = None;

    for (i, ch) in text.char_indices() {
        match quote {
            Some(q) if ch == q => quote = None,
            Some(_) => {}
            None => match ch {
                '\'' | '"' | '`' => quote = Some(ch),
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth < 0 {
                        return Err(Error::schema_parse(text, "unbalanced ')'"));
                    }
                }
                ';' if depth == 0 => return Ok(i + 1),
                _ => {}
            },
        }
    }

    if quote.is_some() {
        return Err(Error::schema_parse(text, "unterminated quoted string"));
    }
    if depth != 0 {
        return Err(Error::schema_parse(text, "unbalanced '(' in table definition"));
    }
    Ok(text.len())
}

/// Parse one CREATE TABLE statement
pub fn parse_create_table(stmt: &str, dialect: SqlDialect) -> Result<TableStructure> {
    let header = HEADER_RE
        .captures(stmt)
        .ok_or_else(|| Error::schema_parse(stmt, "missing table name"))?;
    let name_match = header.get(1).map_or("", |m| m.as_str());
    let name = unquote(name_match.rsplit('.').next().unwrap_or(name_match));
    let after_header = header.get(0).map_or(0, |m| m.end());

    let rest = stmt[after_header..].trim_start();
    if !rest.starts_with('(') {
        return Err(Error::schema_parse(stmt, "missing column list"));
    }
    let close = matching_paren(rest).ok_or_else(|| Error::schema_parse(stmt, "unbalanced '('"))?;
    let body = &rest[1..close];
    if body.trim().is_empty() {
        return Err(Error::schema_parse(stmt, "empty column list"));
    }

    let mut table = TableStructure::new(name);
    table.raw_sql = stmt.to_string();

    for part in split_top_level(body) {
        let part = CONSTRAINT_PREFIX_RE.replace(part.trim(), "").to_string();
        if part.is_empty() {
            continue;
        }
        let upper = part.to_uppercase();
        let first_word = upper
            .split(|c: char| !(c.is_alphanumeric() || c == '_'))
            .next()
            .unwrap_or("");

        if first_word == "PRIMARY" {
            let cols = paren_columns(&part).ok_or_else(|| {
                Error::schema_parse(&part, "PRIMARY KEY without a column list")
            })?;
            push_unique(&mut table.primary_key, cols);
        } else if first_word == "UNIQUE" {
            let cols = paren_columns(&part)
                .ok_or_else(|| Error::schema_parse(&part, "UNIQUE without a column list"))?;
            if !table.unique_keys.contains(&cols) {
                table.unique_keys.push(cols);
            }
        } else if is_table_constraint(first_word, &upper[first_word.len()..]) {
            continue;
        } else {
            parse_column(&part, &mut table)?;
        }
    }

    for key in table.primary_key.iter().chain(table.unique_keys.iter().flatten()) {
        if table.column(key).is_none() {
            return Err(Error::schema_parse(
                stmt,
                format!("key references unknown column '{key}'"),
            ));
        }
    }

    if dialect == SqlDialect::DuckDb {
        let pk = table.primary_key.clone();
        for column in &mut table.columns {
            if pk.iter().any(|k| k.eq_ignore_ascii_case(&column.name)) {
                column.not_null = true;
            }
        }
    }

    Ok(table)
}

fn parse_column(part: &str, table: &mut TableStructure) -> Result<()> {
    let caps = COLUMN_RE
        .captures(part)
        .ok_or_else(|| Error::schema_parse(part, "unrecognized column definition"))?;
    let name = unquote(caps.get(1).map_or("", |m| m.as_str()));
    let rest = caps.get(2).map_or("", |m| m.as_str());
    let masked = mask_literals(rest);

    let type_end = TYPE_END_RE.find(&masked).map_or(rest.len(), |m| m.start());
    let data_type = rest[..type_end]
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase();

    let default = DEFAULT_RE
        .captures(rest)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string());

    let column = ColumnStructure {
        name: name.clone(),
        data_type,
        not_null: NOT_NULL_RE.is_match(&masked),
        autoincrement: AUTOINCREMENT_RE.is_match(&masked),
        default,
    };

    if PRIMARY_KEY_RE.is_match(&masked) {
        push_unique(&mut table.primary_key, vec![name.clone()]);
    }
    if UNIQUE_RE.is_match(&masked) {
        let key = vec![name];
        if !table.unique_keys.contains(&key) {
            table.unique_keys.push(key);
        }
    }
    table.columns.push(column);
    Ok(())
}

// ============================================================================
// Scanning helpers
// ============================================================================

/// Remove `--` and `/* */` comments outside quoted text
fn strip_comments(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();
    let mut quote: Option<char> = None;

    while let Some(ch) = chars.next() {
        if let Some(q) = quote {
            out.push(ch);
            if ch == q {
                quote = None;
            }
            continue;
        }
        match ch {
            '\'' | '"' | '`' => {
                quote = Some(ch);
                out.push(ch);
            }
            '-' if chars.peek() == Some(&'-') => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = ' ';
                for c in chars.by_ref() {
                    if prev == '*' && c == '/' {
                        break;
                    }
                    prev = c;
                }
                out.push(' ');
            }
            _ => out.push(ch),
        }
    }
    out
}

/// Index of the `)` matching the `(` at the start of `text`
fn matching_paren(text: &str) -> Option<usize> {
    let mut depth = 0;
    let mut quote: Option<char> = None;
    for (i, ch) in text.char_indices() {
        match quote {
            Some(q) if ch == q => quote = None,
            Some(_) => {}
            None => match ch {
                '\'' | '"' | '`' => quote = Some(ch),
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(i);
                    }
                }
                _ => {}
            },
        }
    }
    None
}

/// Split on commas at depth 0 outside quotes
fn split_top_level(body: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0;
    let mut quote: Option<char> = None;
    let mut start = 0;

    for (i, ch) in body.char_indices() {
        match quote {
            Some(q) if ch == q => quote = None,
            Some(_) => {}
            None => match ch {
                '\'' | '"' | '`' => quote = Some(ch),
                '(' => depth += 1,
                ')' => depth -= 1,
                ',' if depth == 0 => {
                    parts.push(&body[start..i]);
                    start = i + 1;
                }
                _ => {}
            },
        }
    }
    parts.push(&body[start..]);
    parts
}

/// Blank out single-quoted literals, keeping byte offsets intact
fn mask_literals(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_literal = false;
    for ch in text.chars() {
        if ch == '\'' {
            in_literal = !in_literal;
            out.push(ch);
        } else if in_literal {
            out.extend(std::iter::repeat(' ').take(ch.len_utf8()));
        } else {
            out.push(ch);
        }
    }
    out
}

/// Column names listed in the first parenthesized group of `part`
/// `FOREIGN KEY (...)`, `CHECK (...)` and the like, as opposed to a column
/// named `key` or `index`
fn is_table_constraint(first_word: &str, rest: &str) -> bool {
    let rest = rest.trim_start();
    match first_word {
        "FOREIGN" => rest.starts_with("KEY"),
        "CHECK" | "EXCLUDE" | "INDEX" | "KEY" => rest.starts_with('('),
        _ => false,
    }
}

fn paren_columns(part: &str) -> Option<Vec<String>> {
    let open = part.find('(')?;
    let close = open + matching_paren(&part[open..])?;
    let cols: Vec<String> = part[open + 1..close]
        .split(',')
        .map(|c| {
            // Drop ordering suffixes such as `id DESC`
            let name = c.split_whitespace().next().unwrap_or("");
            unquote(name)
        })
        .filter(|c| !c.is_empty())
        .collect();
    (!cols.is_empty()).then_some(cols)
}

fn unquote(ident: &str) -> String {
    let ident = ident.trim();
    let stripped = ident
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .or_else(|| ident.strip_prefix('`').and_then(|s| s.strip_suffix('`')))
        .or_else(|| ident.strip_prefix('[').and_then(|s| s.strip_suffix(']')));
    stripped.unwrap_or(ident).to_string()
}

fn push_unique(target: &mut Vec<String>, cols: Vec<String>) {
    for col in cols {
        if !target.iter().any(|c| c.eq_ignore_ascii_case(&col)) {
            target.push(col);
        }
    }
}
