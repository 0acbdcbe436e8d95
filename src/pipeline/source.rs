//! Record extraction
//!
//! Every source kind yields the same thing: a lazy, finite stream of raw
//! records that can be consumed once.

use super::types::{DataSource, FileFormat};
use crate::database::Store;
use crate::error::{Error, Result};
use crate::http::{extract_records, FetchError, PageFormat, ThrottledFetcher};
use crate::types::JsonValue;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;

/// Stream of raw records
pub type RecordStream = BoxStream<'static, Result<JsonValue>>;

/// What sources need from the outside world
#[derive(Debug, Clone, Default)]
pub struct SourceContext {
    /// Fetcher for network sources; `None` when running offline
    pub fetcher: Option<ThrottledFetcher>,
    /// Page shape of the remote listings
    pub page_format: PageFormat,
}

impl SourceContext {
    pub fn new(fetcher: ThrottledFetcher, page_format: PageFormat) -> Self {
        Self {
            fetcher: Some(fetcher),
            page_format,
        }
    }

    /// A context without network access
    pub fn offline() -> Self {
        Self::default()
    }
}

impl DataSource {
    /// Start extracting records
    ///
    /// Nothing is read until the stream is polled. An error ends the stream.
    pub fn extract_data(&self, ctx: &SourceContext) -> RecordStream {
        match self {
            Self::Network {
                name,
                endpoint,
                records_path,
            } => {
                let Some(fetcher) = ctx.fetcher.clone() else {
                    let err = Error::config(format!(
                        "Network source '{name}' cannot run without a remote API"
                    ));
                    return stream::once(async move { Err(err) }).boxed();
                };
                let format = match records_path {
                    Some(path) => ctx.page_format.with_results_key(path.clone()),
                    None => ctx.page_format.clone(),
                };
                network_pages(fetcher, format, endpoint.clone())
            }
            Self::File {
                path,
                format,
                records_path,
                ..
            } => {
                let path = path.clone();
                let format = *format;
                let records_path = records_path.clone();
                stream::once(async move {
                    read_file_records(&path, format, records_path.as_deref()).await
                })
                .map_ok(|records| stream::iter(records.into_iter().map(Ok::<_, Error>)))
                .try_flatten()
                .boxed()
            }
            Self::Query {
                name,
                sql,
                database,
            } => {
                let Some(path) = database.clone() else {
                    let err = Error::config(format!(
                        "Query source '{name}' names no database and no store is attached"
                    ));
                    return stream::once(async move { Err(err) }).boxed();
                };
                let sql = sql.clone();
                stream::once(async move {
                    let task = tokio::task::spawn_blocking(move || {
                        Store::open_read_only(&path)?.query_json(&sql)
                    });
                    match task.await {
                        Ok(result) => result,
                        Err(e) => Err(Error::Other(format!("Query task failed: {e}"))),
                    }
                })
                .map_ok(|records| stream::iter(records.into_iter().map(Ok::<_, Error>)))
                .try_flatten()
                .boxed()
            }
            Self::Constant { rows, .. } => {
                stream::iter(rows.clone().into_iter().map(Ok::<_, Error>)).boxed()
            }
        }
    }
}

/// Follow `next` links, yielding each page's records as they arrive
fn network_pages(fetcher: ThrottledFetcher, format: PageFormat, endpoint: String) -> RecordStream {
    stream::try_unfold((Some(endpoint), HashSet::new()), move |(next, mut visited)| {
        let fetcher = fetcher.clone();
        let format = format.clone();
        async move {
            let Some(url) = next else {
                return Ok::<_, Error>(None);
            };
            if !visited.insert(url.clone()) {
                return Err(FetchError::pagination_loop(&url).into());
            }
            let page = fetcher.fetch_page(&url, &format).await?;
            debug!(
                "Fetched {} records from {} (count: {:?})",
                page.results.len(),
                url,
                page.count
            );
            Ok(Some((page.results, (page.next, visited))))
        }
    })
    .map_ok(|records| stream::iter(records.into_iter().map(Ok::<_, Error>)))
    .try_flatten()
    .boxed()
}

async fn read_file_records(
    path: &Path,
    format: FileFormat,
    records_path: Option<&str>,
) -> Result<Vec<JsonValue>> {
    let content = tokio::fs::read_to_string(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::FileNotFound {
                path: path.display().to_string(),
            }
        } else {
            Error::Io(e)
        }
    })?;

    match format {
        FileFormat::Json => {
            let document: JsonValue = serde_json::from_str(&content)?;
            extract_records(&document, records_path)
        }
        FileFormat::Jsonl => content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(Error::from))
            .collect(),
        FileFormat::Csv => csv_records(&content),
    }
}

/// Records from CSV text: one object per data row, keyed by the header row
///
/// Empty fields become null; short rows are padded with null.
pub(crate) fn csv_records(content: &str) -> Result<Vec<JsonValue>> {
    let mut rows = parse_csv(content.trim_start_matches('\u{feff}'))?.into_iter();
    let Some(headers) = rows.next() else {
        return Ok(vec![]);
    };

    let records = rows
        .filter(|row| row.iter().any(|field| !field.is_empty()))
        .map(|row| {
            let mut record = serde_json::Map::with_capacity(headers.len());
            for (idx, header) in headers.iter().enumerate() {
                let value = match row.get(idx) {
                    Some(field) if !field.is_empty() => JsonValue::String(field.clone()),
                    _ => JsonValue::Null,
                };
                record.insert(header.clone(), value);
            }
            JsonValue::Object(record)
        })
        .collect();
    Ok(records)
}

/// Split CSV text into rows of fields
///
/// Quoted fields may contain commas, doubled quotes and line breaks.
fn parse_csv(content: &str) -> Result<Vec<Vec<String>>> {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = content.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    field.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            } else {
                field.push(c);
            }
            continue;
        }
        match c {
            '"' => in_quotes = true,
            ',' => row.push(std::mem::take(&mut field)),
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' | '\r' => {
                row.push(std::mem::take(&mut field));
                rows.push(std::mem::take(&mut row));
            }
            _ => field.push(c),
        }
    }

    if in_quotes {
        return Err(Error::decode("CSV ends inside a quoted field"));
    }
    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        rows.push(row);
    }
    Ok(rows)
}
