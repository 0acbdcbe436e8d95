//! Pipeline execution
//!
//! For each link: extract records from every source, transform them through
//! the matching insertion profiles, and upsert the rows. A record that fails
//! to transform is skipped and reported; a failed extraction or write stops
//! the link.

use super::source::{RecordStream, SourceContext};
use super::transform::{record_key, transform_record};
use super::types::{DataLink, DataSource, PipelineDefinition};
use crate::database::Store;
use crate::error::{Error, Result};
use crate::http::FetchError;
use crate::schema::ValidationResult;
use crate::types::JsonValue;
use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

// ============================================================================
// Reports
// ============================================================================

/// A record left out of one table because it could not be transformed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRecord {
    pub table: String,
    pub key: String,
    pub reason: String,
}

/// Why a link stopped early
#[derive(Debug, thiserror::Error)]
pub enum LinkFailure {
    #[error("extraction from '{source_name}' failed: {error}")]
    Extract { source_name: String, error: Error },

    #[error("write of record '{key}' to '{table}' failed: {error}")]
    Load {
        table: String,
        key: String,
        error: Error,
    },
}

impl LinkFailure {
    /// The fetch failure behind an extraction failure, if any
    pub fn fetch_error(&self) -> Option<&FetchError> {
        match self {
            Self::Extract {
                error: Error::Fetch(e),
                ..
            } => Some(e),
            _ => None,
        }
    }

    /// Whether the run cannot continue after this failure
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Extract { error, .. } => !error.is_recoverable(),
            Self::Load { error, .. } => matches!(error, Error::Database { .. }),
        }
    }

    pub fn error(&self) -> &Error {
        match self {
            Self::Extract { error, .. } | Self::Load { error, .. } => error,
        }
    }
}

/// Outcome of running one link
#[derive(Debug, Default)]
pub struct LinkReport {
    pub link: String,
    /// Records pulled from the sources (or supplied by the caller)
    pub extracted: usize,
    /// Rows written
    pub loaded: usize,
    pub skipped: Vec<SkippedRecord>,
    pub failure: Option<LinkFailure>,
}

impl LinkReport {
    fn new(link: &str) -> Self {
        Self {
            link: link.to_string(),
            ..Self::default()
        }
    }

    /// No skipped records and no failure
    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty() && self.failure.is_none()
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Runs pipeline definitions against a store
pub struct PipelineEngine<'a> {
    store: &'a Store,
    sources: SourceContext,
}

impl<'a> PipelineEngine<'a> {
    pub fn new(store: &'a Store, sources: SourceContext) -> Self {
        Self { store, sources }
    }

    /// Create missing tables and validate existing ones
    pub fn prepare(
        &self,
        definition: &PipelineDefinition,
    ) -> Result<Vec<(String, ValidationResult)>> {
        self.store.prepare_tables(&definition.tables)
    }

    /// Run every link in order
    pub async fn execute(&self, definition: &PipelineDefinition) -> Vec<LinkReport> {
        let mut reports = Vec::with_capacity(definition.links.len());
        for link in &definition.links {
            reports.push(self.execute_link(definition, link).await);
        }
        reports
    }

    /// Extract from every source of `link` and load what comes out
    pub async fn execute_link(
        &self,
        definition: &PipelineDefinition,
        link: &DataLink,
    ) -> LinkReport {
        let mut report = LinkReport::new(&link.name);

        for source in &link.sources {
            debug!(
                "Link '{}': extracting from {} source '{}'",
                link.name,
                source.kind(),
                source.name()
            );
            let mut records = self.extract(source);
            while let Some(item) = records.next().await {
                let record = match item {
                    Ok(record) => record,
                    Err(error) => {
                        warn!(
                            "Link '{}': extraction from '{}' failed: {}",
                            link.name,
                            source.name(),
                            error
                        );
                        report.failure = Some(LinkFailure::Extract {
                            source_name: source.name().to_string(),
                            error,
                        });
                        return report;
                    }
                };
                report.extracted += 1;
                let position = report.extracted;
                let source_name = Some(source.name());
                if let Err(failure) =
                    self.load_record(definition, link, source_name, &record, position, &mut report)
                {
                    report.failure = Some(failure);
                    return report;
                }
            }
        }

        log_report(&report);
        report
    }

    /// Load records supplied by the caller through the profiles that are not
    /// bound to a source
    pub fn load_records<I>(
        &self,
        definition: &PipelineDefinition,
        link: &DataLink,
        records: I,
    ) -> LinkReport
    where
        I: IntoIterator<Item = JsonValue>,
    {
        let mut report = LinkReport::new(&link.name);
        for record in records {
            report.extracted += 1;
            let position = report.extracted;
            if let Err(failure) =
                self.load_record(definition, link, None, &record, position, &mut report)
            {
                report.failure = Some(failure);
                return report;
            }
        }
        log_report(&report);
        report
    }

    /// Queries without their own database read through the store
    fn extract(&self, source: &DataSource) -> RecordStream {
        let DataSource::Query {
            sql,
            database: None,
            ..
        } = source
        else {
            return source.extract_data(&self.sources);
        };
        let items: Vec<Result<JsonValue>> = match self.store.query_json(sql) {
            Ok(rows) => rows.into_iter().map(Ok).collect(),
            Err(e) => vec![Err(e)],
        };
        stream::iter(items).boxed()
    }

    fn load_record(
        &self,
        definition: &PipelineDefinition,
        link: &DataLink,
        source: Option<&str>,
        record: &JsonValue,
        position: usize,
        report: &mut LinkReport,
    ) -> std::result::Result<(), LinkFailure> {
        for (table_name, profile) in link.profiles_for(source) {
            let Some(table) = definition.table(table_name) else {
                return Err(LinkFailure::Load {
                    table: table_name.to_string(),
                    key: format!("#{position}"),
                    error: Error::TableNotDeclared {
                        table: table_name.to_string(),
                    },
                });
            };
            let key = record_key(record, profile, table, position);

            let rows = match transform_record(record, profile, table) {
                Ok(rows) => rows,
                Err(e) => {
                    warn!("Skipping record '{key}' for table '{table_name}': {e}");
                    report.skipped.push(SkippedRecord {
                        table: table_name.to_string(),
                        key,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            for row in &rows {
                self.store.upsert(table, row).map_err(|error| LinkFailure::Load {
                    table: table_name.to_string(),
                    key: key.clone(),
                    error,
                })?;
                report.loaded += 1;
            }
        }
        Ok(())
    }
}

fn log_report(report: &LinkReport) {
    info!(
        "Link '{}': {} records extracted, {} rows loaded, {} skipped",
        report.link,
        report.extracted,
        report.loaded,
        report.skipped.len()
    );
}
