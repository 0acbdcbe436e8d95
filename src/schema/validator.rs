//! Live-database validation
//!
//! Compares a table definition against the structure the database reports.
//! Column order is ignored and types are compared by [`LogicalType`], so
//! `INT` and `INTEGER`, or `TEXT` and `VARCHAR`, count as the same type.

use super::types::{Discrepancy, KeyKind, TableStructure, ValidationResult};
use crate::database::Store;
use crate::error::Result;
use std::collections::BTreeSet;
use tracing::debug;

/// Validate the live table behind `expected`
pub fn check(store: &Store, expected: &TableStructure) -> Result<ValidationResult> {
    let result = match store.describe_table(&expected.name)? {
        None => ValidationResult::Mismatch(vec![Discrepancy::MissingTable {
            table: expected.name.clone(),
        }]),
        Some(live) => compare(expected, &live),
    };
    debug!(
        "Validated table '{}': {} discrepancies",
        expected.name,
        result.discrepancies().len()
    );
    Ok(result)
}

/// Structurally compare a definition against a live structure
pub fn compare(expected: &TableStructure, live: &TableStructure) -> ValidationResult {
    let mut found = Vec::new();

    for column in &expected.columns {
        let Some(actual) = live.column(&column.name) else {
            found.push(Discrepancy::MissingColumn {
                column: column.name.clone(),
            });
            continue;
        };

        if column.logical_type() != actual.logical_type() {
            found.push(Discrepancy::TypeMismatch {
                column: column.name.clone(),
                expected: column.data_type.clone(),
                found: actual.data_type.clone(),
            });
        }

        let expected_not_null = column.not_null || expected.is_primary_key(&column.name);
        let actual_not_null = actual.not_null || live.is_primary_key(&actual.name);
        if expected_not_null != actual_not_null {
            found.push(Discrepancy::NullabilityMismatch {
                column: column.name.clone(),
                expected_not_null,
            });
        }

        if column.autoincrement != actual.autoincrement {
            found.push(Discrepancy::AutoincrementMismatch {
                column: column.name.clone(),
                expected: column.autoincrement,
            });
        }
    }

    for actual in &live.columns {
        if expected.column(&actual.name).is_none() {
            found.push(Discrepancy::UnexpectedColumn {
                column: actual.name.clone(),
            });
        }
    }

    let expected_pk = expected.primary_key_set();
    let live_pk = live.primary_key_set();
    if expected_pk != live_pk {
        if !expected_pk.is_empty() {
            found.push(Discrepancy::MissingKey {
                key: KeyKind::Primary,
                columns: sorted(&expected_pk),
            });
        }
        if !live_pk.is_empty() {
            found.push(Discrepancy::ExtraKey {
                key: KeyKind::Primary,
                columns: sorted(&live_pk),
            });
        }
    }

    let expected_unique = expected.unique_key_sets();
    let live_unique = live.unique_key_sets();
    for key in expected_unique.difference(&live_unique) {
        found.push(Discrepancy::MissingKey {
            key: KeyKind::Unique,
            columns: sorted(key),
        });
    }
    for key in live_unique.difference(&expected_unique) {
        found.push(Discrepancy::ExtraKey {
            key: KeyKind::Unique,
            columns: sorted(key),
        });
    }

    ValidationResult::from_discrepancies(found)
}

fn sorted(set: &BTreeSet<String>) -> Vec<String> {
    set.iter().cloned().collect()
}
