//! YAML loader for pipeline definitions
//!
//! Accepts a built-in definition name or a path to a YAML file, and validates
//! the result before anything runs.

use super::types::{DataLink, PipelineDefinition};
use crate::definitions;
use crate::error::{Error, Result};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// Load a pipeline definition from a built-in name or a file path
///
/// # Examples
///
/// ```ignore
/// // Built-in definition by name
/// let definition = load_definition("jobcan")?;
///
/// // Custom definition from a file
/// let definition = load_definition("./pipelines/custom.yaml")?;
/// ```
pub fn load_definition(name_or_path: impl AsRef<Path>) -> Result<PipelineDefinition> {
    let path = name_or_path.as_ref();
    let path_str = path.to_string_lossy();

    if !path_str.contains('/')
        && !path_str.contains('\\')
        && !path_str.ends_with(".yaml")
        && !path_str.ends_with(".yml")
    {
        if let Some(yaml) = definitions::get_builtin(&path_str) {
            return load_definition_from_str(yaml);
        }
    }

    let content = fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::config(format!(
                "Pipeline '{}' not found. Built-in definitions: {}. Or provide a path to a YAML file.",
                path.display(),
                definitions::list_builtin().join(", ")
            ))
        } else {
            Error::config(format!(
                "Failed to read pipeline file '{}': {e}",
                path.display()
            ))
        }
    })?;
    load_definition_from_str(&content)
}

/// Load a pipeline definition from a YAML string
pub fn load_definition_from_str(yaml: &str) -> Result<PipelineDefinition> {
    let definition: PipelineDefinition = serde_yaml::from_str(yaml)
        .map_err(|e| Error::config(format!("Failed to parse pipeline YAML: {e}")))?;

    validate_definition(&definition)?;
    Ok(definition)
}

/// Validate a pipeline definition
pub fn validate_definition(definition: &PipelineDefinition) -> Result<()> {
    if definition.name.trim().is_empty() {
        return Err(Error::config("Pipeline name cannot be empty"));
    }

    let mut table_names = HashSet::new();
    for table in &definition.tables {
        if !table_names.insert(table.name.to_lowercase()) {
            return Err(Error::config(format!(
                "Table '{}' is declared more than once",
                table.name
            )));
        }
    }

    let mut link_names = HashSet::new();
    for link in &definition.links {
        if link.name.trim().is_empty() {
            return Err(Error::config("Link name cannot be empty"));
        }
        if !link_names.insert(link.name.as_str()) {
            return Err(Error::config(format!(
                "Duplicate link name '{}'",
                link.name
            )));
        }
        validate_link(definition, link)?;
    }

    Ok(())
}

fn validate_link(definition: &PipelineDefinition, link: &DataLink) -> Result<()> {
    let mut source_names = HashSet::new();
    for source in &link.sources {
        if source.name().trim().is_empty() {
            return Err(Error::config(format!(
                "Link '{}' has a source without a name",
                link.name
            )));
        }
        if !source_names.insert(source.name()) {
            return Err(Error::config(format!(
                "Link '{}' has duplicate source '{}'",
                link.name,
                source.name()
            )));
        }
    }

    for (table_name, profile) in &link.profiles {
        let table = definition
            .table(table_name)
            .ok_or_else(|| Error::TableNotDeclared {
                table: table_name.clone(),
            })?;

        if let Some(ref source) = profile.source {
            if !source_names.contains(source.as_str()) {
                return Err(Error::config(format!(
                    "Profile '{}.{}' refers to unknown source '{}'",
                    link.name, table_name, source
                )));
            }
        }

        if profile.columns.is_empty() {
            return Err(Error::config(format!(
                "Profile '{}.{}' has no columns",
                link.name, table_name
            )));
        }

        for (column, rule) in &profile.columns {
            if table.column(column).is_none() {
                return Err(Error::config(format!(
                    "Profile '{}.{}' maps unknown column '{}'",
                    link.name, table_name, column
                )));
            }
            if rule.producer_count() > 1 {
                return Err(Error::config(format!(
                    "Column '{}.{}' sets more than one of from/composite/value",
                    table_name, column
                )));
            }
            if rule.producer_count() == 0 && rule.default.is_none() {
                return Err(Error::config(format!(
                    "Column '{}.{}' has no value rule",
                    table_name, column
                )));
            }
            if rule.composite.as_ref().is_some_and(Vec::is_empty) {
                return Err(Error::config(format!(
                    "Column '{}.{}' has an empty composite",
                    table_name, column
                )));
            }
        }
    }

    Ok(())
}
