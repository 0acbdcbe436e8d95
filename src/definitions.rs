//! Built-in pipeline definitions embedded in the binary
//!
//! Lets users pass `--definition jobcan` instead of a file path.

use std::collections::HashMap;
use std::sync::LazyLock;

/// Built-in pipeline YAML definitions
pub static BUILTIN_DEFINITIONS: LazyLock<HashMap<&'static str, &'static str>> =
    LazyLock::new(|| {
        let mut m = HashMap::new();
        m.insert("jobcan", include_str!("../pipelines/jobcan.yaml"));
        m
    });

/// Get a built-in definition by name
pub fn get_builtin(name: &str) -> Option<&'static str> {
    BUILTIN_DEFINITIONS.get(name).copied()
}

/// List all built-in definition names, sorted
pub fn list_builtin() -> Vec<&'static str> {
    let mut names: Vec<_> = BUILTIN_DEFINITIONS.keys().copied().collect();
    names.sort_unstable();
    names
}

/// Check if a name is a built-in definition
pub fn is_builtin(name: &str) -> bool {
    BUILTIN_DEFINITIONS.contains_key(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::load_definition_from_str;

    #[test]
    fn test_builtin_definitions_load() {
        for name in list_builtin() {
            let yaml = get_builtin(name).unwrap();
            let definition = load_definition_from_str(yaml)
                .unwrap_or_else(|e| panic!("built-in '{name}' is invalid: {e}"));
            assert_eq!(definition.name, name);
        }
    }

    #[test]
    fn test_jobcan_declares_expected_tables() {
        let definition = load_definition_from_str(get_builtin("jobcan").unwrap()).unwrap();
        let tables: Vec<_> = definition.tables.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(
            tables,
            vec![
                "users",
                "user_positions",
                "groups",
                "positions",
                "forms",
                "requests",
                "request_customized_items",
            ]
        );
        for link in ["users", "groups", "positions", "forms", "request_detail"] {
            assert!(definition.link(link).is_ok(), "missing link {link}");
        }
    }

    #[test]
    fn test_unknown_builtin() {
        assert!(is_builtin("jobcan"));
        assert!(!is_builtin("nonexistent"));
        assert!(get_builtin("nonexistent").is_none());
    }
}
