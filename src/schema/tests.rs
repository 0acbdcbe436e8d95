//! Schema toolkit tests

use super::*;
use crate::database::Store;
use crate::error::Error;
use pretty_assertions::assert_eq;
use test_case::test_case;

const USERS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_code TEXT NOT NULL UNIQUE,
    email VARCHAR(255),
    last_name TEXT NOT NULL,
    memo TEXT DEFAULT 'a, b'
);
";

// ============================================================================
// Parser
// ============================================================================

#[test]
fn test_parse_columns_and_flags() {
    let table = parse_table(USERS_SQL).unwrap();

    assert_eq!(table.name, "users");
    let names: Vec<_> = table.columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["id", "user_code", "email", "last_name", "memo"]);

    let id = table.column("id").unwrap();
    assert_eq!(id.data_type, "INTEGER");
    assert!(id.autoincrement);
    assert!(id.not_null);

    let email = table.column("email").unwrap();
    assert_eq!(email.data_type, "VARCHAR(255)");
    assert!(!email.not_null);

    assert!(table.column("last_name").unwrap().not_null);
    assert_eq!(
        table.column("memo").unwrap().default.as_deref(),
        Some("'a, b'")
    );

    assert_eq!(table.primary_key, vec!["id".to_string()]);
    assert_eq!(table.unique_keys, vec![vec!["user_code".to_string()]]);
}

#[test]
fn test_parse_table_level_keys() {
    let sql = r#"
        CREATE TABLE request_items (
            request_id TEXT NOT NULL,
            item_index INTEGER NOT NULL,
            "title" TEXT,
            key_code TEXT,
            checked_at TIMESTAMP,
            CONSTRAINT pk_items PRIMARY KEY (request_id, item_index),
            UNIQUE (title, key_code),
            FOREIGN KEY (request_id) REFERENCES requests(id),
            CHECK (item_index >= 0)
        );
    "#;
    let table = parse_table(sql).unwrap();

    assert_eq!(table.columns.len(), 5);
    assert!(table.column("key_code").is_some());
    assert!(table.column("checked_at").is_some());
    assert_eq!(table.primary_key, vec!["request_id", "item_index"]);
    assert_eq!(table.unique_keys, vec![vec!["title", "key_code"]]);
}

#[test]
fn test_columns_named_like_constraint_keywords() {
    let sql = r"
        CREATE TABLE settings (
            key TEXT NOT NULL,
            index INTEGER,
            check_flag BOOLEAN,
            foreign_id TEXT,
            PRIMARY KEY (key, index),
            CHECK (index >= 0)
        );
    ";
    let table = parse_table(sql).unwrap();

    let names: Vec<_> = table.columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["key", "index", "check_flag", "foreign_id"]);
    assert!(table.column("key").unwrap().not_null);
    assert_eq!(table.primary_key, vec!["key", "index"]);
}

#[test]
fn test_parse_multiple_statements_with_comments() {
    let sql = r"
        -- people
        CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT);
        /* org chart */
        CREATE TABLE groups (group_code TEXT PRIMARY KEY, parent_group_code TEXT)
        CREATE TABLE positions (position_code TEXT PRIMARY KEY);
    ";
    let tables = parse_sql(sql).unwrap();
    let names: Vec<_> = tables.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["users", "groups", "positions"]);
    assert!(tables[0].raw_sql.starts_with("CREATE TABLE users"));
}

#[test]
fn test_parse_without_statements_is_empty() {
    assert!(parse_sql("SELECT 1;").unwrap().is_empty());
    assert!(parse_table("SELECT 1;").is_err());
}

#[test]
fn test_sqlite_dialect_keeps_primary_key_nullability() {
    let sql = "CREATE TABLE t (code TEXT PRIMARY KEY, name TEXT)";
    let sqlite = parse_sql_with(sql, SqlDialect::Sqlite).unwrap();
    assert!(!sqlite[0].column("code").unwrap().not_null);

    let duckdb = parse_sql_with(sql, SqlDialect::DuckDb).unwrap();
    assert!(duckdb[0].column("code").unwrap().not_null);
}

#[test_case("CREATE TABLE users (id INTEGER, name TEXT" ; "unclosed column list")]
#[test_case("CREATE TABLE (id INTEGER)" ; "missing table name")]
#[test_case("CREATE TABLE users AS SELECT 1" ; "missing column list")]
#[test_case("CREATE TABLE users ()" ; "empty column list")]
#[test_case("CREATE TABLE users (id INTEGER, PRIMARY KEY (uid))" ; "key on unknown column")]
fn test_malformed_statement_fails(sql: &str) {
    match parse_sql(sql) {
        Err(Error::SchemaParse { fragment, .. }) => {
            assert!(fragment.starts_with("CREATE TABLE"), "fragment: {fragment}");
        }
        other => panic!("expected SchemaParse, got {other:?}"),
    }
}

// ============================================================================
// Logical types
// ============================================================================

#[test_case("INT", LogicalType::Integer)]
#[test_case("INTEGER", LogicalType::Integer)]
#[test_case("BIGINT", LogicalType::Integer)]
#[test_case("UNSIGNED BIG INT", LogicalType::Integer)]
#[test_case("TEXT", LogicalType::Text)]
#[test_case("VARCHAR(255)", LogicalType::Text)]
#[test_case("VARCHAR", LogicalType::Text)]
#[test_case("REAL", LogicalType::Real)]
#[test_case("FLOAT", LogicalType::Real)]
#[test_case("DOUBLE PRECISION", LogicalType::Real)]
#[test_case("BOOLEAN", LogicalType::Boolean)]
#[test_case("DATETIME", LogicalType::Timestamp)]
#[test_case("TIMESTAMP WITH TIME ZONE", LogicalType::Timestamp)]
#[test_case("DATE", LogicalType::Date)]
#[test_case("DECIMAL(18,3)", LogicalType::Numeric)]
#[test_case("", LogicalType::Blob)]
fn test_logical_type_aliases(declared: &str, expected: LogicalType) {
    assert_eq!(LogicalType::from_declared(declared), expected);
}

// ============================================================================
// Structural comparison
// ============================================================================

#[test]
fn test_compare_ignores_column_order_and_aliases() {
    let expected = parse_table("CREATE TABLE t (id INT PRIMARY KEY, name TEXT NOT NULL)").unwrap();
    let live =
        parse_table("CREATE TABLE t (name VARCHAR NOT NULL, id INTEGER PRIMARY KEY)").unwrap();
    assert_eq!(compare(&expected, &live), ValidationResult::Matches);
}

#[test]
fn test_compare_reports_each_discrepancy() {
    let expected = parse_table(
        "CREATE TABLE t (id INTEGER PRIMARY KEY, code TEXT NOT NULL, amount INTEGER, UNIQUE (code))",
    )
    .unwrap();
    let live = parse_table(
        "CREATE TABLE t (id INTEGER PRIMARY KEY, code TEXT, amount TEXT, extra TEXT)",
    )
    .unwrap();

    let result = compare(&expected, &live);
    assert_eq!(
        result.discrepancies(),
        &[
            Discrepancy::NullabilityMismatch {
                column: "code".into(),
                expected_not_null: true
            },
            Discrepancy::TypeMismatch {
                column: "amount".into(),
                expected: "INTEGER".into(),
                found: "TEXT".into()
            },
            Discrepancy::UnexpectedColumn {
                column: "extra".into()
            },
            Discrepancy::MissingKey {
                key: KeyKind::Unique,
                columns: vec!["code".into()]
            },
        ]
    );
}

// ============================================================================
// Live validation
// ============================================================================

#[test]
fn test_created_table_validates_against_its_definition() {
    let store = Store::open_in_memory().unwrap();
    let expected = parse_table(USERS_SQL).unwrap();
    store.create_table(&expected).unwrap();

    let result = check(&store, &expected).unwrap();
    assert!(result.is_match(), "discrepancies: {:?}", result.discrepancies());
}

#[test]
fn test_missing_not_null_column_is_the_only_discrepancy() {
    let store = Store::open_in_memory().unwrap();
    store
        .execute_batch(
            "CREATE SEQUENCE users_id_seq;
             CREATE TABLE users (
                id INTEGER PRIMARY KEY DEFAULT nextval('users_id_seq'),
                user_code VARCHAR NOT NULL UNIQUE,
                email VARCHAR,
                memo VARCHAR
             );",
        )
        .unwrap();

    let expected = parse_table(USERS_SQL).unwrap();
    let result = check(&store, &expected).unwrap();
    assert_eq!(
        result,
        ValidationResult::Mismatch(vec![Discrepancy::MissingColumn {
            column: "last_name".into()
        }])
    );
}

#[test]
fn test_missing_table_and_unique_key() {
    let store = Store::open_in_memory().unwrap();
    let expected = parse_table("CREATE TABLE forms (id INTEGER PRIMARY KEY, title TEXT UNIQUE)")
        .unwrap();

    assert_eq!(
        check(&store, &expected).unwrap().discrepancies(),
        &[Discrepancy::MissingTable {
            table: "forms".into()
        }]
    );

    store
        .execute_batch("CREATE TABLE forms (id INTEGER PRIMARY KEY, title VARCHAR)")
        .unwrap();
    assert_eq!(
        check(&store, &expected).unwrap().discrepancies(),
        &[Discrepancy::MissingKey {
            key: KeyKind::Unique,
            columns: vec!["title".into()]
        }]
    );
}

#[test]
fn test_discrepancy_display() {
    let d = Discrepancy::MissingColumn {
        column: "last_name".into(),
    };
    assert_eq!(d.to_string(), "missing column 'last_name'");

    let d = Discrepancy::MissingKey {
        key: KeyKind::Primary,
        columns: vec!["a".into(), "b".into()],
    };
    assert_eq!(d.to_string(), "missing primary key (a, b)");
}
