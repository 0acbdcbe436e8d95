//! Pipeline engine tests

use super::*;
use crate::database::Store;
use crate::error::Error;
use crate::http::mock::{self, MockApi};
use crate::http::{FetchErrorKind, PageFormat, RetryPolicy, Throttle, ThrottledFetcher};
use futures::TryStreamExt;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use test_case::test_case;

const DIRECTORY_YAML: &str = r"
name: directory
tables:
  - |
    CREATE TABLE users (
        id INTEGER PRIMARY KEY,
        user_code TEXT NOT NULL,
        last_name TEXT,
        joined DATE
    );
    CREATE TABLE user_positions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL,
        position_code TEXT NOT NULL,
        group_code TEXT NOT NULL,
        UNIQUE (user_id, position_code, group_code)
    );
links:
  - name: users
    sources:
      - type: constant
        name: seed
        rows:
          - id: 1
            user_code: u1
            last_name: Sato
            joined: 2024/04/01
            user_positions:
              - { position_code: manager, group_code: g100 }
              - { position_code: officer, group_code: g200 }
          - id: 2
            user_code: u2
            last_name: Ito
            user_positions: []
    profiles:
      users:
        key: user_code
        columns:
          id: { from: id, cast: integer }
          user_code: user_code
          last_name: last_name
          joined: { from: joined, cast: date }
      user_positions:
        key: user_code
        columns:
          user_id: id
          position_code: user_positions.-1.position_code
          group_code: [user_positions, -1, group_code]
";

fn profile(yaml: &str) -> InsertionProfile {
    serde_yaml::from_str(yaml).unwrap()
}

fn table(sql: &str) -> crate::schema::TableStructure {
    crate::schema::parse_table(sql).unwrap()
}

fn offline_engine(store: &Store) -> PipelineEngine<'_> {
    PipelineEngine::new(store, SourceContext::offline())
}

// ============================================================================
// Loader
// ============================================================================

#[test]
fn test_load_definition_from_str() {
    let definition = load_definition_from_str(DIRECTORY_YAML).unwrap();
    assert_eq!(definition.name, "directory");
    assert_eq!(definition.tables.len(), 2);
    assert!(definition.table("USERS").is_some());

    let link = definition.link("users").unwrap();
    assert_eq!(link.sources[0].name(), "seed");
    assert_eq!(link.sources[0].kind(), "constant");
    assert_eq!(
        link.profiles["user_positions"].columns["position_code"].from,
        Some(FieldPath(vec![
            Segment::Key("user_positions".into()),
            Segment::Each,
            Segment::Key("position_code".into()),
        ]))
    );
    assert!(matches!(
        definition.link("missing"),
        Err(Error::LinkNotFound { .. })
    ));
}

#[test_case("name: ''\ntables: []\n", "name cannot be empty" ; "empty name")]
#[test_case(
    "name: p\ntables: []\nlinks:\n  - name: a\n    profiles:\n      nope:\n        columns: { x: x }\n",
    "not declared" ; "undeclared table"
)]
#[test_case(
    "name: p\ntables: ['CREATE TABLE t (x TEXT)']\nlinks:\n  - name: a\n    profiles:\n      t:\n        columns: { y: y }\n",
    "unknown column" ; "unknown column"
)]
#[test_case(
    "name: p\ntables: ['CREATE TABLE t (x TEXT)']\nlinks:\n  - name: a\n  - name: a\n",
    "Duplicate link" ; "duplicate link"
)]
#[test_case(
    "name: p\ntables: ['CREATE TABLE t (x TEXT)']\nlinks:\n  - name: a\n    profiles:\n      t:\n        source: ghost\n        columns: { x: x }\n",
    "unknown source" ; "unknown source"
)]
#[test_case(
    "name: p\ntables: ['CREATE TABLE t (x TEXT)']\nlinks:\n  - name: a\n    profiles:\n      t:\n        columns:\n          x: { from: a, value: 1 }\n",
    "more than one" ; "two producers"
)]
#[test_case("name: p\ntables: ['CREATE TABLE t (x TEXT']\n", "Malformed" ; "bad table sql")]
fn test_invalid_definitions(yaml: &str, expected: &str) {
    let err = load_definition_from_str(yaml).unwrap_err().to_string();
    assert!(err.contains(expected), "error '{err}' lacks '{expected}'");
}

#[test]
fn test_load_definition_by_name_and_path() {
    assert_eq!(load_definition("jobcan").unwrap().name, "jobcan");

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("directory.yaml");
    std::fs::write(&path, DIRECTORY_YAML).unwrap();
    assert_eq!(load_definition(&path).unwrap().name, "directory");

    let err = load_definition("no-such-definition").unwrap_err().to_string();
    assert!(err.contains("jobcan"), "{err}");
}

#[test]
fn test_field_path_forms() {
    let dotted: FieldPath = serde_yaml::from_str("a.-1.b").unwrap();
    let listed: FieldPath = serde_yaml::from_str("[a, -1, b]").unwrap();
    assert_eq!(dotted, listed);
    assert_eq!(dotted.to_string(), "a.-1.b");

    let indexed: FieldPath = serde_yaml::from_str("[items, 0, $index]").unwrap();
    assert_eq!(
        indexed.segments(),
        &[
            Segment::Key("items".into()),
            Segment::Index(0),
            Segment::Position
        ]
    );
    assert!(serde_yaml::from_str::<FieldPath>("[a, -2]").is_err());
}

// ============================================================================
// Transform
// ============================================================================

#[test]
fn test_transform_expands_shared_prefix_together() {
    let record = json!({
        "user_code": "foo",
        "user_positions": [
            {"position_code": "dep. manager", "roles": ["finance", "hr"]},
            {"position_code": "officer", "roles": ["sales"]}
        ]
    });
    let profile = profile(
        "columns:\n  user_code: user_code\n  p_code: [user_positions, -1, position_code]\n  roles: [user_positions, -1, roles, -1]\n",
    );
    let target = table("CREATE TABLE t (user_code TEXT, p_code TEXT, roles TEXT)");

    let rows = transform_record(&record, &profile, &target).unwrap();
    let flat: Vec<(String, String)> = rows
        .iter()
        .map(|r| {
            (
                r["p_code"].as_str().unwrap().to_string(),
                r["roles"].as_str().unwrap().to_string(),
            )
        })
        .collect();
    assert_eq!(
        flat,
        vec![
            ("dep. manager".into(), "finance".into()),
            ("dep. manager".into(), "hr".into()),
            ("officer".into(), "sales".into()),
        ]
    );
    assert!(rows.iter().all(|r| r["user_code"] == json!("foo")));
}

#[test]
fn test_transform_independent_lists_form_cartesian_product() {
    let record = json!({"a": [1, 2], "b": ["x", "y", "z"]});
    let profile = profile("columns:\n  a: a.-1\n  b: b.-1\n");
    let target = table("CREATE TABLE t (a INTEGER, b TEXT)");
    assert_eq!(transform_record(&record, &profile, &target).unwrap().len(), 6);
}

#[test]
fn test_transform_empty_list_yields_no_rows() {
    let record = json!({"id": 2, "user_positions": []});
    let profile =
        profile("columns:\n  user_id: id\n  position_code: user_positions.-1.position_code\n");
    let target = table("CREATE TABLE t (user_id INTEGER, position_code TEXT)");
    assert!(transform_record(&record, &profile, &target).unwrap().is_empty());
}

#[test]
fn test_transform_composite_default_value_and_position() {
    let record = json!({
        "form_id": 7,
        "id": "sa-1",
        "items": [{"title": "A"}, {"title": null}]
    });
    let profile = profile(
        r#"
columns:
  key: { composite: [form_id, id] }
  source: { value: "api" }
  item_index: items.-1.$index
  title: { from: items.-1.title, default: "(none)" }
"#,
    );
    let target = table("CREATE TABLE t (key TEXT, source TEXT, item_index INTEGER, title TEXT)");

    let rows = transform_record(&record, &profile, &target).unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["key"], json!("7:sa-1"));
    assert_eq!(rows[0]["source"], json!("api"));
    assert_eq!(rows[0]["item_index"], json!(0));
    assert_eq!(rows[1]["item_index"], json!(1));
    assert_eq!(rows[1]["title"], json!("(none)"));
}

#[test]
fn test_transform_missing_required_value_fails() {
    let profile = profile("columns:\n  code: code\n  name: name\n");
    let target = table("CREATE TABLE t (code TEXT NOT NULL, name TEXT)");

    let err = transform_record(&json!({"name": "x"}), &profile, &target).unwrap_err();
    assert!(matches!(err, Error::Transform { ref column, .. } if column == "code"));

    // Autoincrement and defaulted columns may stay empty
    let target = table("CREATE TABLE t (code TEXT NOT NULL DEFAULT 'n/a', name TEXT)");
    assert!(transform_record(&json!({"name": "x"}), &profile, &target).is_ok());
}

#[test]
fn test_transform_reading_through_scalar_fails() {
    let profile = profile("columns:\n  name: user.name\n");
    let target = table("CREATE TABLE t (name TEXT)");
    let err = transform_record(&json!({"user": "plain"}), &profile, &target).unwrap_err();
    assert!(err.to_string().contains("cannot read 'name'"), "{err}");
}

#[test_case(json!("42"), CastType::Integer, json!(42))]
#[test_case(json!(3.0), CastType::Integer, json!(3))]
#[test_case(json!(true), CastType::Integer, json!(1))]
#[test_case(json!("2.5"), CastType::Float, json!(2.5))]
#[test_case(json!(12), CastType::Text, json!("12"))]
#[test_case(json!("yes"), CastType::Boolean, json!(true))]
#[test_case(json!(0), CastType::Boolean, json!(false))]
#[test_case(json!("2024/03/05"), CastType::Date, json!("2024-03-05"))]
#[test_case(json!("2024-03-05 10:11:12"), CastType::Date, json!("2024-03-05"))]
#[test_case(json!("2024/03/05 10:11:12"), CastType::Timestamp, json!("2024-03-05 10:11:12"))]
#[test_case(json!("2024-03-05T10:11:12+09:00"), CastType::Timestamp, json!("2024-03-05 10:11:12"))]
#[test_case(json!("2024-03-05"), CastType::Timestamp, json!("2024-03-05 00:00:00"))]
#[test_case(json!({"a": 1}), CastType::Json, json!("{\"a\":1}"))]
#[test_case(json!(null), CastType::Integer, json!(null))]
fn test_cast_value(input: serde_json::Value, cast: CastType, expected: serde_json::Value) {
    assert_eq!(cast_value("c", &input, cast).unwrap(), expected);
}

#[test_case(json!("abc"), CastType::Integer)]
#[test_case(json!(1.5), CastType::Integer)]
#[test_case(json!("maybe"), CastType::Boolean)]
#[test_case(json!("05-03-2024"), CastType::Date)]
#[test_case(json!([1]), CastType::Float)]
fn test_cast_value_rejects(input: serde_json::Value, cast: CastType) {
    assert!(matches!(
        cast_value("c", &input, cast),
        Err(Error::Transform { .. })
    ));
}

#[test]
fn test_record_key_falls_back_to_primary_key_then_position() {
    let target = table("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)");
    let keyed = profile("key: name\ncolumns:\n  id: id\n");
    let by_pk = profile("columns:\n  id: id\n");
    let record = json!({"id": 9, "name": "nine"});

    assert_eq!(record_key(&record, &keyed, &target, 1), "nine");
    assert_eq!(record_key(&record, &by_pk, &target, 1), "9");
    assert_eq!(record_key(&json!({}), &by_pk, &target, 4), "#4");
}

// ============================================================================
// Sources
// ============================================================================

#[tokio::test]
async fn test_file_sources() {
    let dir = tempfile::tempdir().unwrap();
    let json_path = dir.path().join("rows.json");
    std::fs::write(&json_path, r#"{"data": {"rows": [{"a": 1}, {"a": 2}]}}"#).unwrap();
    let jsonl_path = dir.path().join("rows.jsonl");
    std::fs::write(&jsonl_path, "{\"a\": 1}\n\n{\"a\": 2}\n{\"a\": 3}\n").unwrap();

    let ctx = SourceContext::offline();
    let json_source = DataSource::File {
        name: "json".into(),
        path: json_path,
        format: FileFormat::Json,
        records_path: Some("data.rows".into()),
    };
    let records: Vec<_> = json_source.extract_data(&ctx).try_collect().await.unwrap();
    assert_eq!(records, vec![json!({"a": 1}), json!({"a": 2})]);

    let jsonl_source = DataSource::File {
        name: "jsonl".into(),
        path: jsonl_path,
        format: FileFormat::Jsonl,
        records_path: None,
    };
    let records: Vec<_> = jsonl_source.extract_data(&ctx).try_collect().await.unwrap();
    assert_eq!(records.len(), 3);

    let missing = DataSource::File {
        name: "missing".into(),
        path: dir.path().join("nope.json"),
        format: FileFormat::Json,
        records_path: None,
    };
    let err = missing
        .extract_data(&ctx)
        .try_collect::<Vec<_>>()
        .await
        .unwrap_err();
    assert!(matches!(err, Error::FileNotFound { .. }));
}

#[tokio::test]
async fn test_csv_file_source() {
    let dir = tempfile::tempdir().unwrap();
    let csv_path = dir.path().join("requests.csv");
    std::fs::write(
        &csv_path,
        "\u{feff}id,title,amount\r\n\
         sa-1,\"Taxi, airport\",4800\r\n\
         sa-2,\"Said \"\"hi\"\"\nand left\",\r\n\
         \r\n\
         sa-3,Lunch\n",
    )
    .unwrap();

    let source = DataSource::File {
        name: "requests_csv".into(),
        path: csv_path,
        format: FileFormat::Csv,
        records_path: None,
    };
    let records: Vec<_> = source
        .extract_data(&SourceContext::offline())
        .try_collect()
        .await
        .unwrap();

    assert_eq!(
        records,
        vec![
            json!({"id": "sa-1", "title": "Taxi, airport", "amount": "4800"}),
            json!({"id": "sa-2", "title": "Said \"hi\"\nand left", "amount": null}),
            json!({"id": "sa-3", "title": "Lunch", "amount": null}),
        ]
    );
}

#[test]
fn test_csv_unterminated_quote_is_rejected() {
    let err = super::source::csv_records("id,title\n1,\"open\n").unwrap_err();
    assert!(matches!(err, Error::Decode { .. }));
    assert!(super::source::csv_records("").unwrap().is_empty());
}

#[tokio::test]
async fn test_query_source_reads_another_database() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("legacy.duckdb");
    let legacy = Store::open(&db_path).unwrap();
    legacy
        .execute_batch(
            "CREATE TABLE staff (id INTEGER, name TEXT, joined DATE);
             INSERT INTO staff VALUES (2, 'Ito', NULL), (1, 'Sato', DATE '2024-04-01');",
        )
        .unwrap();
    legacy.close().unwrap();

    let source = DataSource::Query {
        name: "legacy_staff".into(),
        sql: "SELECT id, name, joined FROM staff ORDER BY id".into(),
        database: Some(db_path),
    };
    let records: Vec<_> = source
        .extract_data(&SourceContext::offline())
        .try_collect()
        .await
        .unwrap();

    assert_eq!(
        records,
        vec![
            json!({"id": 1, "name": "Sato", "joined": "2024-04-01"}),
            json!({"id": 2, "name": "Ito", "joined": null}),
        ]
    );
}

#[tokio::test]
async fn test_query_source_without_database_needs_the_engine() {
    let source = DataSource::Query {
        name: "q".into(),
        sql: "SELECT 1".into(),
        database: None,
    };
    let err = source
        .extract_data(&SourceContext::offline())
        .try_collect::<Vec<_>>()
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Config { .. }));
}

#[tokio::test]
async fn test_network_source_follows_pages() {
    let api = Arc::new(MockApi::new());
    api.on(
        "/v1/positions/",
        json!({"count": 3, "next": "/v1/positions/?page=2", "results": [{"p": 1}, {"p": 2}]}),
    )
    .on(
        "/v1/positions/?page=2",
        json!({"count": 3, "next": null, "results": [{"p": 3}]}),
    );
    let fetcher = ThrottledFetcher::new(
        api.clone(),
        Throttle::with_interval(Duration::ZERO),
        RetryPolicy::none(),
    );
    let ctx = SourceContext::new(fetcher, PageFormat::default());

    let source = DataSource::Network {
        name: "positions_api".into(),
        endpoint: "/v1/positions/".into(),
        records_path: None,
    };
    let records: Vec<_> = source.extract_data(&ctx).try_collect().await.unwrap();
    assert_eq!(records.len(), 3);
    assert_eq!(api.calls(), vec!["/v1/positions/", "/v1/positions/?page=2"]);
}

#[tokio::test]
async fn test_network_source_stops_on_repeated_next_link() {
    let api = Arc::new(MockApi::new());
    api.on(
        "/v1/groups/",
        json!({"count": 1, "next": "/v1/groups/", "results": [{"g": 1}]}),
    );
    let fetcher = ThrottledFetcher::new(
        api.clone(),
        Throttle::with_interval(Duration::ZERO),
        RetryPolicy::none(),
    );
    let ctx = SourceContext::new(fetcher, PageFormat::default());
    let source = DataSource::Network {
        name: "groups_api".into(),
        endpoint: "/v1/groups/".into(),
        records_path: None,
    };

    let mut stream = source.extract_data(&ctx);
    assert_eq!(stream.try_next().await.unwrap(), Some(json!({"g": 1})));
    let err = stream.try_next().await.unwrap_err();
    assert!(matches!(err, Error::Fetch(ref e) if e.kind == FetchErrorKind::Decode));
    assert_eq!(api.call_count("/v1/groups/"), 1);
}

#[tokio::test]
async fn test_network_source_is_lazy() {
    let api = Arc::new(MockApi::new());
    let fetcher = ThrottledFetcher::new(
        api.clone(),
        Throttle::with_interval(Duration::ZERO),
        RetryPolicy::none(),
    );
    let ctx = SourceContext::new(fetcher, PageFormat::default());
    let source = DataSource::Network {
        name: "n".into(),
        endpoint: "/v1/groups/".into(),
        records_path: None,
    };

    let stream = source.extract_data(&ctx);
    assert!(api.calls().is_empty());
    drop(stream);

    let offline = source.extract_data(&SourceContext::offline());
    let err = offline.try_collect::<Vec<_>>().await.unwrap_err();
    assert!(matches!(err, Error::Config { .. }));
}

// ============================================================================
// Engine
// ============================================================================

#[tokio::test]
async fn test_execute_loads_every_profile() {
    let store = Store::open_in_memory().unwrap();
    let definition = load_definition_from_str(DIRECTORY_YAML).unwrap();
    let engine = offline_engine(&store);
    assert!(engine.prepare(&definition).unwrap().is_empty());

    let reports = engine.execute(&definition).await;
    assert_eq!(reports.len(), 1);
    let report = &reports[0];
    assert!(report.is_clean(), "{report:?}");
    assert_eq!(report.extracted, 2);
    assert_eq!(report.loaded, 4);

    assert_eq!(store.count_rows("users").unwrap(), 2);
    assert_eq!(store.count_rows("user_positions").unwrap(), 2);
    let joined: String = store
        .connection()
        .query_row("SELECT CAST(joined AS VARCHAR) FROM users WHERE id = 1", [], |r| r.get(0))
        .unwrap();
    assert_eq!(joined, "2024-04-01");
}

#[tokio::test]
async fn test_execute_twice_is_idempotent() {
    let store = Store::open_in_memory().unwrap();
    let definition = load_definition_from_str(DIRECTORY_YAML).unwrap();
    let engine = offline_engine(&store);
    engine.prepare(&definition).unwrap();

    engine.execute(&definition).await;
    let second = engine.execute(&definition).await;
    assert!(second[0].is_clean());

    assert_eq!(store.count_rows("users").unwrap(), 2);
    assert_eq!(store.count_rows("user_positions").unwrap(), 2);
}

#[tokio::test]
async fn test_transform_error_skips_only_that_record() {
    let store = Store::open_in_memory().unwrap();
    let definition = load_definition_from_str(DIRECTORY_YAML).unwrap();
    let engine = offline_engine(&store);
    engine.prepare(&definition).unwrap();

    let link = definition.link("users").unwrap();
    let report = engine.load_records(
        &definition,
        link,
        vec![
            json!({"id": 1, "user_code": "u1"}),
            json!({"id": 2, "user_code": null}),
            json!({"id": 3, "user_code": "u3", "joined": "not a date"}),
            json!({"id": 4, "user_code": "u4"}),
        ],
    );

    assert!(report.failure.is_none());
    assert_eq!(report.extracted, 4);
    let skipped: Vec<_> = report
        .skipped
        .iter()
        .filter(|s| s.table == "users")
        .map(|s| s.key.as_str())
        .collect();
    assert_eq!(skipped, vec!["#2", "u3"]);
    assert_eq!(store.select_ids("users", "id").unwrap(), vec![1, 4]);
}

#[tokio::test]
async fn test_load_error_stops_link_with_table_and_key() {
    let store = Store::open_in_memory().unwrap();
    let definition = load_definition_from_str(DIRECTORY_YAML).unwrap();
    let engine = offline_engine(&store);
    engine.prepare(&definition).unwrap();
    store.execute_batch("DROP TABLE user_positions").unwrap();

    let report = engine.execute(&definition).await;
    match &report[0].failure {
        Some(LinkFailure::Load { table, key, error }) => {
            assert_eq!(table, "user_positions");
            assert_eq!(key, "u1");
            assert!(matches!(error, Error::Database { .. }));
        }
        other => panic!("expected load failure, got {other:?}"),
    }
    assert!(report[0].failure.as_ref().unwrap().is_fatal());
    assert_eq!(report[0].extracted, 1);
}

#[tokio::test]
async fn test_extract_failure_carries_fetch_error() {
    let api = Arc::new(MockApi::new());
    api.fail("/v1/forms/", mock::timeout("/v1/forms/"));
    let fetcher = ThrottledFetcher::new(
        api,
        Throttle::with_interval(Duration::ZERO),
        RetryPolicy::none(),
    );

    let yaml = r"
name: forms
tables: ['CREATE TABLE forms (id INTEGER PRIMARY KEY, name TEXT)']
links:
  - name: forms
    sources:
      - { type: network, name: forms_api, endpoint: /v1/forms/ }
    profiles:
      forms:
        columns: { id: id, name: name }
";
    let definition = load_definition_from_str(yaml).unwrap();
    let store = Store::open_in_memory().unwrap();
    let engine = PipelineEngine::new(&store, SourceContext::new(fetcher, PageFormat::default()));
    engine.prepare(&definition).unwrap();

    let report = engine
        .execute_link(&definition, definition.link("forms").unwrap())
        .await;
    let failure = report.failure.as_ref().unwrap();
    let fetch = failure.fetch_error().unwrap();
    assert_eq!(fetch.url, "/v1/forms/");
    assert!(!failure.is_fatal());
    assert_eq!(report.extracted, 0);
}

#[tokio::test]
async fn test_query_source_reads_through_the_store() {
    let yaml = r"
name: migrate
tables: |
  CREATE TABLE legacy_users (code TEXT PRIMARY KEY, name TEXT);
  CREATE TABLE users (id INTEGER PRIMARY KEY, user_code TEXT NOT NULL, last_name TEXT);
links:
  - name: users_from_legacy
    sources:
      - type: query
        name: legacy
        sql: SELECT code, name, row_number() OVER (ORDER BY code) AS n FROM legacy_users
    profiles:
      users:
        key: code
        columns:
          id: { from: n, cast: integer }
          user_code: code
          last_name: name
";
    let definition = load_definition_from_str(yaml).unwrap();
    let store = Store::open_in_memory().unwrap();
    let engine = offline_engine(&store);
    engine.prepare(&definition).unwrap();
    store
        .execute_batch("INSERT INTO legacy_users VALUES ('u1', 'Sato'), ('u2', 'Ito')")
        .unwrap();

    let reports = engine.execute(&definition).await;
    assert!(reports[0].is_clean(), "{:?}", reports[0]);
    assert_eq!(reports[0].extracted, 2);
    assert_eq!(store.select_ids("users", "id").unwrap(), vec![1, 2]);
}

#[tokio::test]
async fn test_query_source_with_bad_sql_stops_the_link() {
    let yaml = r"
name: broken
tables: ['CREATE TABLE t (v INTEGER PRIMARY KEY)']
links:
  - name: l
    sources:
      - { type: query, name: q, sql: SELECT v FROM missing_table }
    profiles:
      t:
        columns: { v: v }
";
    let definition = load_definition_from_str(yaml).unwrap();
    let store = Store::open_in_memory().unwrap();
    let engine = offline_engine(&store);
    engine.prepare(&definition).unwrap();

    let report = engine.execute(&definition).await;
    let failure = report[0].failure.as_ref().unwrap();
    assert!(matches!(failure, LinkFailure::Extract { source_name, .. } if source_name == "q"));
    assert!(matches!(failure.error(), Error::Database { .. }));
}

#[tokio::test]
async fn test_source_bound_profiles() {
    let yaml = r"
name: bound
tables: ['CREATE TABLE t (v INTEGER PRIMARY KEY, origin TEXT)']
links:
  - name: l
    sources:
      - { type: constant, name: a, rows: [{ v: 1 }] }
      - { type: constant, name: b, rows: [{ v: 2 }] }
    profiles:
      t:
        source: b
        columns: { v: v, origin: { value: b } }
";
    let definition = load_definition_from_str(yaml).unwrap();
    let store = Store::open_in_memory().unwrap();
    let engine = offline_engine(&store);
    engine.prepare(&definition).unwrap();

    let report = engine.execute(&definition).await;
    assert_eq!(report[0].extracted, 2);
    assert_eq!(report[0].loaded, 1);
    assert_eq!(store.select_ids("t", "v").unwrap(), vec![2]);

    // Caller-supplied records skip source-bound profiles
    let link = definition.link("l").unwrap();
    let report = engine.load_records(&definition, link, vec![json!({"v": 3})]);
    assert_eq!(report.loaded, 0);
}
