use super::runner::report_json;
use super::*;
use crate::pipeline::{LinkReport, SkippedRecord};
use clap::Parser;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::path::PathBuf;

#[test]
fn test_global_flags_after_subcommand() {
    let cli = Cli::try_parse_from(["formsync", "run", "--config", "sync.yaml", "-v"]).unwrap();
    assert!(matches!(cli.command, Commands::Run));
    assert_eq!(cli.config, Some(PathBuf::from("sync.yaml")));
    assert!(cli.verbose);
}

#[test]
fn test_pipeline_requires_definition() {
    assert!(Cli::try_parse_from(["formsync", "pipeline"]).is_err());

    let cli = Cli::try_parse_from(["formsync", "pipeline", "--definition", "jobcan"]).unwrap();
    match cli.command {
        Commands::Pipeline { definition } => assert_eq!(definition, "jobcan"),
        other => panic!("unexpected command {other:?}"),
    }
}

#[test]
fn test_subcommand_names() {
    for (arg, expected) in [
        ("status", "Status"),
        ("check-schema", "CheckSchema"),
        ("definitions", "Definitions"),
    ] {
        let cli = Cli::try_parse_from(["formsync", arg]).unwrap();
        assert_eq!(format!("{:?}", cli.command), expected);
        assert!(!cli.verbose);
    }
}

#[test]
fn test_report_json() {
    let report = LinkReport {
        link: "users".to_string(),
        extracted: 3,
        loaded: 2,
        skipped: vec![SkippedRecord {
            table: "users".to_string(),
            key: "#2".to_string(),
            reason: "column 'user_code' is required".to_string(),
        }],
        failure: None,
    };

    assert_eq!(
        report_json(&report),
        json!({
            "link": "users",
            "extracted": 3,
            "loaded": 2,
            "skipped": [
                { "table": "users", "key": "#2", "reason": "column 'user_code' is required" }
            ],
            "failure": null,
        })
    );
}

#[tokio::test]
async fn test_definitions_command_succeeds() {
    let cli = Cli::try_parse_from(["formsync", "definitions"]).unwrap();
    assert_eq!(Runner::new(cli).run().await.unwrap(), 0);
}

#[tokio::test]
async fn test_status_without_saved_run() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("formsync.yaml");
    std::fs::write(
        &config,
        format!("app_dir: {}\n", dir.path().join("data").display()),
    )
    .unwrap();

    let cli = Cli::try_parse_from([
        "formsync".to_string(),
        "status".to_string(),
        "--config".to_string(),
        config.display().to_string(),
    ])
    .unwrap();
    assert_eq!(Runner::new(cli).run().await.unwrap(), 0);
}

#[tokio::test]
async fn test_check_schema_on_empty_database_reports_missing_tables() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("formsync.yaml");
    std::fs::write(&config, format!("app_dir: {}\n", dir.path().display())).unwrap();

    let cli = Cli::try_parse_from([
        "formsync".to_string(),
        "check-schema".to_string(),
        "--config".to_string(),
        config.display().to_string(),
    ])
    .unwrap();
    assert_eq!(Runner::new(cli).run().await.unwrap(), 1);
}
