//! CLI runner - executes commands

use crate::cli::commands::{Cli, Commands};
use crate::config::IntegratorConfig;
use crate::database::Store;
use crate::definitions;
use crate::error::{Result, ResultExt};
use crate::http::{HttpApi, RemoteApi, Throttle, ThrottledFetcher};
use crate::integrator::Integrator;
use crate::pipeline::{load_definition, LinkReport, PipelineEngine, SourceContext};
use crate::schema;
use crate::state::StatusManager;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

/// CLI runner
pub struct Runner {
    cli: Cli,
}

impl Runner {
    /// Create a new runner
    pub fn new(cli: Cli) -> Self {
        Self { cli }
    }

    /// Run the CLI command, returning the process exit code
    pub async fn run(&self) -> Result<i32> {
        match &self.cli.command {
            Commands::Run => self.integrate().await,
            Commands::Status => self.status().await,
            Commands::CheckSchema => self.check_schema(),
            Commands::Pipeline { definition } => self.pipeline(definition).await,
            Commands::Definitions => Ok(self.list_definitions()),
        }
    }

    /// Load the config file, or the defaults when none was given
    fn load_config(&self) -> Result<IntegratorConfig> {
        match &self.cli.config {
            Some(path) => IntegratorConfig::load(path),
            None => {
                let config = IntegratorConfig::default();
                config.validate()?;
                Ok(config)
            }
        }
    }

    async fn integrate(&self) -> Result<i32> {
        let config = Arc::new(self.load_config()?);
        let integrator = Integrator::from_config(config)?;

        let cancel = integrator.cancel_handle();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupted, finishing the current item");
                cancel.cancel();
            }
        });

        let outcome = integrator.run().await;
        println!("{}", json!({ "outcome": format!("{outcome:?}") }));
        Ok(outcome.exit_code())
    }

    async fn status(&self) -> Result<i32> {
        let config = self.load_config()?;
        let manager = StatusManager::new(config.status_path());
        match manager.try_load().await? {
            Some(status) => {
                let pretty =
                    serde_json::to_string_pretty(&status).context("Failed to render status")?;
                println!("{pretty}");
            }
            None => println!("No status saved at {}", manager.path().display()),
        }
        Ok(0)
    }

    fn check_schema(&self) -> Result<i32> {
        let config = self.load_config()?;
        let definition = load_definition(&config.pipeline)?;
        let store = Store::open(config.database_path())?;

        let mut mismatched = 0;
        for table in &definition.tables {
            let result = schema::check(&store, table)?;
            if result.is_match() {
                println!("{}: ok", table.name);
                continue;
            }
            mismatched += 1;
            for discrepancy in result.discrepancies() {
                println!("{}: {discrepancy}", table.name);
            }
        }
        store.close()?;

        if mismatched > 0 {
            warn!("{mismatched} of {} tables do not match", definition.tables.len());
            return Ok(1);
        }
        Ok(0)
    }

    async fn pipeline(&self, name: &str) -> Result<i32> {
        let config = self.load_config()?;
        let definition = load_definition(name)?;

        let api: Arc<dyn RemoteApi> =
            Arc::new(HttpApi::new(config.api.http_config(config.api.resolve_token()))?);
        let fetcher = ThrottledFetcher::new(
            api,
            Throttle::new(&config.rate_limit)?,
            config.retry.clone(),
        );
        let store = Store::open(config.database_path())?;
        let engine = PipelineEngine::new(
            &store,
            SourceContext::new(fetcher, config.api.page.clone()),
        );

        let mut code = 0;
        for (table, result) in engine.prepare(&definition)? {
            for discrepancy in result.discrepancies() {
                println!("{table}: {discrepancy}");
                code = 1;
            }
        }
        if code == 0 {
            for report in engine.execute(&definition).await {
                if !report.is_clean() {
                    code = 1;
                }
                println!("{}", report_json(&report));
            }
        }
        drop(engine);
        store.close()?;
        Ok(code)
    }

    fn list_definitions(&self) -> i32 {
        for name in definitions::list_builtin() {
            println!("{name}");
        }
        0
    }
}

/// One line of `pipeline` output
pub(crate) fn report_json(report: &LinkReport) -> Value {
    let skipped: Vec<Value> = report
        .skipped
        .iter()
        .map(|s| json!({ "table": s.table, "key": s.key, "reason": s.reason }))
        .collect();
    json!({
        "link": report.link,
        "extracted": report.extracted,
        "loaded": report.loaded,
        "skipped": skipped,
        "failure": report.failure.as_ref().map(ToString::to_string),
    })
}
