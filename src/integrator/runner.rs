//! Run driver: stage loop, initialization, shutdown

use super::types::{CancelHandle, Flow, RunOutcome};
use crate::config::IntegratorConfig;
use crate::database::Store;
use crate::error::{Error, Result, ResultExt};
use crate::http::{HttpApi, RemoteApi, Throttle, ThrottledFetcher};
use crate::pipeline::{self, PipelineDefinition, PipelineEngine, SourceContext};
use crate::state::{
    AppStatus, ErrorKind, ErrorRecord, InitializingStatus, Progress, ProgressStatus, Stage,
    StatusManager, TempIndex, TerminatingStatus,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Drives one integration run through every stage
pub struct Integrator {
    config: Arc<IntegratorConfig>,
    api: Arc<dyn RemoteApi>,
    cancel: CancelHandle,
}

impl Integrator {
    pub fn new(config: Arc<IntegratorConfig>, api: Arc<dyn RemoteApi>) -> Self {
        Self {
            config,
            api,
            cancel: CancelHandle::new(),
        }
    }

    /// Integrator talking to the configured HTTP API
    ///
    /// A missing token is not an error here; the run reports it at INIT_TOKEN.
    pub fn from_config(config: Arc<IntegratorConfig>) -> Result<Self> {
        let http = config.api.http_config(config.api.resolve_token());
        let api: Arc<dyn RemoteApi> = Arc::new(HttpApi::new(http)?);
        Ok(Self::new(config, api))
    }

    pub fn config(&self) -> &IntegratorConfig {
        &self.config
    }

    /// Handle that cancels this integrator's runs
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Request cancellation; idempotent
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Run every stage, resuming from the persisted status
    pub async fn run(&self) -> RunOutcome {
        let mut run = Run::start(self).await;
        let flow = run.drive().await;
        run.finish(flow).await
    }
}

// ============================================================================
// Run state
// ============================================================================

/// Everything one run owns
pub(super) struct Run<'i> {
    pub(super) config: &'i IntegratorConfig,
    cancel: &'i CancelHandle,
    api: Arc<dyn RemoteApi>,
    status: StatusManager,
    /// Status as loaded at startup
    pub(super) previous: AppStatus,
    /// Status produced by this run
    pub(super) current: AppStatus,
    pub(super) fetcher: Option<ThrottledFetcher>,
    pub(super) definition: Option<PipelineDefinition>,
    pub(super) store: Option<Store>,
    /// Only set once loaded, so an early halt never overwrites the file
    pub(super) temp: Option<TempIndex>,
}

impl<'i> Run<'i> {
    async fn start(integrator: &'i Integrator) -> Run<'i> {
        let config = integrator.config.as_ref();
        let status = StatusManager::new(config.status_path());
        let previous = status.load().await;

        let mut current = AppStatus::continuing(&previous);
        if previous.progress.is_completed() {
            info!("Previous run completed, starting a new run");
            current.progress = Progress::new();
        } else if previous.progress.stage() != Stage::START {
            info!("Resuming from {}", previous.progress);
        }

        Run {
            config,
            cancel: &integrator.cancel,
            api: integrator.api.clone(),
            status,
            previous,
            current,
            fetcher: None,
            definition: None,
            store: None,
            temp: None,
        }
    }

    pub(super) fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    async fn drive(&mut self) -> Flow {
        for stage in Stage::sequence() {
            if self.is_cancelled() {
                return Flow::Cancelled;
            }
            // Initialization acquires resources, so it runs on every start
            if stage.status() != ProgressStatus::Initializing
                && self.current.progress.has_passed(stage)
            {
                debug!("{stage} already done");
                continue;
            }
            self.current.progress.advance(stage);
            info!("{stage}");

            let flow = match self.step(stage).await {
                Ok(flow) => flow,
                Err(e) => Flow::Fatal(ErrorRecord::from_error(ErrorKind::UnknownError, &e)),
            };
            if !matches!(flow, Flow::Next) {
                return flow;
            }
            if let Err(e) = self.save().await {
                return Flow::Fatal(ErrorRecord::from_error(ErrorKind::UnknownError, &e));
            }
        }
        Flow::Next
    }

    async fn step(&mut self, stage: Stage) -> Result<Flow> {
        match stage {
            Stage::Initializing(s) => self.initialize(s).await,
            Stage::BasicData(s) => self.basic_data(s).await,
            Stage::FormOutline(s) => self.form_outline(s).await,
            Stage::FormDetail(s) => self.form_detail(s).await,
            Stage::Terminating(s) => self.terminate(s).await,
        }
    }

    /// Persist the merge of the previous and current status
    async fn save(&self) -> Result<()> {
        self.status
            .save(&AppStatus::merge(&self.previous, &self.current))
            .await
    }

    async fn finish(mut self, flow: Flow) -> RunOutcome {
        let outcome = match flow {
            Flow::Next => {
                if let Err(e) = self.save().await {
                    error!("Failed to save status: {e}");
                }
                info!("Run completed");
                return RunOutcome::Completed;
            }
            Flow::Cancelled => {
                info!("Run cancelled at {}", self.current.progress);
                RunOutcome::Cancelled
            }
            Flow::Fatal(record) => {
                error!("Run halted at {}: {record}", self.current.progress);
                self.cancel.cancel();
                self.current.current_error = Some(record.clone());
                RunOutcome::Failed(record)
            }
        };

        if let Some(store) = self.store.take() {
            if let Err(e) = store.close() {
                warn!("{e}");
            }
        }
        if let Some(ref temp) = self.temp {
            if let Err(e) = temp.persist().await {
                warn!("Failed to persist temp index: {e}");
            }
        }
        if let Err(e) = self.save().await {
            error!("Failed to save status: {e}");
        }
        outcome
    }

    // ========================================================================
    // Resources
    // ========================================================================

    pub(super) fn fetcher(&self) -> Result<&ThrottledFetcher> {
        self.fetcher
            .as_ref()
            .ok_or_else(|| Error::state("fetcher is not initialized"))
    }

    pub(super) fn definition(&self) -> Result<&PipelineDefinition> {
        self.definition
            .as_ref()
            .ok_or_else(|| Error::state("pipeline definition is not loaded"))
    }

    pub(super) fn store(&self) -> Result<&Store> {
        self.store
            .as_ref()
            .ok_or_else(|| Error::state("database is not open"))
    }

    pub(super) fn engine(&self) -> Result<PipelineEngine<'_>> {
        let sources = SourceContext::new(self.fetcher()?.clone(), self.config.api.page.clone());
        Ok(PipelineEngine::new(self.store()?, sources))
    }

    // ========================================================================
    // INITIALIZING
    // ========================================================================

    async fn initialize(&mut self, status: InitializingStatus) -> Result<Flow> {
        match status {
            InitializingStatus::LoadingConfig => {
                self.config.validate()?;
                self.current.config_file_path = self
                    .config
                    .source_path
                    .as_ref()
                    .map(|p| p.display().to_string());
                let throttle = Throttle::new(&self.config.rate_limit)?;
                self.fetcher = Some(ThrottledFetcher::new(
                    self.api.clone(),
                    throttle,
                    self.config.retry.clone(),
                ));
                let definition = pipeline::load_definition(&self.config.pipeline)?;
                debug!(
                    "Loaded pipeline '{}' with {} tables",
                    definition.name,
                    definition.tables.len()
                );
                self.definition = Some(definition);
            }
            InitializingStatus::InitDirectories => {
                for dir in [self.config.app_dir.clone(), self.config.temp_dir()] {
                    tokio::fs::create_dir_all(&dir)
                        .await
                        .with_context(|| format!("Failed to create {}", dir.display()))?;
                }
                let temp = TempIndex::load(self.config.temp_index_path()).await;
                if !temp.is_empty() {
                    info!("Temp index holds {} pending requests", temp.pending());
                }
                self.temp = Some(temp);
            }
            InitializingStatus::InitToken => {
                if let Err(e) = self.fetcher()?.check().await {
                    return Ok(Flow::Fatal(ErrorRecord::from_fetch(&e)));
                }
                debug!("API token accepted");
            }
            InitializingStatus::InitDbConnection => {
                match Store::open(self.config.database_path()) {
                    Ok(store) => self.store = Some(store),
                    Err(e) => {
                        return Ok(Flow::Fatal(ErrorRecord::from_error(
                            ErrorKind::DatabaseConnectionFailed,
                            &e,
                        )))
                    }
                }
            }
            InitializingStatus::InitDbTables => {
                let results = match self.engine()?.prepare(self.definition()?) {
                    Ok(results) => results,
                    Err(e) => {
                        return Ok(Flow::Fatal(ErrorRecord::from_error(
                            ErrorKind::DatabaseConnectionFailed,
                            &e,
                        )))
                    }
                };
                let mut mismatches = serde_json::Map::new();
                for (table, result) in results {
                    if !result.is_match() {
                        let found: Vec<String> =
                            result.discrepancies().iter().map(ToString::to_string).collect();
                        warn!("Table '{table}' does not match: {}", found.join("; "));
                        mismatches.insert(table, json!(found));
                    }
                }
                if !mismatches.is_empty() {
                    let tables: Vec<&str> = mismatches.keys().map(String::as_str).collect();
                    let message = format!(
                        "Tables do not match the pipeline definition: {}",
                        tables.join(", ")
                    );
                    return Ok(Flow::Fatal(
                        ErrorRecord::new(ErrorKind::SchemaMismatch, message)
                            .with_detail(serde_json::Value::Object(mismatches)),
                    ));
                }
            }
            InitializingStatus::Completed => {}
        }
        Ok(Flow::Next)
    }

    // ========================================================================
    // TERMINATING
    // ========================================================================

    async fn terminate(&mut self, status: TerminatingStatus) -> Result<Flow> {
        match status {
            TerminatingStatus::CloseDbConnection => {
                if let Some(store) = self.store.take() {
                    store.close()?;
                }
            }
            TerminatingStatus::DeleteTempFiles => {
                if let Some(ref temp) = self.temp {
                    temp.persist().await?;
                    if !temp.is_empty() {
                        info!("{} requests remain pending for the next run", temp.pending());
                    }
                }
            }
            TerminatingStatus::Completed => {
                self.current.current_error = None;
            }
        }
        Ok(Flow::Next)
    }
}
