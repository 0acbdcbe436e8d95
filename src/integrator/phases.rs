//! Work phases: basic data, form outlines, request details

use super::runner::Run;
use super::types::Flow;
use crate::error::{Error, Result};
use crate::pipeline::{LinkFailure, LinkReport};
use crate::state::{
    ApiDomain, AppStatus, BasicDataStatus, ErrorKind, ErrorRecord, FormDetailStatus,
    FormOutlineStatus, TempIndex,
};
use crate::types::JsonValue;
use chrono::Utc;
use serde_json::json;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

impl Run<'_> {
    // ========================================================================
    // BASIC_DATA
    // ========================================================================

    pub(super) async fn basic_data(&mut self, status: BasicDataStatus) -> Result<Flow> {
        let config = self.config;
        if config.skip.basic_data {
            info!("Basic data skipped by configuration");
            return Ok(Flow::Next);
        }
        let (link, domain) = match status {
            BasicDataStatus::GetUser => (&config.domains.users_link, ApiDomain::Users),
            BasicDataStatus::GetGroup => (&config.domains.groups_link, ApiDomain::Groups),
            BasicDataStatus::GetPosition => (&config.domains.positions_link, ApiDomain::Positions),
        };
        self.run_link(link, domain, config.ignore_basic_data_error)
            .await
    }

    async fn run_link(
        &mut self,
        link_name: &str,
        domain: ApiDomain,
        tolerate_load_errors: bool,
    ) -> Result<Flow> {
        let report = {
            let definition = self.definition()?;
            let link = definition.link(link_name)?;
            self.engine()?.execute_link(definition, link).await
        };
        Ok(absorb_report(
            &mut self.current,
            domain,
            &report,
            tolerate_load_errors,
        ))
    }

    // ========================================================================
    // FORM_OUTLINE
    // ========================================================================

    pub(super) async fn form_outline(&mut self, status: FormOutlineStatus) -> Result<Flow> {
        let config = self.config;
        if config.skip.form_outline {
            info!("Form outlines skipped by configuration");
            return Ok(Flow::Next);
        }
        match status {
            FormOutlineStatus::GetFormInfo => {
                self.run_link(&config.domains.forms_link, ApiDomain::Forms, true)
                    .await
            }
            FormOutlineStatus::GetOutline => self.fetch_outlines().await,
        }
    }

    /// Forms still to fetch: those not done in this stage plus those that
    /// failed before, least recently accessed first
    fn outline_targets(&self) -> Result<Vec<i64>> {
        let domains = &self.config.domains;
        let known = self
            .store()?
            .select_ids(&domains.forms_table, &domains.form_id_column)?;

        let mut targets: BTreeSet<i64> = known
            .into_iter()
            .filter(|id| !self.current.progress.has_specific(&id.to_string()))
            .collect();
        for id in self.previous.fetch_failure_record.ids(ApiDomain::FormOutline) {
            match id.parse::<i64>() {
                Ok(id) => {
                    targets.insert(id);
                }
                Err(_) => warn!("Ignoring malformed form id '{id}' in failure record"),
            }
        }

        let mut ordered: Vec<i64> = targets.into_iter().collect();
        ordered.sort_by_key(|id| (self.current.form_api_last_access.get(id).copied(), *id));
        Ok(ordered)
    }

    async fn fetch_outlines(&mut self) -> Result<Flow> {
        let config = self.config;
        let fetcher = self.fetcher()?.clone();
        let targets = self.outline_targets()?;
        info!("Fetching outlines for {} forms", targets.len());

        for form_id in targets {
            if self.is_cancelled() {
                return Ok(Flow::Cancelled);
            }
            let key = form_id.to_string();
            let since = self.current.form_api_last_access.get(&form_id).copied();
            let started = Utc::now();
            let temp = temp_index(&mut self.temp)?;
            temp.begin_group(form_id, started);

            let url = config.api.outline_url(form_id, since);
            match fetcher.fetch_all(&url, &config.api.page).await {
                Ok(records) => {
                    let ids = outline_ids(&records, &config.api.outline_id_field);
                    debug!("Form {form_id}: {} requests", ids.len());
                    for id in ids {
                        temp.add_pending(form_id, id);
                    }
                    temp.set_success(form_id, true);
                    if temp.group(form_id).is_some_and(|g| g.ids.is_empty()) {
                        temp.remove_group(form_id);
                        self.current.touch_last_access(form_id, started);
                    }
                    temp.persist().await?;
                    self.current.progress.add_specific(key.clone());
                    self.current
                        .fetch_failure_record
                        .remove(ApiDomain::FormOutline, &key);
                }
                Err(e) if e.is_fatal() => return Ok(Flow::Fatal(ErrorRecord::from_fetch(&e))),
                Err(e) => {
                    warn!("Outline of form {form_id} failed: {e}");
                    if temp.group(form_id).is_some_and(|g| g.ids.is_empty()) {
                        temp.remove_group(form_id);
                    }
                    temp.persist().await?;
                    self.current
                        .fetch_failure_record
                        .add(ApiDomain::FormOutline, key);
                }
            }
        }
        Ok(Flow::Next)
    }

    // ========================================================================
    // FORM_DETAIL
    // ========================================================================

    pub(super) async fn form_detail(&mut self, status: FormDetailStatus) -> Result<Flow> {
        if self.config.skip.form_detail {
            info!("Request details skipped by configuration");
            return Ok(Flow::Next);
        }
        match status {
            FormDetailStatus::SeekTarget => self.seek_targets().await,
            FormDetailStatus::GetDetail => self.fetch_details().await,
        }
    }

    /// Queue every request that failed before into the temp index
    async fn seek_targets(&mut self) -> Result<Flow> {
        let failed: BTreeSet<String> = [
            &self.previous.fetch_failure_record,
            &self.previous.db_save_failure_record,
            &self.current.fetch_failure_record,
            &self.current.db_save_failure_record,
        ]
        .into_iter()
        .flat_map(|record| record.ids(ApiDomain::RequestDetail))
        .map(String::from)
        .collect();

        let temp = temp_index(&mut self.temp)?;
        let mut queued = 0;
        for item in &failed {
            let Some((form_id, request_id)) = split_detail_id(item) else {
                warn!("Ignoring malformed request id '{item}' in failure record");
                continue;
            };
            // Groups created here keep success = false
            temp.add_pending(form_id, request_id);
            queued += 1;
        }
        if queued > 0 {
            info!("Queued {queued} previously failed requests");
        }
        temp.persist().await?;
        Ok(Flow::Next)
    }

    async fn fetch_details(&mut self) -> Result<Flow> {
        let config = self.config;
        let fetcher = self.fetcher()?.clone();

        let temp = temp_index(&mut self.temp)?;
        let drained: Vec<i64> = temp
            .groups()
            .filter(|(_, group)| group.ids.is_empty())
            .map(|(form_id, _)| form_id)
            .collect();
        for form_id in drained {
            if let Some(group) = temp.remove_group(form_id) {
                if let (true, Some(at)) = (group.success, group.last_access) {
                    self.current.touch_last_access(form_id, at);
                }
            }
        }
        let work: Vec<(i64, Vec<String>)> = temp
            .groups()
            .map(|(form_id, group)| (form_id, group.ids.clone()))
            .collect();
        info!(
            "Fetching {} request details across {} forms",
            temp.pending(),
            work.len()
        );

        for (form_id, request_ids) in work {
            for request_id in request_ids {
                if self.is_cancelled() {
                    return Ok(Flow::Cancelled);
                }
                let item = format!("{form_id}:{request_id}");

                let detail = match fetcher.fetch_one(&config.api.detail_url(&request_id)).await {
                    Ok(detail) => detail,
                    Err(e) if e.is_fatal() => return Ok(Flow::Fatal(ErrorRecord::from_fetch(&e))),
                    Err(e) => {
                        warn!("Request {item} failed: {e}");
                        self.current
                            .fetch_failure_record
                            .add(ApiDomain::RequestDetail, item);
                        continue;
                    }
                };

                let report = {
                    let definition = self.definition()?;
                    let link = definition.link(&config.domains.detail_link)?;
                    self.engine()?.load_records(definition, link, [detail])
                };
                if let Some(ref failure) = report.failure {
                    if failure.is_fatal() {
                        return Ok(Flow::Fatal(fatal_record(failure)));
                    }
                }
                if !report.is_clean() {
                    warn!("Request {item} was not stored completely");
                    self.current
                        .db_save_failure_record
                        .add(ApiDomain::RequestDetail, item);
                    continue;
                }

                self.current
                    .fetch_failure_record
                    .remove(ApiDomain::RequestDetail, &item);
                self.current
                    .db_save_failure_record
                    .remove(ApiDomain::RequestDetail, &item);
                let temp = temp_index(&mut self.temp)?;
                if let Some(group) = temp.complete_item(form_id, &request_id) {
                    debug!("Form {form_id} drained");
                    if let (true, Some(at)) = (group.success, group.last_access) {
                        self.current.touch_last_access(form_id, at);
                    }
                }
                temp.persist().await?;
            }
        }
        Ok(Flow::Next)
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn temp_index(slot: &mut Option<TempIndex>) -> Result<&mut TempIndex> {
    slot.as_mut()
        .ok_or_else(|| Error::state("temp index is not loaded"))
}

/// Record what a link run left behind and decide whether the run goes on
fn absorb_report(
    status: &mut AppStatus,
    domain: ApiDomain,
    report: &LinkReport,
    tolerate_load_errors: bool,
) -> Flow {
    for skipped in &report.skipped {
        status
            .db_save_failure_record
            .add(domain, skipped.key.clone());
    }
    if let (false, Some(first)) = (tolerate_load_errors, report.skipped.first()) {
        return Flow::Fatal(
            ErrorRecord::new(
                ErrorKind::LoadFailed,
                format!("Record '{}' could not be stored: {}", first.key, first.reason),
            )
            .with_detail(json!({ "table": first.table, "key": first.key })),
        );
    }
    let Some(ref failure) = report.failure else {
        return Flow::Next;
    };

    let is_load = matches!(failure, LinkFailure::Load { .. });
    if failure.is_fatal() || (is_load && !tolerate_load_errors) {
        return Flow::Fatal(fatal_record(failure));
    }
    warn!("Link '{}' stopped early: {failure}", report.link);
    match failure {
        LinkFailure::Extract { source_name, .. } => {
            let id = failure
                .fetch_error()
                .map_or_else(|| source_name.clone(), |e| e.url.clone());
            status.fetch_failure_record.add(domain, id);
        }
        LinkFailure::Load { key, .. } => {
            status.db_save_failure_record.add(domain, key.clone());
        }
    }
    Flow::Next
}

fn fatal_record(failure: &LinkFailure) -> ErrorRecord {
    match failure {
        LinkFailure::Extract { error, .. } => match failure.fetch_error() {
            Some(fetch) => ErrorRecord::from_fetch(fetch),
            None => ErrorRecord::from_error(ErrorKind::UnknownError, error),
        },
        LinkFailure::Load { table, key, error } => {
            ErrorRecord::from_error(ErrorKind::LoadFailed, error)
                .with_detail(json!({ "table": table, "key": key }))
        }
    }
}

/// Request ids named by outline records, in listing order
fn outline_ids(records: &[JsonValue], field: &str) -> Vec<String> {
    records
        .iter()
        .filter_map(|record| match record.get(field) {
            Some(JsonValue::String(id)) => Some(id.clone()),
            Some(JsonValue::Number(id)) => Some(id.to_string()),
            _ => {
                warn!("Outline record without '{field}' ignored");
                None
            }
        })
        .collect()
}

/// Split a `form_id:request_id` failure id
fn split_detail_id(item: &str) -> Option<(i64, &str)> {
    let (form_id, request_id) = item.split_once(':')?;
    let form_id = form_id.trim().parse().ok()?;
    (!request_id.is_empty()).then_some((form_id, request_id))
}
