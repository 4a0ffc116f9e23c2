use delta_sync_core::contract::{EnvelopeFormat, InvokeGranularity};
use delta_sync_core::convergence::run_once;
use delta_sync_core::delta::ExclusionSet;
use delta_sync_core::dispatch::{
    ArtifactStore, BatchDispatcher, BatchInvoker, DispatchResult, DispatchSettings,
};
use delta_sync_core::error::SyncError;
use delta_sync_core::job::{SyncJob, SyncJobConfig};
use delta_sync_core::keys::KeyRule;
use delta_sync_core::listing::{ListOptions, ObjectStore};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{expand_env_placeholder, parse_error_prefix};

fn default_audit_prefix() -> String {
    "delta-sync/audit".to_string()
}

/// One dispatch cycle requested through the Lambda entry point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchEvent {
    pub job: String,
    #[serde(default)]
    pub env: String,
    pub input_bucket: String,
    pub input_prefix: String,
    pub output_bucket: String,
    pub output_prefix: String,
    #[serde(default)]
    pub error_prefix: Option<String>,
    pub limit: usize,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub key_rule: KeyRule,
    #[serde(default)]
    pub envelope: EnvelopeFormat,
    #[serde(default)]
    pub granularity: InvokeGranularity,
    #[serde(default)]
    pub exclusions: Vec<String>,
    #[serde(default = "default_audit_prefix")]
    pub audit_prefix: String,
}

impl DispatchEvent {
    pub fn job_config(&self) -> Result<SyncJobConfig, SyncError> {
        let config = SyncJobConfig {
            name: self.job.clone(),
            input_bucket: expand_env_placeholder(&self.input_bucket, &self.env),
            input_prefix: self.input_prefix.clone(),
            output_bucket: expand_env_placeholder(&self.output_bucket, &self.env),
            output_prefix: self.output_prefix.clone(),
            error_prefix: self.error_prefix.as_deref().and_then(parse_error_prefix),
            limit: self.limit,
            key_rule: self.key_rule.clone(),
            exclusions: ExclusionSet::new(self.exclusions.iter().cloned()),
            list_options: ListOptions::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn dispatch_settings(&self, config: &SyncJobConfig, run_id: &str) -> DispatchSettings {
        DispatchSettings {
            job: config.name.clone(),
            run_id: run_id.to_string(),
            store_id: config.input_bucket.clone(),
            audit_prefix: self.audit_prefix.clone(),
            key_rule: config.key_rule.version_tag(),
            format: self.envelope,
            granularity: self.granularity,
            limit: config.limit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStatus {
    NothingToDo,
    Submitted,
    DryRun,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchSummary {
    pub job: String,
    pub status: DispatchStatus,
    pub backlog: usize,
    pub batch_size: usize,
    pub invocations: usize,
    pub audit_key: Option<String>,
}

/// `run_id` keeps each invocation's audit record apart; the Lambda entry
/// passes the request id.
pub fn handle_dispatch_event(
    event: Value,
    run_id: &str,
    store: &dyn ObjectStore,
    invoker: &dyn BatchInvoker,
    audit_store: &dyn ArtifactStore,
) -> Result<DispatchSummary, SyncError> {
    let event: DispatchEvent = serde_json::from_value(event)
        .map_err(|error| SyncError::configuration(format!("malformed dispatch event: {error}")))?;
    let config = event.job_config()?;
    let settings = event.dispatch_settings(&config, run_id);

    let job = SyncJob::new(&config, store);
    let dispatcher = BatchDispatcher::new(&settings, invoker, audit_store);
    let report = run_once(&job, &dispatcher, event.dry_run)?;

    let (status, batch_size, invocations, audit_key) = match report.result {
        DispatchResult::NothingToDo => (DispatchStatus::NothingToDo, 0, 0, None),
        DispatchResult::Submitted {
            batch,
            audit_key,
            invocations,
        } => (
            DispatchStatus::Submitted,
            batch.len(),
            invocations,
            Some(audit_key),
        ),
        DispatchResult::DryRun { batch, audit_key } => {
            (DispatchStatus::DryRun, batch.len(), 0, Some(audit_key))
        }
    };

    tracing::info!(
        component = "dispatch_lambda",
        event = "cycle_finished",
        job = config.name.as_str(),
        status = ?status,
        backlog = report.backlog,
        batch_size,
        invocations
    );
    Ok(DispatchSummary {
        job: config.name,
        status,
        backlog: report.backlog,
        batch_size,
        invocations,
        audit_key,
    })
}
