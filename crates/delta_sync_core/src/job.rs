use crate::delta::{compute_delta, DeltaSet, ExclusionSet};
use crate::error::SyncError;
use crate::keys::{KeyNormalizer, KeyRule};
use crate::listing::{ListOptions, ObjectStore, ObjectStoreLister};

/// Where inputs and markers live for one delta-sync job. Read once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncJobConfig {
    pub name: String,
    pub input_bucket: String,
    pub input_prefix: String,
    pub output_bucket: String,
    pub output_prefix: String,
    /// Error markers live in the output bucket under this prefix.
    pub error_prefix: Option<String>,
    pub limit: usize,
    pub key_rule: KeyRule,
    pub exclusions: ExclusionSet,
    pub list_options: ListOptions,
}

impl SyncJobConfig {
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.name.trim().is_empty() {
            return Err(SyncError::configuration("job name cannot be empty"));
        }
        if self.input_bucket.trim().is_empty() || self.output_bucket.trim().is_empty() {
            return Err(SyncError::configuration("input and output buckets are required"));
        }
        if self.limit == 0 {
            return Err(SyncError::configuration("limit must be a positive integer"));
        }
        if let KeyRule::Delimited { delimiter } = &self.key_rule {
            if delimiter.is_empty() {
                return Err(SyncError::configuration("key delimiter cannot be empty"));
            }
        }
        Ok(())
    }
}

/// Lists both sides of a job and computes its current delta.
pub struct SyncJob<'a> {
    config: &'a SyncJobConfig,
    store: &'a dyn ObjectStore,
    normalizer: KeyNormalizer,
}

impl<'a> SyncJob<'a> {
    pub fn new(config: &'a SyncJobConfig, store: &'a dyn ObjectStore) -> Self {
        Self {
            config,
            store,
            normalizer: KeyNormalizer::new(config.key_rule.clone()),
        }
    }

    pub fn config(&self) -> &SyncJobConfig {
        self.config
    }

    pub fn current_delta(&self) -> Result<DeltaSet, SyncError> {
        let config = self.config;
        let inputs = ObjectStoreLister::with_options(self.store, config.list_options)
            .list(&config.input_bucket, &config.input_prefix)?;
        let markers = ObjectStoreLister::new(self.store);
        let outputs = markers.list_markers(&config.output_bucket, &config.output_prefix)?;
        let errors = match &config.error_prefix {
            Some(prefix) => markers.list_markers(&config.output_bucket, prefix)?,
            None => Vec::new(),
        };

        let delta = compute_delta(
            &self.normalizer,
            &inputs,
            &outputs,
            &errors,
            &config.exclusions,
        );
        tracing::info!(
            component = "delta",
            event = "delta_computed",
            job = config.name.as_str(),
            inputs = inputs.len(),
            outputs = outputs.len(),
            errors = errors.len(),
            excluded = config.exclusions.len(),
            pending = delta.len(),
            mode = ?delta.mode()
        );
        Ok(delta)
    }
}
