use chrono::Utc;

use crate::contract::{
    batch_fingerprint, encode_envelope, AuditRecord, EnvelopeFormat, InvokeGranularity,
    AUDIT_RECORD_SCHEMA_VERSION,
};
use crate::delta::DeltaSet;
use crate::error::SyncError;
use crate::listing::ObjectRecord;
use crate::storage_keys::audit_object_key;

/// Invocation collaborator: triggers downstream processing for one payload.
pub trait BatchInvoker {
    fn invoke_batch(&self, payload: &[u8]) -> Result<(), String>;
}

/// Durable side location for audit records and fetched pages.
pub trait ArtifactStore {
    fn write_object(&self, key: &str, body: &[u8]) -> Result<(), String>;

    fn read_object(&self, key: &str) -> Result<Vec<u8>, String>;
}

/// Immutable prefix of a delta, dispatched at most once per cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    cycle: usize,
    records: Vec<ObjectRecord>,
}

impl Batch {
    pub fn from_delta(delta: &DeltaSet, limit: usize, cycle: usize) -> Self {
        let take = delta.len().min(limit);
        Self {
            cycle,
            records: delta.records()[..take].to_vec(),
        }
    }

    pub fn cycle(&self) -> usize {
        self.cycle
    }

    pub fn records(&self) -> &[ObjectRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchSettings {
    pub job: String,
    /// Distinguishes the audit records of separate runs of the same job.
    pub run_id: String,
    pub store_id: String,
    pub audit_prefix: String,
    pub key_rule: String,
    pub format: EnvelopeFormat,
    pub granularity: InvokeGranularity,
    pub limit: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchResult {
    NothingToDo,
    Submitted {
        batch: Batch,
        audit_key: String,
        invocations: usize,
    },
    DryRun {
        batch: Batch,
        audit_key: String,
    },
}

pub struct BatchDispatcher<'a> {
    settings: &'a DispatchSettings,
    invoker: &'a dyn BatchInvoker,
    audit_store: &'a dyn ArtifactStore,
}

impl<'a> BatchDispatcher<'a> {
    pub fn new(
        settings: &'a DispatchSettings,
        invoker: &'a dyn BatchInvoker,
        audit_store: &'a dyn ArtifactStore,
    ) -> Self {
        Self {
            settings,
            invoker,
            audit_store,
        }
    }

    pub fn limit(&self) -> usize {
        self.settings.limit
    }

    /// Serializes the whole batch, persists the audit record, then invokes.
    /// Nothing is invoked if serialization or the audit write fails.
    pub fn dispatch(
        &self,
        delta: &DeltaSet,
        cycle: usize,
        dry_run: bool,
    ) -> Result<DispatchResult, SyncError> {
        if self.settings.limit == 0 {
            return Err(SyncError::configuration("batch limit must be positive"));
        }
        if delta.is_empty() {
            return Ok(DispatchResult::NothingToDo);
        }

        let batch = Batch::from_delta(delta, self.settings.limit, cycle);
        let payloads = build_payloads(
            self.settings.format,
            self.settings.granularity,
            &self.settings.store_id,
            batch.records(),
        )?;

        let record = AuditRecord {
            record_schema: AUDIT_RECORD_SCHEMA_VERSION.to_string(),
            job: self.settings.job.clone(),
            run_id: self.settings.run_id.clone(),
            cycle,
            store_id: self.settings.store_id.clone(),
            key_rule: self.settings.key_rule.clone(),
            format: self.settings.format,
            granularity: self.settings.granularity,
            dry_run,
            batch_fingerprint: batch_fingerprint(&self.settings.store_id, batch.records()),
            written_at: Utc::now().to_rfc3339(),
            records: batch.records().to_vec(),
        };
        let audit_body = serde_json::to_vec_pretty(&record)?;
        let audit_key = audit_object_key(
            &self.settings.audit_prefix,
            &self.settings.job,
            &self.settings.run_id,
            cycle,
        );
        self.audit_store
            .write_object(&audit_key, &audit_body)
            .map_err(|message| SyncError::AuditWrite {
                key: audit_key.clone(),
                message,
            })?;
        tracing::info!(
            component = "dispatcher",
            event = "batch_persisted",
            cycle,
            records = batch.len(),
            audit_key = audit_key.as_str()
        );

        if dry_run {
            return Ok(DispatchResult::DryRun { batch, audit_key });
        }

        let invocations = invoke_all(self.invoker, &payloads)?;
        tracing::info!(
            component = "dispatcher",
            event = "batch_submitted",
            cycle,
            records = batch.len(),
            invocations
        );
        Ok(DispatchResult::Submitted {
            batch,
            audit_key,
            invocations,
        })
    }
}

/// Re-invokes a previously persisted batch.
pub fn replay_audit_record(body: &[u8], invoker: &dyn BatchInvoker) -> Result<usize, SyncError> {
    let record: AuditRecord = serde_json::from_slice(body)?;
    let payloads = build_payloads(
        record.format,
        record.granularity,
        &record.store_id,
        &record.records,
    )?;
    tracing::info!(
        component = "dispatcher",
        event = "replay_started",
        job = record.job.as_str(),
        run_id = record.run_id.as_str(),
        cycle = record.cycle,
        records = record.records.len()
    );
    invoke_all(invoker, &payloads)
}

fn build_payloads(
    format: EnvelopeFormat,
    granularity: InvokeGranularity,
    store_id: &str,
    records: &[ObjectRecord],
) -> Result<Vec<Vec<u8>>, SyncError> {
    let payloads = match granularity {
        InvokeGranularity::Batch => vec![encode_envelope(format, store_id, records)?],
        InvokeGranularity::PerRecord => records
            .iter()
            .map(|record| encode_envelope(format, store_id, std::slice::from_ref(record)))
            .collect::<Result<Vec<_>, _>>()?,
    };
    Ok(payloads)
}

fn invoke_all(invoker: &dyn BatchInvoker, payloads: &[Vec<u8>]) -> Result<usize, SyncError> {
    for (index, payload) in payloads.iter().enumerate() {
        invoker.invoke_batch(payload).map_err(|error| {
            SyncError::Invocation(format!(
                "payload {} of {}: {error}",
                index + 1,
                payloads.len()
            ))
        })?;
    }
    Ok(payloads.len())
}
