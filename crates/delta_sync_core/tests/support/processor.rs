use std::collections::BTreeSet;
use std::sync::Mutex;
use std::time::Duration;

use delta_sync_core::contract::CompactEnvelope;
use delta_sync_core::dispatch::BatchInvoker;
use delta_sync_core::sleep::Sleeper;

use super::bucket::MemoryStore;

/// Downstream stand-in: writes an output marker for every dispatched key, or an
/// error marker for keys it is told to reject.
pub struct MarkerWritingProcessor<'a> {
    store: &'a MemoryStore,
    output_bucket: String,
    output_prefix: String,
    error_prefix: String,
    rejected: BTreeSet<String>,
    pub received: Mutex<Vec<String>>,
}

impl<'a> MarkerWritingProcessor<'a> {
    pub fn new(store: &'a MemoryStore, output_bucket: &str, output_prefix: &str) -> Self {
        Self {
            store,
            output_bucket: output_bucket.to_string(),
            output_prefix: output_prefix.to_string(),
            error_prefix: "errors/".to_string(),
            rejected: BTreeSet::new(),
            received: Mutex::new(Vec::new()),
        }
    }

    pub fn rejecting(mut self, key: &str) -> Self {
        self.rejected.insert(key.to_string());
        self
    }

    pub fn received(&self) -> Vec<String> {
        self.received.lock().expect("poisoned mutex").clone()
    }
}

impl BatchInvoker for MarkerWritingProcessor<'_> {
    fn invoke_batch(&self, payload: &[u8]) -> Result<(), String> {
        let envelope: CompactEnvelope =
            serde_json::from_slice(payload).map_err(|error| error.to_string())?;
        for record in envelope.records {
            let file_name = record.key.rsplit('/').next().unwrap_or(&record.key);
            let stem = file_name.split('.').next().unwrap_or(file_name);
            let prefix = if self.rejected.contains(&record.key) {
                &self.error_prefix
            } else {
                &self.output_prefix
            };
            self.store
                .put(&self.output_bucket, &format!("{prefix}{stem}.parquet"), 1);
            self.received
                .lock()
                .expect("poisoned mutex")
                .push(record.key);
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct NoWait {
    pub waits: Mutex<Vec<Duration>>,
}

impl Sleeper for NoWait {
    fn sleep(&self, duration: Duration) {
        self.waits.lock().expect("poisoned mutex").push(duration);
    }
}
