use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::listing::ObjectRecord;

pub const AUDIT_RECORD_SCHEMA_VERSION: &str = "v1";

/// Wire shape handed to the invocation collaborator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnvelopeFormat {
    /// `{"records": [{"store_id", "key", "size"}]}`
    #[default]
    Compact,
    /// `{"Records": [{"s3": {"bucket": {"name"}, "object": {"key", "size"}}}]}`
    S3Event,
}

impl EnvelopeFormat {
    pub fn parse(raw: &str) -> Result<Self, String> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "s3-event" | "s3_event" | "s3event" => Ok(Self::S3Event),
            _ => Err(format!(
                "Unsupported envelope format '{raw}' (expected compact or s3-event)"
            )),
        }
    }
}

/// Whether a batch is handed over in one call or one call per record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InvokeGranularity {
    #[default]
    Batch,
    PerRecord,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeRecord {
    pub store_id: String,
    pub key: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactEnvelope {
    pub records: Vec<EnvelopeRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3EventEnvelope {
    #[serde(rename = "Records")]
    pub records: Vec<S3EventRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3EventRecord {
    pub s3: S3EventEntity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3EventEntity {
    pub bucket: S3EventBucket,
    pub object: S3EventObject,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3EventBucket {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3EventObject {
    pub key: String,
    pub size: u64,
}

pub fn encode_envelope(
    format: EnvelopeFormat,
    store_id: &str,
    records: &[ObjectRecord],
) -> Result<Vec<u8>, serde_json::Error> {
    match format {
        EnvelopeFormat::Compact => serde_json::to_vec(&CompactEnvelope {
            records: records
                .iter()
                .map(|record| EnvelopeRecord {
                    store_id: store_id.to_string(),
                    key: record.key.clone(),
                    size: record.size,
                })
                .collect(),
        }),
        EnvelopeFormat::S3Event => serde_json::to_vec(&S3EventEnvelope {
            records: records
                .iter()
                .map(|record| S3EventRecord {
                    s3: S3EventEntity {
                        bucket: S3EventBucket {
                            name: store_id.to_string(),
                        },
                        object: S3EventObject {
                            key: record.key.clone(),
                            size: record.size,
                        },
                    },
                })
                .collect(),
        }),
    }
}

/// Persisted before invocation so a batch can be audited or replayed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub record_schema: String,
    pub job: String,
    #[serde(default)]
    pub run_id: String,
    pub cycle: usize,
    pub store_id: String,
    pub key_rule: String,
    pub format: EnvelopeFormat,
    pub granularity: InvokeGranularity,
    pub dry_run: bool,
    pub batch_fingerprint: String,
    pub written_at: String,
    pub records: Vec<ObjectRecord>,
}

pub fn batch_fingerprint(store_id: &str, records: &[ObjectRecord]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(stable_contract_json((store_id, records)));
    format!("{:x}", hasher.finalize())
}

pub fn stable_contract_json(value: impl Serialize) -> String {
    serde_json::to_string(&value).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::*;

    fn sample_records() -> Vec<ObjectRecord> {
        vec![ObjectRecord::new("in/A", 10), ObjectRecord::new("in/C", 7)]
    }

    #[test]
    fn compact_envelope_maps_each_record_to_a_triple() {
        let bytes = encode_envelope(EnvelopeFormat::Compact, "input-bucket", &sample_records())
            .expect("envelope should encode");
        let value: Value = serde_json::from_slice(&bytes).expect("valid json");

        assert_eq!(
            value,
            json!({
                "records": [
                    {"store_id": "input-bucket", "key": "in/A", "size": 10},
                    {"store_id": "input-bucket", "key": "in/C", "size": 7}
                ]
            })
        );
    }

    #[test]
    fn s3_event_envelope_matches_notification_shape() {
        let bytes = encode_envelope(EnvelopeFormat::S3Event, "input-bucket", &sample_records()[..1])
            .expect("envelope should encode");
        let value: Value = serde_json::from_slice(&bytes).expect("valid json");

        assert_eq!(
            value,
            json!({
                "Records": [
                    {"s3": {"bucket": {"name": "input-bucket"}, "object": {"key": "in/A", "size": 10}}}
                ]
            })
        );
    }

    #[test]
    fn fingerprint_depends_on_store_and_order() {
        let records = sample_records();
        let mut reversed = records.clone();
        reversed.reverse();

        assert_eq!(
            batch_fingerprint("bucket", &records),
            batch_fingerprint("bucket", &records)
        );
        assert_ne!(
            batch_fingerprint("bucket", &records),
            batch_fingerprint("bucket", &reversed)
        );
        assert_ne!(
            batch_fingerprint("bucket", &records),
            batch_fingerprint("other", &records)
        );
    }

    #[test]
    fn parses_envelope_format_names() {
        assert_eq!(EnvelopeFormat::parse("S3-Event"), Ok(EnvelopeFormat::S3Event));
        assert_eq!(EnvelopeFormat::parse("compact"), Ok(EnvelopeFormat::Compact));
        assert!(EnvelopeFormat::parse("xml").is_err());
    }
}
