use std::fmt;

use thiserror::Error;

/// Pipeline stage an error originated from; surfaced in fatal log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStage {
    Configuration,
    Listing,
    Dispatch,
    Fetching,
    Relocation,
}

impl SyncStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::Listing => "listing",
            Self::Dispatch => "dispatch",
            Self::Fetching => "fetching",
            Self::Relocation => "relocation",
        }
    }
}

impl fmt::Display for SyncStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("object store unavailable during {stage}: {message}")]
    StoreUnavailable { stage: SyncStage, message: String },
    #[error("failed to serialize batch envelope: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("failed to persist audit record '{key}': {message}")]
    AuditWrite { key: String, message: String },
    #[error("batch invocation failed: {0}")]
    Invocation(String),
    #[error("invalid configuration: {0}")]
    Configuration(String),
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

impl SyncError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn stage(&self) -> SyncStage {
        match self {
            Self::StoreUnavailable { stage, .. } => *stage,
            Self::Serialization(_) | Self::AuditWrite { .. } | Self::Invocation(_) => {
                SyncStage::Dispatch
            }
            Self::Configuration(_) => SyncStage::Configuration,
            Self::Fetch(_) => SyncStage::Fetching,
        }
    }
}

/// Failures of the paged fetcher. A logically empty result is never an error.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("gave up after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
    #[error("unexpected HTTP status {status} from {url}")]
    Status { status: u16, url: String },
    #[error("malformed response from {url}: {message}")]
    Malformed { url: String, message: String },
    #[error("request could not be built: {0}")]
    Request(String),
}
