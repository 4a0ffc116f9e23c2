use std::collections::HashSet;

use crate::keys::{CanonicalKey, KeyNormalizer};
use crate::listing::ObjectRecord;

/// Raw keys known to be permanently unprocessable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExclusionSet {
    keys: HashSet<String>,
}

impl ExclusionSet {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }

    /// One key per line; blank lines and `#` comments are skipped.
    pub fn from_lines(text: &str) -> Self {
        Self::new(
            text.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#')),
        )
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Whether a delta run processes new work or only retries known failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaMode {
    Forward,
    RetryFailures,
}

/// Ordered objects still requiring work, in input listing order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaSet {
    records: Vec<ObjectRecord>,
    mode: DeltaMode,
}

impl DeltaSet {
    pub fn empty() -> Self {
        Self {
            records: Vec::new(),
            mode: DeltaMode::Forward,
        }
    }

    pub fn records(&self) -> &[ObjectRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<ObjectRecord> {
        self.records
    }

    pub fn mode(&self) -> DeltaMode {
        self.mode
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

pub fn canonical_set<'a>(
    normalizer: &KeyNormalizer,
    keys: impl IntoIterator<Item = &'a str>,
) -> HashSet<CanonicalKey> {
    keys.into_iter().map(|key| normalizer.normalize(key)).collect()
}

/// Inputs minus everything already represented in the output markers.
///
/// A non-empty error-marker set narrows the result to inputs that previously
/// failed. Excluded raw keys never survive. Input order and duplicates are
/// preserved.
pub fn compute_delta(
    normalizer: &KeyNormalizer,
    inputs: &[ObjectRecord],
    output_markers: &[String],
    error_markers: &[String],
    excluded: &ExclusionSet,
) -> DeltaSet {
    let done = canonical_set(normalizer, output_markers.iter().map(String::as_str));
    let failed = canonical_set(normalizer, error_markers.iter().map(String::as_str));
    let mode = if failed.is_empty() {
        DeltaMode::Forward
    } else {
        DeltaMode::RetryFailures
    };

    let records = inputs
        .iter()
        .filter(|record| {
            let canonical = normalizer.normalize(&record.key);
            if done.contains(&canonical) {
                return false;
            }
            match mode {
                DeltaMode::Forward => true,
                DeltaMode::RetryFailures => failed.contains(&canonical),
            }
        })
        .filter(|record| !excluded.contains(&record.key))
        .cloned()
        .collect();

    DeltaSet { records, mode }
}
