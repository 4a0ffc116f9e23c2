use std::fmt;

use serde::{Deserialize, Serialize};

pub const DEFAULT_KEY_DELIMITER: &str = "_timestamp";

/// Identity of a unit of work, independent of path prefix and suffix markers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CanonicalKey(String);

impl CanonicalKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CanonicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How raw keys collapse into canonical keys.
///
/// Changing the rule for an existing prefix invalidates every earlier
/// idempotency decision, so the rule travels with the job configuration and
/// its [`KeyRule::version_tag`] is written into each audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum KeyRule {
    /// Portion before the first `delimiter`, then the last path segment.
    Delimited { delimiter: String },
    /// Portion before the first `.` anywhere in the key, then the last path
    /// segment. A dotted directory name therefore cuts the key early.
    Stem,
}

impl Default for KeyRule {
    fn default() -> Self {
        Self::Delimited {
            delimiter: DEFAULT_KEY_DELIMITER.to_string(),
        }
    }
}

impl KeyRule {
    pub fn version_tag(&self) -> String {
        match self {
            Self::Delimited { delimiter } => format!("delimited-v2:{delimiter}"),
            Self::Stem => "stem-v1".to_string(),
        }
    }

    /// Parses `stem` or `delimited:<token>`.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let trimmed = raw.trim();
        if trimmed.eq_ignore_ascii_case("stem") {
            return Ok(Self::Stem);
        }
        match trimmed.split_once(':') {
            Some(("delimited", delimiter)) if !delimiter.is_empty() => Ok(Self::Delimited {
                delimiter: delimiter.to_string(),
            }),
            Some(("delimited", _)) => Err("delimited key rule needs a non-empty token".to_string()),
            _ => Err(format!(
                "Unsupported key rule '{raw}' (expected stem or delimited:<token>)"
            )),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyNormalizer {
    rule: KeyRule,
}

impl KeyNormalizer {
    pub fn new(rule: KeyRule) -> Self {
        Self { rule }
    }

    pub fn rule(&self) -> &KeyRule {
        &self.rule
    }

    pub fn normalize(&self, raw_key: &str) -> CanonicalKey {
        let canonical = match &self.rule {
            KeyRule::Delimited { delimiter } => {
                let head = match raw_key.split_once(delimiter.as_str()) {
                    Some((head, _)) => head,
                    None => raw_key,
                };
                last_segment(head)
            }
            KeyRule::Stem => {
                let head = raw_key.split('.').next().unwrap_or(raw_key);
                last_segment(head)
            }
        };
        CanonicalKey(canonical.to_string())
    }
}

fn last_segment(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}
