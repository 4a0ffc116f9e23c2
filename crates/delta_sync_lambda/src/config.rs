//! Startup configuration: CLI value parsing, environment lookups and the
//! paged-fetch source file. Everything here is read once before any work.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use delta_sync_core::delta::ExclusionSet;
use delta_sync_core::dispatch::ArtifactStore;
use delta_sync_core::error::SyncError;
use delta_sync_core::fetch::{Auth, PagedEndpoint, PagingParams, DEFAULT_ERROR_FIELD};
use serde::{Deserialize, Serialize};

use crate::adapters::bridge::BlockingBridge;
use crate::adapters::local_store::LocalDirStore;
use crate::adapters::object_store::S3ArtifactStore;

pub const FUNCTION_NAME_ENV: &str = "DELTA_SYNC_FUNCTION_NAME";
pub const QUEUE_URL_ENV: &str = "DELTA_SYNC_QUEUE_URL";
pub const AUDIT_BUCKET_ENV: &str = "DELTA_SYNC_AUDIT_BUCKET";
pub const API_TOKEN_ENV: &str = "DELTA_SYNC_API_TOKEN";
pub const API_USER_ENV: &str = "DELTA_SYNC_API_USER";
pub const API_PASSWORD_ENV: &str = "DELTA_SYNC_API_PASSWORD";
pub const API_SECRET_ENV: &str = "DELTA_SYNC_API_SECRET";
pub const EXTRA_FILES_DIR_ENV: &str = "EXTRA_FILES_DIR";

pub const DEFAULT_SOURCES_FILE: &str = "fetch_sources.json";

/// Substitutes `{}` in a bucket template with the environment name.
pub fn expand_env_placeholder(template: &str, env: &str) -> String {
    template.replace("{}", env)
}

/// `-`, `none` and the empty string disable error-marker retries.
pub fn parse_error_prefix(raw: &str) -> Option<String> {
    match raw.trim() {
        "" | "-" => None,
        value if value.eq_ignore_ascii_case("none") => None,
        value => Some(value.to_string()),
    }
}

pub fn required_env(name: &str) -> Result<String, SyncError> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(SyncError::configuration(format!("{name} must be configured"))),
    }
}

pub fn optional_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

pub fn load_exclusions(path: Option<&Path>) -> Result<ExclusionSet, SyncError> {
    let Some(path) = path else {
        return Ok(ExclusionSet::default());
    };
    let text = fs::read_to_string(path).map_err(|error| {
        SyncError::configuration(format!(
            "failed to read exclusion list {}: {error}",
            path.display()
        ))
    })?;
    Ok(ExclusionSet::from_lines(&text))
}

/// Bearer token wins over basic credentials; neither means anonymous.
pub fn auth_from_values(
    token: Option<String>,
    user: Option<String>,
    password: Option<String>,
) -> Result<Auth, SyncError> {
    match (token, user, password) {
        (Some(token), _, _) => Ok(Auth::Bearer(token)),
        (None, Some(user), Some(password)) => Ok(Auth::Basic { user, password }),
        (None, Some(_), None) | (None, None, Some(_)) => Err(SyncError::configuration(format!(
            "{API_USER_ENV} and {API_PASSWORD_ENV} must be set together"
        ))),
        (None, None, None) => Ok(Auth::None),
    }
}

pub fn auth_from_env() -> Result<Auth, SyncError> {
    auth_from_values(
        optional_env(API_TOKEN_ENV),
        optional_env(API_USER_ENV),
        optional_env(API_PASSWORD_ENV),
    )
}

/// Secrets collaborator: the string stored under a secret name.
pub trait SecretSource {
    fn secret_string(&self, name: &str) -> Result<String, String>;
}

/// Fetch credentials read from a stored secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretCredentials {
    pub auth: Auth,
    /// Endpoint template; `{}` is replaced with the source name.
    pub url: Option<String>,
}

#[derive(Deserialize)]
struct SecretDocument {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    user_name: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

/// A JSON object secret carries `token` or `user_name`/`password` and an
/// optional `url`. Any other secret string is an API key sent as a bearer
/// token. Error messages never include secret content.
pub fn parse_secret(name: &str, raw: &str) -> Result<SecretCredentials, SyncError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(SyncError::configuration(format!("secret '{name}' is empty")));
    }
    if !trimmed.starts_with('{') {
        return Ok(SecretCredentials {
            auth: Auth::Bearer(trimmed.to_string()),
            url: None,
        });
    }

    let document: SecretDocument = serde_json::from_str(trimmed).map_err(|error| {
        SyncError::configuration(format!(
            "secret '{name}' is not a valid credentials document (line {}, column {})",
            error.line(),
            error.column()
        ))
    })?;
    let auth = match (document.token, document.user_name, document.password) {
        (Some(token), _, _) => Auth::Bearer(token),
        (None, Some(user), Some(password)) => Auth::Basic { user, password },
        _ => {
            return Err(SyncError::configuration(format!(
                "secret '{name}' needs a token or both user_name and password"
            )))
        }
    };
    Ok(SecretCredentials {
        auth,
        url: document.url,
    })
}

pub fn resolve_secret(source: &dyn SecretSource, name: &str) -> Result<SecretCredentials, SyncError> {
    let raw = source.secret_string(name).map_err(|message| {
        SyncError::configuration(format!("failed to read secret '{name}': {message}"))
    })?;
    let credentials = parse_secret(name, &raw)?;
    tracing::info!(
        component = "config",
        event = "secret_resolved",
        secret = name,
        auth = ?credentials.auth,
        url_override = credentials.url.is_some()
    );
    Ok(credentials)
}

/// Where audit records and fetched pages are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactLocation {
    Local(PathBuf),
    S3 { bucket: String, prefix: String },
}

impl ArtifactLocation {
    pub fn parse(raw: &str) -> Result<Self, SyncError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(SyncError::configuration("artifact location cannot be empty"));
        }
        match raw.strip_prefix("s3://") {
            Some(rest) => {
                let (bucket, prefix) = rest.split_once('/').unwrap_or((rest, ""));
                if bucket.is_empty() {
                    return Err(SyncError::configuration(format!(
                        "artifact location '{raw}' has no bucket"
                    )));
                }
                Ok(Self::S3 {
                    bucket: bucket.to_string(),
                    prefix: prefix.trim_matches('/').to_string(),
                })
            }
            None => Ok(Self::Local(PathBuf::from(raw))),
        }
    }

    pub fn open(
        &self,
        s3: &aws_sdk_s3::Client,
        bridge: &BlockingBridge,
    ) -> Box<dyn ArtifactStore + Send + Sync> {
        match self {
            Self::Local(root) => Box::new(LocalDirStore::new(root.clone())),
            Self::S3 { bucket, prefix } => Box::new(S3ArtifactStore::new(
                s3.clone(),
                bridge.clone(),
                bucket.clone(),
                prefix.clone(),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    #[default]
    Paged,
    Document,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "style")]
pub enum PagingStyle {
    #[default]
    Jira,
    ServiceNow,
    Custom { offset: String, limit: String },
}

impl PagingStyle {
    pub fn params(&self) -> PagingParams {
        match self {
            Self::Jira => PagingParams::jira(),
            Self::ServiceNow => PagingParams::service_now(),
            Self::Custom { offset, limit } => PagingParams::new(offset.clone(), limit.clone()),
        }
    }
}

fn default_page_size() -> u32 {
    100
}

fn default_error_field() -> String {
    DEFAULT_ERROR_FIELD.to_string()
}

/// One external collection pulled by `paged_fetch`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchSource {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub kind: SourceKind,
    #[serde(default)]
    pub result_field: String,
    #[serde(default = "default_error_field")]
    pub error_field: String,
    #[serde(default)]
    pub paging: PagingStyle,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl FetchSource {
    pub fn endpoint(&self) -> PagedEndpoint {
        PagedEndpoint::new(self.url.clone(), self.result_field.clone())
            .with_paging(self.paging.params())
            .with_error_field(self.error_field.clone())
    }

    /// Copy of this source pointed at `template` with `{}` set to its name.
    pub fn with_url_template(&self, template: &str) -> Self {
        Self {
            url: expand_env_placeholder(template, &self.name),
            ..self.clone()
        }
    }

    pub fn query_params(&self) -> Vec<(String, String)> {
        self.params
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchSourcesConfig {
    pub sources: Vec<FetchSource>,
}

impl FetchSourcesConfig {
    pub fn parse(text: &str) -> Result<Self, SyncError> {
        let config: Self = serde_json::from_str(text)
            .map_err(|error| SyncError::configuration(format!("invalid fetch sources: {error}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, SyncError> {
        let text = fs::read_to_string(path).map_err(|error| {
            SyncError::configuration(format!("failed to read {}: {error}", path.display()))
        })?;
        Self::parse(&text)
    }

    fn validate(&self) -> Result<(), SyncError> {
        if self.sources.is_empty() {
            return Err(SyncError::configuration("no fetch sources configured"));
        }
        let mut seen = std::collections::BTreeSet::new();
        for source in &self.sources {
            if !seen.insert(source.name.as_str()) {
                return Err(SyncError::configuration(format!(
                    "duplicate fetch source '{}'",
                    source.name
                )));
            }
            if source.kind == SourceKind::Paged && source.result_field.trim().is_empty() {
                return Err(SyncError::configuration(format!(
                    "paged source '{}' needs a result_field",
                    source.name
                )));
            }
            if source.page_size == 0 {
                return Err(SyncError::configuration(format!(
                    "source '{}' page_size must be positive",
                    source.name
                )));
            }
        }
        Ok(())
    }
}

/// Explicit path first, then `{extra_files_dir}/{file_name}`, then the
/// working directory.
pub fn candidate_locations(
    explicit: Option<&Path>,
    extra_files_dir: Option<&Path>,
    file_name: &str,
) -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(path) = explicit {
        candidates.push(path.to_path_buf());
    }
    if let Some(dir) = extra_files_dir {
        candidates.push(dir.join(file_name));
    }
    candidates.push(PathBuf::from(file_name));
    candidates
}

pub fn locate_config_file(candidates: &[PathBuf]) -> Result<PathBuf, SyncError> {
    candidates
        .iter()
        .find(|path| path.is_file())
        .cloned()
        .ok_or_else(|| {
            let searched = candidates
                .iter()
                .map(|path| path.display().to_string())
                .collect::<Vec<_>>()
                .join(", ");
            SyncError::configuration(format!("config file not found; searched: {searched}"))
        })
}
