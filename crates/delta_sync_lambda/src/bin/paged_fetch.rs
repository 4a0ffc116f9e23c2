use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use delta_sync_core::dispatch::ArtifactStore;
use delta_sync_core::error::SyncError;
use delta_sync_core::fetch::{
    fetch_document, HttpTransport, PageTransport, PagedFetcher, RetryPolicy,
    DEFAULT_RETRY_TOTAL,
};
use delta_sync_core::storage_keys::fetch_page_key;
use delta_sync_lambda::adapters::bridge::BlockingBridge;
use delta_sync_lambda::adapters::secrets::SecretsManagerSource;
use delta_sync_lambda::clients::AwsClients;
use delta_sync_lambda::config::{
    auth_from_env, candidate_locations, locate_config_file, optional_env, resolve_secret,
    ArtifactLocation, FetchSource, FetchSourcesConfig, SecretCredentials, SourceKind,
    API_SECRET_ENV, DEFAULT_SOURCES_FILE, EXTRA_FILES_DIR_ENV,
};
use delta_sync_lambda::logging::{init_logging, LogFormat, LogSettings};
use rayon::prelude::*;

#[derive(Parser, Debug)]
#[command(
    name = "paged_fetch",
    about = "Pull paged REST collections and store every page as JSON"
)]
struct Cli {
    /// Sources file; falls back to $EXTRA_FILES_DIR then the working directory
    #[arg(long)]
    sources: Option<PathBuf>,
    /// Local directory or `s3://bucket/prefix`
    #[arg(long)]
    output: String,
    /// Restrict the run to these source names
    #[arg(long = "only")]
    only: Vec<String>,
    /// Secrets Manager secret holding the API key or a credentials document;
    /// overrides the DELTA_SYNC_API_* variables
    #[arg(long, env = API_SECRET_ENV)]
    secret_name: Option<String>,
    #[arg(long, default_value_t = DEFAULT_RETRY_TOTAL)]
    retry_total: u32,
    #[arg(long, default_value_t = 500)]
    backoff_ms: u64,
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,
    /// Worker threads (defaults to the number of CPUs)
    #[arg(long)]
    workers: Option<usize>,
    #[arg(long, env = "DELTA_SYNC_LOG_LEVEL", default_value = "info")]
    log_level: String,
    #[arg(value_enum, long, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SourceReport {
    name: String,
    pages: usize,
    records: usize,
}

/// Sources named by `--only` (all when empty), re-pointed at the secret's
/// URL template when it carries one.
fn selected_sources(
    config: &FetchSourcesConfig,
    only: &[String],
    url_template: Option<&str>,
) -> Vec<FetchSource> {
    config
        .sources
        .iter()
        .filter(|source| only.is_empty() || only.contains(&source.name))
        .map(|source| match url_template {
            Some(template) => source.with_url_template(template),
            None => source.clone(),
        })
        .collect()
}

fn fetch_source(
    source: &FetchSource,
    transport: &dyn PageTransport,
    store: &dyn ArtifactStore,
) -> Result<SourceReport, SyncError> {
    let mut report = SourceReport {
        name: source.name.clone(),
        pages: 0,
        records: 0,
    };
    let write = |index: usize, body: &serde_json::Value| -> Result<(), SyncError> {
        let key = fetch_page_key("", &source.name, index);
        let bytes = serde_json::to_vec(body)?;
        store
            .write_object(&key, &bytes)
            .map_err(|message| SyncError::AuditWrite { key, message })
    };

    match source.kind {
        SourceKind::Document => {
            let document =
                fetch_document(transport, &source.url, &source.query_params(), &source.error_field)?;
            write(0, &document)?;
            report.pages = 1;
            report.records = 1;
        }
        SourceKind::Paged => {
            let fetcher = PagedFetcher::new(transport);
            let params = source.query_params();
            for page in fetcher.fetch(&source.endpoint(), source.page_size, &params) {
                let records = page?;
                report.records += records.len();
                write(report.pages, &serde_json::Value::Array(records))?;
                report.pages += 1;
            }
        }
    }

    tracing::info!(
        component = "paged_fetch",
        event = "source_finished",
        source = report.name.as_str(),
        pages = report.pages,
        records = report.records
    );
    Ok(report)
}

fn run(cli: &Cli) -> Result<Vec<SourceReport>, SyncError> {
    let extra_dir = optional_env(EXTRA_FILES_DIR_ENV).map(PathBuf::from);
    let candidates =
        candidate_locations(cli.sources.as_deref(), extra_dir.as_deref(), DEFAULT_SOURCES_FILE);
    let config = FetchSourcesConfig::load(&locate_config_file(&candidates)?)?;
    let location = ArtifactLocation::parse(&cli.output)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|error| SyncError::configuration(format!("failed to start runtime: {error}")))?;
    let clients = runtime.block_on(AwsClients::load());
    let bridge = BlockingBridge::new(runtime.handle().clone());
    let store = location.open(&clients.s3, &bridge);

    let credentials = match &cli.secret_name {
        Some(name) => {
            let secrets = SecretsManagerSource::new(clients.secrets.clone(), bridge.clone());
            resolve_secret(&secrets, name)?
        }
        None => SecretCredentials {
            auth: auth_from_env()?,
            url: None,
        },
    };
    let sources = selected_sources(&config, &cli.only, credentials.url.as_deref());
    if sources.is_empty() {
        return Err(SyncError::configuration("no fetch source matches --only"));
    }

    let retry = RetryPolicy {
        total: cli.retry_total,
        backoff_factor: Duration::from_millis(cli.backoff_ms),
        ..RetryPolicy::default()
    };
    let transport =
        HttpTransport::new(credentials.auth, retry, Duration::from_secs(cli.timeout_secs))?;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(cli.workers.unwrap_or(0))
        .build()
        .map_err(|error| SyncError::configuration(format!("failed to start workers: {error}")))?;

    pool.install(|| {
        sources
            .par_iter()
            .map(|source| fetch_source(source, &transport, store.as_ref()))
            .collect::<Result<Vec<_>, _>>()
    })
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&LogSettings {
        level: cli.log_level.clone(),
        format: cli.log_format,
    });

    match run(&cli) {
        Ok(reports) => {
            tracing::info!(
                component = "paged_fetch",
                event = "finished",
                sources = reports.len(),
                records = reports.iter().map(|report| report.records).sum::<usize>()
            );
            ExitCode::SUCCESS
        }
        Err(error) => {
            tracing::error!(
                component = "paged_fetch",
                event = "failed",
                stage = error.stage().as_str(),
                error = %error
            );
            ExitCode::FAILURE
        }
    }
}
