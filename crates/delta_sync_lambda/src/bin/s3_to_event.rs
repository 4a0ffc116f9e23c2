use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use chrono::{DateTime, Utc};
use clap::{Parser, ValueEnum};
use delta_sync_core::contract::{EnvelopeFormat, InvokeGranularity};
use delta_sync_core::convergence::{run_once, ConvergenceLoop, ConvergenceSettings, LoopOutcome};
use delta_sync_core::dispatch::{
    replay_audit_record, ArtifactStore, BatchDispatcher, BatchInvoker, DispatchResult,
    DispatchSettings,
};
use delta_sync_core::error::SyncError;
use delta_sync_core::job::{SyncJob, SyncJobConfig};
use delta_sync_core::keys::KeyRule;
use delta_sync_core::listing::ListOptions;
use delta_sync_core::sleep::ThreadSleeper;
use delta_sync_core::storage_keys::run_id_at;
use delta_sync_lambda::adapters::bridge::BlockingBridge;
use delta_sync_lambda::adapters::invoke::{LambdaBatchInvoker, SqsBatchInvoker};
use delta_sync_lambda::adapters::object_store::S3ObjectStore;
use delta_sync_lambda::clients::AwsClients;
use delta_sync_lambda::config::{
    expand_env_placeholder, load_exclusions, parse_error_prefix, required_env, ArtifactLocation,
    FUNCTION_NAME_ENV, QUEUE_URL_ENV,
};
use delta_sync_lambda::logging::{init_logging, LogFormat, LogSettings};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// One dispatch, no polling
    Once,
    /// Dispatch and poll until drained or stalled
    Automated,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum InvokeTarget {
    Lambda,
    Sqs,
}

#[derive(Parser, Debug)]
#[command(
    name = "s3_to_event",
    about = "Dispatch unprocessed objects of an input prefix to the downstream processor"
)]
struct Cli {
    /// Environment name substituted for `{}` in bucket names
    env: String,
    input_bucket: String,
    input_prefix: String,
    output_bucket: String,
    output_prefix: String,
    /// Error-marker prefix in the output bucket (`-` disables retries)
    error_prefix: String,
    /// Maximum records per batch
    limit: usize,
    /// Persist the first batch without invoking anything
    #[arg(long = "dry_run", alias = "dry-run")]
    dry_run: bool,
    #[arg(value_enum, long, default_value_t = Mode::Automated)]
    mode: Mode,
    #[arg(long, default_value_t = 60)]
    poll_interval_secs: u64,
    /// `delimited:<token>` or `stem`
    #[arg(long, default_value = "delimited:_timestamp", value_parser = KeyRule::parse)]
    key_rule: KeyRule,
    /// Newline-delimited raw keys that are never dispatched
    #[arg(long)]
    exclusions: Option<PathBuf>,
    /// Only consider inputs modified at or after this RFC 3339 instant
    #[arg(long)]
    modified_since: Option<DateTime<Utc>>,
    /// Local directory or `s3://bucket/prefix` for audit records
    #[arg(long, default_value = "delta-sync-audit")]
    audit_dir: String,
    /// Re-invoke a persisted audit record instead of listing
    #[arg(long)]
    replay: Option<String>,
    #[arg(value_enum, long, default_value_t = InvokeTarget::Lambda)]
    invoke_target: InvokeTarget,
    #[arg(long, default_value = "compact", value_parser = EnvelopeFormat::parse)]
    envelope: EnvelopeFormat,
    #[arg(long, default_value_t = false)]
    per_record: bool,
    #[arg(long, env = "DELTA_SYNC_LOG_LEVEL", default_value = "info")]
    log_level: String,
    #[arg(value_enum, long, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

impl Cli {
    fn job_config(&self) -> Result<SyncJobConfig, SyncError> {
        let config = SyncJobConfig {
            name: format!("{}-{}", self.input_prefix.trim_matches('/').replace('/', "-"), self.env),
            input_bucket: expand_env_placeholder(&self.input_bucket, &self.env),
            input_prefix: self.input_prefix.clone(),
            output_bucket: expand_env_placeholder(&self.output_bucket, &self.env),
            output_prefix: self.output_prefix.clone(),
            error_prefix: parse_error_prefix(&self.error_prefix),
            limit: self.limit,
            key_rule: self.key_rule.clone(),
            exclusions: load_exclusions(self.exclusions.as_deref())?,
            list_options: ListOptions {
                modified_since: self.modified_since,
            },
        };
        config.validate()?;
        Ok(config)
    }

    fn dispatch_settings(&self, config: &SyncJobConfig, run_id: &str) -> DispatchSettings {
        DispatchSettings {
            job: config.name.clone(),
            run_id: run_id.to_string(),
            store_id: config.input_bucket.clone(),
            audit_prefix: String::new(),
            key_rule: config.key_rule.version_tag(),
            format: self.envelope,
            granularity: if self.per_record {
                InvokeGranularity::PerRecord
            } else {
                InvokeGranularity::Batch
            },
            limit: config.limit,
        }
    }
}

fn build_invoker(
    target: InvokeTarget,
    clients: &AwsClients,
    bridge: &BlockingBridge,
) -> Result<Box<dyn BatchInvoker>, SyncError> {
    Ok(match target {
        InvokeTarget::Lambda => Box::new(LambdaBatchInvoker::new(
            clients.lambda.clone(),
            required_env(FUNCTION_NAME_ENV)?,
            bridge.clone(),
        )),
        InvokeTarget::Sqs => Box::new(SqsBatchInvoker::new(
            clients.sqs.clone(),
            required_env(QUEUE_URL_ENV)?,
            bridge.clone(),
        )),
    })
}

fn run(cli: &Cli) -> Result<(), SyncError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|error| SyncError::configuration(format!("failed to start runtime: {error}")))?;
    let clients = runtime.block_on(AwsClients::load());
    let bridge = BlockingBridge::new(runtime.handle().clone());

    let invoker = build_invoker(cli.invoke_target, &clients, &bridge)?;
    let audit_store = ArtifactLocation::parse(&cli.audit_dir)?.open(&clients.s3, &bridge);

    if let Some(audit_key) = &cli.replay {
        let body = audit_store
            .read_object(audit_key)
            .map_err(|message| SyncError::AuditWrite {
                key: audit_key.clone(),
                message,
            })?;
        let invocations = replay_audit_record(&body, invoker.as_ref())?;
        tracing::info!(
            component = "s3_to_event",
            event = "replayed",
            audit_key = audit_key.as_str(),
            invocations
        );
        return Ok(());
    }

    let config = cli.job_config()?;
    let run_id = run_id_at(Utc::now());
    let settings = cli.dispatch_settings(&config, &run_id);
    let store = S3ObjectStore::new(clients.s3.clone(), bridge.clone());
    let job = SyncJob::new(&config, &store);
    let dispatcher = BatchDispatcher::new(&settings, invoker.as_ref(), audit_store.as_ref());

    match cli.mode {
        Mode::Once => {
            let report = run_once(&job, &dispatcher, cli.dry_run)?;
            let batch_size = match &report.result {
                DispatchResult::NothingToDo => 0,
                DispatchResult::Submitted { batch, .. } | DispatchResult::DryRun { batch, .. } => {
                    batch.len()
                }
            };
            tracing::info!(
                component = "s3_to_event",
                event = "once_finished",
                backlog = report.backlog,
                batch_size,
                dry_run = cli.dry_run
            );
        }
        Mode::Automated => {
            let sleeper = ThreadSleeper;
            let mut convergence = ConvergenceLoop::new(
                &job,
                &dispatcher,
                &sleeper,
                ConvergenceSettings {
                    poll_interval: Duration::from_secs(cli.poll_interval_secs),
                    dry_run: cli.dry_run,
                },
            );
            match convergence.run()? {
                LoopOutcome::Drained { cycles, dispatched } => tracing::info!(
                    component = "s3_to_event",
                    event = "drained",
                    cycles,
                    dispatched
                ),
                LoopOutcome::Stalled {
                    cycles,
                    expected_backlog,
                    observed_backlog,
                    ..
                } => tracing::warn!(
                    component = "s3_to_event",
                    event = "stalled",
                    cycles,
                    expected_backlog,
                    observed_backlog
                ),
                LoopOutcome::DryRunStop {
                    batch_size,
                    backlog,
                    audit_key,
                } => tracing::info!(
                    component = "s3_to_event",
                    event = "dry_run_stop",
                    batch_size,
                    backlog,
                    audit_key = audit_key.as_str()
                ),
            }
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&LogSettings {
        level: cli.log_level.clone(),
        format: cli.log_format,
    });

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(
                component = "s3_to_event",
                event = "failed",
                stage = error.stage().as_str(),
                error = %error
            );
            ExitCode::FAILURE
        }
    }
}
