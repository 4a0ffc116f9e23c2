use std::process::ExitCode;

use clap::Parser;
use delta_sync_core::error::SyncError;
use delta_sync_core::relocate::{
    execute_relocations, plan_relocations, RelocationSummary, DEFAULT_DATE_FORMAT,
};
use delta_sync_lambda::adapters::bridge::BlockingBridge;
use delta_sync_lambda::adapters::object_store::S3ObjectStore;
use delta_sync_lambda::clients::AwsClients;
use delta_sync_lambda::config::expand_env_placeholder;
use delta_sync_lambda::logging::{init_logging, LogFormat, LogSettings};

#[derive(Parser, Debug)]
#[command(
    name = "s3_split_by_date",
    about = "Move dated objects into year=/month=/day= partitions"
)]
struct Cli {
    /// Environment name substituted for `{}` in the bucket name
    env: String,
    bucket: String,
    source_prefix: String,
    target_prefix: String,
    /// chrono format of the date embedded in file names
    #[arg(long, default_value = DEFAULT_DATE_FORMAT)]
    date_format: String,
    /// Log planned moves without touching the bucket
    #[arg(long = "dry_run", alias = "dry-run")]
    dry_run: bool,
    #[arg(long, env = "DELTA_SYNC_LOG_LEVEL", default_value = "info")]
    log_level: String,
    #[arg(value_enum, long, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn run(cli: &Cli) -> Result<RelocationSummary, SyncError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|error| SyncError::configuration(format!("failed to start runtime: {error}")))?;
    let clients = runtime.block_on(AwsClients::load());
    let store = S3ObjectStore::new(clients.s3, BlockingBridge::new(runtime.handle().clone()));
    let bucket = expand_env_placeholder(&cli.bucket, &cli.env);

    let plan = plan_relocations(
        &store,
        &bucket,
        &cli.source_prefix,
        &cli.target_prefix,
        &cli.date_format,
    )?;
    execute_relocations(&store, &bucket, &plan, cli.dry_run)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&LogSettings {
        level: cli.log_level.clone(),
        format: cli.log_format,
    });

    match run(&cli) {
        Ok(summary) => {
            tracing::info!(
                component = "s3_split_by_date",
                event = "finished",
                moved = summary.moved,
                skipped = summary.skipped,
                dry_run = cli.dry_run
            );
            ExitCode::SUCCESS
        }
        Err(error) => {
            tracing::error!(
                component = "s3_split_by_date",
                event = "failed",
                stage = error.stage().as_str(),
                error = %error
            );
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_positional_arguments_and_dry_run() {
        let cli = Cli::try_parse_from([
            "s3_split_by_date",
            "prod",
            "exports-{}",
            "landing/",
            "curated",
            "--dry_run",
        ])
        .expect("valid arguments");

        assert!(cli.dry_run);
        assert_eq!(cli.date_format, "%Y-%m-%d");
        assert_eq!(expand_env_placeholder(&cli.bucket, &cli.env), "exports-prod");
    }
}
