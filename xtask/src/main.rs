use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitCode};

use clap::{Parser, Subcommand, ValueEnum};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

// ── CLI definition ─────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "xtask",
    about = "Task runner for the delta-sync workspace",
    long_about = "Runs CI checks and benchmarks, and packages the dispatch Lambda\n\
                  as a `bootstrap` zip for the provided.al2023 runtime."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run CI checks (fmt, clippy, tests, benchmarks)
    Ci {
        #[arg(value_enum, default_value_t = CiJob::Check)]
        job: CiJob,
    },
    /// Run Criterion benchmarks for delta computation
    Bench,
    /// Build and zip the dispatch Lambda binary
    LambdaPackage {
        /// Compilation target triple for the Lambda binary
        #[arg(long, default_value = "x86_64-unknown-linux-gnu")]
        target: String,
        #[arg(value_enum, long, default_value_t = BuildProfile::Release)]
        profile: BuildProfile,
        /// Directory receiving `dispatch_lambda.zip`
        #[arg(long, env = "DELTA_SYNC_DIST_DIR", default_value = "dist")]
        dist_dir: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum CiJob {
    /// Formatting, clippy, and tests
    Check,
    /// Run benchmarks
    Bench,
    /// Run check + bench
    All,
}

#[derive(Clone, Copy, ValueEnum)]
enum BuildProfile {
    Debug,
    Release,
}

impl BuildProfile {
    fn dir_name(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Release => "release",
        }
    }

    fn as_cargo_flag(self) -> Option<&'static str> {
        match self {
            Self::Debug => None,
            Self::Release => Some("--release"),
        }
    }
}

const LAMBDA_PACKAGE: &str = "delta_sync_lambda";
const LAMBDA_BIN: &str = "dispatch_lambda";

// ── helpers ────────────────────────────────────────────────────────

fn step(label: &str) {
    eprintln!("\n=== {label} ===");
}

fn run_cargo(args: &[&str]) -> Result<(), String> {
    eprintln!("+ cargo {}", args.join(" "));
    let status = Command::new("cargo")
        .args(args)
        .status()
        .map_err(|error| format!("failed to execute cargo: {error}"))?;
    if status.success() {
        Ok(())
    } else {
        Err(format!("cargo {} exited with {status}", args.join(" ")))
    }
}

fn binary_name(bin_name: &str, target: &str) -> String {
    if target.contains("windows") {
        format!("{bin_name}.exe")
    } else {
        bin_name.to_string()
    }
}

fn package_lambda(target: &str, profile: BuildProfile, dist_dir: &Path) -> Result<PathBuf, String> {
    step("Build dispatch lambda binary");
    let mut cargo_args = vec!["build", "-p", LAMBDA_PACKAGE, "--target", target, "--bin", LAMBDA_BIN];
    if let Some(flag) = profile.as_cargo_flag() {
        cargo_args.push(flag);
    }
    run_cargo(&cargo_args)?;

    step("Package lambda zip artifact");
    let binary_path = Path::new("target")
        .join(target)
        .join(profile.dir_name())
        .join(binary_name(LAMBDA_BIN, target));
    fs::create_dir_all(dist_dir)
        .map_err(|error| format!("failed to create {}: {error}", dist_dir.display()))?;
    let zip_path = dist_dir.join(format!("{LAMBDA_BIN}.zip"));
    write_bootstrap_zip(&binary_path, &zip_path)?;
    Ok(zip_path)
}

/// Lambda custom runtimes expect the executable as `bootstrap` at the zip root.
fn write_bootstrap_zip(binary_path: &Path, zip_path: &Path) -> Result<(), String> {
    let binary = fs::read(binary_path).map_err(|error| {
        format!("expected lambda binary at '{}': {error}", binary_path.display())
    })?;
    let file = fs::File::create(zip_path)
        .map_err(|error| format!("failed to create {}: {error}", zip_path.display()))?;
    let mut zip = ZipWriter::new(file);
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o755);
    zip.start_file("bootstrap", options)
        .map_err(|error| format!("failed to start bootstrap entry: {error}"))?;
    zip.write_all(&binary)
        .map_err(|error| format!("failed to write bootstrap entry: {error}"))?;
    zip.finish()
        .map_err(|error| format!("failed to finish lambda zip: {error}"))?;
    Ok(())
}

// ── CI jobs ────────────────────────────────────────────────────────

fn ci_check() -> Result<(), String> {
    step("Check formatting");
    run_cargo(&["fmt", "--all", "--", "--check"])?;

    step("Clippy");
    run_cargo(&["clippy", "--all-targets", "--", "-D", "warnings"])?;

    step("Test delta_sync_core");
    run_cargo(&["test", "-p", "delta_sync_core"])?;

    step("Test delta_sync_lambda");
    run_cargo(&["test", "-p", LAMBDA_PACKAGE])
}

fn ci_bench() -> Result<(), String> {
    step("Run benchmarks");
    run_cargo(&["bench", "--package", "delta_sync_core", "--bench", "delta"])
}

// ── main ───────────────────────────────────────────────────────────

fn run(cli: Cli) -> Result<(), String> {
    match cli.command {
        Commands::Ci { job } => match job {
            CiJob::Check => ci_check(),
            CiJob::Bench => ci_bench(),
            CiJob::All => {
                ci_check()?;
                ci_bench()
            }
        },
        Commands::Bench => ci_bench(),
        Commands::LambdaPackage {
            target,
            profile,
            dist_dir,
        } => {
            let zip_path = package_lambda(&target, profile, &dist_dir)?;
            eprintln!("\nPackaged artifact:\n- {}", zip_path.display());
            Ok(())
        }
    }
}

fn main() -> ExitCode {
    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("error: {message}");
            ExitCode::FAILURE
        }
    }
}
