//! # eaptest-cli
//!
//! Binary entry point for the EAP test suite.
//!
//! This crate provides:
//! - CLI argument parsing using `clap`
//! - Suite execution via `eaptest run`
//! - Starter configuration via `eaptest init`
//! - Environment diagnostics via `eaptest doctor`

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use eaptest_core::config::ConfigError;
use eaptest_core::preflight::{CheckStatus, PreflightRunner};
use eaptest_core::{EapType, SuiteConfig, SuiteRunner};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Exit code used when the run is interrupted by Ctrl-C.
const EXIT_INTERRUPTED: i32 = 130;

// Unix-specific process management for process group leadership
#[cfg(unix)]
mod process_management {
    use nix::unistd::{Pid, setpgid};
    use tracing::debug;

    /// Makes this process a process group leader so job control targets the
    /// orchestrator and its helpers as one unit.
    pub fn setup_process_group() {
        let pid = Pid::this();
        if let Err(e) = setpgid(pid, pid) {
            // EPERM means we already lead a group (started from a shell).
            if e != nix::errno::Errno::EPERM {
                debug!("Could not set process group ({}), continuing anyway", e);
            }
        }
        debug!("Process group initialized: PID {}", pid);
    }
}

#[cfg(not(unix))]
mod process_management {
    /// No-op on non-Unix platforms.
    pub fn setup_process_group() {}
}

#[derive(Parser, Debug)]
#[command(
    name = "eaptest",
    version,
    about = "Automated EAP authentication testing against a RADIUS server",
    arg_required_else_help = true
)]
struct Cli {
    /// Path to the suite configuration file
    #[arg(short, long, global = true, default_value = "config.json")]
    config: PathBuf,

    /// Verbose output (full per-run messages, debug-level tracing)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the authentication test suite
    Run(RunArgs),
    /// Write a starter configuration file
    Init(InitArgs),
    /// Diagnose the environment without running any tests
    Doctor,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Restrict the run to these EAP types, forcing them enabled
    /// (tls, ttls, peap, md5, fast, mschapv2)
    #[arg(long = "eap", value_name = "TYPE")]
    eap: Vec<String>,

    /// Run enabled types concurrently with a bounded worker pool
    #[arg(long)]
    parallel: bool,

    /// Validate configuration and report the plan without authenticating
    #[arg(long)]
    dry_run: bool,

    /// Emit the suite report as JSON on stdout
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct InitArgs {
    /// Overwrite an existing configuration file
    #[arg(long)]
    force: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    process_management::setup_process_group();

    let code = match cli.command {
        Commands::Run(ref args) => run_command(&cli.config, cli.verbose, args).await,
        Commands::Init(ref args) => report_errors(init_command(&cli.config, args)),
        Commands::Doctor => report_errors(doctor_command(&cli.config).await),
    };
    std::process::exit(code);
}

fn init_tracing(verbose: bool) {
    let filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| if verbose { "info".into() } else { "warn".into() });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Maps unexpected command errors onto a general-failure exit code.
fn report_errors(result: Result<i32>) -> i32 {
    match result {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{} {err:#}", "error:".red().bold());
            1
        }
    }
}

async fn run_command(config_path: &Path, verbose: bool, args: &RunArgs) -> i32 {
    let config = match load_run_config(config_path, args) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{} {err}", "error:".red().bold());
            // Every configuration problem maps to the same exit code.
            return 2;
        }
    };

    let runner = SuiteRunner::new(config).dry_run(args.dry_run);

    tokio::select! {
        result = runner.run() => match result {
            Ok(report) => {
                if args.json {
                    match report.to_json() {
                        Ok(json) => println!("{json}"),
                        Err(err) => {
                            eprintln!("{} failed to serialize report: {err}", "error:".red().bold());
                            return 1;
                        }
                    }
                } else {
                    print!("{}", report.render_summary(verbose));
                }
                report.exit_code()
            }
            Err(err) => {
                eprintln!("{} {err}", "error:".red().bold());
                err.exit_code()
            }
        },
        _ = tokio::signal::ctrl_c() => {
            // Dropping the run future cancels in-flight executors, whose
            // children are spawned with kill_on_drop; just report the
            // interruption.
            warn!("Interrupted, shutting down");
            eprintln!("\n{}", "Interrupted".yellow().bold());
            EXIT_INTERRUPTED
        }
    }
}

fn load_run_config(config_path: &Path, args: &RunArgs) -> Result<SuiteConfig, ConfigError> {
    let mut config = SuiteConfig::load(config_path)?;

    if !args.eap.is_empty() {
        let types = args
            .eap
            .iter()
            .map(|name| name.parse::<EapType>())
            .collect::<Result<Vec<_>, _>>()?;
        config.select_types(&types)?;
    }
    if args.parallel {
        config.execution.parallel = true;
    }
    Ok(config)
}

fn init_command(config_path: &Path, args: &InitArgs) -> Result<i32> {
    if config_path.exists() && !args.force {
        eprintln!(
            "{} {} already exists (use --force to overwrite)",
            "error:".red().bold(),
            config_path.display()
        );
        return Ok(1);
    }

    SuiteConfig::write_template(config_path)
        .with_context(|| format!("failed to write {}", config_path.display()))?;
    println!(
        "Wrote starter configuration to {}",
        config_path.display().to_string().green()
    );
    println!("Edit the server settings and enable the EAP types you want to test.");
    Ok(0)
}

async fn doctor_command(config_path: &Path) -> Result<i32> {
    let config = match SuiteConfig::load(config_path) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{} {err}", "error:".red().bold());
            return Ok(2);
        }
    };

    let runner = PreflightRunner::default_checks();
    let report = runner.run_all(&config).await;

    println!("eaptest doctor\n");
    for check in &report.checks {
        let symbol = match check.status {
            CheckStatus::Pass => "✓".green(),
            CheckStatus::Warn => "!".yellow(),
            CheckStatus::Fail => "✗".red(),
        };
        println!("  {symbol} {}", check.label);
        if let Some(message) = &check.message {
            println!("      {message}");
        }
    }
    println!(
        "\n{} passed, {} warnings, {} failures",
        report.checks.len() - report.warnings - report.failures,
        report.warnings,
        report.failures
    );

    if report.failures > 0 { Ok(3) } else { Ok(0) }
}
