use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use droidsweep_core::{
    execute_run, AdbDevice, OutcomeStatus, PackagePrompt, RunOptions, RunReport, SystemClock,
    WorkflowPhase, DEFAULT_LISTS_DIR, DEFAULT_LOG_FILE,
};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "droidsweep",
    version,
    about = "Disable and clear declared bloatware packages on a connected Android device."
)]
struct Cli {
    /// Log in verbose mode.
    #[arg(short, long)]
    verbose: bool,

    /// Enumerate matching bloatware packages without making any changes.
    #[arg(short, long = "enumerate-only")]
    enumerate_only: bool,

    /// Decide what to do with each matched package.
    #[arg(short, long)]
    interactive: bool,

    /// Do not reboot and clear package data after disabling.
    #[arg(short = 'n', long = "no-clear", conflicts_with = "clear_only")]
    no_clear: bool,

    /// Do not log disabled packages to a file.
    #[arg(short = 'N', long = "no-log")]
    no_log: bool,

    /// Clear matched packages right away, skipping the disable phase.
    #[arg(short = 'c', long = "clear-only")]
    clear_only: bool,

    /// Act on all declared packages, even already disabled ones.
    #[arg(short, long)]
    force: bool,

    /// Also clear declared packages the device already reports disabled.
    #[arg(long = "clear-already-disabled")]
    clear_already_disabled: bool,

    /// Declaration list root directory.
    #[arg(long = "lists", value_name = "DIR", default_value = DEFAULT_LISTS_DIR)]
    lists_dir: PathBuf,

    /// Run log output file.
    #[arg(long = "log-file", value_name = "FILE", default_value = DEFAULT_LOG_FILE)]
    log_file: PathBuf,

    /// Path to the adb binary.
    #[arg(long, value_name = "PATH", default_value = "adb")]
    adb: PathBuf,

    /// Boot barrier polling interval in seconds.
    #[arg(long = "boot-poll-secs", value_name = "SECS", default_value_t = 1)]
    boot_poll_secs: u64,

    /// Maximum boot barrier polls before giving up (polls forever when omitted).
    #[arg(long = "max-boot-polls", value_name = "N")]
    max_boot_polls: Option<u64>,

    /// Optional JSON run report output file.
    #[arg(long, value_name = "FILE")]
    report: Option<PathBuf>,
}

struct StdinPrompt;

impl PackagePrompt for StdinPrompt {
    fn confirm_disable(&mut self, package: &str) -> Result<bool> {
        print!("Disable {package}? [y/N]: ");
        io::stdout().flush().context("failed to flush stdout")?;

        let mut answer = String::new();
        io::stdin()
            .read_line(&mut answer)
            .context("failed to read interactive answer")?;
        Ok(answer.trim().eq_ignore_ascii_case("y"))
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let device = AdbDevice::new(&cli.adb);
    device.check_available()?;

    let options = RunOptions {
        lists_dir: cli.lists_dir,
        log_file: cli.log_file,
        verbose: cli.verbose,
        enumerate_only: cli.enumerate_only,
        interactive: cli.interactive,
        no_clear: cli.no_clear,
        no_log: cli.no_log,
        clear_only: cli.clear_only,
        force: cli.force,
        clear_already_disabled: cli.clear_already_disabled,
        boot_poll_interval: Duration::from_secs(cli.boot_poll_secs.max(1)),
        max_boot_polls: cli.max_boot_polls,
    };

    let mut prompt = StdinPrompt;
    let prompt_ref: Option<&mut dyn PackagePrompt> = if options.interactive {
        Some(&mut prompt)
    } else {
        None
    };

    let report = execute_run(&device, &SystemClock, prompt_ref, &options)?;

    if options.enumerate_only {
        for package in &report.actionable {
            println!("{package}");
        }
    } else {
        print_summary(&report);
    }

    for warning in &report.warnings {
        eprintln!("Warning: {warning}");
    }

    if let Some(report_path) = cli.report {
        let payload =
            serde_json::to_string_pretty(&report).context("failed to serialize run report")?;
        fs::write(&report_path, payload)
            .with_context(|| format!("failed to write run report to {}", report_path.display()))?;
        println!("Run report written to {}", report_path.display());
    }

    Ok(())
}

fn print_summary(report: &RunReport) {
    let cleared = report
        .outcomes
        .iter()
        .filter(|o| o.phase == WorkflowPhase::Clear && o.status == OutcomeStatus::Succeeded)
        .count();
    let failed = report
        .outcomes
        .iter()
        .filter(|o| o.status == OutcomeStatus::Failed)
        .count();
    let skipped = report
        .outcomes
        .iter()
        .filter(|o| o.status == OutcomeStatus::Skipped)
        .count();

    println!(
        "Declared {} package(s); {} actionable.",
        report.declared_count,
        report.actionable.len()
    );
    println!(
        "Disabled {}, cleared {}, failed {}, skipped {}.",
        report.disabled_this_run.len(),
        cleared,
        failed,
        skipped
    );
    if report.log_written {
        println!("Disabled-package log written to {}", report.run.log_file);
    }
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
