use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const REPORT_VERSION: &str = "1.0.0";

/// Default root directory for declaration list files.
pub const DEFAULT_LISTS_DIR: &str = "bloatlists";

/// Default path of the disabled-package run log.
pub const DEFAULT_LOG_FILE: &str = "disabled.txt";

/// Policy flags and paths for one run, resolved once at startup and
/// read-only afterwards.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub lists_dir: PathBuf,
    pub log_file: PathBuf,
    pub verbose: bool,
    pub enumerate_only: bool,
    pub interactive: bool,
    pub no_clear: bool,
    pub no_log: bool,
    pub clear_only: bool,
    pub force: bool,
    /// Re-enter declared packages the device already reports disabled into
    /// the clear phase even when `force` is unset.
    pub clear_already_disabled: bool,
    /// Fixed retry interval for the boot barrier.
    pub boot_poll_interval: Duration,
    /// Bound on boot barrier polling. `None` blocks until the device
    /// reports boot completion, however long that takes.
    pub max_boot_polls: Option<u64>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            lists_dir: PathBuf::from(DEFAULT_LISTS_DIR),
            log_file: PathBuf::from(DEFAULT_LOG_FILE),
            verbose: false,
            enumerate_only: false,
            interactive: false,
            no_clear: false,
            no_log: false,
            clear_only: false,
            force: false,
            clear_already_disabled: false,
            boot_poll_interval: Duration::from_secs(1),
            max_boot_polls: None,
        }
    }
}

/// Enabled/disabled package sets as reported by the device at one point in
/// time. The device is trusted to report them disjoint; nothing downstream
/// may assume a package appears in exactly one of the two.
#[derive(Debug, Clone, Default)]
pub struct DeviceSnapshot {
    pub enabled: HashSet<String>,
    pub disabled: HashSet<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowPhase {
    Disable,
    Clear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Succeeded,
    Failed,
    Skipped,
}

/// Result of one workflow transition attempted against one package.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageOutcome {
    pub package: String,
    pub phase: WorkflowPhase,
    pub status: OutcomeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl PackageOutcome {
    pub fn new(
        package: &str,
        phase: WorkflowPhase,
        status: OutcomeStatus,
        detail: Option<String>,
    ) -> Self {
        Self {
            package: package.to_string(),
            phase,
            status,
            detail,
        }
    }
}

/// Echo of the options the run was started with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    pub lists_dir: String,
    pub log_file: String,
    pub verbose: bool,
    pub enumerate_only: bool,
    pub interactive: bool,
    pub no_clear: bool,
    pub no_log: bool,
    pub clear_only: bool,
    pub force: bool,
    pub clear_already_disabled: bool,
    pub boot_poll_interval_ms: u64,
    pub max_boot_polls: Option<u64>,
}

impl RunMetadata {
    pub fn from_options(options: &RunOptions) -> Self {
        Self {
            lists_dir: options.lists_dir.to_string_lossy().to_string(),
            log_file: options.log_file.to_string_lossy().to_string(),
            verbose: options.verbose,
            enumerate_only: options.enumerate_only,
            interactive: options.interactive,
            no_clear: options.no_clear,
            no_log: options.no_log,
            clear_only: options.clear_only,
            force: options.force,
            clear_already_disabled: options.clear_already_disabled,
            boot_poll_interval_ms: options
                .boot_poll_interval
                .as_millis()
                .try_into()
                .unwrap_or(u64::MAX),
            max_boot_polls: options.max_boot_polls,
        }
    }
}

/// Machine-readable summary of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub report_version: String,
    pub run_id: String,
    pub generated_at: String,
    pub run: RunMetadata,
    pub declared_count: usize,
    pub enabled_count: usize,
    pub disabled_count: usize,
    pub actionable: Vec<String>,
    pub outcomes: Vec<PackageOutcome>,
    pub disabled_this_run: Vec<String>,
    pub log_written: bool,
    pub warnings: Vec<String>,
}
