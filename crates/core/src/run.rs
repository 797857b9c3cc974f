use anyhow::Result;
use chrono::{SecondsFormat, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::classify::{classify, clear_targets};
use crate::device::{probe_snapshot, DeviceControl};
use crate::lists::load_declarations;
use crate::model::{RunMetadata, RunOptions, RunReport, REPORT_VERSION};
use crate::runlog::write_disabled_log;
use crate::workflow::{wait_until_ready, Clock, PackagePrompt, WorkflowEngine};

/// Execute one full reconciliation run against the attached device and
/// return its report.
///
/// Sequence: ready barrier, state snapshots, declaration loading,
/// classification, then either the enumerate-only early exit or the
/// workflow engine followed by the run log write.
pub fn execute_run(
    device: &dyn DeviceControl,
    clock: &dyn Clock,
    prompt: Option<&mut dyn PackagePrompt>,
    options: &RunOptions,
) -> Result<RunReport> {
    let run_id = Uuid::new_v4().to_string();
    let mut warnings = Vec::new();

    wait_until_ready(device, clock, options)?;

    let snapshot = probe_snapshot(device)?;
    debug!(
        "device snapshot: {} enabled, {} disabled",
        snapshot.enabled.len(),
        snapshot.disabled.len()
    );

    let declared = load_declarations(&options.lists_dir, &mut warnings)?;
    let actionable = classify(&declared, &snapshot, options.force);
    let clear_set = clear_targets(
        &declared,
        &snapshot,
        &actionable,
        options.clear_already_disabled,
    );
    info!(
        "{} declared package(s), {} actionable",
        declared.len(),
        actionable.len()
    );

    let mut report = RunReport {
        report_version: REPORT_VERSION.to_string(),
        run_id,
        generated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        run: RunMetadata::from_options(options),
        declared_count: declared.len(),
        enabled_count: snapshot.enabled.len(),
        disabled_count: snapshot.disabled.len(),
        actionable,
        outcomes: Vec::new(),
        disabled_this_run: Vec::new(),
        log_written: false,
        warnings: Vec::new(),
    };

    if options.enumerate_only {
        info!(
            "enumerate-only mode: {} actionable package(s), no changes made",
            report.actionable.len()
        );
        report.warnings = warnings;
        return Ok(report);
    }

    let engine = WorkflowEngine::new(device, clock, options);
    let outcome = engine.run(&report.actionable, &clear_set, prompt)?;
    warnings.extend(outcome.warnings);

    if !options.no_log {
        match write_disabled_log(&options.log_file, &outcome.disabled_this_run) {
            Ok(written) => {
                report.log_written = written;
                if written {
                    info!("logged disabled packages to {}", options.log_file.display());
                }
            }
            // A failed log write must not discard the run's device work.
            Err(err) => warnings.push(format!(
                "failed to write run log {}: {err:#}",
                options.log_file.display()
            )),
        }
    }

    report.outcomes = outcome.outcomes;
    report.disabled_this_run = outcome.disabled_this_run;
    report.warnings = warnings;
    Ok(report)
}
