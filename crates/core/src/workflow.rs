use std::collections::HashSet;
use std::time::Duration;

use anyhow::{bail, Result};
use tracing::{debug, info, warn};

use crate::device::{CommandOutcome, DeviceControl, DeviceError};
use crate::model::{OutcomeStatus, PackageOutcome, RunOptions, WorkflowPhase};

/// Sleep seam for the boot barrier, injectable so tests can simulate a
/// device that never finishes booting without waiting on a wall clock.
pub trait Clock {
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Operator decision seam for the interactive gate. Must never be consulted
/// outside interactive runs.
pub trait PackagePrompt {
    fn confirm_disable(&mut self, package: &str) -> Result<bool>;
}

/// Accumulated side effects of one workflow pass.
#[derive(Debug, Default)]
pub struct WorkflowOutcome {
    pub outcomes: Vec<PackageOutcome>,
    pub disabled_this_run: Vec<String>,
    pub warnings: Vec<String>,
}

/// Block until the device is attached and reports boot completion.
///
/// Polls at the configured fixed interval. Without `max_boot_polls` this
/// blocks indefinitely, matching the deliberate wait-for-device semantics;
/// with it, barrier exhaustion is a fatal `BootTimeout`.
pub fn wait_until_ready(
    device: &dyn DeviceControl,
    clock: &dyn Clock,
    options: &RunOptions,
) -> Result<(), DeviceError> {
    debug!("waiting for device to be detected");
    device.wait_for_device()?;
    debug!("device located, waiting for boot to complete");

    let mut polls = 0_u64;
    loop {
        if device.boot_completed()? {
            debug!("boot completed");
            return Ok(());
        }
        if let Some(max) = options.max_boot_polls {
            if polls >= max {
                return Err(DeviceError::BootTimeout(polls));
            }
        }
        polls = polls.saturating_add(1);
        clock.sleep(options.boot_poll_interval);
    }
}

/// Drives each actionable package through disable, the reboot barrier, and
/// clear, honoring the run's policy flags.
pub struct WorkflowEngine<'a> {
    device: &'a dyn DeviceControl,
    clock: &'a dyn Clock,
    options: &'a RunOptions,
}

impl<'a> WorkflowEngine<'a> {
    pub fn new(device: &'a dyn DeviceControl, clock: &'a dyn Clock, options: &'a RunOptions) -> Self {
        Self {
            device,
            clock,
            options,
        }
    }

    /// Run the full workflow over the actionable set. Per-package command
    /// failures are recorded and never abort the pass; only channel-level
    /// barrier failures (reboot, boot wait) are fatal.
    pub fn run(
        &self,
        actionable: &[String],
        clear_set: &[String],
        mut prompt: Option<&mut dyn PackagePrompt>,
    ) -> Result<WorkflowOutcome> {
        let mut outcome = WorkflowOutcome::default();
        let mut declined = HashSet::new();

        if !self.options.clear_only {
            for package in actionable {
                self.disable_package(package, &mut prompt, &mut outcome, &mut declined)?;
            }
        }

        if self.options.no_clear {
            return Ok(outcome);
        }

        // Interactive rejection shrinks the actionable set, so declined
        // packages are off limits for the clear phase as well.
        let clear_targets: Vec<&String> = clear_set
            .iter()
            .filter(|package| !declined.contains(package.as_str()))
            .collect();
        if clear_targets.is_empty() {
            return Ok(outcome);
        }

        if !self.options.clear_only {
            // Disable-user only fully commits after a reboot on some
            // package managers; clearing a still-running instance is
            // unreliable.
            info!("rebooting device before the clear phase");
            self.device.reboot()?;
            wait_until_ready(self.device, self.clock, self.options)?;
        }

        for package in clear_targets {
            self.clear_package(package, &mut outcome);
        }

        Ok(outcome)
    }

    fn disable_package(
        &self,
        package: &str,
        prompt: &mut Option<&mut dyn PackagePrompt>,
        outcome: &mut WorkflowOutcome,
        declined: &mut HashSet<String>,
    ) -> Result<()> {
        if outcome.disabled_this_run.iter().any(|seen| seen == package) {
            debug!("skipping package already disabled this run: {package}");
            outcome.outcomes.push(PackageOutcome::new(
                package,
                WorkflowPhase::Disable,
                OutcomeStatus::Skipped,
                Some("already disabled this run".to_string()),
            ));
            return Ok(());
        }

        if self.options.interactive {
            let gate = match prompt {
                Some(gate) => gate,
                None => bail!("interactive mode requires a prompt implementation"),
            };
            if !gate.confirm_disable(package)? {
                debug!("operator declined package: {package}");
                declined.insert(package.to_string());
                outcome.outcomes.push(PackageOutcome::new(
                    package,
                    WorkflowPhase::Disable,
                    OutcomeStatus::Skipped,
                    Some("declined by operator".to_string()),
                ));
                return Ok(());
            }
        }

        debug!("detaching updates: {package}");
        match self.device.uninstall_updates(package) {
            Ok(result) if !result.succeeded => {
                // Expected for packages with no user-installed update.
                debug!("uninstall-updates was a no-op for {package}: {}", result.output);
            }
            Ok(_) => {}
            Err(err) => outcome
                .warnings
                .push(format!("uninstall-updates failed for {package}: {err}")),
        }

        debug!("disabling package: {package}");
        match self.device.disable_user(package) {
            Ok(result) if result.succeeded => {
                info!("disabled package: {package}");
                outcome.disabled_this_run.push(package.to_string());
                outcome.outcomes.push(PackageOutcome::new(
                    package,
                    WorkflowPhase::Disable,
                    OutcomeStatus::Succeeded,
                    None,
                ));
            }
            Ok(result) => {
                warn!("disable-user failed for {package}: {}", result.output);
                outcome.outcomes.push(PackageOutcome::new(
                    package,
                    WorkflowPhase::Disable,
                    OutcomeStatus::Failed,
                    Some(result.output),
                ));
            }
            Err(err) => {
                warn!("disable-user failed for {package}: {err}");
                outcome.outcomes.push(PackageOutcome::new(
                    package,
                    WorkflowPhase::Disable,
                    OutcomeStatus::Failed,
                    Some(err.to_string()),
                ));
            }
        }

        Ok(())
    }

    fn clear_package(&self, package: &str, outcome: &mut WorkflowOutcome) {
        let mut failures = Vec::new();

        debug!("stopping package: {package}");
        self.clear_step("force-stop", self.device.force_stop(package), &mut failures);

        debug!("clearing package data: {package}");
        self.clear_step("clear-data", self.device.clear_data(package), &mut failures);

        // Clearing can re-enable a package on some platform versions.
        debug!("disabling package again: {package}");
        self.clear_step(
            "disable-user",
            self.device.disable_user(package),
            &mut failures,
        );

        if failures.is_empty() {
            info!("cleared package: {package}");
            outcome.outcomes.push(PackageOutcome::new(
                package,
                WorkflowPhase::Clear,
                OutcomeStatus::Succeeded,
                None,
            ));
        } else {
            let detail = failures.join(" | ");
            warn!("clear failed for {package}: {detail}");
            outcome.outcomes.push(PackageOutcome::new(
                package,
                WorkflowPhase::Clear,
                OutcomeStatus::Failed,
                Some(detail),
            ));
        }
    }

    fn clear_step(
        &self,
        step: &str,
        result: Result<CommandOutcome, DeviceError>,
        failures: &mut Vec<String>,
    ) {
        match result {
            Ok(result) if result.succeeded => {}
            Ok(result) => failures.push(format!("{step}: {}", result.output)),
            Err(err) => failures.push(format!("{step}: {err}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::{HashSet, VecDeque};
    use std::time::Duration;

    use super::{wait_until_ready, Clock, PackagePrompt, WorkflowEngine};
    use crate::device::{CommandOutcome, DeviceControl, DeviceError};
    use crate::model::{OutcomeStatus, RunOptions, WorkflowPhase};

    #[derive(Default)]
    struct MockDevice {
        calls: RefCell<Vec<String>>,
        fail_disable: HashSet<String>,
        fail_uninstall: bool,
        boot_answers: RefCell<VecDeque<bool>>,
        boot_default: bool,
    }

    impl MockDevice {
        fn ready() -> Self {
            Self {
                boot_default: true,
                ..Self::default()
            }
        }

        fn record(&self, call: impl Into<String>) {
            self.calls.borrow_mut().push(call.into());
        }

        fn calls(&self) -> Vec<String> {
            self.calls.borrow().clone()
        }

        fn ok() -> Result<CommandOutcome, DeviceError> {
            Ok(CommandOutcome {
                succeeded: true,
                output: String::new(),
            })
        }

        fn refused() -> Result<CommandOutcome, DeviceError> {
            Ok(CommandOutcome {
                succeeded: false,
                output: "Failure".to_string(),
            })
        }
    }

    impl DeviceControl for MockDevice {
        fn wait_for_device(&self) -> Result<(), DeviceError> {
            self.record("wait-for-device");
            Ok(())
        }

        fn boot_completed(&self) -> Result<bool, DeviceError> {
            self.record("boot-completed");
            Ok(self
                .boot_answers
                .borrow_mut()
                .pop_front()
                .unwrap_or(self.boot_default))
        }

        fn list_enabled_packages(&self) -> Result<String, DeviceError> {
            self.record("list-enabled");
            Ok(String::new())
        }

        fn list_disabled_packages(&self) -> Result<String, DeviceError> {
            self.record("list-disabled");
            Ok(String::new())
        }

        fn uninstall_updates(&self, package: &str) -> Result<CommandOutcome, DeviceError> {
            self.record(format!("uninstall-updates {package}"));
            if self.fail_uninstall {
                Self::refused()
            } else {
                Self::ok()
            }
        }

        fn disable_user(&self, package: &str) -> Result<CommandOutcome, DeviceError> {
            self.record(format!("disable-user {package}"));
            if self.fail_disable.contains(package) {
                Self::refused()
            } else {
                Self::ok()
            }
        }

        fn force_stop(&self, package: &str) -> Result<CommandOutcome, DeviceError> {
            self.record(format!("force-stop {package}"));
            Self::ok()
        }

        fn clear_data(&self, package: &str) -> Result<CommandOutcome, DeviceError> {
            self.record(format!("clear-data {package}"));
            Self::ok()
        }

        fn reboot(&self) -> Result<(), DeviceError> {
            self.record("reboot");
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeClock {
        sleeps: RefCell<Vec<Duration>>,
    }

    impl Clock for FakeClock {
        fn sleep(&self, duration: Duration) {
            self.sleeps.borrow_mut().push(duration);
        }
    }

    struct ScriptedPrompt {
        answers: VecDeque<bool>,
        asked: Vec<String>,
    }

    impl ScriptedPrompt {
        fn new(answers: &[bool]) -> Self {
            Self {
                answers: answers.iter().copied().collect(),
                asked: Vec::new(),
            }
        }
    }

    impl PackagePrompt for ScriptedPrompt {
        fn confirm_disable(&mut self, package: &str) -> anyhow::Result<bool> {
            self.asked.push(package.to_string());
            Ok(self.answers.pop_front().expect("prompt script exhausted"))
        }
    }

    fn owned(items: &[&str]) -> Vec<String> {
        items.iter().map(|item| item.to_string()).collect()
    }

    #[test]
    fn disables_reboots_then_clears_in_order() {
        let device = MockDevice::ready();
        let clock = FakeClock::default();
        let options = RunOptions::default();
        let engine = WorkflowEngine::new(&device, &clock, &options);

        let targets = owned(&["com.bloat.a"]);
        let outcome = engine.run(&targets, &targets, None).expect("run");

        assert_eq!(outcome.disabled_this_run, owned(&["com.bloat.a"]));
        assert_eq!(
            device.calls(),
            vec![
                "uninstall-updates com.bloat.a",
                "disable-user com.bloat.a",
                "reboot",
                "wait-for-device",
                "boot-completed",
                "force-stop com.bloat.a",
                "clear-data com.bloat.a",
                "disable-user com.bloat.a",
            ]
        );
    }

    #[test]
    fn repeated_package_is_skipped_within_a_pass() {
        let device = MockDevice::ready();
        let clock = FakeClock::default();
        let options = RunOptions {
            no_clear: true,
            ..RunOptions::default()
        };
        let engine = WorkflowEngine::new(&device, &clock, &options);

        let targets = owned(&["com.bloat.a", "com.bloat.a"]);
        let outcome = engine.run(&targets, &[], None).expect("run");

        assert_eq!(outcome.disabled_this_run, owned(&["com.bloat.a"]));
        assert_eq!(
            device
                .calls()
                .iter()
                .filter(|call| call.as_str() == "disable-user com.bloat.a")
                .count(),
            1
        );
        assert!(outcome
            .outcomes
            .iter()
            .any(|o| o.status == OutcomeStatus::Skipped));
    }

    #[test]
    fn no_clear_stops_after_the_disable_phase() {
        let device = MockDevice::ready();
        let clock = FakeClock::default();
        let options = RunOptions {
            no_clear: true,
            ..RunOptions::default()
        };
        let engine = WorkflowEngine::new(&device, &clock, &options);

        let targets = owned(&["com.bloat.a"]);
        engine.run(&targets, &targets, None).expect("run");

        let calls = device.calls();
        assert!(!calls.iter().any(|call| call == "reboot"));
        assert!(!calls.iter().any(|call| call.starts_with("force-stop")));
        assert!(!calls.iter().any(|call| call.starts_with("clear-data")));
    }

    #[test]
    fn clear_only_skips_disable_and_reboot() {
        let device = MockDevice::ready();
        let clock = FakeClock::default();
        let options = RunOptions {
            clear_only: true,
            ..RunOptions::default()
        };
        let engine = WorkflowEngine::new(&device, &clock, &options);

        let targets = owned(&["com.bloat.a"]);
        let outcome = engine.run(&targets, &targets, None).expect("run");

        assert!(outcome.disabled_this_run.is_empty());
        assert_eq!(
            device.calls(),
            vec![
                "force-stop com.bloat.a",
                "clear-data com.bloat.a",
                "disable-user com.bloat.a",
            ]
        );
    }

    #[test]
    fn empty_clear_set_means_no_reboot() {
        let device = MockDevice::ready();
        let clock = FakeClock::default();
        let options = RunOptions::default();
        let engine = WorkflowEngine::new(&device, &clock, &options);

        let outcome = engine.run(&[], &[], None).expect("run");

        assert!(outcome.outcomes.is_empty());
        assert!(device.calls().is_empty());
    }

    #[test]
    fn declined_package_is_left_untouched_everywhere() {
        let device = MockDevice::ready();
        let clock = FakeClock::default();
        let options = RunOptions {
            interactive: true,
            ..RunOptions::default()
        };
        let engine = WorkflowEngine::new(&device, &clock, &options);
        let mut prompt = ScriptedPrompt::new(&[false]);

        let targets = owned(&["com.bloat.a"]);
        let outcome = engine
            .run(&targets, &targets, Some(&mut prompt))
            .expect("run");

        assert_eq!(prompt.asked, owned(&["com.bloat.a"]));
        assert!(outcome.disabled_this_run.is_empty());
        assert!(device.calls().is_empty());
        assert_eq!(outcome.outcomes.len(), 1);
        assert_eq!(outcome.outcomes[0].status, OutcomeStatus::Skipped);
    }

    #[test]
    fn interactive_mix_only_disables_confirmed_packages() {
        let device = MockDevice::ready();
        let clock = FakeClock::default();
        let options = RunOptions {
            interactive: true,
            ..RunOptions::default()
        };
        let engine = WorkflowEngine::new(&device, &clock, &options);
        let mut prompt = ScriptedPrompt::new(&[false, true]);

        let targets = owned(&["com.bloat.a", "com.bloat.b"]);
        let outcome = engine
            .run(&targets, &targets, Some(&mut prompt))
            .expect("run");

        assert_eq!(outcome.disabled_this_run, owned(&["com.bloat.b"]));
        let calls = device.calls();
        assert!(!calls.iter().any(|call| call.contains("com.bloat.a")));
        assert!(calls.iter().any(|call| call == "force-stop com.bloat.b"));
    }

    #[test]
    fn interactive_without_a_prompt_is_an_error() {
        let device = MockDevice::ready();
        let clock = FakeClock::default();
        let options = RunOptions {
            interactive: true,
            ..RunOptions::default()
        };
        let engine = WorkflowEngine::new(&device, &clock, &options);

        let targets = owned(&["com.bloat.a"]);
        assert!(engine.run(&targets, &targets, None).is_err());
        assert!(device.calls().is_empty());
    }

    #[test]
    fn failed_disable_is_recorded_and_the_run_continues() {
        let device = MockDevice {
            fail_disable: ["com.bloat.a".to_string()].into_iter().collect(),
            boot_default: true,
            ..MockDevice::default()
        };
        let clock = FakeClock::default();
        let options = RunOptions {
            no_clear: true,
            ..RunOptions::default()
        };
        let engine = WorkflowEngine::new(&device, &clock, &options);

        let targets = owned(&["com.bloat.a", "com.bloat.b"]);
        let outcome = engine.run(&targets, &[], None).expect("run");

        assert_eq!(outcome.disabled_this_run, owned(&["com.bloat.b"]));
        let failed: Vec<_> = outcome
            .outcomes
            .iter()
            .filter(|o| o.status == OutcomeStatus::Failed)
            .collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].package, "com.bloat.a");
        assert_eq!(failed[0].phase, WorkflowPhase::Disable);
    }

    #[test]
    fn uninstall_updates_noop_is_not_a_package_failure() {
        let device = MockDevice {
            fail_uninstall: true,
            boot_default: true,
            ..MockDevice::default()
        };
        let clock = FakeClock::default();
        let options = RunOptions {
            no_clear: true,
            ..RunOptions::default()
        };
        let engine = WorkflowEngine::new(&device, &clock, &options);

        let targets = owned(&["com.bloat.a"]);
        let outcome = engine.run(&targets, &[], None).expect("run");

        assert_eq!(outcome.disabled_this_run, owned(&["com.bloat.a"]));
        assert!(outcome
            .outcomes
            .iter()
            .all(|o| o.status != OutcomeStatus::Failed));
    }

    #[test]
    fn barrier_polls_until_the_device_reports_boot() {
        let device = MockDevice {
            boot_answers: RefCell::new([false, false, true].into_iter().collect()),
            ..MockDevice::default()
        };
        let clock = FakeClock::default();
        let options = RunOptions::default();

        wait_until_ready(&device, &clock, &options).expect("ready");
        assert_eq!(clock.sleeps.borrow().len(), 2);
    }

    #[test]
    fn bounded_barrier_times_out_when_the_device_never_boots() {
        let device = MockDevice::default();
        let clock = FakeClock::default();
        let options = RunOptions {
            max_boot_polls: Some(3),
            ..RunOptions::default()
        };

        let err = wait_until_ready(&device, &clock, &options).expect_err("timeout");
        assert!(matches!(err, DeviceError::BootTimeout(3)));
        assert_eq!(clock.sleeps.borrow().len(), 3);
        assert_eq!(
            clock.sleeps.borrow()[0],
            RunOptions::default().boot_poll_interval
        );
    }
}
