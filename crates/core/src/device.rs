use std::io;
use std::path::PathBuf;
use std::process::Command;

use thiserror::Error;
use tracing::{debug, trace};

use crate::model::DeviceSnapshot;

/// Fixed prefix on every package line emitted by the device's package list
/// queries.
pub const PACKAGE_LINE_PREFIX: &str = "package:";

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("device control tool not found: {0}")]
    ToolMissing(String),

    #[error("device unavailable: {0}")]
    Unavailable(String),

    #[error("device did not report boot completion after {0} poll(s)")]
    BootTimeout(u64),

    #[error("failed to run {command}: {source}")]
    Io {
        command: String,
        #[source]
        source: io::Error,
    },
}

/// Captured result of one control-channel command. Mutating commands are
/// best-effort on the device side; callers decide what a failure means.
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub succeeded: bool,
    pub output: String,
}

/// Command/response executor against one attached device. Every call is
/// blocking call-and-response; there is no overlap between operations.
pub trait DeviceControl {
    /// Block until a device is detected on the channel.
    fn wait_for_device(&self) -> Result<(), DeviceError>;

    /// Whether the device reports boot completion. `false` covers both "not
    /// yet" and "could not ask" — retries belong to the caller's barrier.
    fn boot_completed(&self) -> Result<bool, DeviceError>;

    fn list_enabled_packages(&self) -> Result<String, DeviceError>;

    fn list_disabled_packages(&self) -> Result<String, DeviceError>;

    /// Detach any user-installed update layered on a system package. May
    /// legitimately fail for packages with no update.
    fn uninstall_updates(&self, package: &str) -> Result<CommandOutcome, DeviceError>;

    fn disable_user(&self, package: &str) -> Result<CommandOutcome, DeviceError>;

    fn force_stop(&self, package: &str) -> Result<CommandOutcome, DeviceError>;

    fn clear_data(&self, package: &str) -> Result<CommandOutcome, DeviceError>;

    fn reboot(&self) -> Result<(), DeviceError>;
}

/// Parse a line-oriented package list response, stripping the fixed line
/// prefix and dropping blank lines.
pub fn parse_package_list(text: &str) -> Vec<String> {
    text.lines()
        .map(|line| line.trim().trim_start_matches(PACKAGE_LINE_PREFIX).trim())
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Take the two package-state snapshots, one query each. No retry here; an
/// unreachable channel is fatal to the run.
pub fn probe_snapshot(device: &dyn DeviceControl) -> Result<DeviceSnapshot, DeviceError> {
    debug!("enumerating disabled packages");
    let disabled = parse_package_list(&device.list_disabled_packages()?);
    debug!("enumerating enabled packages");
    let enabled = parse_package_list(&device.list_enabled_packages()?);

    Ok(DeviceSnapshot {
        enabled: enabled.into_iter().collect(),
        disabled: disabled.into_iter().collect(),
    })
}

/// `DeviceControl` implementation shelling out to the adb binary.
#[derive(Debug, Clone)]
pub struct AdbDevice {
    adb_path: PathBuf,
}

impl AdbDevice {
    pub fn new(adb_path: impl Into<PathBuf>) -> Self {
        Self {
            adb_path: adb_path.into(),
        }
    }

    /// Precondition check: the control tool must be invocable at all before
    /// any device interaction starts.
    pub fn check_available(&self) -> Result<(), DeviceError> {
        let outcome = self.run(&["version"])?;
        if !outcome.succeeded {
            return Err(DeviceError::Unavailable(outcome.output));
        }
        Ok(())
    }

    fn run(&self, args: &[&str]) -> Result<CommandOutcome, DeviceError> {
        let rendered = format!("{} {}", self.adb_path.display(), args.join(" "));
        trace!("running: {rendered}");

        let output = Command::new(&self.adb_path)
            .args(args)
            .output()
            .map_err(|err| {
                if err.kind() == io::ErrorKind::NotFound {
                    DeviceError::ToolMissing(self.adb_path.display().to_string())
                } else {
                    DeviceError::Io {
                        command: rendered.clone(),
                        source: err,
                    }
                }
            })?;

        let mut text = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            if !text.trim().is_empty() {
                text.push('\n');
            }
            text.push_str(stderr.trim_end());
        }

        Ok(CommandOutcome {
            succeeded: output.status.success(),
            output: text.trim().to_string(),
        })
    }

    fn shell(&self, args: &[&str]) -> Result<CommandOutcome, DeviceError> {
        let mut full = vec!["shell"];
        full.extend_from_slice(args);
        self.run(&full)
    }

    fn query(&self, args: &[&str]) -> Result<String, DeviceError> {
        let outcome = self.shell(args)?;
        if !outcome.succeeded {
            return Err(DeviceError::Unavailable(outcome.output));
        }
        Ok(outcome.output)
    }
}

impl DeviceControl for AdbDevice {
    fn wait_for_device(&self) -> Result<(), DeviceError> {
        let outcome = self.run(&["wait-for-device"])?;
        if !outcome.succeeded {
            return Err(DeviceError::Unavailable(outcome.output));
        }
        Ok(())
    }

    fn boot_completed(&self) -> Result<bool, DeviceError> {
        // The device may drop off the channel mid-boot; treat an unanswered
        // query as "not booted yet" and let the barrier keep polling.
        let outcome = self.shell(&["getprop", "sys.boot_completed"])?;
        Ok(outcome.succeeded && outcome.output.trim() == "1")
    }

    fn list_enabled_packages(&self) -> Result<String, DeviceError> {
        self.query(&["pm", "list", "packages", "-e"])
    }

    fn list_disabled_packages(&self) -> Result<String, DeviceError> {
        self.query(&["pm", "list", "packages", "-d"])
    }

    fn uninstall_updates(&self, package: &str) -> Result<CommandOutcome, DeviceError> {
        self.shell(&["pm", "uninstall", package])
    }

    fn disable_user(&self, package: &str) -> Result<CommandOutcome, DeviceError> {
        self.shell(&["pm", "disable-user", package])
    }

    fn force_stop(&self, package: &str) -> Result<CommandOutcome, DeviceError> {
        self.shell(&["am", "force-stop", package])
    }

    fn clear_data(&self, package: &str) -> Result<CommandOutcome, DeviceError> {
        self.shell(&["pm", "clear", package])
    }

    fn reboot(&self) -> Result<(), DeviceError> {
        let outcome = self.run(&["reboot"])?;
        if !outcome.succeeded {
            return Err(DeviceError::Unavailable(outcome.output));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_package_list, probe_snapshot, CommandOutcome, DeviceControl, DeviceError};

    struct ListOnlyDevice {
        enabled: &'static str,
        disabled: &'static str,
    }

    impl DeviceControl for ListOnlyDevice {
        fn wait_for_device(&self) -> Result<(), DeviceError> {
            Ok(())
        }

        fn boot_completed(&self) -> Result<bool, DeviceError> {
            Ok(true)
        }

        fn list_enabled_packages(&self) -> Result<String, DeviceError> {
            Ok(self.enabled.to_string())
        }

        fn list_disabled_packages(&self) -> Result<String, DeviceError> {
            Ok(self.disabled.to_string())
        }

        fn uninstall_updates(&self, _package: &str) -> Result<CommandOutcome, DeviceError> {
            unreachable!("snapshot probing must not mutate the device")
        }

        fn disable_user(&self, _package: &str) -> Result<CommandOutcome, DeviceError> {
            unreachable!("snapshot probing must not mutate the device")
        }

        fn force_stop(&self, _package: &str) -> Result<CommandOutcome, DeviceError> {
            unreachable!("snapshot probing must not mutate the device")
        }

        fn clear_data(&self, _package: &str) -> Result<CommandOutcome, DeviceError> {
            unreachable!("snapshot probing must not mutate the device")
        }

        fn reboot(&self) -> Result<(), DeviceError> {
            unreachable!("snapshot probing must not mutate the device")
        }
    }

    #[test]
    fn parses_prefixed_package_lines() {
        let text = "package:com.bloat.a\r\npackage:com.keep.b\n\n  package:com.bloat.c  \n";
        assert_eq!(
            parse_package_list(text),
            vec![
                "com.bloat.a".to_string(),
                "com.keep.b".to_string(),
                "com.bloat.c".to_string()
            ]
        );
    }

    #[test]
    fn empty_response_yields_empty_list() {
        assert!(parse_package_list("").is_empty());
        assert!(parse_package_list("\n\n").is_empty());
    }

    #[test]
    fn snapshot_probe_builds_both_sets() {
        let device = ListOnlyDevice {
            enabled: "package:com.keep.b\npackage:com.bloat.a",
            disabled: "package:com.gone.c",
        };

        let snapshot = probe_snapshot(&device).expect("probe");
        assert_eq!(snapshot.enabled.len(), 2);
        assert!(snapshot.enabled.contains("com.bloat.a"));
        assert!(snapshot.disabled.contains("com.gone.c"));
        assert!(!snapshot.disabled.contains("com.keep.b"));
    }
}
