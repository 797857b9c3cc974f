use std::collections::HashSet;

use crate::model::DeviceSnapshot;

/// Compute the actionable subset of the declared set, in declaration order.
///
/// Default policy matches declared packages against the enabled set only;
/// packages the device already reports disabled are terminal and excluded
/// even if the device misreports them as enabled too. With `force`,
/// previously disabled packages re-enter the workflow.
pub fn classify(declared: &[String], snapshot: &DeviceSnapshot, force: bool) -> Vec<String> {
    declared
        .iter()
        .filter(|package| {
            if force {
                snapshot.enabled.contains(*package) || snapshot.disabled.contains(*package)
            } else {
                snapshot.enabled.contains(*package) && !snapshot.disabled.contains(*package)
            }
        })
        .cloned()
        .collect()
}

/// Compute the set of packages the clear phase visits: the actionable set,
/// extended with declared-and-already-disabled packages when the
/// `clear_already_disabled` policy is on.
pub fn clear_targets(
    declared: &[String],
    snapshot: &DeviceSnapshot,
    actionable: &[String],
    clear_already_disabled: bool,
) -> Vec<String> {
    let mut targets = actionable.to_vec();
    if !clear_already_disabled {
        return targets;
    }

    let seen: HashSet<&str> = targets.iter().map(String::as_str).collect();
    let extra: Vec<String> = declared
        .iter()
        .filter(|package| {
            snapshot.disabled.contains(*package) && !seen.contains(package.as_str())
        })
        .cloned()
        .collect();
    targets.extend(extra);
    targets
}
