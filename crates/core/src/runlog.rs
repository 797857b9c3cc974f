use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

/// Persist the disabled-this-run list, one identifier per line, overwriting
/// any prior content. An empty list writes nothing so a log from an earlier
/// run survives a run that disabled nothing new. Returns whether a write
/// happened.
pub fn write_disabled_log(path: &Path, packages: &[String]) -> Result<bool> {
    if packages.is_empty() {
        debug!(
            "no packages disabled this run, leaving {} untouched",
            path.display()
        );
        return Ok(false);
    }

    fs::write(path, packages.join("\n"))
        .with_context(|| format!("failed to write run log {}", path.display()))?;
    debug!("logged {} disabled package(s) to {}", packages.len(), path.display());
    Ok(true)
}
