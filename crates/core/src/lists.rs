use std::collections::HashSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;
use walkdir::WalkDir;

/// File extension a declaration list must carry to be discovered.
pub const LIST_FILE_EXTENSION: &str = "txt";

const COMMENT_MARKER: char = '#';

/// Recursively gather declared package identifiers from every list file
/// under `root`, deduplicated, in a deterministic discovery order.
///
/// A missing root is not an error: it is created empty and yields an empty
/// set. Unreadable files are recorded in `warnings` and skipped.
pub fn load_declarations(root: &Path, warnings: &mut Vec<String>) -> Result<Vec<String>> {
    if !root.exists() {
        fs::create_dir_all(root)
            .with_context(|| format!("failed to create declaration root {}", root.display()))?;
        debug!("created empty declaration root: {}", root.display());
        return Ok(Vec::new());
    }

    let mut declared = Vec::new();
    let mut seen = HashSet::new();

    let walker = WalkDir::new(root).follow_links(false).sort_by_file_name();
    for item in walker {
        let entry = match item {
            Ok(entry) => entry,
            Err(err) => {
                warnings.push(format!(
                    "list discovery error under {}: {}",
                    root.display(),
                    err
                ));
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some(LIST_FILE_EXTENSION) {
            continue;
        }

        debug!("discovered list: {}", path.display());
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) => {
                warnings.push(format!("failed to read list {}: {}", path.display(), err));
                continue;
            }
        };

        for line in contents.lines() {
            let stripped = line.trim();
            if stripped.is_empty() {
                continue;
            }
            if stripped.starts_with(COMMENT_MARKER) {
                continue;
            }
            if seen.insert(stripped.to_string()) {
                declared.push(stripped.to_string());
            }
        }
    }

    debug!(
        "loaded {} declared package(s) from {}",
        declared.len(),
        root.display()
    );
    Ok(declared)
}
