//! Input discovery and output path planning for batch runs

use crate::{
    error::{BgRemovalError, Result},
    services::ImageIOService,
};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Default suffix appended to output file stems
pub const DEFAULT_OUTPUT_SUFFIX: &str = "_nobg";

/// Collect supported images under `dir`, sorted by path
///
/// `pattern` is a glob matched against the file name only (e.g. `*.jpg`).
/// Files with unsupported extensions are never returned.
///
/// # Errors
/// - `dir` is not a directory or cannot be read
/// - Invalid glob pattern
pub fn find_images(dir: &Path, recursive: bool, pattern: Option<&str>) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(BgRemovalError::invalid_config(format!(
            "Not a directory: {}",
            dir.display()
        )));
    }

    let pattern = pattern
        .map(glob::Pattern::new)
        .transpose()
        .map_err(|e| BgRemovalError::invalid_config(format!("Invalid file pattern: {e}")))?;

    let mut walker = WalkDir::new(dir).follow_links(true);
    if !recursive {
        walker = walker.max_depth(1);
    }

    let mut images = Vec::new();
    for entry in walker {
        let entry = entry.map_err(|e| {
            BgRemovalError::internal(format!("Failed to read directory {}: {e}", dir.display()))
        })?;

        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        if !ImageIOService::is_supported_format(path) {
            continue;
        }

        if let Some(pattern) = &pattern {
            let matches = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| pattern.matches(name));
            if !matches {
                continue;
            }
        }

        images.push(path.to_path_buf());
    }

    images.sort();
    Ok(images)
}

/// `<dir>/<stem><suffix>.png` next to the input
#[must_use]
pub fn output_path_for_file(input: &Path, suffix: &str) -> PathBuf {
    input.with_file_name(output_file_name(input, suffix))
}

/// Output path inside `output_dir`, keeping the input's directory layout
/// relative to `input_root`
#[must_use]
pub fn output_path_in_dir(input: &Path, input_root: &Path, output_dir: &Path, suffix: &str) -> PathBuf {
    let relative_parent = input
        .parent()
        .and_then(|parent| parent.strip_prefix(input_root).ok())
        .unwrap_or_else(|| Path::new(""));

    output_dir
        .join(relative_parent)
        .join(output_file_name(input, suffix))
}

fn output_file_name(input: &Path, suffix: &str) -> String {
    let stem = input
        .file_stem()
        .map_or_else(|| "output".into(), |stem| stem.to_string_lossy());
    format!("{stem}{suffix}.png")
}
