//! Command-line inputs to batch items.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use walkdir::WalkDir;
use xl_core::formats::{extension_lowercase, is_allowed_input};
use xl_core::BatchInput;

/// Files are anchored at their parent folder; folders are walked recursively
/// and every file found is anchored at the folder itself.
pub fn collect_inputs(paths: &[PathBuf]) -> Result<Vec<BatchInput>> {
    let mut inputs = Vec::new();
    for path in paths {
        let path = std::path::absolute(path)
            .with_context(|| format!("Invalid input path: {}", path.display()))?;

        if path.is_dir() {
            walk_folder(&path, &mut inputs)?;
        } else if path.is_file() {
            let anchor = path.parent().map(Path::to_path_buf).unwrap_or_default();
            inputs.push(BatchInput::new(path, anchor));
        } else {
            bail!("Input path does not exist: {}", path.display());
        }
    }
    Ok(inputs)
}

fn walk_folder(folder: &Path, out: &mut Vec<BatchInput>) -> Result<()> {
    for entry in WalkDir::new(folder).follow_links(true) {
        let entry =
            entry.with_context(|| format!("Failed to read folder: {}", folder.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        if !is_allowed_input(&extension_lowercase(entry.path())) {
            continue;
        }
        out.push(BatchInput::new(entry.path(), folder));
    }
    Ok(())
}
