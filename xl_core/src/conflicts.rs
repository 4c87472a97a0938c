//! Source/target compatibility checks run before any work is done.

use std::path::Path;

use crate::error::{ConvError, Result};
use crate::formats::TargetFormat;
use crate::process::{safe_path_arg, ProcessRunner};
use crate::tools::{Tool, ToolPaths};

/// Rejects animation sources the target cannot carry, and any downscaling of
/// animation. `ext` is lowercase without the dot.
pub fn check_for_conflicts(ext: &str, format: TargetFormat, downscaling: bool) -> Result<()> {
    let supported = match ext {
        "gif" => matches!(
            format,
            TargetFormat::JpegXl | TargetFormat::WebP | TargetFormat::Png
        ),
        "apng" => format == TargetFormat::JpegXl,
        _ => return Ok(()),
    };

    if !supported {
        return Err(ConvError::generic(
            "CF0",
            format!(
                "Animation is not supported for {} -> {}",
                ext.to_uppercase(),
                format
            ),
        ));
    }
    if downscaling {
        return Err(ConvError::generic(
            "CF1",
            "Downscaling is not supported for animation",
        ));
    }
    Ok(())
}

/// Multi-page TIFFs are rejected; other containers pass without probing.
pub fn check_for_multipage(
    ext: &str,
    src: &Path,
    runner: &dyn ProcessRunner,
    tools: &ToolPaths,
) -> Result<()> {
    if !matches!(ext, "tif" | "tiff") {
        return Ok(());
    }

    let args = vec![
        "identify".to_string(),
        "-format".to_string(),
        "%n\n".to_string(),
        safe_path_arg(src).into_owned(),
    ];
    let output = runner.run(tools.path(Tool::Magick), &args)?;
    let pages = parse_page_count(&output.stdout);
    tracing::debug!(src = %src.display(), pages = ?pages, "Probed page count");

    match pages {
        Some(n) if n > 1 => Err(ConvError::generic(
            "CF2",
            format!("Multipage images are not supported ({} pages)", n),
        )),
        _ => Ok(()),
    }
}

/// `identify -format %n` prints the count once per frame; the first line is enough.
fn parse_page_count(stdout: &str) -> Option<u32> {
    stdout
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .and_then(|l| l.parse().ok())
}
