//! Metadata, file attributes and deletion of the original
//!
//! The source for anything copied is always the original file, never a proxy.

use std::io;
use std::path::Path;

use crate::dispatch::ExecEnv;
use crate::error::{ConvError, Result};
use crate::params::{DeleteMode, MetadataPolicy};
use crate::process::safe_path_arg;
use crate::tools::Tool;

fn strs(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

/// Encoder-side strip flags for "Encoder - Wipe". Empty for every other policy
/// and for encoders with no documented strip option.
pub fn encoder_args(tool: Tool, policy: MetadataPolicy, jpg_to_jxl_lossless: bool) -> Vec<String> {
    if policy != MetadataPolicy::EncoderWipe {
        return Vec::new();
    }
    match tool {
        // Stripping would break bit-exact JPEG reconstruction.
        Tool::Cjxl if jpg_to_jxl_lossless => Vec::new(),
        Tool::Cjxl => strs(&["-x", "strip=exif", "-x", "strip=xmp", "-x", "strip=jumbf"]),
        Tool::Magick => strs(&["-strip"]),
        Tool::Avifenc => strs(&["--ignore-exif", "--ignore-xmp"]),
        Tool::Oxipng => strs(&["--strip", "safe"]),
        _ => Vec::new(),
    }
}

/// ExifTool arguments for `dst`, or `None` when the policy is encoder-side.
pub fn exiftool_args(policy: MetadataPolicy, src: &Path, dst: &Path) -> Option<Vec<String>> {
    let dst = safe_path_arg(dst).into_owned();
    let mut args = match policy {
        MetadataPolicy::ExifToolWipe => strs(&[
            "-all=",
            "-tagsFromFile",
            "@",
            "--icc_profile:all",
            "--ColorSpace:all",
            "-overwrite_original",
        ]),
        MetadataPolicy::ExifToolPreserve => vec![
            "-tagsfromfile".to_string(),
            safe_path_arg(src).into_owned(),
            "-overwrite_original".to_string(),
        ],
        MetadataPolicy::ExifToolUnsafeWipe => strs(&["-all=", "-overwrite_original"]),
        MetadataPolicy::EncoderWipe | MetadataPolicy::EncoderPreserve => return None,
    };
    args.push(dst);
    Some(args)
}

/// Applies an ExifTool policy. A missing exiftool binary is logged, not fatal.
pub fn run_exiftool(env: &ExecEnv<'_>, policy: MetadataPolicy, src: &Path, dst: &Path) -> Result<()> {
    let Some(args) = exiftool_args(policy, src, dst) else {
        return Ok(());
    };
    match env.query(Tool::Exiftool, &args) {
        Ok(_) => Ok(()),
        Err(ConvError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
            tracing::warn!(dst = %dst.display(), "ExifTool not found, metadata left as encoded");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Copies permissions and access/modification times from `src` to `dst`.
pub fn copy_attributes(src: &Path, dst: &Path) -> io::Result<()> {
    let meta = std::fs::metadata(src)?;
    std::fs::set_permissions(dst, meta.permissions())?;
    let atime = filetime::FileTime::from_last_access_time(&meta);
    let mtime = filetime::FileTime::from_last_modification_time(&meta);
    filetime::set_file_times(dst, atime, mtime)
}

pub fn delete_original(path: &Path, mode: DeleteMode) -> Result<()> {
    let outcome = match mode {
        DeleteMode::Trash => trash::delete(path).map_err(|e| e.to_string()),
        DeleteMode::Permanent => std::fs::remove_file(path).map_err(|e| e.to_string()),
    };
    outcome.map_err(|e| ConvError::file("P1", format!("Failed to delete original file. {}", e)))
}
