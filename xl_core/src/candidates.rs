//! Candidate racing: produce several outputs, keep the smallest.
//!
//! Shared by Smallest Lossless (one candidate per format) and intelligent
//! effort (the same encode at effort 7 and 9).

use std::path::{Path, PathBuf};

use crate::dispatch::{EncoderCall, ExecEnv};
use crate::error::{ConvError, Result};

pub const LOW_EFFORT: u8 = 7;
pub const HIGH_EFFORT: u8 = 9;

/// Error codes used by one kind of race.
#[derive(Debug, Clone, Copy)]
pub struct RaceCodes {
    /// A candidate could not be measured.
    pub measure: &'static str,
    /// Cleanup after a failed measurement failed.
    pub cleanup: &'static str,
    /// A losing candidate could not be deleted.
    pub discard: &'static str,
}

pub const SMALLEST_CODES: RaceCodes = RaceCodes {
    measure: "SL2",
    cleanup: "SL3",
    discard: "SL4",
};

pub const EFFORT_CODES: RaceCodes = RaceCodes {
    measure: "C2",
    cleanup: "C2",
    discard: "C2",
};

/// Index of the smallest size; ties keep the earliest.
pub fn smallest_index(sizes: &[u64]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, &size) in sizes.iter().enumerate() {
        match best {
            Some(b) if size >= sizes[b] => {}
            _ => best = Some(i),
        }
    }
    best
}

/// Deletes every candidate but the smallest and returns its index.
/// If any candidate is missing, all of them are removed.
pub fn keep_smallest(paths: &[PathBuf], codes: RaceCodes) -> Result<usize> {
    let mut sizes = Vec::with_capacity(paths.len());
    for path in paths {
        match std::fs::metadata(path) {
            Ok(m) => sizes.push(m.len()),
            Err(e) => {
                remove_all(paths).map_err(|e| {
                    ConvError::file(codes.cleanup, format!("Failed to delete tmp files. {}", e))
                })?;
                return Err(ConvError::file(
                    codes.measure,
                    format!("Failed to get file sizes. {}", e),
                ));
            }
        }
    }

    let winner = smallest_index(&sizes)
        .ok_or_else(|| ConvError::generic(codes.measure, "No candidates to compare."))?;
    tracing::debug!(?sizes, winner, "Smallest candidate selected");

    for (i, path) in paths.iter().enumerate() {
        if i != winner {
            std::fs::remove_file(path).map_err(|e| {
                ConvError::file(codes.discard, format!("Failed to delete tmp files. {}", e))
            })?;
        }
    }
    Ok(winner)
}

fn remove_all(paths: &[PathBuf]) -> std::io::Result<()> {
    for path in paths {
        if path.exists() {
            std::fs::remove_file(path)?;
        }
    }
    Ok(())
}

/// Encodes `src` at effort 7 and 9 into two tagged probes next to `dst` and
/// moves the smaller one to `dst`. Cancellation between the runs removes the
/// first probe before reporting.
pub fn encode_with_intelligent_effort(
    env: &ExecEnv<'_>,
    call: &EncoderCall,
    src: &Path,
    dst: &Path,
    dir: &Path,
    name: &str,
    ext: &str,
) -> Result<()> {
    let (low, high) = {
        let mut lock = env.paths.lock();
        (
            lock.allocate(dir, name, ext, true),
            lock.allocate(dir, name, ext, true),
        )
    };

    env.run_call(&call.with_effort(LOW_EFFORT), src, &low)?;

    if env.cancel.is_cancelled() {
        if low.exists() {
            std::fs::remove_file(&low)
                .map_err(|e| ConvError::file("C1", e.to_string()))?;
        }
        return Err(ConvError::Cancelled);
    }

    if let Err(e) = env.run_call(&call.with_effort(HIGH_EFFORT), src, &high) {
        if let Err(cleanup) = remove_all(&[low, high]) {
            tracing::warn!(error = %cleanup, "Failed to delete effort probes");
        }
        return Err(e);
    }

    let probes = [low, high];
    let winner = keep_smallest(&probes, EFFORT_CODES)?;
    std::fs::rename(&probes[winner], dst).map_err(|e| ConvError::file("C2", e.to_string()))?;
    tracing::debug!(
        effort = if winner == 0 { LOW_EFFORT } else { HIGH_EFFORT },
        dst = %dst.display(),
        "Intelligent effort picked"
    );
    Ok(())
}
