//! Downscaling
//!
//! Manual modes map to one ImageMagick `-resize` geometry. File-size mode
//! searches for the scale percentage whose *encoded* output lands just under a
//! byte target:
//!
//! 1. probe at 100% (an image that already fits is never upscaled), then 50%
//! 2. fit `percent = slope * size + intercept` through every probe so far
//! 3. probe at the percent predicted for the target, repeat
//!
//! The search stops when a probe lands in `[target * 0.95, target]`, when a
//! percent repeats, at 1%, or after `MAX_ITERATIONS` probes. The largest probe
//! under the target wins; if none fits, the smallest probe is kept.
//! Encoders other than ImageMagick get a resized PNG intermediate first.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::candidates::encode_with_intelligent_effort;
use crate::dispatch::{EncoderCall, ExecEnv};
use crate::error::{ConvError, Result};
use crate::float_cmp::approx_zero;
use crate::formats::validate_resample;
use crate::iteration::IterationGuard;
use crate::metadata;
use crate::params::MetadataPolicy;
use crate::tools::Tool;

pub const SEED_PERCENTS: [u32; 2] = [100, 50];
pub const MAX_ITERATIONS: u32 = 8;
/// Accept a probe within this fraction below the target.
pub const TOLERANCE: f64 = 0.05;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScaleMode {
    Percent(u32),
    Resolution { width: u32, height: u32 },
    ShortestSide(u32),
    LongestSide(u32),
    FileSize { max_kib: u64 },
}

impl ScaleMode {
    /// `-resize` geometry for the manual modes.
    pub fn geometry(&self) -> Option<String> {
        match *self {
            ScaleMode::Percent(p) => Some(format!("{}%", p)),
            ScaleMode::Resolution { width, height } => Some(format!("{}x{}>", width, height)),
            ScaleMode::ShortestSide(s) => Some(format!("{}x{}^>", s, s)),
            ScaleMode::LongestSide(l) => Some(format!("{}x{}>", l, l)),
            ScaleMode::FileSize { .. } => None,
        }
    }
}

/// Everything one downscale needs; assembled while setting up the job.
#[derive(Debug, Clone)]
pub struct ScaleParams {
    pub mode: ScaleMode,
    pub resample: String,
    pub call: EncoderCall,
    pub src: PathBuf,
    pub dst: PathBuf,
    pub dst_dir: PathBuf,
    pub name: String,
    /// Extension of the encoded output, used for probe names.
    pub ext: String,
}

/// `[-filter <name>] -resize <geometry>`
pub fn resize_args(geometry: &str, resample: &str) -> Result<Vec<String>> {
    validate_resample(resample)?;
    let mut args = Vec::with_capacity(4);
    if resample != "Default" {
        args.push("-filter".to_string());
        args.push(resample.to_string());
    }
    args.push("-resize".to_string());
    args.push(geometry.to_string());
    Ok(args)
}

/// Least squares fit of `y` on `x`. `None` when `x` has no variance.
pub fn linear_regression(x: &[f64], y: &[f64]) -> Option<(f64, f64)> {
    let n = x.len().min(y.len());
    if n == 0 {
        return None;
    }
    let x_mean = x[..n].iter().sum::<f64>() / n as f64;
    let y_mean = y[..n].iter().sum::<f64>() / n as f64;

    let mut num = 0.0;
    let mut den = 0.0;
    for i in 0..n {
        let dx = x[i] - x_mean;
        num += dx * (y[i] - y_mean);
        den += dx * dx;
    }
    if approx_zero(den) {
        return None;
    }
    let slope = num / den;
    Some((slope, y_mean - slope * x_mean))
}

/// Predicted percent for `size` from `(size, percent)` samples.
pub fn extrapolate_scale(samples: &[(u64, u32)], size: u64) -> Option<i64> {
    let x: Vec<f64> = samples.iter().map(|s| s.0 as f64).collect();
    let y: Vec<f64> = samples.iter().map(|s| s.1 as f64).collect();
    let (slope, intercept) = linear_regression(&x, &y)?;
    let predicted = slope * size as f64 + intercept;
    predicted.is_finite().then(|| predicted.round() as i64)
}

pub fn downscale(env: &ExecEnv<'_>, sp: &ScaleParams) -> Result<()> {
    env.cancel.check()?;
    match (&sp.mode, sp.mode.geometry()) {
        (ScaleMode::FileSize { max_kib }, _) => to_file_size(env, sp, max_kib.saturating_mul(1024)),
        (_, Some(geometry)) => encode_scaled(env, sp, &geometry, &sp.dst),
        (_, None) => Err(ConvError::generic("D0", "Unknown downscaling mode.")),
    }
}

/// PNG output: decode with the source's decoder, then let ImageMagick resize.
pub fn decode_and_downscale(
    env: &ExecEnv<'_>,
    sp: &ScaleParams,
    policy: MetadataPolicy,
) -> Result<()> {
    if sp.call.tool == Tool::Magick {
        return downscale(env, sp);
    }

    let decoded = env.paths.allocate(&sp.dst_dir, &sp.name, "png", true);
    let result = env
        .run_call(&sp.call, &sp.src, &decoded)
        .and_then(|_| {
            let scaled = ScaleParams {
                call: EncoderCall::new(
                    Tool::Magick,
                    metadata::encoder_args(Tool::Magick, policy, false),
                ),
                src: decoded.clone(),
                ..sp.clone()
            };
            downscale(env, &scaled)
        });
    let removed = remove_if_exists(&decoded);
    result?;
    removed.map_err(|e| ConvError::file("D1", format!("Failed to delete temporary file. {}", e)))
}

fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

fn encode(env: &ExecEnv<'_>, call: &EncoderCall, sp: &ScaleParams, src: &Path, dst: &Path) -> Result<()> {
    if call.intelligent_effort() {
        encode_with_intelligent_effort(env, call, src, dst, &sp.dst_dir, &sp.name, &sp.ext)
    } else {
        env.run_call(call, src, dst)
    }
}

/// One resize + encode from `sp.src` into `dst`.
fn encode_scaled(env: &ExecEnv<'_>, sp: &ScaleParams, geometry: &str, dst: &Path) -> Result<()> {
    let resize = resize_args(geometry, &sp.resample)?;

    if sp.call.tool == Tool::Magick {
        return encode(env, &sp.call.with_leading(&resize), sp, &sp.src, dst);
    }

    let scaled = env.paths.allocate(&sp.dst_dir, &sp.name, "png", true);
    let result = env
        .convert(Tool::Magick, &sp.src, &scaled, &resize)
        .and_then(|_| encode(env, &sp.call, sp, &scaled, dst));
    let removed = remove_if_exists(&scaled);
    result?;
    removed.map_err(|e| ConvError::file("D1", format!("Failed to delete temporary file. {}", e)))
}

#[derive(Debug)]
struct Probe {
    path: PathBuf,
    size: u64,
    percent: u32,
}

fn to_file_size(env: &ExecEnv<'_>, sp: &ScaleParams, target: u64) -> Result<()> {
    let mut probes = Vec::new();
    if let Err(e) = search(env, sp, target, &mut probes) {
        discard(&probes, None);
        return Err(e);
    }

    let Some(winner) = pick(&probes, target) else {
        return Err(ConvError::file("D0", "Downscaling failed (no output produced)."));
    };
    discard(&probes, Some(winner));

    let chosen = &probes[winner];
    tracing::debug!(
        percent = chosen.percent,
        size = chosen.size,
        target,
        probes = probes.len(),
        "File size search finished"
    );
    std::fs::rename(&chosen.path, &sp.dst)
        .map_err(|e| ConvError::file("D0", format!("Downscaling could not finish. {}", e)))
}

fn search(env: &ExecEnv<'_>, sp: &ScaleParams, target: u64, probes: &mut Vec<Probe>) -> Result<()> {
    let mut guard = IterationGuard::new(MAX_ITERATIONS, "file size search");
    let lower = (target as f64 * (1.0 - TOLERANCE)) as u64;

    loop {
        env.cancel.check()?;
        if let Err(e) = guard.increment() {
            tracing::debug!(error = %e, "File size search stopped");
            return Ok(());
        }

        let percent = next_percent(probes, target);
        if probes.iter().any(|p| p.percent == percent) {
            return Ok(());
        }

        let path = env.paths.allocate(&sp.dst_dir, &sp.name, &sp.ext, true);
        let encoded = encode_scaled(env, sp, &format!("{}%", percent), &path);
        if let Err(e) = encoded {
            if let Err(cleanup) = remove_if_exists(&path) {
                tracing::warn!(path = %path.display(), error = %cleanup, "Failed to delete probe");
            }
            return Err(e);
        }
        let size = std::fs::metadata(&path)
            .map_err(|_| ConvError::file("D0", "Downscaling failed (output not found)."))?
            .len();
        tracing::debug!(percent, size, target, "File size probe");
        probes.push(Probe { path, size, percent });

        let fits = size <= target;
        if (fits && (size >= lower || percent == 100)) || (!fits && percent == 1) {
            return Ok(());
        }
    }
}

fn next_percent(probes: &[Probe], target: u64) -> u32 {
    if let Some(&seed) = SEED_PERCENTS.get(probes.len()) {
        return seed;
    }
    let samples: Vec<(u64, u32)> = probes.iter().map(|p| (p.size, p.percent)).collect();
    // Aim at the middle of the acceptance window.
    let aim = (target as f64 * (1.0 - TOLERANCE / 2.0)) as u64;
    match extrapolate_scale(&samples, aim) {
        Some(p) => p.clamp(1, 100) as u32,
        None => {
            let last = probes.last().map_or(100, |p| p.percent);
            (last / 2).max(1)
        }
    }
}

/// Largest probe under the target, else the smallest one. Ties keep the earliest.
fn pick(probes: &[Probe], target: u64) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, p) in probes.iter().enumerate() {
        best = match best {
            None => Some(i),
            Some(b) => {
                let cur = &probes[b];
                let better = match (p.size <= target, cur.size <= target) {
                    (true, false) => true,
                    (true, true) => p.size > cur.size,
                    (false, false) => p.size < cur.size,
                    (false, true) => false,
                };
                Some(if better { i } else { b })
            }
        };
    }
    best
}

fn discard(probes: &[Probe], keep: Option<usize>) {
    for (i, p) in probes.iter().enumerate() {
        if Some(i) == keep {
            continue;
        }
        if let Err(e) = remove_if_exists(&p.path) {
            tracing::warn!(path = %p.path.display(), error = %e, "Failed to delete probe");
        }
    }
}
