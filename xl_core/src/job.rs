//! Per-item conversion job
//!
//! ```text
//! Created -> Checking -> SettingUp -> Converting -> Finalizing -> PostProcessing -> Completed
//!                 \___________\____________\____________\______________\-> Canceled | Failed
//! ```
//!
//! Every error inside a job stops at `run_job`: it becomes one `Exception`
//! event followed by `Completed`, so batch accounting always reaches the item
//! count. Cancellation emits `Canceled` instead, after partial output is gone.
//! Post-processing sub-steps are independent; each failure is reported on its
//! own and the converted file stays.

use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use crate::candidates::{encode_with_intelligent_effort, keep_smallest, SMALLEST_CODES};
use crate::config::EncoderSettings;
use crate::conflicts::{check_for_conflicts, check_for_multipage};
use crate::disk::{ensure_free_space, DiskSpace};
use crate::dispatch::{self, BuildContext, CallSource, Dispatch, EncoderCall, ExecEnv};
use crate::downscale::{decode_and_downscale, downscale, ScaleParams};
use crate::error::{ConvError, Result};
use crate::events::{EventSink, LifecycleEvent};
use crate::formats::{extension_lowercase, is_jpeg, validate_resample, TargetFormat};
use crate::metadata;
use crate::params::{ConversionParams, DownscaleConfig, DuplicatePolicy};
use crate::pathing;
use crate::proxy::{is_proxy_needed, Proxy};
use crate::tools::Tool;

const RECONSTRUCTION_MARKER: &str = "JPEG bitstream reconstruction data available";

/// One source file of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub index: usize,
    /// Absolute path of the original file.
    pub src: PathBuf,
    /// Root for structure-preserving output.
    pub anchor: PathBuf,
    pub name: String,
    /// Lowercase, without the dot.
    pub ext: String,
    pub dir: PathBuf,
}

impl WorkItem {
    pub fn new(index: usize, src: PathBuf, anchor: PathBuf) -> Self {
        let name = src
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let ext = extension_lowercase(&src);
        let dir = src.parent().map(Path::to_path_buf).unwrap_or_default();
        Self {
            index,
            src,
            anchor,
            name,
            ext,
            dir,
        }
    }

    pub fn file_name(&self) -> String {
        self.src
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Created,
    Checking,
    SettingUp,
    Converting,
    Finalizing,
    PostProcessing,
    Completed,
    Canceled,
    Failed,
}

/// How a job ended, for batch counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Converted,
    Skipped,
    Failed,
    Canceled,
}

/// Batch-wide collaborators borrowed by every job.
#[derive(Clone, Copy)]
pub struct JobContext<'a> {
    pub env: ExecEnv<'a>,
    pub params: &'a ConversionParams,
    pub settings: &'a EncoderSettings,
    pub disk: &'a dyn DiskSpace,
}

enum Finish {
    Converted(Vec<ConvError>),
    Skipped,
}

struct Job<'a> {
    ctx: JobContext<'a>,
    item: WorkItem,
    threads: usize,
    state: JobState,
    /// Source for the encoder; redirected to the proxy when one exists.
    working: PathBuf,
    proxy: Proxy,
    output_dir: PathBuf,
    output_ext: String,
    /// Tagged temporary output, renamed to `final_output` when finalizing.
    output: PathBuf,
    final_output: PathBuf,
    scale: Option<DownscaleConfig>,
    /// Removed on cancel or failure.
    temps: Vec<PathBuf>,
}

impl<'a> Job<'a> {
    fn new(ctx: JobContext<'a>, item: WorkItem, threads: usize) -> Self {
        let working = item.src.clone();
        Self {
            ctx,
            item,
            threads,
            state: JobState::Created,
            working,
            proxy: Proxy::new(),
            output_dir: PathBuf::new(),
            output_ext: String::new(),
            output: PathBuf::new(),
            final_output: PathBuf::new(),
            scale: None,
            temps: Vec::new(),
        }
    }

    fn enter(&mut self, state: JobState) {
        tracing::debug!(job = self.item.index, from = ?self.state, to = ?state, "Job state");
        self.state = state;
    }

    fn format(&self) -> TargetFormat {
        self.ctx.params.format
    }

    fn execute(&mut self) -> Result<Finish> {
        self.enter(JobState::Checking);
        self.check()?;

        self.enter(JobState::SettingUp);
        if !self.setup()? {
            self.enter(JobState::Completed);
            return Ok(Finish::Skipped);
        }

        self.ctx.env.cancel.check()?;
        self.enter(JobState::Converting);
        self.convert()?;

        self.ctx.env.cancel.check()?;
        self.enter(JobState::Finalizing);
        if !self.finalize()? {
            self.enter(JobState::Completed);
            return Ok(Finish::Skipped);
        }

        self.enter(JobState::PostProcessing);
        let post_errors = self.post_process()?;
        self.enter(JobState::Completed);
        Ok(Finish::Converted(post_errors))
    }

    fn check(&self) -> Result<()> {
        if !self.item.src.is_file() {
            return Err(ConvError::file("C0", "File not found"));
        }
        check_for_conflicts(&self.item.ext, self.format(), self.ctx.params.downscaling())?;
        check_for_multipage(
            &self.item.ext,
            &self.item.src,
            self.ctx.env.runner,
            self.ctx.env.tools,
        )
    }

    /// Returns `false` when the item is skipped.
    fn setup(&mut self) -> Result<bool> {
        let params = self.ctx.params;
        let env = self.ctx.env;

        self.output_dir = pathing::output_dir(&self.item.dir, &self.item.anchor, &params.output);
        std::fs::create_dir_all(&self.output_dir).map_err(|e| {
            ConvError::file("S0", format!("Failed to create output directory. {}", e))
        })?;

        let input_size = std::fs::metadata(&self.item.src)
            .map_err(|e| ConvError::file("S1", format!("Getting file size failed. {}", e)))?
            .len();
        ensure_free_space(self.ctx.disk, &self.output_dir, input_size)?;

        self.output_ext = match self.format() {
            TargetFormat::JpegReconstruction => self.reconstruction_ext()?,
            TargetFormat::LosslessJpegRecompression => {
                if !is_jpeg(&self.item.ext) {
                    return Err(ConvError::file("S5", "Only JPEG images are allowed."));
                }
                "jxl".to_string()
            }
            // Decided by the race; the tag keeps the placeholder path unique.
            TargetFormat::SmallestLossless => "png".to_string(),
            other => other.extension().unwrap_or("png").to_string(),
        };

        if self.format() != TargetFormat::SmallestLossless {
            self.output = env
                .paths
                .allocate(&self.output_dir, &self.item.name, &self.output_ext, true);
            self.temps.push(self.output.clone());
        }
        self.final_output = self
            .output_dir
            .join(format!("{}.{}", self.item.name, self.output_ext));

        if params.duplicates == DuplicatePolicy::Skip
            && self.format() != TargetFormat::SmallestLossless
            && self.final_output.is_file()
        {
            tracing::info!(item = %self.item.src.display(), "Output exists, skipping");
            return Ok(false);
        }

        if is_proxy_needed(
            self.format(),
            &self.item.ext,
            self.ctx.settings.uses_jpegli(),
            params.downscaling(),
        ) {
            self.working = self.proxy.generate(
                &env,
                &self.item.src,
                &self.item.ext,
                &self.output_dir,
                &self.item.name,
                self.threads,
            )?;
        }

        if let Some(config) = &params.downscale {
            validate_resample(&config.resample)?;
            self.scale = Some(config.clone());
        }
        Ok(true)
    }

    fn reconstruction_ext(&self) -> Result<String> {
        if self.item.ext != "jxl" {
            return Err(ConvError::file("S3", "Only JPEG XL images are allowed."));
        }
        let args = vec![crate::process::safe_path_arg(&self.item.src).into_owned()];
        let info = self.ctx.env.query(Tool::Jxlinfo, &args)?;
        if info.stdout.contains(RECONSTRUCTION_MARKER) {
            return Ok("jpg".to_string());
        }
        if !self.ctx.params.jxl_png_fallback {
            return Err(ConvError::file("S4", "Reconstruction data not found."));
        }
        Ok("png".to_string())
    }

    fn source_for(&self, call: &EncoderCall) -> &Path {
        match call.source {
            CallSource::Working => &self.working,
            CallSource::Original => &self.item.src,
        }
    }

    fn convert(&mut self) -> Result<()> {
        let env = self.ctx.env;
        let build_ctx = BuildContext {
            params: self.ctx.params,
            settings: self.ctx.settings,
            src_ext: &self.item.ext,
            threads: self.threads,
        };

        match dispatch::build(self.format(), &build_ctx)? {
            Dispatch::Single(call) => {
                let src = self.source_for(&call).to_path_buf();
                if let Some(config) = &self.scale {
                    let sp = ScaleParams {
                        mode: config.mode.clone(),
                        resample: config.resample.clone(),
                        call,
                        src,
                        dst: self.output.clone(),
                        dst_dir: self.output_dir.clone(),
                        name: self.item.name.clone(),
                        ext: self.output_ext.clone(),
                    };
                    if self.format() == TargetFormat::Png {
                        decode_and_downscale(&env, &sp, self.ctx.params.metadata)
                    } else {
                        downscale(&env, &sp)
                    }
                } else if call.intelligent_effort() {
                    encode_with_intelligent_effort(
                        &env,
                        &call,
                        &src,
                        &self.output,
                        &self.output_dir,
                        &self.item.name,
                        &self.output_ext,
                    )
                } else {
                    env.run_call(&call, &src, &self.output)
                }
            }
            Dispatch::Smallest(candidates) => self.race_smallest(candidates),
        }
    }

    fn race_smallest(&mut self, candidates: Vec<(crate::formats::LosslessFormat, EncoderCall)>) -> Result<()> {
        let env = self.ctx.env;
        let paths: Vec<PathBuf> = {
            let mut lock = env.paths.lock();
            candidates
                .iter()
                .map(|(f, _)| lock.allocate(&self.output_dir, &self.item.name, f.extension(), true))
                .collect()
        };
        self.temps.extend(paths.iter().cloned());

        for ((format, call), path) in candidates.iter().zip(&paths) {
            env.cancel.check()?;
            tracing::debug!(job = self.item.index, candidate = ?format, "Producing candidate");
            env.run_call(call, self.source_for(call), path)?;
        }

        let winner = keep_smallest(&paths, SMALLEST_CODES)?;
        self.temps.retain(|p| !paths.contains(p));
        let ext = candidates[winner].0.extension();

        self.output = paths[winner].clone();
        self.temps.push(self.output.clone());
        self.output_ext = ext.to_string();
        self.final_output = self.output_dir.join(format!("{}.{}", self.item.name, ext));
        Ok(())
    }

    /// Returns `false` when an existing file made Smallest Lossless skip.
    fn finalize(&mut self) -> Result<bool> {
        self.proxy
            .cleanup()
            .map_err(|e| ConvError::file("F0", format!("Failed to delete proxy. {}", e)))?;
        self.working = self.item.src.clone();

        let size = match std::fs::metadata(&self.output) {
            Ok(m) if m.is_file() => m.len(),
            _ => return Err(ConvError::file("F2", "Conversion failed (output not found).")),
        };
        if size == 0 {
            return Err(ConvError::file("F3", "Conversion failed (output is empty)."));
        }

        let finish_err = |e: std::io::Error| {
            ConvError::file("F1", format!("Conversion could not finish. {}", e))
        };
        let env = self.ctx.env;
        let mut lock = env.paths.lock();
        let mode = self.ctx.params.duplicates;

        if self.format() == TargetFormat::SmallestLossless
            && mode == DuplicatePolicy::Skip
            && self.final_output.is_file()
        {
            std::fs::remove_file(&self.output).map_err(finish_err)?;
            self.temps.clear();
            return Ok(false);
        }

        match mode {
            // Never replace the source itself; it is renamed around instead.
            DuplicatePolicy::Replace if same_file(&self.final_output, &self.item.src) => {
                tracing::warn!(
                    item = %self.item.src.display(),
                    "Output would overwrite the source, renaming instead"
                );
                self.final_output =
                    lock.allocate(&self.output_dir, &self.item.name, &self.output_ext, false);
            }
            DuplicatePolicy::Replace => {
                if self.final_output.is_file() {
                    std::fs::remove_file(&self.final_output).map_err(finish_err)?;
                }
            }
            DuplicatePolicy::Rename | DuplicatePolicy::Skip => {
                self.final_output =
                    lock.allocate(&self.output_dir, &self.item.name, &self.output_ext, false);
            }
        }
        std::fs::rename(&self.output, &self.final_output).map_err(finish_err)?;
        drop(lock);

        self.temps.clear();
        tracing::debug!(job = self.item.index, output = %self.final_output.display(), "Output committed");
        Ok(true)
    }

    /// Fails only when the committed output is missing; sub-step errors are
    /// collected so one does not void the others.
    fn post_process(&mut self) -> Result<Vec<ConvError>> {
        if !self.final_output.is_file() {
            return Err(ConvError::file("P2", "Output not found."));
        }
        let params = self.ctx.params;
        let mut errors = Vec::new();

        if !matches!(
            self.format(),
            TargetFormat::LosslessJpegRecompression | TargetFormat::JpegReconstruction
        ) {
            if let Err(e) =
                metadata::run_exiftool(&self.ctx.env, params.metadata, &self.item.src, &self.final_output)
            {
                errors.push(e);
            }
        }

        if params.copy_attributes {
            if let Err(e) = metadata::copy_attributes(&self.item.src, &self.final_output) {
                errors.push(ConvError::file("P0", format!("Failed to apply attributes. {}", e)));
            }
        }

        if let Some(mode) = params.delete_original {
            if same_file(&self.final_output, &self.item.src) {
                tracing::warn!(item = %self.item.src.display(), "Output is the source, not deleting it");
            } else if let Err(e) = metadata::delete_original(&self.item.src, mode) {
                errors.push(e);
            }
        }

        for e in &errors {
            tracing::warn!(job = self.item.index, code = e.code(), error = %e, "Post-processing step failed");
        }
        Ok(errors)
    }

    /// Removes the proxy and any temporary output. Never fails.
    fn cleanup(&mut self) {
        if let Err(e) = self.proxy.cleanup() {
            tracing::warn!(job = self.item.index, error = %e, "Proxy cleanup failed");
        }
        for path in self.temps.drain(..) {
            if path.exists() {
                if let Err(e) = std::fs::remove_file(&path) {
                    tracing::warn!(path = %path.display(), error = %e, "Temporary file cleanup failed");
                }
            }
        }
    }
}

/// Canonical comparison when both exist, plain path equality otherwise.
fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

fn report(sink: &dyn EventSink, item: &WorkItem, code: &str, message: String) {
    tracing::error!(item = %item.src.display(), code, error = %message, "Conversion failed");
    sink.emit(LifecycleEvent::Exception {
        code: code.to_string(),
        message,
        item_name: item.file_name(),
    });
}

/// Runs one item to completion and emits its lifecycle events.
pub fn run_job(ctx: JobContext<'_>, item: WorkItem, threads: usize, sink: &dyn EventSink) -> JobOutcome {
    let index = item.index;
    if ctx.env.cancel.is_cancelled() {
        sink.emit(LifecycleEvent::Canceled(index));
        return JobOutcome::Canceled;
    }
    sink.emit(LifecycleEvent::Started(index));

    let mut job = Job::new(ctx, item, threads);
    let result = panic::catch_unwind(AssertUnwindSafe(|| job.execute()));

    let outcome = match result {
        Ok(Ok(Finish::Converted(post_errors))) => {
            for e in post_errors {
                report(sink, &job.item, e.code(), e.to_string());
            }
            JobOutcome::Converted
        }
        Ok(Ok(Finish::Skipped)) => JobOutcome::Skipped,
        Ok(Err(e)) if e.is_cancelled() => {
            job.cleanup();
            job.enter(JobState::Canceled);
            sink.emit(LifecycleEvent::Canceled(index));
            return JobOutcome::Canceled;
        }
        Ok(Err(e)) => {
            job.cleanup();
            job.enter(JobState::Failed);
            report(sink, &job.item, e.code(), e.to_string());
            JobOutcome::Failed
        }
        Err(payload) => {
            job.cleanup();
            job.enter(JobState::Failed);
            report(sink, &job.item, "Exception", panic_message(payload.as_ref()));
            JobOutcome::Failed
        }
    };

    sink.emit(LifecycleEvent::Completed(index));
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_work_item_fields() {
        let item = WorkItem::new(3, PathBuf::from("/pics/trip/Photo.JPG"), PathBuf::from("/pics"));
        assert_eq!(item.index, 3);
        assert_eq!(item.name, "Photo");
        assert_eq!(item.ext, "jpg");
        assert_eq!(item.dir, Path::new("/pics/trip"));
        assert_eq!(item.file_name(), "Photo.JPG");
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn std::any::Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(payload.as_ref()), "Unknown panic");
    }
}
