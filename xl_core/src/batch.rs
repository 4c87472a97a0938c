//! Batch runner
//!
//! Runs one batch at a time on a rayon pool sized by the thread budget. The
//! cancel token is reset at the start of each batch; every job borrows the
//! same path allocator, parameters and sink.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use rand::seq::SliceRandom;
use rayon::prelude::*;

use crate::cancel::CancelToken;
use crate::config::EncoderSettings;
use crate::disk::{DiskSpace, SystemDiskSpace};
use crate::dispatch::ExecEnv;
use crate::error::BatchError;
use crate::events::{EventSink, LifecycleEvent};
use crate::formats::{extension_lowercase, TargetFormat};
use crate::job::{run_job, JobContext, WorkItem};
use crate::params::{ConversionParams, OutputLocation};
use crate::pathing::PathAllocator;
use crate::process::{ProcessRunner, SystemRunner};
use crate::report::{BatchReport, ExceptionRecord};
use crate::thread_budget::{available_cores, ThreadBudget};
use crate::tools::ToolPaths;

/// A source file and the directory its output structure is relative to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchInput {
    pub path: PathBuf,
    pub anchor: PathBuf,
}

impl BatchInput {
    pub fn new(path: impl Into<PathBuf>, anchor: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            anchor: anchor.into(),
        }
    }
}

/// Rejects unusable batches and normalises `params`. Returns user-facing
/// warnings for anything that was adjusted.
pub fn preflight(params: &mut ConversionParams, input_count: usize) -> Result<Vec<String>, BatchError> {
    if input_count == 0 {
        return Err(BatchError::EmptyList);
    }

    if let OutputLocation::Custom {
        dir,
        keep_structure,
    } = &params.output
    {
        if dir.is_absolute() {
            std::fs::create_dir_all(dir).map_err(|source| BatchError::OutputDir {
                path: dir.clone(),
                source,
            })?;
        } else if *keep_structure {
            return Err(BatchError::RelativeDirWithStructure);
        }
    }

    if params.format == TargetFormat::SmallestLossless && params.smallest_pool.is_empty() {
        return Err(BatchError::EmptyFormatPool);
    }

    let mut warnings = Vec::new();
    if params.downscaling() && !params.format.supports_downscaling() {
        params.downscale = None;
        let msg = format!(
            "Downscaling was set to disabled, because it's not available for {}",
            params.format
        );
        tracing::warn!("{}", msg);
        warnings.push(msg);
    }
    Ok(warnings)
}

/// Drops inputs the format cannot take, shuffles the rest and numbers them.
/// Shuffling spreads large files out, which steadies the time estimate.
pub fn prepare_items(inputs: &[BatchInput], format: TargetFormat) -> Vec<WorkItem> {
    let mut kept: Vec<&BatchInput> = inputs
        .iter()
        .filter(|input| {
            let ext = extension_lowercase(&input.path);
            let ok = format.accepts_input(&ext);
            if !ok {
                tracing::info!(path = %input.path.display(), "File not allowed for current format");
            }
            ok
        })
        .collect();
    kept.shuffle(&mut rand::rng());

    kept.into_iter()
        .enumerate()
        .map(|(i, input)| WorkItem::new(i, input.path.clone(), input.anchor.clone()))
        .collect()
}

/// Forwards events and keeps the exceptions for the report.
struct RecordingSink<'a> {
    inner: &'a dyn EventSink,
    exceptions: Mutex<Vec<ExceptionRecord>>,
}

impl EventSink for RecordingSink<'_> {
    fn emit(&self, event: LifecycleEvent) {
        if let LifecycleEvent::Exception {
            code,
            message,
            item_name,
        } = &event
        {
            self.exceptions
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(ExceptionRecord {
                    code: code.clone(),
                    message: message.clone(),
                    item_name: item_name.clone(),
                });
        }
        self.inner.emit(event);
    }
}

pub struct Converter {
    runner: Arc<dyn ProcessRunner>,
    disk: Arc<dyn DiskSpace>,
    tools: ToolPaths,
    settings: EncoderSettings,
    cores: usize,
    cancel: CancelToken,
    running: Mutex<()>,
}

impl Converter {
    pub fn new(tools: ToolPaths, settings: EncoderSettings) -> Self {
        Self {
            runner: Arc::new(SystemRunner),
            disk: Arc::new(SystemDiskSpace),
            tools,
            settings,
            cores: available_cores(),
            cancel: CancelToken::new(),
            running: Mutex::new(()),
        }
    }

    pub fn with_runner(mut self, runner: Arc<dyn ProcessRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_disk(mut self, disk: Arc<dyn DiskSpace>) -> Self {
        self.disk = disk;
        self
    }

    /// Core budget shared by the jobs; defaults to every logical CPU.
    pub fn with_cores(mut self, cores: usize) -> Self {
        self.cores = cores.max(1);
        self
    }

    /// Clone handed to signal handlers or UI to cancel the running batch.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn settings(&self) -> &EncoderSettings {
        &self.settings
    }

    /// Runs one batch to the end. Blocks while another batch is running.
    pub fn run(
        &self,
        inputs: &[BatchInput],
        mut params: ConversionParams,
        sink: &dyn EventSink,
    ) -> Result<BatchReport, BatchError> {
        let _running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        let started = Instant::now();

        let warnings = preflight(&mut params, inputs.len())?;
        let items = prepare_items(inputs, params.format);
        let mut report = BatchReport::new(items.len());
        report.warnings = warnings;
        if items.is_empty() {
            tracing::info!("No convertible files in batch");
            return Ok(report);
        }

        self.cancel.reset();
        let budget = ThreadBudget::new(self.settings.multithreading, items.len(), self.cores);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(budget.parallelism())
            .thread_name(|i| format!("xl-job-{}", i))
            .build()?;

        tracing::info!(
            items = items.len(),
            format = %params.format,
            parallelism = budget.parallelism(),
            "Batch started"
        );

        let paths = PathAllocator::new();
        let ctx = JobContext {
            env: ExecEnv {
                runner: self.runner.as_ref(),
                tools: &self.tools,
                paths: &paths,
                cancel: &self.cancel,
            },
            params: &params,
            settings: &self.settings,
            disk: self.disk.as_ref(),
        };
        let recording = RecordingSink {
            inner: sink,
            exceptions: Mutex::new(Vec::new()),
        };
        let outcomes = Mutex::new(Vec::with_capacity(items.len()));

        pool.install(|| {
            items.into_par_iter().for_each(|item| {
                let threads = budget.threads_for(item.index);
                let outcome = run_job(ctx, item, threads, &recording);
                outcomes
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .push(outcome);
            });
        });

        for outcome in outcomes.into_inner().unwrap_or_else(|e| e.into_inner()) {
            report.record(outcome);
        }
        report.exceptions = recording
            .exceptions
            .into_inner()
            .unwrap_or_else(|e| e.into_inner());
        report.duration_secs = started.elapsed().as_secs_f64();

        tracing::info!(
            converted = report.converted,
            skipped = report.skipped,
            failed = report.failed,
            canceled = report.canceled,
            exceptions = report.exceptions.len(),
            duration_secs = report.duration_secs,
            "Batch finished"
        );
        Ok(report)
    }
}
