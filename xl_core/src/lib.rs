//! Image batch conversion engine for xl-convert
//!
//! Drives external encoders (cjxl, djxl, cjpegli, avifenc, ImageMagick, oxipng,
//! exiftool) over a batch of images:
//! - Per-item job state machine with isolated failure reporting
//! - Format dispatch and encoder argument building
//! - Proxy generation for sources an encoder cannot read
//! - Manual and file-size-target downscaling
//! - Collision-free output naming under a shared lock
//! - Core budget split across parallel jobs
//! - Remaining-time estimation from completion events

pub mod batch;
pub mod cancel;
pub mod candidates;
pub mod config;
pub mod conflicts;
pub mod disk;
pub mod dispatch;
pub mod downscale;
pub mod error;
pub mod events;
pub mod float_cmp;
pub mod formats;
pub mod iteration;
pub mod job;
pub mod logging;
pub mod metadata;
pub mod params;
pub mod pathing;
pub mod process;
pub mod proxy;
pub mod report;
pub mod thread_budget;
pub mod time_left;
pub mod tools;

pub use batch::{preflight, prepare_items, BatchInput, Converter};
pub use cancel::CancelToken;
pub use config::{EncoderSettings, JpgEncoder, MultithreadingMode};
pub use disk::{DiskSpace, SystemDiskSpace};
pub use dispatch::ExecEnv;
pub use downscale::ScaleMode;
pub use error::{BatchError, ConvError, Result};
pub use events::{EventSink, LifecycleEvent, NullSink};
pub use formats::{LosslessFormat, TargetFormat};
pub use job::{run_job, JobContext, JobOutcome, JobState, WorkItem};
pub use logging::{init_logging, LogConfig};
pub use params::{
    ConversionParams, DeleteMode, DownscaleConfig, DuplicatePolicy, MetadataPolicy,
    OutputLocation, SmallestPool,
};
pub use pathing::PathAllocator;
pub use process::{ProcessOutput, ProcessRunner, SystemRunner};
pub use report::{print_summary_report, BatchReport, ExceptionRecord};
pub use thread_budget::ThreadBudget;
pub use time_left::TimeLeft;
pub use tools::{Tool, ToolPaths};
