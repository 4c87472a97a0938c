use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use xl_core::formats::extension_lowercase;
use xl_core::{
    init_logging, print_summary_report, BatchInput, ConversionParams, Converter, DeleteMode,
    DownscaleConfig, DuplicatePolicy, EncoderSettings, LifecycleEvent, LogConfig, MetadataPolicy,
    MultithreadingMode, OutputLocation, ScaleMode, SmallestPool, TargetFormat, TimeLeft, ToolPaths,
};

mod inputs;

const BAR_TEMPLATE: &str = "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {msg}";

#[derive(Parser)]
#[command(name = "xl-convert")]
#[command(version, about = "Batch image converter for JPEG XL, AVIF, WebP, JPEG and PNG", long_about = None)]
struct Cli {
    /// Debug logging mirrored to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert files and folders
    Run(RunArgs),

    /// Show which external tools were found
    Tools,
}

#[derive(Args)]
struct RunArgs {
    #[arg(value_name = "INPUT", required = true)]
    inputs: Vec<PathBuf>,

    /// jxl, avif, webp, jpg, png, smallest, jpeg-recompression, jpeg-reconstruction
    #[arg(short, long, default_value = "jxl", value_parser = parse_format)]
    format: TargetFormat,

    #[arg(short, long, default_value_t = 80, value_parser = clap::value_parser!(u8).range(0..=100))]
    quality: u8,

    #[arg(short, long, default_value_t = 7, value_parser = clap::value_parser!(u8).range(1..=10))]
    effort: u8,

    #[arg(long)]
    lossless: bool,

    /// Encode at effort 7 and 9, keep the smaller file
    #[arg(long)]
    intelligent_effort: bool,

    /// JPEG XL modular mode (lossy only)
    #[arg(long)]
    modular: bool,

    /// Chroma subsampling, e.g. 4:2:0
    #[arg(long, value_name = "X:Y:Z")]
    chroma: Option<String>,

    /// Fail instead of writing PNG when reconstruction data is missing
    #[arg(long)]
    no_png_fallback: bool,

    #[arg(long)]
    max_compression: bool,

    /// Formats raced by Smallest Lossless
    #[arg(long, value_enum, value_delimiter = ',', default_values = ["png", "jxl"])]
    smallest: Vec<LosslessArg>,

    #[arg(long, value_name = "PERCENT", group = "scale")]
    scale_percent: Option<u32>,

    #[arg(long, value_name = "WxH", group = "scale")]
    resolution: Option<String>,

    #[arg(long, value_name = "PX", group = "scale")]
    shortest_side: Option<u32>,

    #[arg(long, value_name = "PX", group = "scale")]
    longest_side: Option<u32>,

    /// Target file size in KiB
    #[arg(long, value_name = "KIB", group = "scale")]
    max_size: Option<u64>,

    /// Resampling filter for downscaling
    #[arg(long, default_value = "Default")]
    resample: String,

    #[arg(long, value_enum, default_value = "rename")]
    duplicates: DuplicateArg,

    #[arg(long, value_enum, default_value = "encoder-preserve")]
    metadata: MetadataArg,

    /// Copy permissions and timestamps from the original
    #[arg(long)]
    copy_attributes: bool,

    #[arg(long, value_enum)]
    delete_original: Option<DeleteArg>,

    /// Output folder; relative paths are placed next to each source
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Mirror the input folder structure inside the output folder
    #[arg(long, requires = "output")]
    keep_structure: bool,

    /// Encoder settings JSON
    #[arg(long, value_name = "FILE")]
    settings: Option<PathBuf>,

    /// Give every job all cores and run them one at a time
    #[arg(long)]
    low_ram: bool,

    /// Core budget (default: all logical CPUs)
    #[arg(long)]
    cores: Option<usize>,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum LosslessArg {
    Png,
    Webp,
    Jxl,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum DuplicateArg {
    Replace,
    Rename,
    Skip,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum MetadataArg {
    EncoderWipe,
    EncoderPreserve,
    ExiftoolWipe,
    ExiftoolPreserve,
    ExiftoolUnsafeWipe,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum DeleteArg {
    Trash,
    Permanent,
}

fn parse_format(s: &str) -> std::result::Result<TargetFormat, String> {
    s.parse().map_err(|e: xl_core::ConvError| e.to_string())
}

fn parse_resolution(s: &str) -> Result<ScaleMode> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .with_context(|| format!("Resolution must look like 1920x1080, got {}", s))?;
    Ok(ScaleMode::Resolution {
        width: w.trim().parse().context("Invalid width")?,
        height: h.trim().parse().context("Invalid height")?,
    })
}

impl RunArgs {
    fn scale_mode(&self) -> Result<Option<ScaleMode>> {
        let mode = if let Some(p) = self.scale_percent {
            if !(1..=100).contains(&p) {
                bail!("Scale percent must be between 1 and 100");
            }
            ScaleMode::Percent(p)
        } else if let Some(r) = &self.resolution {
            parse_resolution(r)?
        } else if let Some(s) = self.shortest_side {
            ScaleMode::ShortestSide(s)
        } else if let Some(l) = self.longest_side {
            ScaleMode::LongestSide(l)
        } else if let Some(kib) = self.max_size {
            ScaleMode::FileSize { max_kib: kib }
        } else {
            return Ok(None);
        };
        Ok(Some(mode))
    }

    fn params(&self) -> Result<ConversionParams> {
        let downscale = self.scale_mode()?.map(|mode| DownscaleConfig {
            mode,
            resample: self.resample.clone(),
        });
        let output = match &self.output {
            Some(dir) => OutputLocation::Custom {
                dir: dir.clone(),
                keep_structure: self.keep_structure,
            },
            None => OutputLocation::SourceDir,
        };

        Ok(ConversionParams {
            format: self.format,
            quality: self.quality,
            effort: self.effort,
            lossless: self.lossless,
            intelligent_effort: self.intelligent_effort,
            jxl_modular: self.modular,
            avif_chroma_subsampling: self.chroma.clone(),
            jpegli_chroma_subsampling: self.chroma.clone(),
            jpg_chroma_subsampling: self.chroma.clone(),
            jxl_png_fallback: !self.no_png_fallback,
            max_compression: self.max_compression,
            smallest_pool: SmallestPool {
                png: self.smallest.contains(&LosslessArg::Png),
                webp: self.smallest.contains(&LosslessArg::Webp),
                jxl: self.smallest.contains(&LosslessArg::Jxl),
            },
            downscale,
            duplicates: match self.duplicates {
                DuplicateArg::Replace => DuplicatePolicy::Replace,
                DuplicateArg::Rename => DuplicatePolicy::Rename,
                DuplicateArg::Skip => DuplicatePolicy::Skip,
            },
            metadata: match self.metadata {
                MetadataArg::EncoderWipe => MetadataPolicy::EncoderWipe,
                MetadataArg::EncoderPreserve => MetadataPolicy::EncoderPreserve,
                MetadataArg::ExiftoolWipe => MetadataPolicy::ExifToolWipe,
                MetadataArg::ExiftoolPreserve => MetadataPolicy::ExifToolPreserve,
                MetadataArg::ExiftoolUnsafeWipe => MetadataPolicy::ExifToolUnsafeWipe,
            },
            copy_attributes: self.copy_attributes,
            delete_original: self.delete_original.map(|d| match d {
                DeleteArg::Trash => DeleteMode::Trash,
                DeleteArg::Permanent => DeleteMode::Permanent,
            }),
            output,
        })
    }

    fn settings(&self) -> Result<EncoderSettings> {
        let mut settings = match &self.settings {
            Some(path) => EncoderSettings::from_json_file(path)?,
            None => EncoderSettings::default(),
        };
        if self.low_ram {
            settings.multithreading = MultithreadingMode::LowRam;
        }
        Ok(settings)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    if let Err(e) = init_logging(
        "xl-convert",
        LogConfig::default().with_level(level).with_stderr(cli.verbose),
    ) {
        eprintln!("⚠️  Logging disabled: {:#}", e);
    }

    match cli.command {
        Commands::Run(args) => {
            let failed = run(&args)?;
            if failed {
                std::process::exit(1);
            }
        }
        Commands::Tools => print_tools(&ToolPaths::from_env()),
    }
    Ok(())
}

/// Returns `true` when any item failed.
fn run(args: &RunArgs) -> Result<bool> {
    let params = args.params()?;
    let settings = args.settings()?;
    let inputs = inputs::collect_inputs(&args.inputs)?;

    let mut converter = Converter::new(ToolPaths::from_env(), settings);
    if let Some(cores) = args.cores {
        converter = converter.with_cores(cores);
    }
    let token = converter.cancel_token();
    ctrlc::set_handler(move || {
        eprintln!("\n⏹️  Canceling...");
        token.cancel();
    })
    .context("Failed to install Ctrl-C handler")?;

    let total = convertible_count(&inputs, params.format);
    let bar = if args.json {
        ProgressBar::hidden()
    } else {
        progress_bar(total as u64)
    };
    let done = AtomicUsize::new(0);
    let time_left = Mutex::new(TimeLeft::new());
    time_left
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .start(total);

    let sink = |event: LifecycleEvent| match event {
        LifecycleEvent::Completed(_) => {
            let n = done.fetch_add(1, Ordering::SeqCst) + 1;
            let mut estimator = time_left.lock().unwrap_or_else(|e| e.into_inner());
            estimator.add_completed();
            bar.set_position(n as u64);
            bar.set_message(format!(
                "Converted {} out of {} | {}",
                n,
                total,
                estimator.message()
            ));
        }
        LifecycleEvent::Canceled(_) => bar.set_message("Canceled"),
        LifecycleEvent::Exception {
            code,
            message,
            item_name,
        } => {
            if !args.json {
                bar.println(format!(
                    "{} [{}] {}: {}",
                    style("✗").red(),
                    code,
                    item_name,
                    message
                ));
            }
        }
        LifecycleEvent::Started(_) => {}
    };

    let report = converter
        .run(&inputs, params, &sink)
        .context("Batch could not start")?;
    bar.finish_and_clear();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary_report(&report);
        if report.was_canceled() {
            println!("⏹️  Canceled ({} items not converted)", report.canceled);
        }
    }
    Ok(report.failed > 0)
}

fn convertible_count(inputs: &[BatchInput], format: TargetFormat) -> usize {
    inputs
        .iter()
        .filter(|i| format.accepts_input(&extension_lowercase(&i.path)))
        .count()
}

fn progress_bar(total: u64) -> ProgressBar {
    let bar = ProgressBar::new(total);
    bar.set_style(
        ProgressStyle::default_bar()
            .template(BAR_TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓░"),
    );
    bar.set_message(format!("Converted 0 out of {}", total));
    bar.enable_steady_tick(std::time::Duration::from_millis(120));
    bar
}

fn print_tools(tools: &ToolPaths) {
    println!("🔧 External tools:");
    for (tool, found) in tools.availability() {
        match found {
            Some(path) => println!(
                "   {} {:<9} {}",
                style("✓").green(),
                tool.program_name(),
                path.display()
            ),
            None => println!(
                "   {} {:<9} {}",
                style("✗").red(),
                tool.program_name(),
                style("not found").dim()
            ),
        }
    }
}
