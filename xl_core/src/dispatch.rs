//! Format dispatch
//!
//! Each target format maps to exactly one encoder plus an argument list,
//! chosen once when a job enters its converting stage. Arguments are kept as
//! separate tokens (`["-q", "80"]`) so they reach the tool unsplit.
//!
//! Invocation layout:
//! - ImageMagick: `magick <src> <args> <dst>` (operators act on the loaded image)
//! - oxipng: `oxipng <args> <file>` (in place)
//! - everything else: `<tool> <args> <src> <dst>`

use std::path::Path;

use crate::cancel::CancelToken;
use crate::config::EncoderSettings;
use crate::error::{ConvError, Result};
use crate::formats::{decoder_args, decoder_for, is_jpeg, LosslessFormat, TargetFormat};
use crate::metadata;
use crate::params::ConversionParams;
use crate::pathing::PathAllocator;
use crate::process::{safe_path_arg, ProcessOutput, ProcessRunner};
use crate::tools::{Tool, ToolPaths};

/// Where a call reads its input from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallSource {
    /// The current working path (may be a proxy).
    Working,
    /// Always the untouched original (bit-exact JPEG transcoding).
    Original,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderCall {
    pub tool: Tool,
    pub args: Vec<String>,
    pub source: CallSource,
    /// Copy the input to the destination, then optimise it in place.
    pub in_place: bool,
    /// Index of the effort value in `args` when the effort race applies.
    effort_slot: Option<usize>,
}

impl EncoderCall {
    pub fn new(tool: Tool, args: Vec<String>) -> Self {
        Self {
            tool,
            args,
            source: CallSource::Working,
            in_place: false,
            effort_slot: None,
        }
    }

    pub fn intelligent_effort(&self) -> bool {
        self.effort_slot.is_some()
    }

    /// Same call with the effort value replaced.
    pub fn with_effort(&self, effort: u8) -> Self {
        let mut call = self.clone();
        if let Some(slot) = call.effort_slot {
            if let Some(value) = call.args.get_mut(slot) {
                *value = effort.to_string();
            }
        }
        call
    }

    /// Same call with extra arguments placed in front (resize operators).
    pub fn with_leading(&self, leading: &[String]) -> Self {
        let mut call = self.clone();
        let mut args = leading.to_vec();
        args.append(&mut call.args);
        call.args = args;
        call.effort_slot = self.effort_slot.map(|slot| slot + leading.len());
        call
    }
}

/// Inputs shared by every argument builder.
#[derive(Debug, Clone, Copy)]
pub struct BuildContext<'a> {
    pub params: &'a ConversionParams,
    pub settings: &'a EncoderSettings,
    /// Lowercase extension of the original source.
    pub src_ext: &'a str,
    pub threads: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    Single(EncoderCall),
    /// Smallest Lossless: candidates in production order.
    Smallest(Vec<(LosslessFormat, EncoderCall)>),
}

pub fn build(format: TargetFormat, ctx: &BuildContext<'_>) -> Result<Dispatch> {
    let call = match format {
        TargetFormat::JpegXl => build_jxl(ctx),
        TargetFormat::Avif => build_avif(ctx),
        TargetFormat::Jpeg => build_jpeg(ctx),
        TargetFormat::WebP => build_webp(ctx),
        TargetFormat::Png => build_png(ctx)?,
        TargetFormat::LosslessJpegRecompression => build_jpeg_recompression(ctx),
        TargetFormat::JpegReconstruction => build_jpeg_reconstruction(ctx),
        TargetFormat::SmallestLossless => return build_smallest(ctx).map(Dispatch::Smallest),
    };
    Ok(Dispatch::Single(call))
}

fn push(args: &mut Vec<String>, flag: &str, value: impl ToString) {
    args.push(flag.to_string());
    args.push(value.to_string());
}

fn finish(mut call: EncoderCall, ctx: &BuildContext<'_>, jpg_to_jxl_lossless: bool) -> EncoderCall {
    call.args.extend(metadata::encoder_args(
        call.tool,
        ctx.params.metadata,
        jpg_to_jxl_lossless,
    ));
    call.args.extend(custom_args(call.tool, ctx.settings));
    call
}

/// User-supplied extra arguments, split on whitespace.
pub fn custom_args(tool: Tool, settings: &EncoderSettings) -> Vec<String> {
    if !settings.enable_custom_args {
        return Vec::new();
    }
    let raw = match tool {
        Tool::Avifenc => &settings.avifenc_args,
        Tool::Cjxl => &settings.cjxl_args,
        Tool::Cjpegli => &settings.cjpegli_args,
        Tool::Magick => &settings.im_args,
        _ => return Vec::new(),
    };
    raw.split_whitespace().map(str::to_string).collect()
}

fn build_jxl(ctx: &BuildContext<'_>) -> EncoderCall {
    let p = ctx.params;
    let mut args = Vec::new();
    let mut jpg_to_jxl_lossless = false;

    push(&mut args, "-q", if p.lossless { 100 } else { p.quality });

    // The effort race only pays off for lossy VarDCT.
    let intelligent = p.intelligent_effort && !(p.lossless || p.jxl_modular);
    let effort = if p.intelligent_effort && !intelligent {
        9
    } else {
        p.effort
    };
    push(&mut args, "-e", effort);
    let effort_slot = args.len() - 1;

    if p.lossless && ctx.settings.jxl_lossless_jpeg && is_jpeg(ctx.src_ext) {
        jpg_to_jxl_lossless = true;
        args.push("--lossless_jpeg=1".to_string());
    } else {
        args.push("--lossless_jpeg=0".to_string());
    }
    args.push(format!("--num_threads={}", ctx.threads));

    if !p.lossless && p.jxl_modular {
        args.push("--modular=1".to_string());
    }

    let mut call = EncoderCall::new(Tool::Cjxl, args);
    if intelligent {
        call.effort_slot = Some(effort_slot);
    }
    finish(call, ctx, jpg_to_jxl_lossless)
}

fn build_avif(ctx: &BuildContext<'_>) -> EncoderCall {
    let p = ctx.params;
    let mut args = Vec::new();
    push(&mut args, "-q", p.quality);
    push(&mut args, "-s", p.effort);
    push(&mut args, "-j", ctx.threads);
    if let Some(chroma) = &p.avif_chroma_subsampling {
        push(&mut args, "-y", chroma.replace(':', ""));
    }
    finish(EncoderCall::new(Tool::Avifenc, args), ctx, false)
}

fn build_jpeg(ctx: &BuildContext<'_>) -> EncoderCall {
    let p = ctx.params;
    let mut args = Vec::new();
    let tool = if ctx.settings.uses_jpegli() {
        push(&mut args, "-q", p.quality);
        if ctx.settings.disable_progressive_jpegli {
            push(&mut args, "-p", 0);
        }
        if let Some(chroma) = &p.jpegli_chroma_subsampling {
            args.push(format!("--chroma_subsampling={}", chroma.replace(':', "")));
        }
        Tool::Cjpegli
    } else {
        push(&mut args, "-quality", p.quality);
        if let Some(chroma) = &p.jpg_chroma_subsampling {
            push(&mut args, "-sampling-factor", chroma);
        }
        Tool::Magick
    };
    finish(EncoderCall::new(tool, args), ctx, false)
}

fn webp_thread_level(threads: usize) -> String {
    format!("webp:thread-level={}", if threads > 1 { 1 } else { 0 })
}

fn build_webp(ctx: &BuildContext<'_>) -> EncoderCall {
    let p = ctx.params;
    let mut args = Vec::new();
    if p.lossless {
        push(&mut args, "-define", "webp:lossless=true");
    } else {
        push(&mut args, "-quality", p.quality);
    }
    push(&mut args, "-define", webp_thread_level(ctx.threads));
    push(
        &mut args,
        "-define",
        format!("webp:method={}", ctx.settings.webp_method),
    );
    finish(EncoderCall::new(Tool::Magick, args), ctx, false)
}

fn build_png(ctx: &BuildContext<'_>) -> Result<EncoderCall> {
    let decoder = decoder_for(ctx.src_ext)?;
    let args = decoder_args(decoder, ctx.threads);
    Ok(finish(EncoderCall::new(decoder, args), ctx, false))
}

fn build_jpeg_recompression(ctx: &BuildContext<'_>) -> EncoderCall {
    let p = ctx.params;
    let effort = if p.intelligent_effort { 9 } else { p.effort };
    let mut args = vec!["--lossless_jpeg=1".to_string()];
    push(&mut args, "-e", effort);
    args.push(format!("--num_threads={}", ctx.threads));
    let mut call = EncoderCall::new(Tool::Cjxl, args);
    call.source = CallSource::Original;
    call
}

fn build_jpeg_reconstruction(ctx: &BuildContext<'_>) -> EncoderCall {
    let mut call = EncoderCall::new(
        Tool::Djxl,
        vec![format!("--num_threads={}", ctx.threads)],
    );
    call.source = CallSource::Original;
    call
}

fn build_smallest(ctx: &BuildContext<'_>) -> Result<Vec<(LosslessFormat, EncoderCall)>> {
    let p = ctx.params;
    let formats = p.smallest_pool.formats();
    if formats.is_empty() {
        return Err(ConvError::generic("SL0", "No formats selected."));
    }

    let jpg_to_jxl_lossless = ctx.settings.jxl_lossless_jpeg && is_jpeg(ctx.src_ext);
    let mut out = Vec::with_capacity(formats.len());
    for format in formats {
        let call = match format {
            LosslessFormat::Png => {
                let mut args = Vec::new();
                push(&mut args, "-o", if p.max_compression { 4 } else { 2 });
                push(&mut args, "-t", ctx.threads);
                args.extend(metadata::encoder_args(Tool::Oxipng, p.metadata, false));
                let mut call = EncoderCall::new(Tool::Oxipng, args);
                call.in_place = true;
                call
            }
            LosslessFormat::WebP => {
                let mut args = Vec::new();
                push(&mut args, "-define", webp_thread_level(ctx.threads));
                push(&mut args, "-define", "webp:method=6");
                push(&mut args, "-define", "webp:lossless=true");
                args.extend(metadata::encoder_args(Tool::Magick, p.metadata, false));
                EncoderCall::new(Tool::Magick, args)
            }
            LosslessFormat::Jxl => {
                let mut args = Vec::new();
                push(&mut args, "-q", 100);
                push(&mut args, "-e", if p.max_compression { 9 } else { 7 });
                args.push(format!("--num_threads={}", ctx.threads));
                args.push(format!(
                    "--lossless_jpeg={}",
                    if jpg_to_jxl_lossless { 1 } else { 0 }
                ));
                args.extend(metadata::encoder_args(
                    Tool::Cjxl,
                    p.metadata,
                    jpg_to_jxl_lossless,
                ));
                let mut call = EncoderCall::new(Tool::Cjxl, args);
                if jpg_to_jxl_lossless {
                    call.source = CallSource::Original;
                }
                call
            }
        };
        out.push((format, call));
    }
    Ok(out)
}

/// Full argv (minus program) for one conversion.
pub fn invocation_args(tool: Tool, src: &Path, dst: &Path, args: &[String]) -> Vec<String> {
    let src = safe_path_arg(src).into_owned();
    let dst = safe_path_arg(dst).into_owned();
    let mut out = Vec::with_capacity(args.len() + 2);
    if tool == Tool::Magick {
        out.push(src);
        out.extend(args.iter().cloned());
    } else {
        out.extend(args.iter().cloned());
        out.push(src);
    }
    out.push(dst);
    out
}

/// What a job needs to run tools and name files. Borrowed from the batch.
#[derive(Clone, Copy)]
pub struct ExecEnv<'a> {
    pub runner: &'a dyn ProcessRunner,
    pub tools: &'a ToolPaths,
    pub paths: &'a PathAllocator,
    pub cancel: &'a CancelToken,
}

impl ExecEnv<'_> {
    /// `<tool> ... <src> ... <dst>`. The exit status is not judged here.
    pub fn convert(&self, tool: Tool, src: &Path, dst: &Path, args: &[String]) -> Result<()> {
        let argv = invocation_args(tool, src, dst, args);
        self.runner.run(self.tools.path(tool), &argv)?;
        Ok(())
    }

    /// `<tool> <args> <file>`, rewriting `file` in place.
    pub fn optimize(&self, tool: Tool, file: &Path, args: &[String]) -> Result<()> {
        let mut argv = args.to_vec();
        argv.push(safe_path_arg(file).into_owned());
        self.runner.run(self.tools.path(tool), &argv)?;
        Ok(())
    }

    pub fn query(&self, tool: Tool, args: &[String]) -> Result<ProcessOutput> {
        Ok(self.runner.run(self.tools.path(tool), args)?)
    }

    /// Runs a built call from `src` to `dst`.
    pub fn run_call(&self, call: &EncoderCall, src: &Path, dst: &Path) -> Result<()> {
        if call.in_place {
            std::fs::copy(src, dst)
                .map_err(|e| ConvError::file("SL1", format!("Failed to copy file. {}", e)))?;
            self.optimize(call.tool, dst, &call.args)
        } else {
            self.convert(call.tool, src, dst, &call.args)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JpgEncoder;
    use crate::params::{MetadataPolicy, SmallestPool};

    fn ctx<'a>(
        params: &'a ConversionParams,
        settings: &'a EncoderSettings,
        ext: &'a str,
    ) -> BuildContext<'a> {
        BuildContext {
            params,
            settings,
            src_ext: ext,
            threads: 4,
        }
    }

    fn single(d: Dispatch) -> EncoderCall {
        match d {
            Dispatch::Single(call) => call,
            Dispatch::Smallest(_) => panic!("expected a single call"),
        }
    }

    #[test]
    fn test_jxl_lossy_args() {
        let params = ConversionParams::default();
        let settings = EncoderSettings::default();
        let call = single(build(TargetFormat::JpegXl, &ctx(&params, &settings, "png")).unwrap());
        assert_eq!(call.tool, Tool::Cjxl);
        assert_eq!(
            call.args,
            vec!["-q", "80", "-e", "7", "--lossless_jpeg=0", "--num_threads=4"]
        );
        assert!(!call.intelligent_effort());
    }

    #[test]
    fn test_jxl_lossless_jpeg_transcode() {
        let params = ConversionParams {
            lossless: true,
            ..Default::default()
        };
        let settings = EncoderSettings::default();

        let call = single(build(TargetFormat::JpegXl, &ctx(&params, &settings, "jpg")).unwrap());
        assert!(call.args.contains(&"--lossless_jpeg=1".to_string()));
        assert_eq!(call.args[1], "100");

        let call = single(build(TargetFormat::JpegXl, &ctx(&params, &settings, "png")).unwrap());
        assert!(call.args.contains(&"--lossless_jpeg=0".to_string()));
    }

    #[test]
    fn test_jxl_intelligent_effort_slot() {
        let params = ConversionParams {
            intelligent_effort: true,
            ..Default::default()
        };
        let settings = EncoderSettings::default();
        let call = single(build(TargetFormat::JpegXl, &ctx(&params, &settings, "png")).unwrap());
        assert!(call.intelligent_effort());
        assert_eq!(call.with_effort(9).args[3], "9");

        let shifted = call.with_leading(&["-resize".to_string(), "50%".to_string()]);
        assert_eq!(shifted.with_effort(9).args[5], "9");
    }

    #[test]
    fn test_jxl_intelligent_effort_disabled_for_modular() {
        let params = ConversionParams {
            intelligent_effort: true,
            jxl_modular: true,
            ..Default::default()
        };
        let settings = EncoderSettings::default();
        let call = single(build(TargetFormat::JpegXl, &ctx(&params, &settings, "png")).unwrap());
        assert!(!call.intelligent_effort());
        assert_eq!(call.args[3], "9");
        assert!(call.args.contains(&"--modular=1".to_string()));
    }

    #[test]
    fn test_avif_chroma() {
        let params = ConversionParams {
            format: TargetFormat::Avif,
            avif_chroma_subsampling: Some("4:2:0".to_string()),
            ..Default::default()
        };
        let settings = EncoderSettings::default();
        let call = single(build(TargetFormat::Avif, &ctx(&params, &settings, "png")).unwrap());
        assert_eq!(call.tool, Tool::Avifenc);
        assert_eq!(call.args, vec!["-q", "80", "-s", "7", "-j", "4", "-y", "420"]);
    }

    #[test]
    fn test_jpeg_encoders() {
        let params = ConversionParams {
            jpegli_chroma_subsampling: Some("4:4:4".to_string()),
            jpg_chroma_subsampling: Some("4:2:2".to_string()),
            ..Default::default()
        };
        let mut settings = EncoderSettings {
            disable_progressive_jpegli: true,
            ..Default::default()
        };
        let call = single(build(TargetFormat::Jpeg, &ctx(&params, &settings, "png")).unwrap());
        assert_eq!(call.tool, Tool::Cjpegli);
        assert_eq!(
            call.args,
            vec!["-q", "80", "-p", "0", "--chroma_subsampling=444"]
        );

        settings.jpg_encoder = JpgEncoder::ImageMagick;
        let call = single(build(TargetFormat::Jpeg, &ctx(&params, &settings, "png")).unwrap());
        assert_eq!(call.tool, Tool::Magick);
        assert_eq!(call.args, vec!["-quality", "80", "-sampling-factor", "4:2:2"]);
    }

    #[test]
    fn test_webp_args() {
        let params = ConversionParams {
            lossless: true,
            ..Default::default()
        };
        let settings = EncoderSettings::default();
        let call = single(build(TargetFormat::WebP, &ctx(&params, &settings, "png")).unwrap());
        assert_eq!(
            call.args,
            vec![
                "-define",
                "webp:lossless=true",
                "-define",
                "webp:thread-level=1",
                "-define",
                "webp:method=6"
            ]
        );
    }

    #[test]
    fn test_png_uses_decoder() {
        let params = ConversionParams::default();
        let settings = EncoderSettings::default();
        let call = single(build(TargetFormat::Png, &ctx(&params, &settings, "jxl")).unwrap());
        assert_eq!(call.tool, Tool::Djxl);
        assert_eq!(call.args, vec!["--num_threads=4"]);

        let err = build(TargetFormat::Png, &ctx(&params, &settings, "xyz")).unwrap_err();
        assert_eq!(err.code(), "Proxy0");
    }

    #[test]
    fn test_metadata_and_custom_args_appended() {
        let params = ConversionParams {
            metadata: MetadataPolicy::EncoderWipe,
            ..Default::default()
        };
        let settings = EncoderSettings {
            enable_custom_args: true,
            avifenc_args: "--speed  6 -a tune=ssim".to_string(),
            ..Default::default()
        };
        let call = single(build(TargetFormat::Avif, &ctx(&params, &settings, "png")).unwrap());
        assert_eq!(
            &call.args[6..],
            &["--ignore-exif", "--ignore-xmp", "--speed", "6", "-a", "tune=ssim"]
        );
    }

    #[test]
    fn test_smallest_candidates() {
        let params = ConversionParams {
            smallest_pool: SmallestPool {
                png: true,
                webp: true,
                jxl: true,
            },
            max_compression: true,
            ..Default::default()
        };
        let settings = EncoderSettings::default();
        let Dispatch::Smallest(cands) =
            build(TargetFormat::SmallestLossless, &ctx(&params, &settings, "jpg")).unwrap()
        else {
            panic!("expected candidates");
        };
        assert_eq!(cands.len(), 3);
        assert!(cands[0].1.in_place);
        assert_eq!(cands[0].1.args[..4], ["-o", "4", "-t", "4"]);
        assert_eq!(cands[2].1.source, CallSource::Original);
        assert!(cands[2].1.args.contains(&"--lossless_jpeg=1".to_string()));
    }

    #[test]
    fn test_smallest_empty_pool() {
        let params = ConversionParams {
            smallest_pool: SmallestPool {
                png: false,
                webp: false,
                jxl: false,
            },
            ..Default::default()
        };
        let settings = EncoderSettings::default();
        let err = build(TargetFormat::SmallestLossless, &ctx(&params, &settings, "png")).unwrap_err();
        assert_eq!(err.code(), "SL0");
    }

    #[test]
    fn test_invocation_layout() {
        let args = vec!["-q".to_string(), "80".to_string()];
        assert_eq!(
            invocation_args(Tool::Cjxl, Path::new("a.png"), Path::new("b.jxl"), &args),
            vec!["-q", "80", "a.png", "b.jxl"]
        );
        assert_eq!(
            invocation_args(Tool::Magick, Path::new("a.png"), Path::new("b.webp"), &args),
            vec!["a.png", "-q", "80", "b.webp"]
        );
        assert_eq!(
            invocation_args(Tool::Cjxl, Path::new("-x.png"), Path::new("b.jxl"), &[]),
            vec!["./-x.png", "b.jxl"]
        );
    }
}
