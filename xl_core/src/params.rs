//! Per-batch conversion parameters
//!
//! Built once by the front end. The batch runner adjusts them during
//! pre-flight, then lends them to every job as `&ConversionParams`; nothing
//! in here is mutated once jobs start.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::downscale::ScaleMode;
use crate::formats::{LosslessFormat, TargetFormat};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DuplicatePolicy {
    Replace,
    Rename,
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetadataPolicy {
    /// Encoder strips what it can (`-strip`, `-x strip=exif`, ...).
    EncoderWipe,
    /// Encoder defaults; most keep metadata.
    EncoderPreserve,
    /// ExifTool wipes everything except the color profile after encoding.
    ExifToolWipe,
    /// ExifTool copies every tag from the original after encoding.
    ExifToolPreserve,
    /// ExifTool wipes everything, color profile included.
    ExifToolUnsafeWipe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeleteMode {
    Trash,
    Permanent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputLocation {
    /// Next to the source file.
    SourceDir,
    /// Absolute, or relative to each source file's directory.
    /// `keep_structure` mirrors the source tree below the item's anchor.
    Custom { dir: PathBuf, keep_structure: bool },
}

/// Candidate formats for Smallest Lossless.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmallestPool {
    pub png: bool,
    pub webp: bool,
    pub jxl: bool,
}

impl Default for SmallestPool {
    fn default() -> Self {
        Self {
            png: true,
            webp: false,
            jxl: true,
        }
    }
}

impl SmallestPool {
    /// Enabled candidates in production order.
    pub fn formats(&self) -> Vec<LosslessFormat> {
        let mut out = Vec::with_capacity(3);
        if self.png {
            out.push(LosslessFormat::Png);
        }
        if self.webp {
            out.push(LosslessFormat::WebP);
        }
        if self.jxl {
            out.push(LosslessFormat::Jxl);
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        !(self.png || self.webp || self.jxl)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownscaleConfig {
    pub mode: ScaleMode,
    /// ImageMagick filter name; "Default" leaves the choice to ImageMagick.
    pub resample: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionParams {
    pub format: TargetFormat,
    pub quality: u8,
    pub effort: u8,
    pub lossless: bool,
    pub intelligent_effort: bool,
    pub jxl_modular: bool,
    /// "4:2:0" style, `None` = encoder default.
    pub avif_chroma_subsampling: Option<String>,
    pub jpegli_chroma_subsampling: Option<String>,
    pub jpg_chroma_subsampling: Option<String>,
    pub jxl_png_fallback: bool,
    pub max_compression: bool,
    pub smallest_pool: SmallestPool,
    pub downscale: Option<DownscaleConfig>,
    pub duplicates: DuplicatePolicy,
    pub metadata: MetadataPolicy,
    pub copy_attributes: bool,
    pub delete_original: Option<DeleteMode>,
    pub output: OutputLocation,
}

impl Default for ConversionParams {
    fn default() -> Self {
        Self {
            format: TargetFormat::JpegXl,
            quality: 80,
            effort: 7,
            lossless: false,
            intelligent_effort: false,
            jxl_modular: false,
            avif_chroma_subsampling: None,
            jpegli_chroma_subsampling: None,
            jpg_chroma_subsampling: None,
            jxl_png_fallback: true,
            max_compression: false,
            smallest_pool: SmallestPool::default(),
            downscale: None,
            duplicates: DuplicatePolicy::Rename,
            metadata: MetadataPolicy::EncoderPreserve,
            copy_attributes: false,
            delete_original: None,
            output: OutputLocation::SourceDir,
        }
    }
}

impl ConversionParams {
    pub fn downscaling(&self) -> bool {
        self.downscale.is_some()
    }
}
