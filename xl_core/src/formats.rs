//! Target formats, input sets and decoder lookup
//!
//! All extension comparisons are lowercase and without the leading dot.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ConvError, Result};
use crate::tools::Tool;

pub const JPEG_ALIASES: &[&str] = &["jpg", "jpeg", "jfif", "jif", "jpe"];

pub const ALLOWED_INPUT_DJXL: &[&str] = &["jxl"];
pub const ALLOWED_INPUT_CJXL: &[&str] = &["jpg", "jpeg", "jfif", "jif", "jpe", "png", "apng", "gif", "jxl"];
pub const ALLOWED_INPUT_CJPEGLI: &[&str] = &["jpg", "jpeg", "jfif", "jif", "jpe", "png", "jxl"];
pub const ALLOWED_INPUT_IMAGE_MAGICK: &[&str] = &[
    "jpg", "jpeg", "jfif", "jif", "jpe", "png", "gif", "heif", "heifs", "heic", "heics", "avci",
    "avcs", "hif", "webp", "jp2", "bmp", "ico", "tiff", "tif",
];
pub const ALLOWED_INPUT_AVIFENC: &[&str] = &["jpg", "jpeg", "jfif", "jif", "jpe", "png"];
pub const ALLOWED_INPUT_AVIFDEC: &[&str] = &["avif"];
pub const ALLOWED_INPUT_OXIPNG: &[&str] = &["png"];

pub const ALLOWED_RESAMPLING: &[&str] = &[
    "Lanczos", "Point", "Box", "Cubic", "Hermite", "Gaussian", "Catrom", "Triangle", "Quadratic",
    "Mitchell", "CubicSpline", "Hamming", "Parzen", "Blackman", "Kaiser", "Welsh", "Hanning",
    "Bartlett", "Bohman",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetFormat {
    JpegXl,
    Avif,
    WebP,
    Jpeg,
    Png,
    SmallestLossless,
    LosslessJpegRecompression,
    JpegReconstruction,
}

impl TargetFormat {
    pub fn display_name(self) -> &'static str {
        match self {
            TargetFormat::JpegXl => "JPEG XL",
            TargetFormat::Avif => "AVIF",
            TargetFormat::WebP => "WebP",
            TargetFormat::Jpeg => "JPEG",
            TargetFormat::Png => "PNG",
            TargetFormat::SmallestLossless => "Smallest Lossless",
            TargetFormat::LosslessJpegRecompression => "Lossless JPEG Recompression",
            TargetFormat::JpegReconstruction => "JPEG Reconstruction",
        }
    }

    /// Fixed output extension. `None` when it is decided per item
    /// (Smallest Lossless, JPEG Reconstruction).
    pub fn extension(self) -> Option<&'static str> {
        match self {
            TargetFormat::JpegXl | TargetFormat::LosslessJpegRecompression => Some("jxl"),
            TargetFormat::Avif => Some("avif"),
            TargetFormat::WebP => Some("webp"),
            TargetFormat::Jpeg => Some("jpg"),
            TargetFormat::Png => Some("png"),
            TargetFormat::SmallestLossless | TargetFormat::JpegReconstruction => None,
        }
    }

    /// Formats that cannot be combined with downscaling.
    pub fn supports_downscaling(self) -> bool {
        !matches!(
            self,
            TargetFormat::SmallestLossless
                | TargetFormat::LosslessJpegRecompression
                | TargetFormat::JpegReconstruction
        )
    }

    /// Input extensions accepted when preparing a batch for this format.
    pub fn accepts_input(self, ext: &str) -> bool {
        match self {
            TargetFormat::LosslessJpegRecompression => is_jpeg(ext),
            TargetFormat::JpegReconstruction => ALLOWED_INPUT_DJXL.contains(&ext),
            _ => is_allowed_input(ext),
        }
    }
}

impl std::fmt::Display for TargetFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

impl std::str::FromStr for TargetFormat {
    type Err = ConvError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.to_ascii_lowercase().replace([' ', '_', '-'], "");
        match normalized.as_str() {
            "jpegxl" | "jxl" => Ok(TargetFormat::JpegXl),
            "avif" => Ok(TargetFormat::Avif),
            "webp" => Ok(TargetFormat::WebP),
            "jpeg" | "jpg" => Ok(TargetFormat::Jpeg),
            "png" => Ok(TargetFormat::Png),
            "smallestlossless" | "smallest" => Ok(TargetFormat::SmallestLossless),
            "losslessjpegrecompression" | "jpegrecompression" => {
                Ok(TargetFormat::LosslessJpegRecompression)
            }
            "jpegreconstruction" => Ok(TargetFormat::JpegReconstruction),
            _ => Err(ConvError::generic("C0", format!("Unknown format ({})", s))),
        }
    }
}

/// Candidates raced by Smallest Lossless.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LosslessFormat {
    Png,
    WebP,
    Jxl,
}

impl LosslessFormat {
    pub fn extension(self) -> &'static str {
        match self {
            LosslessFormat::Png => "png",
            LosslessFormat::WebP => "webp",
            LosslessFormat::Jxl => "jxl",
        }
    }
}

pub fn is_jpeg(ext: &str) -> bool {
    JPEG_ALIASES.contains(&ext)
}

/// Union of every tool's input set.
pub fn is_allowed_input(ext: &str) -> bool {
    [
        ALLOWED_INPUT_DJXL,
        ALLOWED_INPUT_CJXL,
        ALLOWED_INPUT_IMAGE_MAGICK,
        ALLOWED_INPUT_AVIFENC,
        ALLOWED_INPUT_AVIFDEC,
        ALLOWED_INPUT_OXIPNG,
    ]
    .iter()
    .any(|set| set.contains(&ext))
}

pub fn is_animated(ext: &str) -> bool {
    matches!(ext, "gif" | "apng")
}

/// Tool able to decode `ext` into PNG.
pub fn decoder_for(ext: &str) -> Result<Tool> {
    match ext {
        "png" => Ok(Tool::Magick),
        "jxl" => Ok(Tool::Djxl),
        "avif" => Ok(Tool::Avifdec),
        _ if ALLOWED_INPUT_IMAGE_MAGICK.contains(&ext) => Ok(Tool::Magick),
        _ => Err(ConvError::generic(
            "Proxy0",
            format!("Decoder for {} was not found", ext),
        )),
    }
}

/// Thread arguments understood by a decoder.
pub fn decoder_args(decoder: Tool, threads: usize) -> Vec<String> {
    match decoder {
        Tool::Djxl => vec![format!("--num_threads={}", threads)],
        Tool::Avifdec => vec!["-j".to_string(), threads.to_string()],
        _ => Vec::new(),
    }
}

pub fn validate_resample(name: &str) -> Result<()> {
    if name == "Default" || ALLOWED_RESAMPLING.contains(&name) {
        Ok(())
    } else {
        Err(ConvError::generic(
            "D2",
            format!("Unknown resampling method ({})", name),
        ))
    }
}

/// Lowercase extension without the dot, empty when there is none.
pub fn extension_lowercase(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}
