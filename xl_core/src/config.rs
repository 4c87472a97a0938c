//! Application-level encoder settings
//!
//! These outlive a single batch (the front end loads them once). Every field
//! has a default so a partial JSON file is valid.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JpgEncoder {
    #[serde(rename = "JPEGLI")]
    Jpegli,
    #[serde(rename = "ImageMagick")]
    ImageMagick,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MultithreadingMode {
    #[serde(rename = "Performance")]
    Performance,
    #[serde(rename = "Low RAM")]
    LowRam,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderSettings {
    pub jpg_encoder: JpgEncoder,
    pub disable_progressive_jpegli: bool,
    /// 0-6, ImageMagick `webp:method`.
    pub webp_method: u8,
    /// Transcode JPEG sources bit-exactly when JPEG XL lossless is requested.
    pub jxl_lossless_jpeg: bool,
    pub enable_custom_args: bool,
    pub avifenc_args: String,
    pub cjxl_args: String,
    pub cjpegli_args: String,
    pub im_args: String,
    pub multithreading: MultithreadingMode,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            jpg_encoder: JpgEncoder::Jpegli,
            disable_progressive_jpegli: false,
            webp_method: 6,
            jxl_lossless_jpeg: true,
            enable_custom_args: false,
            avifenc_args: String::new(),
            cjxl_args: String::new(),
            cjpegli_args: String::new(),
            im_args: String::new(),
            multithreading: MultithreadingMode::Performance,
        }
    }
}

impl EncoderSettings {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file: {}", path.display()))?;
        let mut settings: Self = serde_json::from_str(&text)
            .with_context(|| format!("Invalid settings file: {}", path.display()))?;
        if settings.webp_method > 6 {
            tracing::warn!(
                webp_method = settings.webp_method,
                "WebP method out of range, clamping to 6"
            );
            settings.webp_method = 6;
        }
        Ok(settings)
    }

    pub fn uses_jpegli(&self) -> bool {
        self.jpg_encoder == JpgEncoder::Jpegli
    }
}
