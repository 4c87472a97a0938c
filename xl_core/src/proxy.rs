//! Proxy images
//!
//! When the chosen encoder cannot read the source container (or downscaling
//! needs an ImageMagick-readable input) the source is first decoded to a
//! tagged PNG next to the output, and the job's working path is redirected to
//! it. The proxy is removed before finalizing.

use std::path::{Path, PathBuf};

use crate::dispatch::ExecEnv;
use crate::error::{ConvError, Result};
use crate::formats::{
    decoder_args, decoder_for, TargetFormat, ALLOWED_INPUT_AVIFENC, ALLOWED_INPUT_CJPEGLI,
    ALLOWED_INPUT_CJXL, ALLOWED_INPUT_IMAGE_MAGICK,
};

pub fn is_proxy_needed(format: TargetFormat, src_ext: &str, jpegli: bool, downscaling: bool) -> bool {
    if format == TargetFormat::Png {
        return false;
    }
    if downscaling {
        return !ALLOWED_INPUT_IMAGE_MAGICK.contains(&src_ext);
    }

    let readable = match format {
        TargetFormat::JpegXl => ALLOWED_INPUT_CJXL,
        TargetFormat::Avif => ALLOWED_INPUT_AVIFENC,
        TargetFormat::WebP => ALLOWED_INPUT_IMAGE_MAGICK,
        TargetFormat::Jpeg if jpegli => ALLOWED_INPUT_CJPEGLI,
        TargetFormat::Jpeg => ALLOWED_INPUT_IMAGE_MAGICK,
        TargetFormat::SmallestLossless => return true,
        TargetFormat::LosslessJpegRecompression
        | TargetFormat::JpegReconstruction
        | TargetFormat::Png => return false,
    };
    !readable.contains(&src_ext)
}

#[derive(Debug, Default)]
pub struct Proxy {
    path: Option<PathBuf>,
}

impl Proxy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes `src` into a uniquely named PNG in `dst_dir`.
    pub fn generate(
        &mut self,
        env: &ExecEnv<'_>,
        src: &Path,
        src_ext: &str,
        dst_dir: &Path,
        name: &str,
        threads: usize,
    ) -> Result<PathBuf> {
        let decoder = decoder_for(src_ext)?;
        let proxy_path = env.paths.allocate(dst_dir, name, "png", true);
        self.path = Some(proxy_path.clone());

        env.convert(decoder, src, &proxy_path, &decoder_args(decoder, threads))?;

        if !proxy_path.is_file() {
            return Err(ConvError::file(
                "Proxy1",
                "Generating proxy failed. Output not found.",
            ));
        }
        tracing::debug!(proxy = %proxy_path.display(), "Proxy generated");
        Ok(proxy_path)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn exists(&self) -> bool {
        self.path.is_some()
    }

    /// Removes the proxy if one was generated. Idempotent.
    pub fn cleanup(&mut self) -> std::io::Result<()> {
        if let Some(path) = self.path.take() {
            if path.exists() {
                std::fs::remove_file(&path)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_png_never_needs_proxy() {
        assert!(!is_proxy_needed(TargetFormat::Png, "heic", false, true));
    }

    #[test]
    fn test_downscaling_needs_magick_input() {
        assert!(!is_proxy_needed(TargetFormat::JpegXl, "heic", true, true));
        assert!(is_proxy_needed(TargetFormat::JpegXl, "jxl", true, true));
        assert!(is_proxy_needed(TargetFormat::Avif, "avif", true, true));
    }

    #[test]
    fn test_encoder_readability() {
        assert!(!is_proxy_needed(TargetFormat::JpegXl, "gif", true, false));
        assert!(is_proxy_needed(TargetFormat::JpegXl, "webp", true, false));
        assert!(is_proxy_needed(TargetFormat::Avif, "webp", true, false));
        assert!(!is_proxy_needed(TargetFormat::Jpeg, "jxl", true, false));
        assert!(is_proxy_needed(TargetFormat::Jpeg, "jxl", false, false));
        assert!(is_proxy_needed(TargetFormat::SmallestLossless, "png", true, false));
        assert!(!is_proxy_needed(TargetFormat::JpegReconstruction, "jxl", true, false));
    }

    #[test]
    fn test_cleanup_without_proxy_is_noop() {
        let mut proxy = Proxy::new();
        assert!(!proxy.exists());
        assert!(proxy.cleanup().is_ok());
    }
}
