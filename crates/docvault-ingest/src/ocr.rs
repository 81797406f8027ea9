//! Text extraction from images through an external OCR program.

use std::ffi::OsStr;
use std::path::Path;

use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, ImageFormat};
use tracing::{debug, info};

use crate::context::OperationContext;
use crate::deskew;
use crate::process::run_command;
use docvault_core::{Error, OcrSettings, Result};

/// Runs the configured OCR binary on preprocessed page images.
#[derive(Debug, Clone)]
pub struct OcrExtractor {
    settings: OcrSettings,
}

impl OcrExtractor {
    pub fn new(settings: OcrSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &OcrSettings {
        &self.settings
    }

    /// Extract text from `image` in `language`.
    ///
    /// The image is scaled to the configured width, converted to grayscale
    /// and deskewed, then written as TIFF to a temporary file scoped to
    /// `ctx`. The OCR program is invoked as `<binary> <image> stdout -l
    /// <language>`. Every failure is reported as [`Error::OcrProcess`].
    pub async fn extract_text(
        &self,
        ctx: &OperationContext,
        language: &str,
        image: DynamicImage,
    ) -> Result<String> {
        if language.trim().is_empty() {
            return Err(Error::OcrProcess("no language given".into()));
        }

        let page = ctx
            .create_temporary_file()
            .map_err(|e| Error::OcrProcess(format!("temporary file: {}", e)))?;
        let target_width = self.settings.target_width;
        let page_path = page.clone();
        tokio::task::spawn_blocking(move || write_page(image, target_width, &page_path))
            .await
            .map_err(|e| Error::OcrProcess(format!("preprocessing task: {}", e)))??;

        self.recognize(&page, language).await
    }

    async fn recognize(&self, page: &Path, language: &str) -> Result<String> {
        let args = [
            page.as_os_str(),
            OsStr::new("stdout"),
            OsStr::new("-l"),
            OsStr::new(language),
        ];
        debug!(
            "Running {} on {} ({})",
            self.settings.binary,
            page.display(),
            language
        );
        let output = run_command(Path::new(&self.settings.binary), &args, self.settings.timeout())
            .await
            .map_err(|e| Error::OcrProcess(e.to_string()))?;

        if !output.status.success() {
            return Err(Error::OcrProcess(format!(
                "{} exited with {}: {}",
                self.settings.binary,
                output.status,
                output.stderr_tail()
            )));
        }
        let text = String::from_utf8(output.stdout)
            .map_err(|e| Error::OcrProcess(format!("output is not UTF-8: {}", e)))?;
        info!("OCR produced {} characters", text.len());
        Ok(text)
    }
}

/// Scale to `target_width`, convert to grayscale and straighten.
pub fn preprocess(image: DynamicImage, target_width: u32) -> GrayImage {
    let gray = image.to_luma8();
    let (width, height) = gray.dimensions();
    let scaled = if width == 0 || width == target_width {
        gray
    } else {
        let target_height =
            ((height as u64 * target_width as u64) / width as u64).max(1) as u32;
        image::imageops::resize(&gray, target_width, target_height, FilterType::CatmullRom)
    };
    deskew::deskew(&scaled)
}

fn write_page(image: DynamicImage, target_width: u32, dest: &Path) -> Result<()> {
    preprocess(image, target_width)
        .save_with_format(dest, ImageFormat::Tiff)
        .map_err(|e| Error::OcrProcess(format!("write {}: {}", dest.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb, RgbImage};
    use std::time::Duration;

    fn settings(binary: &str) -> OcrSettings {
        OcrSettings {
            binary: binary.to_string(),
            timeout_secs: 10,
            target_width: 64,
        }
    }

    fn sample_image() -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(32, 16, Rgb([200, 200, 200])))
    }

    #[test]
    fn test_preprocess_scales_to_target_width() {
        let gray = preprocess(sample_image(), 64);
        assert_eq!(gray.dimensions(), (64, 32));

        let blank = GrayImage::from_pixel(10, 10, Luma([255]));
        let blank = preprocess(DynamicImage::ImageLuma8(blank), 10);
        assert_eq!(blank.dimensions(), (10, 10));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_invocation_arguments() {
        // `echo` prints the arguments it was given.
        let dir = tempfile::tempdir().unwrap();
        let ctx = OperationContext::new(dir.path()).unwrap();
        let ocr = OcrExtractor::new(settings("echo"));
        let text = ocr.extract_text(&ctx, "fra", sample_image()).await.unwrap();
        assert!(text.trim_end().ends_with("stdout -l fra"), "got {:?}", text);
        assert!(text.starts_with(ctx.scratch_path().to_str().unwrap()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_binary() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = OperationContext::new(dir.path()).unwrap();
        let ocr = OcrExtractor::new(settings("false"));
        let result = ocr.extract_text(&ctx, "eng", sample_image()).await;
        assert!(matches!(result, Err(Error::OcrProcess(_))));
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = OperationContext::new(dir.path()).unwrap();
        let ocr = OcrExtractor::new(settings("/nonexistent/ocr-binary"));
        let result = ocr.extract_text(&ctx, "eng", sample_image()).await;
        assert!(matches!(result, Err(Error::OcrProcess(_))));
    }

    #[tokio::test]
    async fn test_empty_language_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = OperationContext::new(dir.path()).unwrap();
        let ocr = OcrExtractor::new(settings("echo"));
        assert!(matches!(
            ocr.extract_text(&ctx, " ", sample_image()).await,
            Err(Error::OcrProcess(_))
        ));
    }

    #[test]
    fn test_timeout_from_settings() {
        assert_eq!(settings("x").timeout(), Duration::from_secs(10));
    }
}
