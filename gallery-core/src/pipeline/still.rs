use std::ops::Deref;
use std::path::Path;

use image::imageops::FilterType;
use image::io::Reader;
use image::DynamicImage;

use super::error::{PipelineError, PipelineResult};
use super::staging::write_atomic;

/// Width to encode at: `max_width` when the source is wider, otherwise the
/// native width.
pub fn target_width(width: u32, max_width: u32) -> u32 {
    if width > max_width {
        max_width
    } else {
        width
    }
}

/// Header-only read; the format is sniffed from content, not the extension.
pub fn read_dimensions(path: &Path) -> PipelineResult<(u32, u32)> {
    let probe_error = |reason: String| PipelineError::Probe {
        path: path.to_path_buf(),
        reason,
    };
    Reader::open(path)
        .map_err(|err| probe_error(err.to_string()))?
        .with_guessed_format()
        .map_err(|err| probe_error(err.to_string()))?
        .into_dimensions()
        .map_err(|err| probe_error(err.to_string()))
}

/// Decodes `input`, narrows it to `max_width` (height follows the aspect
/// ratio) and writes a lossy WebP at `quality` to `output`.
pub async fn encode_webp(
    input: &Path,
    output: &Path,
    max_width: Option<u32>,
    quality: f32,
) -> PipelineResult<()> {
    let source = input.to_path_buf();
    let bytes = tokio::task::spawn_blocking(move || render_webp(&source, max_width, quality))
        .await
        .map_err(|err| PipelineError::Image {
            path: input.to_path_buf(),
            reason: err.to_string(),
        })??;
    write_atomic(output, &bytes).await
}

fn render_webp(input: &Path, max_width: Option<u32>, quality: f32) -> PipelineResult<Vec<u8>> {
    let image_error = |reason: String| PipelineError::Image {
        path: input.to_path_buf(),
        reason,
    };
    let mut img = Reader::open(input)
        .and_then(|reader| reader.with_guessed_format())
        .map_err(|err| image_error(err.to_string()))?
        .decode()
        .map_err(|err| image_error(err.to_string()))?;
    if let Some(max_width) = max_width {
        if target_width(img.width(), max_width) != img.width() {
            img = img.resize(max_width, u32::MAX, FilterType::Lanczos3);
        }
    }
    // libwebp only accepts 8-bit RGB(A) buffers.
    let img = if img.color().has_alpha() {
        DynamicImage::ImageRgba8(img.to_rgba8())
    } else {
        DynamicImage::ImageRgb8(img.to_rgb8())
    };
    let encoder = webp::Encoder::from_image(&img).map_err(|err| image_error(err.to_string()))?;
    Ok(encoder.encode(quality).deref().to_vec())
}
