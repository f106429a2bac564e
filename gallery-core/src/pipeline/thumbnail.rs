use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::classify::THUMBNAIL_EXTENSION;

use super::encoder::MediaEncoder;
use super::error::{PipelineError, PipelineResult};
use super::staging::{remove_quietly, temp_file_name};
use super::still::encode_webp;

/// Offset used for every video at least this long.
pub const PREFERRED_OFFSET_SECONDS: f64 = 2.0;

/// Where to grab the poster frame for a video of `duration` seconds.
///
/// Unknown durations (zero, negative, NaN) start at the first frame, short
/// clips use their midpoint, anything else uses the preferred offset.
pub fn thumbnail_timestamp(duration: f64) -> f64 {
    if duration.is_nan() || duration <= 0.0 {
        0.0
    } else if duration < PREFERRED_OFFSET_SECONDS {
        duration / 2.0
    } else {
        PREFERRED_OFFSET_SECONDS
    }
}

/// Sibling `.webp` sharing the video's stem.
pub fn thumbnail_path(video: &Path) -> PathBuf {
    video.with_extension(THUMBNAIL_EXTENSION)
}

pub struct ThumbnailExtractor<'a> {
    encoder: &'a dyn MediaEncoder,
    quality: f32,
    /// Holds the grabbed frame before it is re-encoded; never the output tree.
    scratch_dir: &'a Path,
}

impl<'a> ThumbnailExtractor<'a> {
    pub fn new(encoder: &'a dyn MediaEncoder, quality: f32, scratch_dir: &'a Path) -> Self {
        Self {
            encoder,
            quality,
            scratch_dir,
        }
    }

    /// Writes a poster frame for `video` to `thumbnail` and returns the
    /// timestamp it was taken at.
    ///
    /// A failed attempt at a non-zero timestamp is retried once at zero. When
    /// that fails too, or the first attempt was already at zero, the error is
    /// returned and no thumbnail file is left behind.
    pub async fn extract(&self, video: &Path, thumbnail: &Path) -> PipelineResult<f64> {
        let duration = match self.encoder.probe_duration(video).await {
            Ok(duration) => duration,
            Err(err) => {
                debug!(video = %video.display(), error = %err, "duration unknown, using first frame");
                0.0
            }
        };
        let timestamp = thumbnail_timestamp(duration);
        match self.attempt(video, thumbnail, timestamp).await {
            Ok(()) => Ok(timestamp),
            Err(err) if timestamp > 0.0 => {
                warn!(
                    video = %video.display(),
                    timestamp,
                    error = %err,
                    "thumbnail extraction failed, retrying at first frame"
                );
                self.attempt(video, thumbnail, 0.0)
                    .await
                    .map(|()| 0.0)
                    .map_err(|err| thumbnail_error(video, err))
            }
            Err(err) => Err(thumbnail_error(video, err)),
        }
    }

    async fn attempt(&self, video: &Path, thumbnail: &Path, timestamp: f64) -> PipelineResult<()> {
        tokio::fs::create_dir_all(self.scratch_dir)
            .await
            .map_err(|source| PipelineError::io(self.scratch_dir, source))?;
        let intermediate = self.scratch_dir.join(temp_file_name("frame", ".jpg"));
        let result = async {
            self.encoder
                .extract_frame(video, timestamp, &intermediate)
                .await?;
            encode_webp(&intermediate, thumbnail, None, self.quality).await
        }
        .await;
        remove_quietly(&intermediate).await;
        result
    }
}

fn thumbnail_error(video: &Path, err: PipelineError) -> PipelineError {
    match err {
        PipelineError::Thumbnail { .. } => err,
        other => PipelineError::Thumbnail {
            path: video.to_path_buf(),
            reason: other.to_string(),
        },
    }
}
