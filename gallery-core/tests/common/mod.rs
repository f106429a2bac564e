#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use image::{Rgb, RgbImage};
use tempfile::TempDir;

use gallery_core::pipeline::{
    EncodeProgress, EncoderEvent, EventSender, MediaEncoder, PipelineError, PipelineResult,
    PipelineSettings, VideoJob,
};

/// Source bytes that make the fake encoder exit with an error.
pub const BROKEN_VIDEO: &[u8] = b"BROKEN";

/// Stands in for ffmpeg: "encodes" by halving the input and writes a real
/// JPEG for frame grabs.
#[derive(Default)]
pub struct FakeEncoder {
    pub duration: Option<f64>,
    pub fail_frames: bool,
    /// Leaves a partial output behind and reports a timeout.
    pub times_out: bool,
    pub transcodes: Mutex<Vec<PathBuf>>,
    pub frames: Mutex<Vec<f64>>,
}

impl FakeEncoder {
    pub fn new() -> Self {
        Self {
            duration: Some(12.0),
            ..Self::default()
        }
    }

    pub fn without_thumbnails() -> Self {
        Self {
            fail_frames: true,
            ..Self::new()
        }
    }

    pub fn timing_out() -> Self {
        Self {
            times_out: true,
            ..Self::new()
        }
    }

    pub fn transcode_count(&self) -> usize {
        self.transcodes.lock().unwrap().len()
    }

    pub fn frame_timestamps(&self) -> Vec<f64> {
        self.frames.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaEncoder for FakeEncoder {
    async fn probe_duration(&self, path: &Path) -> PipelineResult<f64> {
        self.duration.ok_or_else(|| PipelineError::Probe {
            path: path.to_path_buf(),
            reason: "no duration".into(),
        })
    }

    async fn transcode_video(&self, job: &VideoJob, events: EventSender) -> PipelineResult<()> {
        self.transcodes.lock().unwrap().push(job.input.clone());
        let _ = events.send(EncoderEvent::Started {
            command: format!("fake {}", job.input.display()),
        });
        let input = std::fs::read(&job.input).map_err(|err| PipelineError::Io {
            source: err,
            path: job.input.clone(),
        })?;
        if self.times_out {
            std::fs::write(&job.output, b"partial").map_err(|err| PipelineError::Io {
                source: err,
                path: job.output.clone(),
            })?;
            return Err(PipelineError::EncodeTimeout(Duration::from_secs(30)));
        }
        if input.starts_with(BROKEN_VIDEO) {
            return Err(PipelineError::Encode {
                command: "fake".into(),
                status: Some(1),
                stderr: "Invalid data found when processing input".into(),
            });
        }
        let _ = events.send(EncoderEvent::Progress(EncodeProgress {
            percent: Some(50.0),
            frames: 120,
            timemark: "00:00:06.000000".into(),
        }));
        std::fs::write(&job.output, vec![7u8; input.len() / 2]).map_err(|err| {
            PipelineError::Io {
                source: err,
                path: job.output.clone(),
            }
        })?;
        let _ = events.send(EncoderEvent::Finished {
            elapsed: Duration::from_millis(5),
        });
        Ok(())
    }

    async fn extract_frame(&self, video: &Path, timestamp: f64, output: &Path) -> PipelineResult<()> {
        self.frames.lock().unwrap().push(timestamp);
        if self.fail_frames {
            return Err(PipelineError::Thumbnail {
                path: video.to_path_buf(),
                reason: "no frame".into(),
            });
        }
        write_jpeg(output, 40, 24);
        Ok(())
    }
}

pub fn write_jpeg(path: &Path, width: u32, height: u32) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    RgbImage::from_fn(width, height, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 90]))
        .save_with_format(path, image::ImageFormat::Jpeg)
        .unwrap();
}

/// A 60x40 picture in `format`; WebP goes through libwebp since `image`
/// only decodes it.
pub fn write_image(path: &Path, format: image::ImageFormat) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    let img = RgbImage::from_fn(60, 40, |x, y| Rgb([(x * 4) as u8, (y * 6) as u8, 120]));
    if format == image::ImageFormat::WebP {
        let encoded = webp::Encoder::from_rgb(img.as_raw(), 60, 40).encode(80.0);
        std::fs::write(path, &*encoded).unwrap();
    } else {
        img.save_with_format(path, format).unwrap();
    }
}

pub fn write_bytes(path: &Path, bytes: &[u8]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, bytes).unwrap();
}

pub struct Workspace {
    pub dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("source")).unwrap();
        Self { dir }
    }

    pub fn source(&self) -> PathBuf {
        self.dir.path().join("source")
    }

    pub fn output(&self) -> PathBuf {
        self.dir.path().join("output")
    }

    pub fn temp(&self) -> PathBuf {
        self.dir.path().join("tmp")
    }

    pub fn settings(&self, workers: usize) -> PipelineSettings {
        PipelineSettings {
            output_root: self.output(),
            temp_dir: self.temp(),
            workers,
            image_max_width: 900,
            image_quality: 80.0,
            thumbnail_quality: 80.0,
        }
    }
}

pub fn shared(encoder: FakeEncoder) -> Arc<FakeEncoder> {
    Arc::new(encoder)
}

/// File names below `dir`, recursively, `/`-separated and sorted.
pub fn list_files(dir: &Path) -> Vec<String> {
    let mut files: Vec<String> = walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| {
            gallery_core::walker::relative_key(dir, entry.path()).unwrap_or_default()
        })
        .collect();
    files.sort();
    files
}
