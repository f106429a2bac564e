mod encoder;
mod error;
mod staging;
mod still;
mod thumbnail;
mod types;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use tokio::fs;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::classify::{output_relative_path, MediaKind};
use crate::config::PipelineConfig;
use crate::report::{format_size, ProgressObserver, RunReport, TracingObserver};
use crate::walker::{walk, SourceEntry};

pub use encoder::{
    format_timestamp, EncoderSettings, EventSender, FfmpegEncoder, MediaEncoder, ProgressParser,
};
pub use error::{PipelineError, PipelineResult};
pub use staging::PARTIAL_SUFFIX;
pub use still::target_width;
pub use thumbnail::{
    thumbnail_path, thumbnail_timestamp, ThumbnailExtractor, PREFERRED_OFFSET_SECONDS,
};
pub use types::{ConversionResult, EncodeProgress, EncoderEvent, Outcome, VideoJob};

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub output_root: PathBuf,
    pub temp_dir: PathBuf,
    pub workers: usize,
    pub image_max_width: u32,
    pub image_quality: f32,
    pub thumbnail_quality: f32,
}

impl PipelineSettings {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            output_root: config.output_dir(),
            temp_dir: config.temp_dir(),
            workers: config.workers(),
            image_max_width: config.image.max_width,
            image_quality: config.image.quality,
            thumbnail_quality: config.thumbnail.quality,
        }
    }
}

/// Converts a source tree into the mirrored, web-ready output tree.
#[derive(Clone)]
pub struct Pipeline {
    settings: PipelineSettings,
    encoder: Arc<dyn MediaEncoder>,
    observer: Arc<dyn ProgressObserver>,
}

impl Pipeline {
    pub fn new(settings: PipelineSettings, encoder: Arc<dyn MediaEncoder>) -> Self {
        Self {
            settings,
            encoder,
            observer: Arc::new(TracingObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Walks `source_root` and converts every file, `workers` at a time.
    ///
    /// Only an unreadable root or output root aborts the run; per-file
    /// failures are recorded as `failed` results in enumeration order.
    pub async fn run(&self, source_root: &Path) -> PipelineResult<RunReport> {
        let started = Instant::now();
        fs::create_dir_all(&self.settings.output_root)
            .await
            .map_err(|source| PipelineError::io(&self.settings.output_root, source))?;
        let entries = walk(source_root)?;
        info!(
            source = %source_root.display(),
            output = %self.settings.output_root.display(),
            workers = self.settings.workers,
            "conversion run started"
        );

        let mut report = RunReport::new();
        let mut results = futures::stream::iter(entries)
            .map(|entry| async move { self.process(&entry).await })
            .buffered(self.settings.workers.max(1));
        while let Some(result) = results.next().await {
            report.record(result);
        }
        report.finish(started.elapsed());
        Ok(report)
    }

    pub async fn process(&self, entry: &SourceEntry) -> ConversionResult {
        self.convert(&entry.path, &entry.relative_path).await
    }

    /// Converts one source file. Never fails: errors become a `failed`
    /// result carrying the cause.
    pub async fn convert(&self, source: &Path, relative_path: &str) -> ConversionResult {
        let kind = MediaKind::from_path(source);
        let output_relative = output_relative_path(relative_path, kind);
        let output = self.output_path(&output_relative);
        match self.convert_inner(source, kind, &output_relative, &output).await {
            Ok(result) => {
                if let Some(saved) = result.saved_bytes() {
                    info!(
                        relative_path = %result.relative_path,
                        "{}: {} -> {} (saved {})",
                        result.relative_path,
                        format_size(result.original_bytes.unwrap_or_default() as i64),
                        format_size(result.converted_bytes.unwrap_or_default() as i64),
                        format_size(saved)
                    );
                }
                result
            }
            Err(err) => {
                error!(relative_path = %relative_path, error = %err, "failed to process file");
                ConversionResult::failed(output_relative, err)
            }
        }
    }

    pub fn output_path(&self, output_relative: &str) -> PathBuf {
        output_relative
            .split('/')
            .fold(self.settings.output_root.clone(), |path, part| path.join(part))
    }

    async fn convert_inner(
        &self,
        source: &Path,
        kind: MediaKind,
        output_relative: &str,
        output: &Path,
    ) -> PipelineResult<ConversionResult> {
        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| PipelineError::io(parent, source))?;
        }
        if fs::metadata(output).await.is_ok() {
            return Ok(ConversionResult::skipped(output_relative));
        }
        let result = match kind {
            MediaKind::Image => self.convert_image(source, output_relative, output).await,
            MediaKind::Video => self.convert_video(source, output_relative, output).await,
            MediaKind::Opaque => staging::copy_atomic(source, output)
                .await
                .map(|bytes| ConversionResult::copied(output_relative, bytes)),
        };
        match result {
            // Another file mapping to the same output got there first.
            Err(PipelineError::OutputExists(path)) => {
                debug!(output = %path.display(), "output claimed during conversion");
                Ok(ConversionResult::skipped(output_relative))
            }
            other => other,
        }
    }

    async fn convert_image(
        &self,
        source: &Path,
        output_relative: &str,
        output: &Path,
    ) -> PipelineResult<ConversionResult> {
        let (width, height) = still::read_dimensions(source)?;
        let target = target_width(width, self.settings.image_max_width);
        debug!(width, height, target, "encoding image");
        still::encode_webp(
            source,
            output,
            Some(self.settings.image_max_width),
            self.settings.image_quality,
        )
        .await?;
        let original = file_size(source).await?;
        let converted = file_size(output).await?;
        Ok(ConversionResult::converted(output_relative, original, converted))
    }

    async fn convert_video(
        &self,
        source: &Path,
        output_relative: &str,
        output: &Path,
    ) -> PipelineResult<ConversionResult> {
        let temp_dir = &self.settings.temp_dir;
        fs::create_dir_all(temp_dir)
            .await
            .map_err(|source| PipelineError::io(temp_dir, source))?;
        let source_extension = source
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default();
        let temp_input = temp_dir.join(staging::temp_file_name("input", &source_extension));
        let temp_output = temp_dir.join(staging::temp_file_name("output", ".webm"));

        if let Err(err) = fs::copy(source, &temp_input).await {
            staging::remove_quietly(&temp_input).await;
            return Err(PipelineError::io(source, err));
        }

        let duration = self.encoder.probe_duration(&temp_input).await.ok();
        let job = VideoJob {
            input: temp_input.clone(),
            output: temp_output.clone(),
            duration,
        };
        let (events, receiver) = mpsc::unbounded_channel();
        let (encoded, ()) = tokio::join!(
            self.encoder.transcode_video(&job, events),
            forward_events(self.observer.as_ref(), output_relative, receiver)
        );

        staging::remove_quietly(&temp_input).await;
        if let Err(err) = encoded {
            self.observer.on_event(
                output_relative,
                &EncoderEvent::Failed {
                    error: err.to_string(),
                },
            );
            staging::remove_quietly(&temp_output).await;
            return Err(err);
        }
        if let Err(err) = staging::move_into_place(&temp_output, output).await {
            staging::remove_quietly(&temp_output).await;
            return Err(err);
        }

        let thumbnail = thumbnail_path(output);
        if fs::metadata(&thumbnail).await.is_ok() {
            // A same-stem image already produced this `.webp`.
            warn!(
                relative_path = %output_relative,
                thumbnail = %thumbnail.display(),
                "thumbnail path already taken, not extracting"
            );
        } else {
            let extractor = ThumbnailExtractor::new(
                self.encoder.as_ref(),
                self.settings.thumbnail_quality,
                temp_dir,
            );
            match extractor.extract(output, &thumbnail).await {
                Ok(timestamp) => info!(
                    relative_path = %output_relative,
                    timestamp,
                    "thumbnail created"
                ),
                Err(err) => warn!(
                    relative_path = %output_relative,
                    error = %err,
                    "failed to create thumbnail"
                ),
            }
        }

        let original = file_size(source).await?;
        let converted = file_size(output).await?;
        Ok(ConversionResult::converted(output_relative, original, converted))
    }
}

async fn forward_events(
    observer: &dyn ProgressObserver,
    relative_path: &str,
    mut receiver: mpsc::UnboundedReceiver<EncoderEvent>,
) {
    while let Some(event) = receiver.recv().await {
        observer.on_event(relative_path, &event);
    }
}

async fn file_size(path: &Path) -> PipelineResult<u64> {
    fs::metadata(path)
        .await
        .map(|meta| meta.len())
        .map_err(|source| PipelineError::io(path, source))
}
