use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::debug;

use crate::config::PipelineConfig;

use super::error::{PipelineError, PipelineResult};
use super::types::{EncodeProgress, EncoderEvent, VideoJob};

pub type EventSender = mpsc::UnboundedSender<EncoderEvent>;

const PROBE_TIMEOUT: Duration = Duration::from_secs(30);
const STDERR_TAIL_BYTES: usize = 2048;

/// The external transcoder as seen by the pipeline.
#[async_trait]
pub trait MediaEncoder: Send + Sync {
    /// Duration of the media in seconds.
    async fn probe_duration(&self, path: &Path) -> PipelineResult<f64>;

    /// Encodes `job.input` into `job.output`, reporting lifecycle events on
    /// `events`. Resolves once the encoder has exited.
    async fn transcode_video(&self, job: &VideoJob, events: EventSender) -> PipelineResult<()>;

    /// Writes a single still frame taken at `timestamp` seconds to `output`.
    async fn extract_frame(&self, video: &Path, timestamp: f64, output: &Path)
        -> PipelineResult<()>;
}

#[derive(Debug, Clone)]
pub struct EncoderSettings {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
    pub max_width: u32,
    pub codec: String,
    pub crf: u8,
    pub cpu_used: u8,
    pub audio_codec: String,
    pub audio_bitrate: String,
    pub threads: usize,
    pub thumbnail_width: u32,
    pub timeout: Option<Duration>,
}

impl EncoderSettings {
    pub fn from_config(config: &PipelineConfig) -> Self {
        let video = &config.video;
        let threads = video.threads.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        });
        Self {
            ffmpeg: video.ffmpeg.clone(),
            ffprobe: video.ffprobe.clone(),
            max_width: video.max_width,
            codec: video.codec.clone(),
            crf: video.crf,
            cpu_used: video.cpu_used,
            audio_codec: video.audio_codec.clone(),
            audio_bitrate: video.audio_bitrate.clone(),
            threads: threads.max(1),
            thumbnail_width: config.thumbnail.width,
            timeout: video.timeout_seconds.map(Duration::from_secs),
        }
    }

    pub fn video_args(&self, job: &VideoJob) -> Vec<String> {
        vec![
            "-y".to_string(),
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-nostats".to_string(),
            "-progress".to_string(),
            "pipe:1".to_string(),
            "-i".to_string(),
            job.input.to_string_lossy().to_string(),
            "-vf".to_string(),
            format!("scale={}:-2", self.max_width),
            "-c:v".to_string(),
            self.codec.clone(),
            "-crf".to_string(),
            self.crf.to_string(),
            "-b:v".to_string(),
            "0".to_string(),
            "-cpu-used".to_string(),
            self.cpu_used.to_string(),
            "-threads".to_string(),
            self.threads.to_string(),
            "-row-mt".to_string(),
            "1".to_string(),
            "-strict".to_string(),
            "experimental".to_string(),
            "-c:a".to_string(),
            self.audio_codec.clone(),
            "-b:a".to_string(),
            self.audio_bitrate.clone(),
            job.output.to_string_lossy().to_string(),
        ]
    }

    pub fn frame_args(&self, video: &Path, timestamp: f64, output: &Path) -> Vec<String> {
        vec![
            "-y".to_string(),
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-ss".to_string(),
            format_timestamp(timestamp),
            "-i".to_string(),
            video.to_string_lossy().to_string(),
            "-frames:v".to_string(),
            "1".to_string(),
            "-vf".to_string(),
            format!("scale={}:-1", self.thumbnail_width),
            output.to_string_lossy().to_string(),
        ]
    }
}

/// `ffmpeg`/`ffprobe` driven through `tokio::process`.
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    settings: EncoderSettings,
}

impl FfmpegEncoder {
    pub fn new(settings: EncoderSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &EncoderSettings {
        &self.settings
    }

    fn command_line(program: &Path, args: &[String]) -> String {
        format!("{} {}", program.display(), args.join(" "))
    }
}

#[async_trait]
impl MediaEncoder for FfmpegEncoder {
    async fn probe_duration(&self, path: &Path) -> PipelineResult<f64> {
        let mut command = Command::new(&self.settings.ffprobe);
        command
            .kill_on_drop(true)
            .arg("-v")
            .arg("error")
            .arg("-show_entries")
            .arg("format=duration")
            .arg("-of")
            .arg("default=noprint_wrappers=1:nokey=1")
            .arg(path);
        let output = match timeout(PROBE_TIMEOUT, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => return Err(PipelineError::io(&self.settings.ffprobe, source)),
            Err(_) => {
                return Err(PipelineError::Probe {
                    path: path.to_path_buf(),
                    reason: format!("ffprobe timed out after {PROBE_TIMEOUT:?}"),
                })
            }
        };
        if !output.status.success() {
            return Err(PipelineError::Probe {
                path: path.to_path_buf(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        stdout
            .trim()
            .parse::<f64>()
            .map_err(|_| PipelineError::Probe {
                path: path.to_path_buf(),
                reason: format!("unexpected duration output {:?}", stdout.trim()),
            })
    }

    async fn transcode_video(&self, job: &VideoJob, events: EventSender) -> PipelineResult<()> {
        let args = self.settings.video_args(job);
        let command_line = Self::command_line(&self.settings.ffmpeg, &args);
        let mut command = Command::new(&self.settings.ffmpeg);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let started = Instant::now();
        let mut child = command
            .spawn()
            .map_err(|source| PipelineError::io(&self.settings.ffmpeg, source))?;
        debug!(command = %command_line, "encoder started");
        let _ = events.send(EncoderEvent::Started {
            command: command_line.clone(),
        });

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let run = async {
            let progress = async {
                let Some(stdout) = stdout else {
                    return;
                };
                let mut parser = ProgressParser::new(job.duration);
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if let Some(update) = parser.feed(&line) {
                        let _ = events.send(EncoderEvent::Progress(update));
                    }
                }
            };
            let collect_stderr = async {
                match stderr {
                    Some(stderr) => read_lossy(stderr).await,
                    None => String::new(),
                }
            };
            let ((), stderr) = tokio::join!(progress, collect_stderr);
            (child.wait().await, stderr)
        };

        let (status, stderr) = match self.settings.timeout {
            Some(limit) => timeout(limit, run)
                .await
                .map_err(|_| PipelineError::EncodeTimeout(limit))?,
            None => run.await,
        };
        let status = status.map_err(|source| PipelineError::io(&self.settings.ffmpeg, source))?;
        if !status.success() {
            return Err(PipelineError::Encode {
                command: command_line,
                status: status.code(),
                stderr: stderr_tail(&stderr),
            });
        }
        let _ = events.send(EncoderEvent::Finished {
            elapsed: started.elapsed(),
        });
        Ok(())
    }

    async fn extract_frame(
        &self,
        video: &Path,
        timestamp: f64,
        output: &Path,
    ) -> PipelineResult<()> {
        let args = self.settings.frame_args(video, timestamp, output);
        let mut command = Command::new(&self.settings.ffmpeg);
        command.args(&args).stdin(Stdio::null()).kill_on_drop(true);
        let result = match self.settings.timeout {
            Some(limit) => timeout(limit, command.output())
                .await
                .map_err(|_| PipelineError::EncodeTimeout(limit))?,
            None => command.output().await,
        };
        let output_status =
            result.map_err(|source| PipelineError::io(&self.settings.ffmpeg, source))?;
        if !output_status.status.success() {
            return Err(PipelineError::Encode {
                command: Self::command_line(&self.settings.ffmpeg, &args),
                status: output_status.status.code(),
                stderr: stderr_tail(&String::from_utf8_lossy(&output_status.stderr)),
            });
        }
        // Seeking past the end exits cleanly without writing a frame.
        let written = tokio::fs::metadata(output)
            .await
            .map(|meta| meta.len() > 0)
            .unwrap_or(false);
        if !written {
            return Err(PipelineError::Thumbnail {
                path: video.to_path_buf(),
                reason: format!("no frame produced at {}s", format_timestamp(timestamp)),
            });
        }
        Ok(())
    }
}

/// Folds ffmpeg's `-progress` key=value stream into progress snapshots, one
/// per `progress=` line.
#[derive(Debug, Clone)]
pub struct ProgressParser {
    duration: Option<f64>,
    frames: u64,
    out_time_us: i64,
    timemark: String,
}

impl ProgressParser {
    pub fn new(duration: Option<f64>) -> Self {
        Self {
            duration: duration.filter(|d| *d > 0.0),
            frames: 0,
            out_time_us: 0,
            timemark: "00:00:00.00".to_string(),
        }
    }

    pub fn feed(&mut self, line: &str) -> Option<EncodeProgress> {
        let (key, value) = line.trim().split_once('=')?;
        let value = value.trim();
        match key {
            "frame" => {
                if let Ok(frames) = value.parse() {
                    self.frames = frames;
                }
            }
            // ffmpeg reports microseconds under both keys.
            "out_time_us" | "out_time_ms" => {
                if let Ok(us) = value.parse::<i64>() {
                    self.out_time_us = us.max(0);
                }
            }
            "out_time" => {
                if value != "N/A" {
                    self.timemark = value.to_string();
                }
            }
            "progress" => {
                let percent = if value == "end" {
                    Some(100.0)
                } else {
                    self.duration.map(|duration| {
                        let seconds = self.out_time_us as f64 / 1_000_000.0;
                        (seconds / duration * 100.0).clamp(0.0, 100.0)
                    })
                };
                return Some(EncodeProgress {
                    percent,
                    frames: self.frames,
                    timemark: self.timemark.clone(),
                });
            }
            _ => {}
        }
        None
    }
}

/// Seconds rendered without trailing zeros: `2`, `0.5`, `1.25`.
pub fn format_timestamp(seconds: f64) -> String {
    let rendered = format!("{seconds:.3}");
    let trimmed = rendered.trim_end_matches('0').trim_end_matches('.');
    if trimmed.is_empty() || trimmed == "-" {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Drains `reader`; paths in ffmpeg messages are not always UTF-8.
async fn read_lossy<R: AsyncRead + Unpin>(mut reader: R) -> String {
    let mut buffer = Vec::new();
    if let Err(err) = reader.read_to_end(&mut buffer).await {
        debug!(error = %err, "encoder stderr read interrupted");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

fn stderr_tail(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.len() <= STDERR_TAIL_BYTES {
        return trimmed.to_string();
    }
    let mut start = trimmed.len() - STDERR_TAIL_BYTES;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    trimmed[start..].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> EncoderSettings {
        EncoderSettings {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
            max_width: 900,
            codec: "libsvtav1".into(),
            crf: 45,
            cpu_used: 8,
            audio_codec: "libopus".into(),
            audio_bitrate: "64k".into(),
            threads: 12,
            thumbnail_width: 400,
            timeout: None,
        }
    }

    #[test]
    fn video_args_follow_quality_driven_profile() {
        let job = VideoJob {
            input: PathBuf::from("/tmp/in.mov"),
            output: PathBuf::from("/tmp/out.webm"),
            duration: None,
        };
        let args = settings().video_args(&job);
        let joined = args.join(" ");
        assert!(joined.contains("-vf scale=900:-2"));
        assert!(joined.contains("-c:v libsvtav1 -crf 45 -b:v 0"));
        assert!(joined.contains("-threads 12 -row-mt 1"));
        assert!(joined.contains("-c:a libopus -b:a 64k"));
        assert!(joined.contains("-progress pipe:1"));
        assert_eq!(args.last().map(String::as_str), Some("/tmp/out.webm"));
    }

    #[test]
    fn frame_args_seek_before_input() {
        let args = settings().frame_args(Path::new("v.webm"), 0.5, Path::new("f.jpg"));
        let joined = args.join(" ");
        assert!(joined.contains("-ss 0.5 -i v.webm"));
        assert!(joined.contains("-frames:v 1 -vf scale=400:-1 f.jpg"));
    }

    #[test]
    fn progress_parser_emits_on_progress_key() {
        let mut parser = ProgressParser::new(Some(10.0));
        assert!(parser.feed("frame=120").is_none());
        assert!(parser.feed("out_time_us=5000000").is_none());
        assert!(parser.feed("out_time=00:00:05.000000").is_none());
        let update = parser.feed("progress=continue").unwrap();
        assert_eq!(update.frames, 120);
        assert_eq!(update.timemark, "00:00:05.000000");
        assert!((update.percent.unwrap() - 50.0).abs() < 1e-9);

        let done = parser.feed("progress=end").unwrap();
        assert_eq!(done.percent, Some(100.0));
    }

    #[test]
    fn progress_without_duration_has_no_percent() {
        let mut parser = ProgressParser::new(None);
        parser.feed("out_time_us=N/A");
        let update = parser.feed("progress=continue").unwrap();
        assert_eq!(update.percent, None);
        assert_eq!(update.frames, 0);
    }

    #[test]
    fn timestamps_render_compactly() {
        assert_eq!(format_timestamp(2.0), "2");
        assert_eq!(format_timestamp(0.5), "0.5");
        assert_eq!(format_timestamp(0.0), "0");
        assert_eq!(format_timestamp(1.25), "1.25");
    }

    #[tokio::test]
    async fn stderr_with_invalid_utf8_is_kept() {
        let text = read_lossy(&b"cannot open /media/\xffclip.mov: No such file"[..]).await;
        assert!(text.starts_with("cannot open /media/"));
        assert!(text.ends_with("clip.mov: No such file"));
        assert!(text.contains('\u{FFFD}'));
    }

    #[test]
    fn stderr_tail_keeps_the_end() {
        let long = "x".repeat(STDERR_TAIL_BYTES) + "final error";
        assert!(stderr_tail(&long).ends_with("final error"));
        assert_eq!(stderr_tail(&long).len(), STDERR_TAIL_BYTES);
    }
}
