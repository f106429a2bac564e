use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PipelineConfig {
    pub paths: PathsSection,
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub image: ImageSection,
    #[serde(default)]
    pub video: VideoSection,
    #[serde(default)]
    pub thumbnail: ThumbnailSection,
    pub store: StoreSection,
}

impl PipelineConfig {
    pub fn source_dir(&self) -> PathBuf {
        expand_home(&self.paths.source_dir)
    }

    pub fn output_dir(&self) -> PathBuf {
        expand_home(&self.paths.output_dir)
    }

    pub fn temp_dir(&self) -> PathBuf {
        match &self.paths.temp_dir {
            Some(dir) => expand_home(dir),
            None => std::env::temp_dir().join("gallery-pipeline"),
        }
    }

    pub fn workers(&self) -> usize {
        self.pipeline.workers.max(1)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsSection {
    pub source_dir: String,
    pub output_dir: String,
    #[serde(default)]
    pub temp_dir: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSection {
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            workers: default_workers(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageSection {
    #[serde(default = "default_max_width")]
    pub max_width: u32,
    #[serde(default = "default_quality")]
    pub quality: f32,
}

impl Default for ImageSection {
    fn default() -> Self {
        Self {
            max_width: default_max_width(),
            quality: default_quality(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct VideoSection {
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: PathBuf,
    #[serde(default = "default_ffprobe")]
    pub ffprobe: PathBuf,
    #[serde(default = "default_max_width")]
    pub max_width: u32,
    #[serde(default = "default_video_codec")]
    pub codec: String,
    #[serde(default = "default_crf")]
    pub crf: u8,
    #[serde(default = "default_cpu_used")]
    pub cpu_used: u8,
    #[serde(default = "default_audio_codec")]
    pub audio_codec: String,
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: String,
    #[serde(default)]
    pub threads: Option<usize>,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

impl Default for VideoSection {
    fn default() -> Self {
        Self {
            ffmpeg: default_ffmpeg(),
            ffprobe: default_ffprobe(),
            max_width: default_max_width(),
            codec: default_video_codec(),
            crf: default_crf(),
            cpu_used: default_cpu_used(),
            audio_codec: default_audio_codec(),
            audio_bitrate: default_audio_bitrate(),
            threads: None,
            timeout_seconds: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ThumbnailSection {
    #[serde(default = "default_thumbnail_width")]
    pub width: u32,
    #[serde(default = "default_quality")]
    pub quality: f32,
}

impl Default for ThumbnailSection {
    fn default() -> Self {
        Self {
            width: default_thumbnail_width(),
            quality: default_quality(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreSection {
    pub endpoint: String,
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default = "default_access_key_env")]
    pub access_key_env: String,
    #[serde(default = "default_secret_key_env")]
    pub secret_key_env: String,
    #[serde(default = "default_manifest_key")]
    pub manifest_key: String,
}

fn default_workers() -> usize {
    1
}

fn default_max_width() -> u32 {
    900
}

fn default_quality() -> f32 {
    80.0
}

fn default_ffmpeg() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_ffprobe() -> PathBuf {
    PathBuf::from("ffprobe")
}

fn default_video_codec() -> String {
    "libsvtav1".to_string()
}

fn default_crf() -> u8 {
    45
}

fn default_cpu_used() -> u8 {
    8
}

fn default_audio_codec() -> String {
    "libopus".to_string()
}

fn default_audio_bitrate() -> String {
    "64k".to_string()
}

fn default_thumbnail_width() -> u32 {
    400
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_access_key_env() -> String {
    "R2_ACCESS_KEY_ID".to_string()
}

fn default_secret_key_env() -> String {
    "R2_SECRET_ACCESS_KEY".to_string()
}

fn default_manifest_key() -> String {
    "data.json".to_string()
}

/// Expands a leading `~/` against `$HOME`; other paths are returned as-is.
pub fn expand_home(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return Path::new(&home).join(rest);
        }
    }
    PathBuf::from(raw)
}

pub fn load_pipeline_config<P: AsRef<Path>>(path: P) -> Result<PipelineConfig> {
    load_toml(path)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}
