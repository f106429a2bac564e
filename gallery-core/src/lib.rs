pub mod classify;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod publish;
pub mod report;
pub mod store;
pub mod walker;

pub use classify::{output_relative_path, MediaKind};
pub use config::{load_pipeline_config, PipelineConfig};
pub use error::{ConfigError, Result};
pub use pipeline::{
    ConversionResult, EncoderEvent, EncoderSettings, FfmpegEncoder, MediaEncoder, Outcome,
    Pipeline, PipelineError, PipelineSettings,
};
pub use publish::{MediaArtifact, PublishError, PublishReport, Publisher, PruneReport};
pub use report::{format_duration, format_size, ProgressObserver, RunReport, TracingObserver};
pub use store::{LocalStore, ObjectStore, S3Store, StoreError};
pub use walker::{walk, SourceEntry, WalkError};
