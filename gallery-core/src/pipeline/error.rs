use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::walker::WalkError;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("cannot enumerate source tree: {0}")]
    Enumeration(#[from] WalkError),
    #[error("cannot read media metadata for {path}: {reason}")]
    Probe { path: PathBuf, reason: String },
    #[error("encoder failed ({command}): {stderr}")]
    Encode {
        command: String,
        status: Option<i32>,
        stderr: String,
    },
    #[error("encoder timed out after {0:?}")]
    EncodeTimeout(Duration),
    #[error("thumbnail extraction failed for {path}: {reason}")]
    Thumbnail { path: PathBuf, reason: String },
    #[error("output {0} already exists")]
    OutputExists(PathBuf),
    #[error("image encoding failed for {path}: {reason}")]
    Image { path: PathBuf, reason: String },
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
}

impl PipelineError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::Io {
            source,
            path: path.into(),
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
