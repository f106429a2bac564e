use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

/// How one source file ended up in the output tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "error")]
pub enum Outcome {
    Converted,
    SkippedExisting,
    CopiedVerbatim,
    Failed(String),
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Converted => "converted",
            Outcome::SkippedExisting => "skipped-existing",
            Outcome::CopiedVerbatim => "copied-verbatim",
            Outcome::Failed(_) => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversionResult {
    /// Output-side relative path, extension already canonicalised.
    pub relative_path: String,
    pub original_bytes: Option<u64>,
    pub converted_bytes: Option<u64>,
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl ConversionResult {
    pub fn converted(relative_path: impl Into<String>, original: u64, converted: u64) -> Self {
        Self {
            relative_path: relative_path.into(),
            original_bytes: Some(original),
            converted_bytes: Some(converted),
            outcome: Outcome::Converted,
        }
    }

    pub fn skipped(relative_path: impl Into<String>) -> Self {
        Self {
            relative_path: relative_path.into(),
            original_bytes: None,
            converted_bytes: None,
            outcome: Outcome::SkippedExisting,
        }
    }

    pub fn copied(relative_path: impl Into<String>, bytes: u64) -> Self {
        Self {
            relative_path: relative_path.into(),
            original_bytes: Some(bytes),
            converted_bytes: Some(bytes),
            outcome: Outcome::CopiedVerbatim,
        }
    }

    pub fn failed(relative_path: impl Into<String>, error: impl ToString) -> Self {
        Self {
            relative_path: relative_path.into(),
            original_bytes: None,
            converted_bytes: None,
            outcome: Outcome::Failed(error.to_string()),
        }
    }

    /// Bytes saved for converted files; other outcomes have no size delta.
    pub fn saved_bytes(&self) -> Option<i64> {
        match (&self.outcome, self.original_bytes, self.converted_bytes) {
            (Outcome::Converted, Some(original), Some(converted)) => {
                Some(original as i64 - converted as i64)
            }
            _ => None,
        }
    }
}

/// Arguments for one external video encode.
#[derive(Debug, Clone)]
pub struct VideoJob {
    pub input: PathBuf,
    pub output: PathBuf,
    /// Probed duration of the input, used to turn timemarks into a percentage.
    pub duration: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EncodeProgress {
    pub percent: Option<f64>,
    pub frames: u64,
    pub timemark: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EncoderEvent {
    Started { command: String },
    Progress(EncodeProgress),
    Finished { elapsed: Duration },
    /// Terminal event for an encode that errored, timed out or never started.
    Failed { error: String },
}
