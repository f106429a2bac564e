mod local;
mod s3;

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

pub use local::LocalStore;
pub use s3::{signing_key, S3Credentials, S3Store, SigV4Signer};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("http error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("store returned {status} for {key}: {body}")]
    Status {
        key: String,
        status: u16,
        body: String,
    },
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("missing credentials: environment variable {0} is not set")]
    Credentials(String),
    #[error("invalid store endpoint {endpoint}: {source}")]
    Endpoint {
        endpoint: String,
        source: url::ParseError,
    },
    #[error("invalid object key {0}")]
    InvalidKey(String),
    #[error("request signing failed")]
    Signing,
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// Remote object storage keyed by `/`-separated paths.
///
/// A missing key is never an error: `exists` answers `false` and `get`
/// answers `None`. `put` overwrites; callers that need idempotent uploads
/// check `exists` first.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn exists(&self, key: &str) -> StoreResult<bool>;
    async fn put(&self, key: &str, bytes: Vec<u8>, mime_type: &str) -> StoreResult<()>;
    async fn get(&self, key: &str) -> StoreResult<Option<StoredObject>>;
    async fn delete(&self, key: &str) -> StoreResult<()>;
}
