use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tracing::{error, info, warn};

use crate::pipeline::PARTIAL_SUFFIX;
use crate::store::{ObjectStore, StoreError};
use crate::walker::{walk, WalkError};

pub const MANIFEST_MIME: &str = "application/json";

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("cannot enumerate output tree: {0}")]
    Enumeration(#[from] WalkError),
    #[error("cannot stat {path}: {source}")]
    Stat {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("cannot write manifest {path}: {source}")]
    ManifestWrite {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("manifest serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("remote manifest {0} not found")]
    ManifestMissing(String),
}

/// One published file as listed in the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaArtifact {
    pub name: String,
    /// Store key; `/`-separated on every platform.
    pub relative_path: String,
    pub size: u64,
    pub mtime: DateTime<Utc>,
    pub mime_type: String,
}

impl MediaArtifact {
    pub async fn from_file(path: &Path, relative_path: String) -> Result<Self, PublishError> {
        let stat_error = |source| PublishError::Stat {
            source,
            path: path.to_path_buf(),
        };
        let meta = fs::metadata(path).await.map_err(stat_error)?;
        let modified = meta.modified().map_err(stat_error)?;
        let name = relative_path
            .rsplit('/')
            .next()
            .unwrap_or(relative_path.as_str())
            .to_string();
        Ok(Self {
            name,
            mime_type: mime_type_for(path),
            relative_path,
            size: meta.len(),
            mtime: DateTime::<Utc>::from(modified),
        })
    }
}

pub fn mime_type_for(path: &Path) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

pub fn encode_manifest(artifacts: &[MediaArtifact]) -> Result<Vec<u8>, PublishError> {
    Ok(serde_json::to_vec_pretty(artifacts)?)
}

pub fn decode_manifest(bytes: &[u8]) -> Result<Vec<MediaArtifact>, PublishError> {
    Ok(serde_json::from_slice(bytes)?)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyFailure {
    pub key: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PublishReport {
    pub artifacts: usize,
    pub uploaded: Vec<String>,
    pub already_present: Vec<String>,
    pub failed: Vec<KeyFailure>,
    pub manifest_path: PathBuf,
    pub manifest_uploaded: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PruneReport {
    pub extension: String,
    pub deleted: Vec<String>,
    pub failed: Vec<KeyFailure>,
}

enum Upload {
    Sent,
    AlreadyPresent,
}

/// Syncs a finished output tree to an object store and maintains the
/// manifest the browsing UI reads.
#[derive(Clone)]
pub struct Publisher {
    store: Arc<dyn ObjectStore>,
    manifest_key: String,
}

impl Publisher {
    pub fn new(store: Arc<dyn ObjectStore>, manifest_key: impl Into<String>) -> Self {
        Self {
            store,
            manifest_key: manifest_key.into(),
        }
    }

    pub fn manifest_key(&self) -> &str {
        &self.manifest_key
    }

    /// Stats every file below `root`, in walk order. The local manifest and
    /// in-flight staging files are not artifacts.
    pub async fn collect(&self, root: &Path) -> Result<Vec<MediaArtifact>, PublishError> {
        let mut artifacts = Vec::new();
        for entry in walk(root)? {
            if entry.relative_path == self.manifest_key
                || entry.relative_path.ends_with(PARTIAL_SUFFIX)
            {
                continue;
            }
            artifacts.push(MediaArtifact::from_file(&entry.path, entry.relative_path).await?);
        }
        Ok(artifacts)
    }

    /// Uploads every artifact missing from the store, then writes the
    /// manifest next to the artifacts and uploads it the same way.
    ///
    /// A failed upload is recorded and the run continues; enumeration and
    /// manifest write failures abort.
    pub async fn publish(&self, root: &Path) -> Result<PublishReport, PublishError> {
        let artifacts = self.collect(root).await?;
        info!(root = %root.display(), artifacts = artifacts.len(), "publishing output tree");

        let mut report = PublishReport {
            artifacts: artifacts.len(),
            ..PublishReport::default()
        };
        for artifact in &artifacts {
            let path = local_path(root, &artifact.relative_path);
            match self
                .upload_if_absent(&artifact.relative_path, &path, &artifact.mime_type)
                .await
            {
                Ok(Upload::Sent) => {
                    info!(key = %artifact.relative_path, "uploaded");
                    report.uploaded.push(artifact.relative_path.clone());
                }
                Ok(Upload::AlreadyPresent) => {
                    report.already_present.push(artifact.relative_path.clone())
                }
                Err(err) => {
                    error!(key = %artifact.relative_path, error = %err, "upload failed");
                    report.failed.push(KeyFailure {
                        key: artifact.relative_path.clone(),
                        error: err.to_string(),
                    });
                }
            }
        }

        let manifest_path = local_path(root, &self.manifest_key);
        let manifest = encode_manifest(&artifacts)?;
        fs::write(&manifest_path, &manifest)
            .await
            .map_err(|source| PublishError::ManifestWrite {
                source,
                path: manifest_path.clone(),
            })?;
        info!(path = %manifest_path.display(), entries = artifacts.len(), "wrote manifest");
        report.manifest_path = manifest_path.clone();

        match self
            .upload_if_absent(&self.manifest_key, &manifest_path, MANIFEST_MIME)
            .await
        {
            Ok(Upload::Sent) => report.manifest_uploaded = true,
            Ok(Upload::AlreadyPresent) => {
                warn!(key = %self.manifest_key, "remote manifest already present, left unchanged")
            }
            Err(err) => {
                error!(key = %self.manifest_key, error = %err, "manifest upload failed");
                report.failed.push(KeyFailure {
                    key: self.manifest_key.clone(),
                    error: err.to_string(),
                });
            }
        }
        Ok(report)
    }

    /// Deletes every artifact listed in the remote manifest whose name ends
    /// with `.extension`.
    pub async fn prune(&self, extension: &str) -> Result<PruneReport, PublishError> {
        let extension = extension.trim_start_matches('.');
        let suffix = format!(".{extension}");
        let object = self
            .store
            .get(&self.manifest_key)
            .await?
            .ok_or_else(|| PublishError::ManifestMissing(self.manifest_key.clone()))?;
        let artifacts = decode_manifest(&object.bytes)?;

        let mut report = PruneReport {
            extension: extension.to_string(),
            ..PruneReport::default()
        };
        for artifact in artifacts.iter().filter(|a| a.name.ends_with(&suffix)) {
            match self.store.delete(&artifact.relative_path).await {
                Ok(()) => {
                    info!(key = %artifact.relative_path, "deleted");
                    report.deleted.push(artifact.relative_path.clone());
                }
                Err(err) => {
                    error!(key = %artifact.relative_path, error = %err, "delete failed");
                    report.failed.push(KeyFailure {
                        key: artifact.relative_path.clone(),
                        error: err.to_string(),
                    });
                }
            }
        }
        Ok(report)
    }

    async fn upload_if_absent(
        &self,
        key: &str,
        path: &Path,
        mime_type: &str,
    ) -> Result<Upload, PublishError> {
        if self.store.exists(key).await? {
            return Ok(Upload::AlreadyPresent);
        }
        let bytes = fs::read(path).await.map_err(|source| PublishError::Stat {
            source,
            path: path.to_path_buf(),
        })?;
        self.store.put(key, bytes, mime_type).await?;
        Ok(Upload::Sent)
    }
}

fn local_path(root: &Path, key: &str) -> PathBuf {
    key.split('/').fold(root.to_path_buf(), |path, part| path.join(part))
}
