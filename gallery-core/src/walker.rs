use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use tracing::warn;
use walkdir::WalkDir;

use crate::classify::MediaKind;

#[derive(Debug, Error)]
pub enum WalkError {
    #[error("failed to list {path}: {source}")]
    Root {
        source: std::io::Error,
        path: PathBuf,
    },
}

/// A regular file discovered beneath a walk root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEntry {
    pub path: PathBuf,
    /// Relative to the walk root, always `/`-separated.
    pub relative_path: String,
    pub kind: MediaKind,
}

/// Lazy depth-first, pre-order traversal yielding regular files only.
///
/// Entries inside a directory are visited in file-name order so that two
/// walks over the same tree produce the same sequence. Unreadable entries
/// below the root are logged and skipped.
pub struct TreeWalk {
    root: PathBuf,
    inner: walkdir::IntoIter,
}

pub fn walk(root: &Path) -> Result<TreeWalk, WalkError> {
    std::fs::read_dir(root).map_err(|source| WalkError::Root {
        source,
        path: root.to_path_buf(),
    })?;
    let inner = WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter();
    Ok(TreeWalk {
        root: root.to_path_buf(),
        inner,
    })
}

impl TreeWalk {
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Iterator for TreeWalk {
    type Item = SourceEntry;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.inner.next()? {
                Ok(entry) => entry,
                Err(err) => {
                    let path = err
                        .path()
                        .map(|p| p.display().to_string())
                        .unwrap_or_default();
                    warn!(path = %path, error = %err, "skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(relative_path) = relative_key(&self.root, entry.path()) else {
                continue;
            };
            let path = entry.into_path();
            let kind = MediaKind::from_path(&path);
            return Some(SourceEntry {
                path,
                relative_path,
                kind,
            });
        }
    }
}

/// Joins the components of `path` below `root` with `/`, whatever the host
/// separator is.
pub fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().to_string()),
            _ => None,
        })
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}
