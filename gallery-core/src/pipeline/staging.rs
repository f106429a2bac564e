use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio::fs;
use tracing::warn;

use super::error::{PipelineError, PipelineResult};

/// Suffix of in-flight files written next to their final destination.
pub const PARTIAL_SUFFIX: &str = ".partial";

pub fn random_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(10)
        .map(|c| char::from(c).to_ascii_lowercase())
        .collect()
}

/// `{prefix}-{unix millis}-{token}{extension}`; unique across concurrent and
/// repeated runs.
pub fn temp_file_name(prefix: &str, extension: &str) -> String {
    format!(
        "{prefix}-{}-{}{extension}",
        Utc::now().timestamp_millis(),
        random_token()
    )
}

/// Hidden sibling of `dest` used to stage a write before renaming it in.
pub fn partial_sibling(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    dest.with_file_name(format!(".{name}.{}{PARTIAL_SUFFIX}", random_token()))
}

pub async fn ensure_parent(path: &Path) -> PipelineResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|source| PipelineError::io(parent, source))?;
    }
    Ok(())
}

/// Writes `bytes` so that `dest` either does not exist or is complete. An
/// existing `dest` is never replaced.
pub async fn write_atomic(dest: &Path, bytes: &[u8]) -> PipelineResult<()> {
    ensure_parent(dest).await?;
    let staged = partial_sibling(dest);
    if let Err(source) = fs::write(&staged, bytes).await {
        remove_quietly(&staged).await;
        return Err(PipelineError::io(&staged, source));
    }
    if let Err(err) = place_new(&staged, dest).await {
        remove_quietly(&staged).await;
        return Err(err);
    }
    Ok(())
}

/// Byte copy of `from` into `dest` through a staged sibling.
pub async fn copy_atomic(from: &Path, dest: &Path) -> PipelineResult<u64> {
    ensure_parent(dest).await?;
    let staged = partial_sibling(dest);
    let copied = match fs::copy(from, &staged).await {
        Ok(copied) => copied,
        Err(source) => {
            remove_quietly(&staged).await;
            return Err(PipelineError::io(from, source));
        }
    };
    if let Err(err) = place_new(&staged, dest).await {
        remove_quietly(&staged).await;
        return Err(err);
    }
    Ok(copied)
}

/// Gives the staged file its final name unless something already owns it.
/// A hard link fails atomically on an existing `dest`; filesystems without
/// link support fall back to check-then-rename.
async fn place_new(staged: &Path, dest: &Path) -> PipelineResult<()> {
    match fs::hard_link(staged, dest).await {
        Ok(()) => {
            remove_quietly(staged).await;
            Ok(())
        }
        Err(err) if err.kind() == ErrorKind::AlreadyExists => {
            Err(PipelineError::OutputExists(dest.to_path_buf()))
        }
        Err(_) => {
            if fs::metadata(dest).await.is_ok() {
                return Err(PipelineError::OutputExists(dest.to_path_buf()));
            }
            fs::rename(staged, dest)
                .await
                .map_err(|source| PipelineError::io(dest, source))
        }
    }
}

/// Moves a finished file into place without replacing an existing `to`.
/// When both paths share a filesystem the file is linked in; otherwise it is
/// copied beside `to` first so the final step still happens there.
pub async fn move_into_place(from: &Path, to: &Path) -> PipelineResult<()> {
    ensure_parent(to).await?;
    if let Err(source) = fs::metadata(from).await {
        return Err(PipelineError::io(from, source));
    }
    match fs::hard_link(from, to).await {
        Ok(()) => {
            remove_quietly(from).await;
            Ok(())
        }
        Err(err) if err.kind() == ErrorKind::AlreadyExists => {
            Err(PipelineError::OutputExists(to.to_path_buf()))
        }
        Err(_) => {
            copy_atomic(from, to).await?;
            remove_quietly(from).await;
            Ok(())
        }
    }
}

pub async fn remove_quietly(path: &Path) {
    if let Err(err) = fs::remove_file(path).await {
        if err.kind() != ErrorKind::NotFound {
            warn!(path = %path.display(), error = %err, "failed to remove temporary file");
        }
    }
}
