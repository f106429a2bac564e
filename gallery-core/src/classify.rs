use std::path::Path;

use serde::Serialize;

pub const IMAGE_OUTPUT_EXTENSION: &str = "webp";
pub const VIDEO_OUTPUT_EXTENSION: &str = "webm";
pub const THUMBNAIL_EXTENSION: &str = "webp";

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "gif", "tiff", "bmp", "avif"];
const VIDEO_EXTENSIONS: &[&str] = &["mov", "mp4"];

/// Characters stripped from output names so keys stay URL and encoder friendly.
const UNSAFE_NAME_CHARS: &[char] = &['+', '?', '<', '>', ':', '"', '|', '*'];

/// Stands in for a name (or stem) made only of unsafe characters.
pub const PLACEHOLDER_NAME: &str = "_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
    Opaque,
}

impl MediaKind {
    pub fn from_extension(extension: &str) -> Self {
        let lowered = extension.trim_start_matches('.').to_ascii_lowercase();
        if IMAGE_EXTENSIONS.contains(&lowered.as_str()) {
            MediaKind::Image
        } else if VIDEO_EXTENSIONS.contains(&lowered.as_str()) {
            MediaKind::Video
        } else {
            MediaKind::Opaque
        }
    }

    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .map(|ext| Self::from_extension(&ext.to_string_lossy()))
            .unwrap_or(MediaKind::Opaque)
    }

    /// Canonical output extension; `None` means the source extension is kept.
    pub fn output_extension(self) -> Option<&'static str> {
        match self {
            MediaKind::Image => Some(IMAGE_OUTPUT_EXTENSION),
            MediaKind::Video => Some(VIDEO_OUTPUT_EXTENSION),
            MediaKind::Opaque => None,
        }
    }
}

/// Maps a forward-slash relative source path to its output relative path:
/// unsafe characters removed and the extension swapped for the kind's
/// canonical one.
pub fn output_relative_path(relative: &str, kind: MediaKind) -> String {
    let sanitized = sanitize_relative_path(relative);
    match kind.output_extension() {
        Some(extension) => replace_extension(&sanitized, extension),
        None => sanitized,
    }
}

pub fn sanitize_relative_path(relative: &str) -> String {
    relative
        .split('/')
        .map(sanitize_segment)
        .collect::<Vec<_>>()
        .join("/")
}

/// A segment never sanitises to nothing, and never turns into a dotfile.
fn sanitize_segment(segment: &str) -> String {
    let cleaned: String = segment
        .chars()
        .filter(|c| !UNSAFE_NAME_CHARS.contains(c))
        .collect();
    if cleaned.is_empty() || (cleaned.starts_with('.') && !segment.starts_with('.')) {
        format!("{PLACEHOLDER_NAME}{cleaned}")
    } else {
        cleaned
    }
}

/// Swaps the extension of the last path component, appending one when absent.
pub fn replace_extension(relative: &str, extension: &str) -> String {
    let (dir, file) = match relative.rfind('/') {
        Some(index) => relative.split_at(index + 1),
        None => ("", relative),
    };
    let stem = match file.rfind('.') {
        Some(0) | None => file,
        Some(index) => &file[..index],
    };
    format!("{dir}{stem}.{extension}")
}
