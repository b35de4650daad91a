//! Uploaded media handling.
//!
//! The declared mime category is inspected exactly once, at ingestion, and
//! turned into a `MediaKind` that the rest of the pipeline carries as data.

pub mod store;

use std::path::Path;

use serde::Serialize;

use crate::error::{SessionError, SessionResult};

pub use store::{MediaStore, ScopedPath};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    /// Classify a declared mime type by its top-level category.
    pub fn from_mime(mime: &str) -> SessionResult<Self> {
        let category = mime
            .split_once('/')
            .map(|(category, _)| category.trim().to_ascii_lowercase());
        match category.as_deref() {
            Some("image") => Ok(Self::Image),
            Some("video") => Ok(Self::Video),
            _ => Err(SessionError::UnsupportedMedia(mime.to_string())),
        }
    }

    /// Extension given to the stored upload.
    pub fn upload_suffix(self) -> &'static str {
        match self {
            Self::Image => ".jpg",
            Self::Video => ".mp4",
        }
    }

    pub fn artifact_filename(self) -> &'static str {
        match self {
            Self::Image => "annotated_image.jpg",
            Self::Video => "annotated_video.mp4",
        }
    }

    pub fn artifact_mime(self) -> &'static str {
        match self {
            Self::Image => "image/jpeg",
            Self::Video => "video/mp4",
        }
    }
}

/// Best-effort mime guess for a local file, used when the caller does not
/// declare one.
pub fn guess_mime(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "mp4" => Some("video/mp4"),
        "avi" => Some("video/x-msvideo"),
        "mov" => Some("video/quicktime"),
        _ => None,
    }
}
