//! Locating the annotated video an inference run wrote to disk.
//!
//! The adapter names its output after the input file stem but does not tell
//! the caller the exact path, so the output directory is scanned for a match.
//! The resolver only reads directory entries and metadata; retrying it is
//! always safe.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{SessionError, SessionResult};

/// Container formats the adapter may produce for annotated video.
pub const SUPPORTED_VIDEO_CONTAINERS: &[&str] = &["mp4", "avi", "mov"];

/// A located output file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resolution {
    pub path: PathBuf,
    pub size_bytes: u64,
    /// Every matching entry, in listing order. More than one means the
    /// choice of `path` was a guess.
    pub candidates: Vec<PathBuf>,
}

impl Resolution {
    pub fn is_ambiguous(&self) -> bool {
        self.candidates.len() > 1
    }
}

#[derive(Clone, Debug)]
pub struct ArtifactResolver {
    containers: Vec<String>,
}

impl Default for ArtifactResolver {
    fn default() -> Self {
        Self::new(SUPPORTED_VIDEO_CONTAINERS.iter().map(|ext| ext.to_string()))
    }
}

impl ArtifactResolver {
    pub fn new(containers: impl IntoIterator<Item = String>) -> Self {
        Self {
            containers: containers.into_iter().collect(),
        }
    }

    /// Find the file in `dir` whose name starts with `stem` and whose
    /// extension is a supported container.
    ///
    /// Listing order is file-name byte order, so with several matches the
    /// pick is stable across filesystems. It is still not known to be the
    /// right file; callers get `is_ambiguous()` and a warning is logged.
    pub fn resolve(&self, dir: &Path, stem: &str) -> SessionResult<Resolution> {
        let candidates = self.scan(dir, stem)?;
        let Some((_, path, size_bytes)) = candidates.first().cloned() else {
            return Err(SessionError::ArtifactNotFound {
                dir: dir.to_path_buf(),
                stem: stem.to_string(),
            });
        };
        let resolution = Resolution {
            path,
            size_bytes,
            candidates: candidates.into_iter().map(|(_, path, _)| path).collect(),
        };
        if resolution.is_ambiguous() {
            log::warn!(
                "{} output files match '{}' in {}; using {}",
                resolution.candidates.len(),
                stem,
                dir.display(),
                resolution.path.display()
            );
        }
        Ok(resolution)
    }

    /// Every file `resolve` would consider for `stem`, in listing order.
    /// Empty when the directory is missing.
    pub fn matching(&self, dir: &Path, stem: &str) -> SessionResult<Vec<PathBuf>> {
        Ok(self
            .scan(dir, stem)?
            .into_iter()
            .map(|(_, path, _)| path)
            .collect())
    }

    fn scan(&self, dir: &Path, stem: &str) -> SessionResult<Vec<(String, PathBuf, u64)>> {
        if stem.is_empty() {
            return Ok(Vec::new());
        }
        let read_dir = match fs::read_dir(dir) {
            Ok(read_dir) => read_dir,
            Err(e) => {
                log::debug!("output directory {} unreadable: {}", dir.display(), e);
                return Ok(Vec::new());
            }
        };

        let mut candidates = Vec::new();
        for entry in read_dir {
            let entry = entry?;
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if !name.starts_with(stem) || !self.is_supported(&name) {
                continue;
            }
            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }
            candidates.push((name, entry.path(), metadata.len()));
        }
        candidates.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(candidates)
    }

    fn is_supported(&self, name: &str) -> bool {
        Path::new(name)
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| self.containers.iter().any(|c| c.eq_ignore_ascii_case(ext)))
    }
}
