//! Scoped temporary files for uploads and generated artifacts.
//!
//! Every handle removes its file (or directory) when dropped, so early
//! returns and errors inside a session cannot leak temporary media.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tempfile::{TempDir, TempPath};

use crate::error::{SessionError, SessionResult};

const UPLOAD_PREFIX: &str = "upload_";
const NAME_RAND_BYTES: usize = 16;

/// Temporary media namespace rooted at a process-local directory.
#[derive(Debug)]
pub struct MediaStore {
    root: PathBuf,
}

impl MediaStore {
    pub fn new(root: impl Into<PathBuf>) -> SessionResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| {
            SessionError::storage(format!(
                "failed to create media store {}: {}",
                root.display(),
                e
            ))
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write `bytes` to a uniquely named file ending in `suffix`.
    pub fn acquire(&self, bytes: &[u8], suffix: &str) -> SessionResult<ScopedPath> {
        let mut file = tempfile::Builder::new()
            .prefix(UPLOAD_PREFIX)
            .suffix(suffix)
            .rand_bytes(NAME_RAND_BYTES)
            .tempfile_in(&self.root)
            .map_err(|e| storage_error("create upload file", &self.root, e))?;
        // On failure `file` is dropped here and removes itself.
        file.write_all(bytes)
            .and_then(|_| file.as_file().sync_all())
            .map_err(|e| storage_error("write upload file", file.path(), e))?;

        let digest: [u8; 32] = Sha256::digest(bytes).into();
        let temp_path = file.into_temp_path();
        log::debug!(
            "media store: acquired {} ({} bytes)",
            temp_path.display(),
            bytes.len()
        );
        Ok(ScopedPath {
            path: temp_path.to_path_buf(),
            guard: Some(Guard::File(temp_path)),
            digest: Some(digest),
        })
    }

    /// Create a uniquely named, initially empty directory inside the store.
    pub fn acquire_dir(&self, prefix: &str) -> SessionResult<ScopedPath> {
        ScopedPath::dir_in(&self.root, prefix)
    }
}

/// Owned handle to a temporary file or directory.
#[derive(Debug)]
pub struct ScopedPath {
    path: PathBuf,
    guard: Option<Guard>,
    digest: Option<[u8; 32]>,
}

#[derive(Debug)]
enum Guard {
    File(TempPath),
    Dir(TempDir),
}

impl ScopedPath {
    /// Create a uniquely named directory under `parent`, creating `parent`
    /// if needed.
    pub fn dir_in(parent: &Path, prefix: &str) -> SessionResult<Self> {
        fs::create_dir_all(parent).map_err(|e| storage_error("create", parent, e))?;
        let dir = tempfile::Builder::new()
            .prefix(prefix)
            .rand_bytes(NAME_RAND_BYTES)
            .tempdir_in(parent)
            .map_err(|e| storage_error("create scoped directory", parent, e))?;
        Ok(Self {
            path: dir.path().to_path_buf(),
            guard: Some(Guard::Dir(dir)),
            digest: None,
        })
    }

    /// Take ownership of an existing file written by someone else; it is
    /// removed when the handle is released or dropped.
    pub fn adopt_file(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            guard: Some(Guard::File(TempPath::from_path(&path))),
            path,
            digest: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name without its extension. Collision resistant by construction.
    pub fn stem(&self) -> &str {
        self.path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or_default()
    }

    /// SHA-256 of the bytes written at acquisition, for file handles.
    pub fn digest_hex(&self) -> Option<String> {
        self.digest.map(hex::encode)
    }

    pub fn is_released(&self) -> bool {
        self.guard.is_none()
    }

    /// Remove the file or directory now. Calling this again is a no-op.
    pub fn release(&mut self) -> SessionResult<()> {
        let result = match self.guard.take() {
            None => return Ok(()),
            Some(Guard::File(path)) => path.close(),
            Some(Guard::Dir(dir)) => dir.close(),
        };
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(storage_error("remove", &self.path, e)),
        }
    }
}

fn storage_error(action: &str, path: &Path, err: io::Error) -> SessionError {
    SessionError::storage(format!("failed to {} {}: {}", action, path.display(), err))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(dir: &Path) -> Vec<PathBuf> {
        let mut out: Vec<PathBuf> = fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect();
        out.sort();
        out
    }

    #[test]
    fn acquire_writes_bytes_with_suffix() -> SessionResult<()> {
        let temp_dir = tempfile::tempdir()?;
        let store = MediaStore::new(temp_dir.path().join("media"))?;
        let handle = store.acquire(b"frame bytes", ".mp4")?;

        assert_eq!(fs::read(handle.path())?, b"frame bytes");
        assert!(handle.path().extension().is_some_and(|ext| ext == "mp4"));
        assert!(handle.stem().starts_with(UPLOAD_PREFIX));
        assert_eq!(
            handle.digest_hex().unwrap(),
            hex::encode(Sha256::digest(b"frame bytes"))
        );
        Ok(())
    }

    #[test]
    fn names_do_not_collide() -> SessionResult<()> {
        let temp_dir = tempfile::tempdir()?;
        let store = MediaStore::new(temp_dir.path())?;
        let a = store.acquire(b"same", ".jpg")?;
        let b = store.acquire(b"same", ".jpg")?;
        assert_ne!(a.path(), b.path());
        assert_ne!(a.stem(), b.stem());
        Ok(())
    }

    #[test]
    fn drop_removes_file() -> SessionResult<()> {
        let temp_dir = tempfile::tempdir()?;
        let store = MediaStore::new(temp_dir.path())?;
        {
            let _handle = store.acquire(b"x", ".jpg")?;
            assert_eq!(entries(store.root()).len(), 1);
        }
        assert!(entries(store.root()).is_empty());
        Ok(())
    }

    #[test]
    fn release_is_idempotent() -> SessionResult<()> {
        let temp_dir = tempfile::tempdir()?;
        let store = MediaStore::new(temp_dir.path())?;
        let mut handle = store.acquire(b"x", ".jpg")?;
        let path = handle.path().to_path_buf();

        handle.release()?;
        assert!(!path.exists());
        assert!(handle.is_released());
        handle.release()?;
        Ok(())
    }

    #[test]
    fn release_tolerates_externally_removed_file() -> SessionResult<()> {
        let temp_dir = tempfile::tempdir()?;
        let store = MediaStore::new(temp_dir.path())?;
        let mut handle = store.acquire(b"x", ".jpg")?;
        fs::remove_file(handle.path())?;
        handle.release()?;
        Ok(())
    }

    #[test]
    fn adopted_file_is_removed_on_drop() -> SessionResult<()> {
        let temp_dir = tempfile::tempdir()?;
        let path = temp_dir.path().join("upload_abc.mp4");
        fs::write(&path, b"annotated")?;
        {
            let handle = ScopedPath::adopt_file(&path);
            assert_eq!(handle.stem(), "upload_abc");
            assert!(!handle.is_released());
        }
        assert!(!path.exists());

        fs::write(&path, b"annotated")?;
        let mut handle = ScopedPath::adopt_file(&path);
        handle.release()?;
        assert!(handle.is_released());
        assert!(!path.exists());
        Ok(())
    }

    #[test]
    fn scoped_dir_removes_contents() -> SessionResult<()> {
        let temp_dir = tempfile::tempdir()?;
        let store = MediaStore::new(temp_dir.path())?;
        let mut dir = store.acquire_dir("session-")?;
        fs::write(dir.path().join("out.mp4"), b"video")?;
        assert!(dir.digest_hex().is_none());

        dir.release()?;
        assert!(entries(store.root()).is_empty());
        Ok(())
    }
}
