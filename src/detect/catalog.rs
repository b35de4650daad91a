use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{SessionError, SessionResult};

/// A model file found in the model directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelEntry {
    /// File name, used as the model identifier.
    pub id: String,
    pub path: PathBuf,
}

impl ModelEntry {
    pub fn extension(&self) -> Option<String> {
        self.path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
    }
}

/// Models available for selection, sorted by identifier.
#[derive(Clone, Debug)]
pub struct ModelCatalog {
    dir: PathBuf,
    models: Vec<ModelEntry>,
}

impl ModelCatalog {
    /// Scan `dir` for files with one of `extensions`.
    ///
    /// A missing or empty directory is a configuration error: nothing can run.
    pub fn scan(dir: &Path, extensions: &[String]) -> SessionResult<Self> {
        let read_dir = fs::read_dir(dir).map_err(|e| {
            SessionError::configuration(format!(
                "model directory {} is not readable: {}",
                dir.display(),
                e
            ))
        })?;

        let mut models = Vec::new();
        for entry in read_dir {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(id) = path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            let matches = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| extensions.iter().any(|want| want.eq_ignore_ascii_case(ext)));
            if matches {
                models.push(ModelEntry {
                    id: id.to_string(),
                    path: path.clone(),
                });
            }
        }

        if models.is_empty() {
            return Err(SessionError::configuration(format!(
                "no models found in {} (extensions: {})",
                dir.display(),
                extensions.join(", ")
            )));
        }
        models.sort_by(|a, b| a.id.cmp(&b.id));
        log::info!("found {} model(s) in {}", models.len(), dir.display());
        Ok(Self {
            dir: dir.to_path_buf(),
            models,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn models(&self) -> &[ModelEntry] {
        &self.models
    }

    pub fn get(&self, id: &str) -> Option<&ModelEntry> {
        self.models.iter().find(|model| model.id == id)
    }

    /// Resolve an optional selection; no selection means the first model.
    pub fn select(&self, id: Option<&str>) -> SessionResult<&ModelEntry> {
        match id {
            Some(id) => self.get(id).ok_or_else(|| {
                SessionError::configuration(format!(
                    "model '{}' not found in {}",
                    id,
                    self.dir.display()
                ))
            }),
            None => Ok(&self.models[0]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exts() -> Vec<String> {
        vec!["onnx".to_string(), "json".to_string()]
    }

    #[test]
    fn empty_directory_is_configuration_error() -> SessionResult<()> {
        let temp_dir = tempfile::tempdir()?;
        fs::write(temp_dir.path().join("readme.txt"), b"not a model")?;
        let err = ModelCatalog::scan(temp_dir.path(), &exts()).unwrap_err();
        assert!(err.is_fatal());
        Ok(())
    }

    #[test]
    fn missing_directory_is_configuration_error() {
        let err = ModelCatalog::scan(Path::new("/nonexistent/models"), &exts()).unwrap_err();
        assert!(matches!(err, SessionError::Configuration(_)));
    }

    #[test]
    fn scans_by_extension_sorted() -> SessionResult<()> {
        let temp_dir = tempfile::tempdir()?;
        fs::write(temp_dir.path().join("yolo11n.ONNX"), b"")?;
        fs::write(temp_dir.path().join("best.json"), b"{}")?;
        fs::write(temp_dir.path().join("weights.pt"), b"")?;
        fs::create_dir(temp_dir.path().join("nested.onnx"))?;

        let catalog = ModelCatalog::scan(temp_dir.path(), &exts())?;
        let ids: Vec<&str> = catalog.models().iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["best.json", "yolo11n.ONNX"]);
        assert_eq!(catalog.select(None)?.id, "best.json");
        assert_eq!(catalog.get("yolo11n.ONNX").unwrap().extension().unwrap(), "onnx");
        assert!(catalog.select(Some("weights.pt")).is_err());
        Ok(())
    }
}
