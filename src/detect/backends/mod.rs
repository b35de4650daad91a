pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

use anyhow::{anyhow, Result};

use crate::detect::backend::InferenceAdapter;
use crate::detect::catalog::ModelEntry;
use crate::detect::registry::ModelLoader;

pub use stub::StubBackend;

#[cfg(feature = "backend-tract")]
pub use tract::TractBackend;

/// Picks a backend by model file extension.
#[derive(Clone, Copy, Debug, Default)]
pub struct ExtensionLoader;

impl ModelLoader for ExtensionLoader {
    fn load(&self, entry: &ModelEntry) -> Result<Box<dyn InferenceAdapter>> {
        match entry.extension().as_deref() {
            Some("json") => Ok(Box::new(StubBackend::from_script_file(&entry.path)?)),
            Some("onnx") => {
                #[cfg(feature = "backend-tract")]
                {
                    Ok(Box::new(TractBackend::new(&entry.path)?))
                }
                #[cfg(not(feature = "backend-tract"))]
                {
                    Err(anyhow!(
                        "model {} requires the backend-tract feature",
                        entry.id
                    ))
                }
            }
            other => Err(anyhow!(
                "no backend for model {} (extension {:?})",
                entry.id,
                other.unwrap_or("")
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn loads_stub_for_json_models() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let path = temp_dir.path().join("demo.json");
        fs::write(&path, r#"{"class_names": {"0": "person"}}"#)?;
        let adapter = ExtensionLoader.load(&ModelEntry {
            id: "demo.json".into(),
            path,
        })?;
        assert_eq!(adapter.name(), "stub");
        assert_eq!(adapter.class_names().len(), 1);
        Ok(())
    }

    #[test]
    fn rejects_unknown_extension() {
        let result = ExtensionLoader.load(&ModelEntry {
            id: "best.pt".into(),
            path: "models/best.pt".into(),
        });
        assert!(result.is_err());
    }
}
