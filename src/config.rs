use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::session::OutputLayout;

const DEFAULT_MODELS_DIR: &str = "models";
const DEFAULT_MODEL_EXTENSIONS: &[&str] = &["onnx", "json"];
const DEFAULT_CACHE_CAPACITY: usize = 2;
const DEFAULT_OUTPUT_ROOT: &str = "runs/detect";
const SHARED_OUTPUT_SUBDIR: &str = "predict";
const DEFAULT_TEMP_SUBDIR: &str = "detect-session";
const DEFAULT_CONFIDENCE: f32 = 0.5;

#[derive(Debug, Deserialize, Default)]
struct DetectConfigFile {
    confidence: Option<f32>,
    temp_dir: Option<PathBuf>,
    models: Option<ModelsConfigFile>,
    output: Option<OutputConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelsConfigFile {
    dir: Option<PathBuf>,
    extensions: Option<Vec<String>>,
    cache_capacity: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct OutputConfigFile {
    root: Option<PathBuf>,
    layout: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputLayoutKind {
    PerSession,
    Shared,
}

impl FromStr for OutputLayoutKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "per-session" | "per_session" | "session" => Ok(Self::PerSession),
            "shared" => Ok(Self::Shared),
            other => Err(anyhow!(
                "unknown output layout '{}' (expected per-session or shared)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DetectConfig {
    pub models_dir: PathBuf,
    pub model_extensions: Vec<String>,
    pub cache_capacity: usize,
    pub output_root: PathBuf,
    pub output_layout: OutputLayoutKind,
    pub temp_dir: PathBuf,
    pub default_confidence: f32,
}

impl DetectConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("DETECT_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: DetectConfigFile) -> Result<Self> {
        let models_dir = file
            .models
            .as_ref()
            .and_then(|models| models.dir.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_MODELS_DIR));
        let model_extensions = file
            .models
            .as_ref()
            .and_then(|models| models.extensions.clone())
            .unwrap_or_else(default_extensions);
        let cache_capacity = file
            .models
            .and_then(|models| models.cache_capacity)
            .unwrap_or(DEFAULT_CACHE_CAPACITY);
        let output_root = file
            .output
            .as_ref()
            .and_then(|output| output.root.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_ROOT));
        let output_layout = match file.output.and_then(|output| output.layout) {
            Some(layout) => layout.parse()?,
            None => OutputLayoutKind::PerSession,
        };
        let temp_dir = file
            .temp_dir
            .unwrap_or_else(|| std::env::temp_dir().join(DEFAULT_TEMP_SUBDIR));
        Ok(Self {
            models_dir,
            model_extensions,
            cache_capacity,
            output_root,
            output_layout,
            temp_dir,
            default_confidence: file.confidence.unwrap_or(DEFAULT_CONFIDENCE),
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(dir) = std::env::var("DETECT_MODELS_DIR") {
            if !dir.trim().is_empty() {
                self.models_dir = PathBuf::from(dir);
            }
        }
        if let Ok(exts) = std::env::var("DETECT_MODEL_EXTENSIONS") {
            let parsed = split_csv(&exts);
            if !parsed.is_empty() {
                self.model_extensions = parsed;
            }
        }
        if let Ok(capacity) = std::env::var("DETECT_CACHE_CAPACITY") {
            self.cache_capacity = capacity
                .trim()
                .parse()
                .map_err(|_| anyhow!("DETECT_CACHE_CAPACITY must be a positive integer"))?;
        }
        if let Ok(root) = std::env::var("DETECT_OUTPUT_ROOT") {
            if !root.trim().is_empty() {
                self.output_root = PathBuf::from(root);
            }
        }
        if let Ok(layout) = std::env::var("DETECT_OUTPUT_LAYOUT") {
            if !layout.trim().is_empty() {
                self.output_layout = layout.parse()?;
            }
        }
        if let Ok(dir) = std::env::var("DETECT_TEMP_DIR") {
            if !dir.trim().is_empty() {
                self.temp_dir = PathBuf::from(dir);
            }
        }
        if let Ok(confidence) = std::env::var("DETECT_CONFIDENCE") {
            self.default_confidence = confidence
                .trim()
                .parse()
                .map_err(|_| anyhow!("DETECT_CONFIDENCE must be a number in (0, 1]"))?;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        self.model_extensions = self
            .model_extensions
            .iter()
            .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();
        if self.model_extensions.is_empty() {
            return Err(anyhow!("at least one model extension is required"));
        }
        if self.cache_capacity == 0 {
            return Err(anyhow!("model cache capacity must be greater than zero"));
        }
        if !(self.default_confidence > 0.0 && self.default_confidence <= 1.0) {
            return Err(anyhow!(
                "confidence must be in (0, 1], got {}",
                self.default_confidence
            ));
        }
        Ok(())
    }

    /// Output layout resolved against the output root.
    pub fn output_layout(&self) -> OutputLayout {
        match self.output_layout {
            OutputLayoutKind::PerSession => OutputLayout::PerSession {
                root: self.output_root.clone(),
            },
            OutputLayoutKind::Shared => OutputLayout::Shared {
                dir: self.output_root.join(SHARED_OUTPUT_SUBDIR),
            },
        }
    }
}

fn read_config_file(path: &Path) -> Result<DetectConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn default_extensions() -> Vec<String> {
    DEFAULT_MODEL_EXTENSIONS
        .iter()
        .map(|ext| ext.to_string())
        .collect()
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
