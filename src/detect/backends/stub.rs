use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

use crate::detect::backend::{InferenceAdapter, InferenceRequest};
use crate::detect::render::draw_detections;
use crate::detect::result::{FrameResult, InferenceOutput};
use crate::media::MediaKind;

/// Scripted detections loaded from a `.json` model file.
///
/// ```json
/// {
///   "class_names": {"0": "person", "1": "helmet"},
///   "frames": [[{"class_id": 0, "confidence": 0.91,
///                "bbox": {"x": 0.1, "y": 0.1, "w": 0.3, "h": 0.6}}]]
/// }
/// ```
#[derive(Debug, Default, Deserialize)]
struct StubScript {
    #[serde(default)]
    class_names: BTreeMap<u32, String>,
    #[serde(default)]
    frames: Vec<FrameResult>,
}

/// Stub backend for tests and demos.
///
/// Replays scripted frames, filtered at the requested threshold. Images get
/// the first scripted frame drawn onto the decoded upload; videos get one
/// result per scripted frame and an annotated copy written to `save_dir`.
#[derive(Debug, Default)]
pub struct StubBackend {
    class_names: BTreeMap<u32, String>,
    frames: Vec<FrameResult>,
}

impl StubBackend {
    pub fn new(class_names: BTreeMap<u32, String>, frames: Vec<FrameResult>) -> Self {
        Self {
            class_names,
            frames,
        }
    }

    pub fn from_script_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read stub model {}", path.display()))?;
        let script: StubScript = serde_json::from_str(&raw)
            .with_context(|| format!("invalid stub model {}", path.display()))?;
        Ok(Self::new(script.class_names, script.frames))
    }

    fn infer_image(&self, request: &InferenceRequest<'_>) -> Result<InferenceOutput> {
        let frame = self
            .frames
            .first()
            .map(|frame| frame.filtered(request.confidence_threshold))
            .unwrap_or_default();
        let bytes = fs::read(request.media_path)
            .with_context(|| format!("failed to read {}", request.media_path.display()))?;
        let mut image = image::load_from_memory(&bytes)
            .context("failed to decode uploaded image")?
            .into_rgb8();
        draw_detections(&mut image, &frame);
        Ok(InferenceOutput {
            frames: vec![frame],
            rendered: Some(image),
        })
    }

    fn infer_video(&self, request: &InferenceRequest<'_>) -> Result<InferenceOutput> {
        let save_dir = request
            .save_dir
            .ok_or_else(|| anyhow!("video inference requires a save directory"))?;
        let file_name = request
            .media_path
            .file_name()
            .ok_or_else(|| anyhow!("media path has no file name"))?;
        fs::create_dir_all(save_dir)?;
        let output = save_dir.join(file_name);
        fs::copy(request.media_path, &output)
            .with_context(|| format!("failed to write annotated video {}", output.display()))?;
        log::debug!("stub: wrote annotated video {}", output.display());

        let frames = self
            .frames
            .iter()
            .map(|frame| frame.filtered(request.confidence_threshold))
            .collect();
        Ok(InferenceOutput {
            frames,
            rendered: None,
        })
    }
}

impl InferenceAdapter for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn class_names(&self) -> &BTreeMap<u32, String> {
        &self.class_names
    }

    fn supports(&self, _kind: MediaKind) -> bool {
        true
    }

    fn infer(&mut self, request: &InferenceRequest<'_>) -> Result<InferenceOutput> {
        match request.kind {
            MediaKind::Image => self.infer_image(request),
            MediaKind::Video => self.infer_video(request),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::result::DetectionRecord;
    use image::{DynamicImage, ImageFormat, RgbImage};
    use std::io::Cursor;

    fn png_bytes() -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(RgbImage::new(16, 16))
            .write_to(&mut buf, ImageFormat::Png)
            .unwrap();
        buf.into_inner()
    }

    fn scripted() -> StubBackend {
        StubBackend::new(
            BTreeMap::from([(0, "person".to_string())]),
            vec![
                FrameResult::new(vec![
                    DetectionRecord::new(0, 0.3),
                    DetectionRecord::new(0, 0.8),
                ]),
                FrameResult::new(vec![DetectionRecord::new(1, 0.6)]),
            ],
        )
    }

    #[test]
    fn image_returns_single_filtered_frame_and_render() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        // png content behind a .jpg name, as uploads are stored
        let media = temp_dir.path().join("upload_a.jpg");
        fs::write(&media, png_bytes())?;

        let mut backend = scripted();
        let output = backend.infer(&InferenceRequest {
            media_path: &media,
            kind: MediaKind::Image,
            confidence_threshold: 0.5,
            save_dir: None,
        })?;
        assert_eq!(output.frames.len(), 1);
        assert_eq!(output.frames[0].len(), 1);
        assert_eq!(output.rendered.unwrap().dimensions(), (16, 16));
        Ok(())
    }

    #[test]
    fn undecodable_image_is_an_error() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let media = temp_dir.path().join("upload_b.jpg");
        fs::write(&media, b"not an image")?;
        let result = scripted().infer(&InferenceRequest {
            media_path: &media,
            kind: MediaKind::Image,
            confidence_threshold: 0.5,
            save_dir: None,
        });
        assert!(result.is_err());
        Ok(())
    }

    #[test]
    fn video_writes_output_named_after_input() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let media = temp_dir.path().join("upload_c.mp4");
        fs::write(&media, b"fake video")?;
        let save_dir = temp_dir.path().join("predict");

        let output = scripted().infer(&InferenceRequest {
            media_path: &media,
            kind: MediaKind::Video,
            confidence_threshold: 0.5,
            save_dir: Some(&save_dir),
        })?;
        assert_eq!(output.frames.len(), 2);
        assert_eq!(output.frames[0].len(), 1);
        assert_eq!(output.frames[1].len(), 1);
        assert!(output.rendered.is_none());
        assert_eq!(fs::read(save_dir.join("upload_c.mp4"))?, b"fake video");
        Ok(())
    }

    #[test]
    fn loads_script_file() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let path = temp_dir.path().join("ppe.json");
        fs::write(
            &path,
            r#"{"class_names": {"0": "person", "2": "helmet"},
                "frames": [[{"class_id": 2, "confidence": 0.7}]]}"#,
        )?;
        let backend = StubBackend::from_script_file(&path)?;
        assert_eq!(backend.class_names().get(&2).unwrap(), "helmet");
        assert_eq!(backend.frames.len(), 1);
        Ok(())
    }
}
