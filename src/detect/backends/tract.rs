#![cfg(feature = "backend-tract")]

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use tract_onnx::prelude::*;

use crate::detect::backend::{InferenceAdapter, InferenceRequest};
use crate::detect::render::draw_detections;
use crate::detect::result::{
    non_maximum_suppression, BoundingBox, DetectionRecord, FrameResult, InferenceOutput,
};
use crate::media::MediaKind;

const DEFAULT_INPUT_SIZE: u32 = 640;
const NMS_IOU_THRESHOLD: f32 = 0.45;

/// Tract-based backend for YOLO-style ONNX detectors.
///
/// Expects a single `[1, 4 + classes, anchors]` output with center-format
/// boxes in input pixels. Class names are read from a sidecar `<model>.names`
/// file, one name per line, when present. Images only.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    input_size: u32,
    class_names: BTreeMap<u32, String>,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P) -> Result<Self> {
        let model_path = model_path.as_ref();
        let input_size = DEFAULT_INPUT_SIZE;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, input_size as usize, input_size as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_size,
            class_names: read_class_names(&model_path.with_extension("names"))?,
        })
    }

    fn build_input(&self, image: &image::RgbImage) -> Tensor {
        let size = self.input_size;
        let resized = image::imageops::resize(image, size, size, FilterType::Triangle);
        tract_ndarray::Array4::from_shape_fn(
            (1, 3, size as usize, size as usize),
            |(_, channel, y, x)| resized.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0,
        )
        .into_tensor()
    }

    fn decode(&self, outputs: TVec<TValue>, threshold: f32) -> Result<FrameResult> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let scores = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?
            .into_dimensionality::<tract_ndarray::Ix3>()
            .context("model output is not [1, 4 + classes, anchors]")?;
        let (channels, anchors) = (scores.shape()[1], scores.shape()[2]);
        if channels <= 4 {
            return Err(anyhow!("model output has no class scores"));
        }

        let size = self.input_size as f32;
        let mut detections = Vec::new();
        for anchor in 0..anchors {
            let (class_id, confidence) = (4..channels)
                .map(|c| (c - 4, scores[[0, c, anchor]]))
                .fold((0, f32::NEG_INFINITY), |best, cur| {
                    if cur.1 > best.1 {
                        cur
                    } else {
                        best
                    }
                });
            if confidence < threshold {
                continue;
            }
            let (cx, cy) = (scores[[0, 0, anchor]], scores[[0, 1, anchor]]);
            let (w, h) = (scores[[0, 2, anchor]], scores[[0, 3, anchor]]);
            detections.push(
                DetectionRecord::new(class_id as u32, confidence.min(1.0)).with_bbox(BoundingBox {
                    x: (cx - w / 2.0) / size,
                    y: (cy - h / 2.0) / size,
                    w: w / size,
                    h: h / size,
                }),
            );
        }
        Ok(FrameResult::new(non_maximum_suppression(
            detections,
            NMS_IOU_THRESHOLD,
        )))
    }
}

impl InferenceAdapter for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn class_names(&self) -> &BTreeMap<u32, String> {
        &self.class_names
    }

    fn supports(&self, kind: MediaKind) -> bool {
        matches!(kind, MediaKind::Image)
    }

    fn infer(&mut self, request: &InferenceRequest<'_>) -> Result<InferenceOutput> {
        if request.kind != MediaKind::Image {
            return Err(anyhow!("tract backend only supports image inference"));
        }
        let bytes = fs::read(request.media_path)
            .with_context(|| format!("failed to read {}", request.media_path.display()))?;
        let mut image = image::load_from_memory(&bytes)
            .context("failed to decode uploaded image")?
            .into_rgb8();

        let input = self.build_input(&image);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let frame = self.decode(outputs, request.confidence_threshold)?;

        draw_detections(&mut image, &frame);
        Ok(InferenceOutput {
            frames: vec![frame],
            rendered: Some(image),
        })
    }
}

fn read_class_names(path: &Path) -> Result<BTreeMap<u32, String>> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read class names {}", path.display()))?;
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .enumerate()
        .map(|(idx, name)| (idx as u32, name.to_string()))
        .collect())
}
