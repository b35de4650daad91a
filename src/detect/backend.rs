use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Result;

use crate::detect::result::InferenceOutput;
use crate::media::MediaKind;

/// Arguments for a single inference invocation.
#[derive(Clone, Copy, Debug)]
pub struct InferenceRequest<'a> {
    /// Stored upload to run on.
    pub media_path: &'a Path,
    pub kind: MediaKind,
    /// Detections below this score must not be returned.
    pub confidence_threshold: f32,
    /// Where annotated video output is written. Unused for images.
    pub save_dir: Option<&'a Path>,
}

/// Inference adapter trait.
///
/// The adapter is the source of truth for what "detected" means at a
/// threshold: it filters its own output, and callers never re-filter.
///
/// For video requests the adapter writes the annotated video into
/// `save_dir`, naming it after the input file stem. That file is the only
/// channel for the rendered video; the pipeline locates it afterwards.
pub trait InferenceAdapter: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Class id to display name for the loaded model.
    fn class_names(&self) -> &BTreeMap<u32, String>;

    /// Returns true when the backend can process this media kind.
    fn supports(&self, kind: MediaKind) -> bool;

    /// Run inference. Blocks for the full duration.
    ///
    /// Image requests return exactly one frame and a rendered image.
    fn infer(&mut self, request: &InferenceRequest<'_>) -> Result<InferenceOutput>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Display name for a class id, falling back to the numeric id.
pub fn class_label(names: &BTreeMap<u32, String>, class_id: u32) -> String {
    names
        .get(&class_id)
        .cloned()
        .unwrap_or_else(|| class_id.to_string())
}
