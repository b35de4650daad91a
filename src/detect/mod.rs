mod backend;
pub mod backends;
mod catalog;
mod registry;
pub mod render;
mod result;

pub use backend::{class_label, InferenceAdapter, InferenceRequest};
pub use backends::{ExtensionLoader, StubBackend};
pub use catalog::{ModelCatalog, ModelEntry};
pub use registry::{ModelCache, ModelLoader, SharedAdapter};
pub use result::{
    non_maximum_suppression, BoundingBox, DetectionRecord, FrameResult, InferenceOutput,
};
