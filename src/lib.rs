//! Detection sessions
//!
//! Takes an uploaded image or video and a model/threshold selection, runs
//! inference, reduces the detections to session statistics, locates the
//! annotated output and packages it for download.
//!
//! # Guarantees
//!
//! 1. **Scoped temporaries**: every file the session stores is removed on
//!    success, failure and cancellation.
//! 2. **One artifact or one error**: a session never completes silently
//!    without output.
//! 3. **Statistics are independent of artifacts**: a failed video lookup
//!    still reports what was detected.
//! 4. **Adapter owns the threshold**: statistics count exactly what the
//!    adapter returned.
//!
//! # Module Structure
//!
//! - `media`: upload classification and the scoped temporary file store
//! - `detect`: adapter trait, backends, model catalog and cache
//! - `aggregate`: per-frame detections to session statistics
//! - `artifact`: locating annotated video output on disk
//! - `session`: the pipeline state machine
//! - `config`: file + environment configuration

pub mod aggregate;
pub mod artifact;
pub mod config;
pub mod detect;
pub mod error;
pub mod media;
pub mod session;
pub mod ui;

pub use aggregate::{aggregate, SessionStatistics};
pub use artifact::{ArtifactResolver, Resolution, SUPPORTED_VIDEO_CONTAINERS};
pub use config::{DetectConfig, OutputLayoutKind};
pub use detect::{
    DetectionRecord, ExtensionLoader, FrameResult, InferenceAdapter, InferenceOutput,
    InferenceRequest, ModelCache, ModelCatalog, ModelEntry, StubBackend,
};
pub use error::{SessionError, SessionResult};
pub use media::{MediaKind, MediaStore, ScopedPath};
pub use session::{
    CancelToken, OutputLayout, SessionArtifact, SessionConfig, SessionOutcome, SessionPipeline,
    SessionRequest, SessionState,
};
