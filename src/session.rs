//! Detection session pipeline.
//!
//! A session is one linear pass:
//!
//! ```text
//! Idle -> Ingesting -> Inferring -> Aggregating -> [ResolvingArtifact] -> Packaging -> Completed
//! ```
//!
//! with `Failed` reachable from every state. `ResolvingArtifact` only runs for
//! video; image sessions already hold the rendered frame in memory.
//!
//! Every session error is caught here and reported in a `SessionOutcome`.
//! Statistics survive a failed artifact resolution. The stored upload is
//! removed on every path, including cancellation. Video output written for a
//! session that fails is removed before `run` returns; output of a completed
//! session is owned by its `SessionArtifact`.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;

use crate::aggregate::{aggregate, SessionStatistics};
use crate::artifact::{ArtifactResolver, Resolution};
use crate::detect::render::encode_jpeg;
use crate::detect::{InferenceAdapter, InferenceRequest};
use crate::error::{SessionError, SessionResult};
use crate::media::{MediaKind, MediaStore, ScopedPath};

const SESSION_DIR_PREFIX: &str = "session_";

/// Per-session model selection and threshold.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionConfig {
    model_identifier: String,
    confidence_threshold: f32,
}

impl SessionConfig {
    /// `confidence_threshold` must lie in (0, 1].
    pub fn new(model_identifier: impl Into<String>, confidence_threshold: f32) -> SessionResult<Self> {
        if !(confidence_threshold > 0.0 && confidence_threshold <= 1.0) {
            return Err(SessionError::configuration(format!(
                "confidence threshold must be in (0, 1], got {}",
                confidence_threshold
            )));
        }
        Ok(Self {
            model_identifier: model_identifier.into(),
            confidence_threshold,
        })
    }

    pub fn model_identifier(&self) -> &str {
        &self.model_identifier
    }

    pub fn confidence_threshold(&self) -> f32 {
        self.confidence_threshold
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Ingesting,
    Inferring,
    Aggregating,
    ResolvingArtifact,
    Packaging,
    Completed,
    Failed,
}

/// Where video inference writes its annotated output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutputLayout {
    /// A fresh directory per session under `root`. Resolution only ever sees
    /// this session's files.
    PerSession { root: PathBuf },
    /// One directory shared by every session. Video sessions are serialized
    /// against it from inference through resolution.
    Shared { dir: PathBuf },
}

/// The downloadable result of a session.
#[derive(Debug)]
pub struct SessionArtifact {
    pub kind: MediaKind,
    pub bytes: Vec<u8>,
    pub suggested_filename: &'static str,
    pub mime_type: &'static str,
    /// File the bytes were read from, for video.
    pub source_path: Option<PathBuf>,
    // Output written for this session; removed when the artifact is dropped.
    backing: Vec<ScopedPath>,
}

impl SessionArtifact {
    fn image(bytes: Vec<u8>) -> Self {
        Self {
            kind: MediaKind::Image,
            bytes,
            suggested_filename: MediaKind::Image.artifact_filename(),
            mime_type: MediaKind::Image.artifact_mime(),
            source_path: None,
            backing: Vec::new(),
        }
    }

    fn video(bytes: Vec<u8>, source_path: PathBuf, backing: Vec<ScopedPath>) -> Self {
        Self {
            kind: MediaKind::Video,
            bytes,
            suggested_filename: MediaKind::Video.artifact_filename(),
            mime_type: MediaKind::Video.artifact_mime(),
            source_path: Some(source_path),
            backing,
        }
    }

    /// Remove the session's output files now instead of on drop. Once the
    /// bytes are read nothing on disk is needed.
    pub fn release(&mut self) -> SessionResult<()> {
        let mut first_err = None;
        for backing in &mut self.backing {
            if let Err(e) = backing.release() {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn is_released(&self) -> bool {
        self.backing.iter().all(ScopedPath::is_released)
    }
}

/// Structured result of one session, rendered by the caller.
#[derive(Debug)]
pub struct SessionOutcome {
    /// `Completed` or `Failed`.
    pub state: SessionState,
    /// Every state visited, in order.
    pub trail: Vec<SessionState>,
    pub kind: Option<MediaKind>,
    pub statistics: Option<SessionStatistics>,
    pub resolution: Option<Resolution>,
    pub artifact: Option<SessionArtifact>,
    pub error: Option<SessionError>,
}

impl SessionOutcome {
    pub fn is_completed(&self) -> bool {
        self.state == SessionState::Completed
    }
}

/// Cooperative cancellation, checked before and after the adapter call.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn check(&self) -> SessionResult<()> {
        if self.is_cancelled() {
            Err(SessionError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// One uploaded asset plus its configuration.
#[derive(Clone, Copy, Debug)]
pub struct SessionRequest<'a> {
    pub bytes: &'a [u8],
    pub declared_mime: &'a str,
    pub config: &'a SessionConfig,
}

pub struct SessionPipeline {
    store: MediaStore,
    layout: OutputLayout,
    resolver: ArtifactResolver,
    shared_output: Mutex<()>,
}

impl SessionPipeline {
    pub fn new(store: MediaStore, layout: OutputLayout) -> Self {
        Self {
            store,
            layout,
            resolver: ArtifactResolver::default(),
            shared_output: Mutex::new(()),
        }
    }

    pub fn with_resolver(mut self, resolver: ArtifactResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn store(&self) -> &MediaStore {
        &self.store
    }

    /// Run one session to `Completed` or `Failed`. Never panics on session
    /// errors and never leaves the stored upload behind.
    pub fn run(
        &self,
        adapter: &mut dyn InferenceAdapter,
        request: SessionRequest<'_>,
        cancel: &CancelToken,
    ) -> SessionOutcome {
        let mut run = Run::new();

        let kind = match MediaKind::from_mime(request.declared_mime) {
            Ok(kind) => kind,
            Err(e) => return run.fail(e),
        };
        run.kind = Some(kind);
        if !adapter.supports(kind) {
            return run.fail(SessionError::Inference(format!(
                "backend '{}' cannot process {:?} media",
                adapter.name(),
                kind
            )));
        }
        if let Err(e) = cancel.check() {
            return run.fail(e);
        }

        run.advance(SessionState::Ingesting);
        let mut input = match self.store.acquire(request.bytes, kind.upload_suffix()) {
            Ok(input) => input,
            Err(e) => return run.fail(e),
        };
        log::info!(
            "session {}: {:?} upload, {} bytes, sha256={}, model={}, conf={:.2}",
            input.stem(),
            kind,
            request.bytes.len(),
            input.digest_hex().unwrap_or_default(),
            request.config.model_identifier(),
            request.config.confidence_threshold()
        );

        let result = self.process(adapter, kind, &input, request.config, cancel, &mut run);

        if let Err(e) = input.release() {
            log::warn!("session {}: failed to remove upload: {}", input.stem(), e);
        }
        match result {
            Ok(artifact) => run.complete(artifact),
            Err(e) => run.fail(e),
        }
    }

    fn process(
        &self,
        adapter: &mut dyn InferenceAdapter,
        kind: MediaKind,
        input: &ScopedPath,
        config: &SessionConfig,
        cancel: &CancelToken,
        run: &mut Run,
    ) -> SessionResult<SessionArtifact> {
        let output = match kind {
            MediaKind::Image => None,
            MediaKind::Video => Some(self.prepare_output()?),
        };

        let request = InferenceRequest {
            media_path: input.path(),
            kind,
            confidence_threshold: config.confidence_threshold(),
            save_dir: output.as_ref().map(VideoOutput::dir),
        };
        match (self.infer_and_package(adapter, &request, cancel, run), output) {
            (Ok(Packaged::Image(bytes)), _) => Ok(SessionArtifact::image(bytes)),
            (Ok(Packaged::Video { bytes, resolution }), Some(output)) => {
                let backing = output.into_backing(&resolution);
                Ok(SessionArtifact::video(bytes, resolution.path, backing))
            }
            (Ok(Packaged::Video { bytes, resolution }), None) => {
                Ok(SessionArtifact::video(bytes, resolution.path, Vec::new()))
            }
            (Err(e), output) => {
                if let Some(output) = output {
                    output.discard(&self.resolver, input.stem());
                }
                Err(e)
            }
        }
    }

    fn infer_and_package(
        &self,
        adapter: &mut dyn InferenceAdapter,
        request: &InferenceRequest<'_>,
        cancel: &CancelToken,
        run: &mut Run,
    ) -> SessionResult<Packaged> {
        run.advance(SessionState::Inferring);
        let inference = adapter.infer(request).map_err(SessionError::inference)?;
        cancel.check()?;
        if request.kind == MediaKind::Image && inference.frames.len() != 1 {
            return Err(SessionError::Inference(format!(
                "backend '{}' returned {} frames for an image, expected 1",
                adapter.name(),
                inference.frames.len()
            )));
        }

        run.advance(SessionState::Aggregating);
        run.statistics = Some(aggregate(&inference.frames));

        match request.save_dir {
            None => {
                run.advance(SessionState::Packaging);
                let rendered = inference.rendered.ok_or_else(|| {
                    SessionError::Inference(format!(
                        "backend '{}' returned no rendered frame",
                        adapter.name()
                    ))
                })?;
                let bytes = encode_jpeg(&rendered).map_err(SessionError::inference)?;
                Ok(Packaged::Image(bytes))
            }
            Some(dir) => {
                run.advance(SessionState::ResolvingArtifact);
                let stem = request
                    .media_path
                    .file_stem()
                    .and_then(|stem| stem.to_str())
                    .unwrap_or_default();
                let resolution = self.resolver.resolve(dir, stem)?;
                run.resolution = Some(resolution.clone());

                run.advance(SessionState::Packaging);
                let bytes = fs::read(&resolution.path).map_err(|e| {
                    SessionError::storage(format!(
                        "failed to read {}: {}",
                        resolution.path.display(),
                        e
                    ))
                })?;
                Ok(Packaged::Video { bytes, resolution })
            }
        }
    }

    fn prepare_output(&self) -> SessionResult<VideoOutput<'_>> {
        match &self.layout {
            OutputLayout::PerSession { root } => {
                Ok(VideoOutput::Session(ScopedPath::dir_in(root, SESSION_DIR_PREFIX)?))
            }
            OutputLayout::Shared { dir } => {
                let guard = self
                    .shared_output
                    .lock()
                    .map_err(|_| SessionError::storage("shared output lock poisoned"))?;
                fs::create_dir_all(dir)?;
                Ok(VideoOutput::Shared { dir, _guard: guard })
            }
        }
    }
}

enum Packaged {
    Image(Vec<u8>),
    Video { bytes: Vec<u8>, resolution: Resolution },
}

enum VideoOutput<'a> {
    Session(ScopedPath),
    Shared {
        dir: &'a Path,
        _guard: MutexGuard<'a, ()>,
    },
}

impl VideoOutput<'_> {
    fn dir(&self) -> &Path {
        match self {
            Self::Session(scoped) => scoped.path(),
            Self::Shared { dir, .. } => dir,
        }
    }

    /// Files the artifact must own. In a shared directory every candidate
    /// carries this session's unique stem, so all of them belong to it.
    fn into_backing(self, resolution: &Resolution) -> Vec<ScopedPath> {
        match self {
            Self::Session(scoped) => vec![scoped],
            Self::Shared { .. } => resolution
                .candidates
                .iter()
                .map(ScopedPath::adopt_file)
                .collect(),
        }
    }

    /// Remove whatever the adapter wrote for a session that did not complete.
    fn discard(self, resolver: &ArtifactResolver, stem: &str) {
        match self {
            Self::Session(mut scoped) => {
                if let Err(e) = scoped.release() {
                    log::warn!("session {}: failed to remove output: {}", stem, e);
                }
            }
            Self::Shared { dir, .. } => {
                let leftovers = match resolver.matching(dir, stem) {
                    Ok(leftovers) => leftovers,
                    Err(e) => {
                        log::warn!("session {}: failed to list output: {}", stem, e);
                        return;
                    }
                };
                for path in leftovers {
                    if let Err(e) = ScopedPath::adopt_file(&path).release() {
                        log::warn!("session {}: {}", stem, e);
                    }
                }
            }
        }
    }
}

/// Bookkeeping for one `run` call.
struct Run {
    trail: Vec<SessionState>,
    kind: Option<MediaKind>,
    statistics: Option<SessionStatistics>,
    resolution: Option<Resolution>,
}

impl Run {
    fn new() -> Self {
        Self {
            trail: vec![SessionState::Idle],
            kind: None,
            statistics: None,
            resolution: None,
        }
    }

    fn advance(&mut self, state: SessionState) {
        log::debug!("session state -> {:?}", state);
        self.trail.push(state);
    }

    fn complete(mut self, artifact: SessionArtifact) -> SessionOutcome {
        self.advance(SessionState::Completed);
        if let Some(stats) = &self.statistics {
            log::info!(
                "session completed: objects={} classes={} mean_conf={:.2} frames={} artifact={} bytes",
                stats.object_count,
                stats.distinct_class_count,
                stats.mean_confidence,
                stats.frame_count,
                artifact.bytes.len()
            );
        }
        self.finish(SessionState::Completed, Some(artifact), None)
    }

    fn fail(mut self, error: SessionError) -> SessionOutcome {
        let last = self.trail.last().copied().unwrap_or(SessionState::Idle);
        self.advance(SessionState::Failed);
        log::warn!("session failed during {:?} ({}): {}", last, error.kind(), error);
        self.finish(SessionState::Failed, None, Some(error))
    }

    fn finish(
        self,
        state: SessionState,
        artifact: Option<SessionArtifact>,
        error: Option<SessionError>,
    ) -> SessionOutcome {
        SessionOutcome {
            state,
            trail: self.trail,
            kind: self.kind,
            statistics: self.statistics,
            resolution: self.resolution,
            artifact,
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_config_validates_threshold() {
        assert!(SessionConfig::new("m.json", 0.5).is_ok());
        assert!(SessionConfig::new("m.json", 1.0).is_ok());
        for bad in [0.0, -0.1, 1.01, f32::NAN] {
            let err = SessionConfig::new("m.json", bad).unwrap_err();
            assert!(matches!(err, SessionError::Configuration(_)), "{bad}");
        }
    }

    #[test]
    fn states_serialize_as_snake_case() {
        assert_eq!(
            serde_json::to_string(&SessionState::ResolvingArtifact).unwrap(),
            "\"resolving_artifact\""
        );
    }

    #[test]
    fn cancel_token_is_shared_between_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(token.check().is_ok());
        clone.cancel();
        assert!(token.is_cancelled());
        assert!(matches!(token.check(), Err(SessionError::Cancelled)));
    }
}
