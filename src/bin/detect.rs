//! detect - run object detection sessions on local images and videos
//!
//! `detect models` lists what the model directory offers.
//! `detect run --input clip.mp4` runs one session, prints statistics and
//! writes the annotated artifact to `--out`.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use detection_session::detect::{class_label, ModelLoader};
use detection_session::media::{guess_mime, MediaKind};
use detection_session::ui::Ui;
use detection_session::{
    CancelToken, DetectConfig, ExtensionLoader, MediaStore, ModelCache, ModelCatalog,
    SessionConfig, SessionOutcome, SessionPipeline, SessionRequest, SessionState,
    SessionStatistics,
};

#[derive(Parser, Debug)]
#[command(name = "detect", author, version, about = "Object detection on images and videos")]
struct Args {
    /// Progress output: auto, plain or pretty.
    #[arg(long, global = true)]
    ui: Option<String>,
    /// Model directory (overrides config and DETECT_MODELS_DIR).
    #[arg(long, global = true)]
    models_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List available models and their class names
    Models,

    /// Run one detection session on a local file
    Run {
        #[arg(long)]
        input: PathBuf,
        /// Declared mime type; guessed from the extension when omitted.
        #[arg(long)]
        mime: Option<String>,
        /// Model file name; defaults to the first model found.
        #[arg(long)]
        model: Option<String>,
        /// Minimum confidence in (0, 1].
        #[arg(long)]
        confidence: Option<f32>,
        /// Directory the annotated artifact is written to.
        #[arg(long, default_value = ".")]
        out: PathBuf,
        /// Print the session summary as JSON instead of text.
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = DetectConfig::load()?;
    if let Some(dir) = args.models_dir {
        cfg.models_dir = dir;
    }
    // No models means nothing can ever run: refuse to start.
    let catalog = ModelCatalog::scan(&cfg.models_dir, &cfg.model_extensions)?;
    let ui = Ui::from_flag(args.ui.as_deref(), std::io::stderr().is_terminal());

    match args.command {
        Command::Models => list_models(&catalog),
        Command::Run {
            input,
            mime,
            model,
            confidence,
            out,
            json,
        } => {
            let session_cfg = SessionConfig::new(
                catalog.select(model.as_deref())?.id.clone(),
                confidence.unwrap_or(cfg.default_confidence),
            )?;
            let opts = RunOptions {
                input: &input,
                mime: mime.as_deref(),
                out: &out,
                json,
            };
            run_session(&cfg, &catalog, &ui, &session_cfg, &opts)
        }
    }
}

fn list_models(catalog: &ModelCatalog) -> Result<()> {
    println!("models in {}:", catalog.dir().display());
    for entry in catalog.models() {
        match ExtensionLoader.load(entry) {
            Ok(adapter) => {
                let names: Vec<&str> = adapter.class_names().values().map(String::as_str).collect();
                println!(
                    "  {} [{}] classes={}: {}",
                    entry.id,
                    adapter.name(),
                    names.len(),
                    names.join(", ")
                );
            }
            Err(e) => println!("  {} (unavailable: {:#})", entry.id, e),
        }
    }
    Ok(())
}

struct RunOptions<'a> {
    input: &'a Path,
    mime: Option<&'a str>,
    out: &'a Path,
    json: bool,
}

#[derive(Serialize)]
struct RunSummary<'a> {
    state: SessionState,
    trail: &'a [SessionState],
    kind: Option<MediaKind>,
    statistics: Option<&'a SessionStatistics>,
    artifact: Option<&'a Path>,
    ambiguous: bool,
    error: Option<String>,
}

fn run_session(
    cfg: &DetectConfig,
    catalog: &ModelCatalog,
    ui: &Ui,
    session_cfg: &SessionConfig,
    opts: &RunOptions<'_>,
) -> Result<()> {
    let RunOptions {
        input,
        mime,
        out,
        json,
    } = *opts;
    let entry = catalog.select(Some(session_cfg.model_identifier()))?;
    let cache = ModelCache::new(ExtensionLoader, cfg.cache_capacity);

    let stage = ui.stage(&format!("load model {}", entry.id));
    let adapter = cache.get_or_load(entry)?;
    stage.done();
    let class_names: BTreeMap<u32, String> = adapter
        .lock()
        .map_err(|_| anyhow!("adapter lock poisoned"))?
        .class_names()
        .clone();

    let bytes = fs::read(input).with_context(|| format!("reading {}", input.display()))?;
    let declared_mime = mime
        .or_else(|| guess_mime(input))
        .unwrap_or("application/octet-stream");

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || {
        log::warn!("cancellation requested; stopping after the current step");
        handler_token.cancel();
    })?;

    let pipeline = SessionPipeline::new(MediaStore::new(&cfg.temp_dir)?, cfg.output_layout());
    let stage = ui.stage(&format!("detect {}", input.display()));
    let mut outcome = {
        let mut guard = adapter
            .lock()
            .map_err(|_| anyhow!("adapter lock poisoned"))?;
        pipeline.run(
            &mut **guard,
            SessionRequest {
                bytes: &bytes,
                declared_mime,
                config: session_cfg,
            },
            &cancel,
        )
    };
    if outcome.is_completed() {
        stage.done();
    } else {
        drop(stage);
    }

    let mut written = None;
    if let Some(artifact) = outcome.artifact.as_mut() {
        fs::create_dir_all(out)?;
        let path = out.join(artifact.suggested_filename);
        fs::write(&path, &artifact.bytes)
            .with_context(|| format!("writing artifact to {}", path.display()))?;
        if let Err(e) = artifact.release() {
            log::warn!("failed to remove session output: {}", e);
        }
        written = Some(path);
    }

    if json {
        let summary = RunSummary {
            state: outcome.state,
            trail: &outcome.trail,
            kind: outcome.kind,
            statistics: outcome.statistics.as_ref(),
            artifact: written.as_deref(),
            ambiguous: outcome
                .resolution
                .as_ref()
                .is_some_and(|resolution| resolution.is_ambiguous()),
            error: outcome.error.as_ref().map(|e| e.to_string()),
        };
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&outcome, &class_names);
        if let (Some(path), Some(artifact)) = (&written, &outcome.artifact) {
            println!(
                "  artifact: {} ({}, {} bytes)",
                path.display(),
                artifact.mime_type,
                artifact.bytes.len()
            );
        }
    }

    match outcome.error {
        Some(err) => Err(anyhow!("session failed: {}", err)),
        None => Ok(()),
    }
}

fn print_summary(outcome: &SessionOutcome, class_names: &BTreeMap<u32, String>) {
    println!("session summary:");
    let trail: Vec<String> = outcome.trail.iter().map(|s| format!("{:?}", s)).collect();
    println!("  states: {}", trail.join(" -> "));
    if let Some(stats) = &outcome.statistics {
        println!("  objects detected: {}", stats.object_count);
        println!("  classes detected: {}", stats.distinct_class_count);
        println!("  avg confidence: {:.2}", stats.mean_confidence);
        println!("  frames: {}", stats.frame_count);
        for (class_id, count) in &stats.class_counts {
            println!("    {}: {}", class_label(class_names, *class_id), count);
        }
    }
    if let Some(resolution) = &outcome.resolution {
        if resolution.is_ambiguous() {
            println!(
                "  warning: {} candidate outputs matched; picked {}",
                resolution.candidates.len(),
                resolution.path.display()
            );
        }
    }
    if let Some(err) = &outcome.error {
        println!("  error ({}): {}", err.kind(), err);
    }
}
