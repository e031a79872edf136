//! form_replay - score a recorded keypoint stream offline
//!
//! Reads frames from a JSON-lines recording (or a stub:// stream), runs them
//! through the segmenter and model, and writes one JSON line per classified
//! repetition.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use squat_form_kernel::config::EngineConfig;
use squat_form_kernel::{
    open_provider, ClassificationResult, FormEngine, HmmClassifier, HmmParameters,
};

#[path = "../ui.rs"]
mod ui;

use ui::{Progress, UiMode};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Trained model JSON.
    #[arg(long, env = "FORM_MODEL_PATH")]
    model: PathBuf,
    /// Keypoint recording (JSON lines) or stub:// source.
    #[arg(long)]
    frames: String,
    /// Output file for per-rep results (defaults to stdout).
    #[arg(long)]
    out: Option<PathBuf>,
    /// Override the model's correctness cutoff (standard deviations).
    #[arg(long)]
    threshold_sigma: Option<f64>,
    /// Stderr progress style.
    #[arg(long, value_enum, default_value_t = UiMode::Auto)]
    ui: UiMode,
}

#[derive(Serialize)]
struct RepRecord<'a> {
    rep: u64,
    #[serde(flatten)]
    result: &'a ClassificationResult,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    let ui = Progress::new(args.ui, std::io::stderr().is_terminal());

    // segmenter tuning still comes from FORM_CONFIG / FORM_* when present
    let cfg = EngineConfig::load()?;

    let classifier = {
        let _stage = ui.stage("load model");
        let params = HmmParameters::load(&args.model)?;
        let mut classifier = HmmClassifier::new(Arc::new(params));
        if let Some(sigma) = args.threshold_sigma.or(cfg.threshold_sigma) {
            if !sigma.is_finite() || sigma < 0.0 {
                return Err(anyhow!("--threshold-sigma must be finite and non-negative"));
            }
            classifier = classifier.with_threshold_sigma(sigma);
        }
        classifier
    };
    let engine = FormEngine::new(cfg.segmenter.clone(), Arc::new(classifier))?;

    let mut out: Box<dyn Write> = match &args.out {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("failed to create {}", path.display()))?,
        )),
        None => Box::new(BufWriter::new(std::io::stdout().lock())),
    };

    let summary = {
        let stage = ui.stage("replay frames");
        let mut provider = open_provider(&args.frames)?;
        let stop = AtomicBool::new(false);
        let mut rep = 0u64;
        let mut correct = 0u64;
        let mut write_error = None;
        let summary = engine.run(provider.as_mut(), &stop, None, |result| {
            rep += 1;
            if result.is_correct {
                correct += 1;
            }
            stage.tally(rep, correct);
            if write_error.is_some() {
                return;
            }
            let line = serde_json::to_string(&RepRecord { rep, result })
                .map_err(anyhow::Error::from)
                .and_then(|line| writeln!(out, "{}", line).map_err(anyhow::Error::from));
            if let Err(e) = line {
                write_error = Some(e);
            }
        })?;
        if let Some(e) = write_error {
            return Err(e.context("failed to write results"));
        }
        summary
    };
    out.flush().context("failed to flush results")?;

    let stats = engine.stats()?;
    eprintln!(
        "frames={} missing={} reps={} correct={} aborted={} discarded={} dropout_resets={}",
        summary.frames,
        stats.frames_missing,
        summary.reps_classified,
        summary.reps_correct,
        stats.reps_aborted,
        stats.reps_discarded,
        stats.dropout_resets
    );
    Ok(())
}
