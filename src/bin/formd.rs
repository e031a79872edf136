//! formd - streaming squat form daemon
//!
//! This daemon:
//! 1. Loads configuration (FORM_CONFIG file, then FORM_* overrides)
//! 2. Loads and validates the trained model; refuses to start without one
//! 3. Opens the configured pose source (stub:// or a local recording)
//! 4. Segments the frame stream into repetitions and scores each one
//! 5. Reports every classified repetition until the source ends or Ctrl-C

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use squat_form_kernel::config::EngineConfig;
use squat_form_kernel::{open_provider, FormEngine, HmmClassifier, HmmParameters};

/// Joints named in each feedback line.
const FEEDBACK_JOINTS: usize = 3;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cfg = EngineConfig::load()?;
    let params = HmmParameters::load(&cfg.model_path).with_context(|| {
        format!(
            "formd cannot start without a valid model ({})",
            cfg.model_path.display()
        )
    })?;
    let mut classifier = HmmClassifier::new(Arc::new(params));
    if let Some(sigma) = cfg.threshold_sigma {
        classifier = classifier.with_threshold_sigma(sigma);
    }
    log::info!(
        "formd running. source={} target_fps={} threshold_sigma={}",
        cfg.source,
        cfg.target_fps,
        classifier.threshold_sigma()
    );
    log::info!("segmenter: {:?}", cfg.segmenter);

    let engine = FormEngine::new(cfg.segmenter.clone(), Arc::new(classifier))?;
    let mut provider = open_provider(&cfg.source)?;

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || stop.store(true, Ordering::Relaxed))
            .context("failed to install Ctrl-C handler")?;
    }

    let frame_interval = Duration::from_secs_f64(1.0 / f64::from(cfg.target_fps));
    let mut rep = 0u64;
    let summary = engine.run(provider.as_mut(), &stop, Some(frame_interval), |result| {
        rep += 1;
        let joints: Vec<String> = result
            .joint_errors
            .iter()
            .take(FEEDBACK_JOINTS)
            .map(|e| format!("{}={:.1}", e.joint, e.error))
            .collect();
        log::info!(
            "feedback rep #{}: {} (z={:.2}) top joints [{}]",
            rep,
            if result.is_correct { "good form" } else { "check form" },
            result.z_score,
            joints.join(", ")
        );
    })?;

    let stats = engine.stats()?;
    log::info!(
        "formd done: frames={} missing={} reps={} correct={} aborted={} discarded={} dropout_resets={}",
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
