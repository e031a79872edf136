use std::io::Write;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tempfile::NamedTempFile;

use squat_form_kernel::provider::replay::FrameRecord;
use squat_form_kernel::{
    open_provider, ClassificationResult, FeatureExtractor, FormEngine, GaussianEmission,
    HmmClassifier, HmmParameters, Joint, PoseFrame, PoseProvider, SegmenterConfig,
    SegmenterStats, SyntheticConfig, SyntheticSquatProvider,
};

fn synthetic_frames(config: SyntheticConfig) -> Vec<PoseFrame> {
    let mut provider = SyntheticSquatProvider::new(config);
    let mut frames = Vec::new();
    while let Some(frame) = provider.next_frame().unwrap() {
        frames.push(frame);
    }
    frames
}

fn record(frames: &[PoseFrame]) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp recording");
    for frame in frames {
        writeln!(file, "{}", FrameRecord::encode_frame(frame).unwrap()).unwrap();
    }
    file.flush().unwrap();
    file
}

/// Single-state model centered on the mean posture of `frames`.
fn model_for(frames: &[PoseFrame], mean_log_likelihood: f64) -> HmmClassifier {
    let extractor = FeatureExtractor::default();
    let features: Vec<_> = frames
        .iter()
        .filter_map(|f| f.sample())
        .map(|s| extractor.extract(s).unwrap())
        .collect();
    let mut means = [0.0; 16];
    for fv in &features {
        for (m, v) in means.iter_mut().zip(fv.as_array()) {
            *m += v / features.len() as f64;
        }
    }
    let params = HmmParameters::new(
        vec![0.0],
        vec![vec![0.0]],
        vec![GaussianEmission::new(&means, &[0.1; 16]).unwrap()],
        mean_log_likelihood,
        5.0,
        2.0,
    )
    .unwrap();
    HmmClassifier::new(Arc::new(params))
}

fn replay_with_stats(
    file: &NamedTempFile,
    classifier: HmmClassifier,
) -> (Vec<ClassificationResult>, SegmenterStats) {
    let engine = FormEngine::new(SegmenterConfig::default(), Arc::new(classifier)).unwrap();
    let mut provider = open_provider(file.path().to_str().unwrap()).unwrap();
    let stop = AtomicBool::new(false);
    let mut results = Vec::new();
    let summary = engine
        .run(provider.as_mut(), &stop, None, |r| results.push(r.clone()))
        .unwrap();
    assert_eq!(summary.reps_classified as usize, results.len());
    (results, engine.stats().unwrap())
}

fn replay(file: &NamedTempFile, classifier: HmmClassifier) -> Vec<ClassificationResult> {
    replay_with_stats(file, classifier).0
}

#[test]
fn recorded_stream_replays_like_the_live_one() {
    let config = SyntheticConfig {
        reps: 3,
        ..SyntheticConfig::default()
    };
    let frames = synthetic_frames(config.clone());
    let file = record(&frames);

    let mut replayed = open_provider(file.path().to_str().unwrap()).unwrap();
    let mut count = 0;
    while let Some(frame) = replayed.next_frame().unwrap() {
        assert_eq!(frame, frames[count]);
        count += 1;
    }
    assert_eq!(count, frames.len());

    let results = replay(&file, model_for(&frames, -100.0));
    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|r| r.log_likelihood.is_finite()));
    assert!(results
        .windows(2)
        .all(|w| (w[0].log_likelihood - w[1].log_likelihood).abs() < 1e-9));
}

#[test]
fn knee_cave_reps_score_below_clean_reps() {
    let clean = SyntheticConfig {
        reps: 2,
        ..SyntheticConfig::default()
    };
    let caved = SyntheticConfig {
        knee_cave: 0.06,
        ..clean.clone()
    };
    let clean_frames = synthetic_frames(clean);
    let clean_file = record(&clean_frames);
    let caved_file = record(&synthetic_frames(caved));

    // calibrate the likelihood statistics on clean reps
    let baseline = replay(&clean_file, model_for(&clean_frames, 0.0));
    let mean_ll = baseline[0].log_likelihood;

    let clean_results = replay(&clean_file, model_for(&clean_frames, mean_ll));
    let caved_results = replay(&caved_file, model_for(&clean_frames, mean_ll));
    assert_eq!(clean_results.len(), 2);
    assert_eq!(caved_results.len(), 2);

    assert!(clean_results.iter().all(|r| r.is_correct));
    assert!(caved_results.iter().all(|r| !r.is_correct));

    let knee_error = |r: &ClassificationResult| -> f64 {
        r.joint_errors
            .iter()
            .filter(|e| matches!(e.joint, Joint::LeftKnee | Joint::RightKnee))
            .map(|e| e.error)
            .sum()
    };
    assert!(knee_error(&caved_results[0]) > knee_error(&clean_results[0]));
}

#[test]
fn dropouts_in_recording_are_tolerated() {
    let config = SyntheticConfig {
        reps: 2,
        dropout_probability: 0.05,
        seed: 11,
        ..SyntheticConfig::default()
    };
    let frames = synthetic_frames(config);
    let missing = frames
        .iter()
        .filter(|f| **f == PoseFrame::NoDetection)
        .count();
    assert!(missing > 0);

    let file = record(&frames);
    let (results, stats) = replay_with_stats(&file, model_for(&frames, -100.0));
    assert_eq!(results.len(), 2);
    assert_eq!(stats.dropout_resets, 0);
    assert_eq!(stats.frames_missing, missing as u64);
}
