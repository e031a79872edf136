//! Repetition segmentation.
//!
//! `RepSegmenter` consumes one `PoseFrame` at a time and tracks a squat through
//! four phases using the hip-ankle distance:
//!
//! ```text
//!   Idle --squat--> Descending --squat--> Bottom --stand--> Ascending --stand--> Idle
//!                        |                   ^                  |
//!                        +--stand (abort)    +------squat-------+
//! ```
//!
//! "squat" means the distance is below the low threshold, "stand" means it is
//! above the high threshold; the band in between never fires a transition.
//!
//! Any detected frame drives transitions, since the depth metric falls back to
//! whichever hip and ankle sides are trusted. Only frames that pass feature
//! extraction are buffered. Frames with no detection drive nothing. Both no
//! detection and failed extraction count toward `max_consecutive_missing_frames`;
//! past that, an in-progress repetition is dropped.
//!
//! The segmenter is single-owner mutable state. Callers that receive frames on
//! another thread must serialize access (see `FormEngine`).

use std::collections::VecDeque;
use std::sync::Arc;

use crate::features::{hip_ankle_distance, FeatureExtractor, FeatureVector};
use crate::model::{ClassificationResult, SequenceScorer};
use crate::pose::PoseFrame;
use crate::{EngineError, DEFAULT_JOINT_CONFIDENCE};

/// Frames between periodic debug summaries.
const LOG_EVERY_FRAMES: u64 = 300;

/// Tuning for the segmenter.
#[derive(Clone, Debug, PartialEq)]
pub struct SegmenterConfig {
    /// Minimum confidence for a joint to be trusted.
    pub joint_confidence_threshold: f64,
    /// Hip-ankle distance below which the subject is squatting.
    pub low_depth_threshold: f64,
    /// Hip-ankle distance above which the subject is standing.
    pub high_depth_threshold: f64,
    /// Shortest buffered repetition that is scored.
    pub min_rep_frames: usize,
    /// Buffer cap; older frames are dropped from the front.
    pub max_rep_frames: usize,
    /// Dropout frames tolerated in a row before an in-progress rep is dropped.
    pub max_consecutive_missing_frames: u32,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            joint_confidence_threshold: DEFAULT_JOINT_CONFIDENCE,
            low_depth_threshold: 0.25,
            high_depth_threshold: 0.32,
            min_rep_frames: 15,
            // ~3 s at 30 fps
            max_rep_frames: 90,
            max_consecutive_missing_frames: 5,
        }
    }
}

impl SegmenterConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if !(0.0..=1.0).contains(&self.joint_confidence_threshold) {
            return Err(EngineError::config(
                "joint confidence threshold must be within 0..=1",
            ));
        }
        if !self.low_depth_threshold.is_finite() || !self.high_depth_threshold.is_finite() {
            return Err(EngineError::config("depth thresholds must be finite"));
        }
        if self.low_depth_threshold >= self.high_depth_threshold {
            return Err(EngineError::config(format!(
                "low depth threshold ({}) must be below high depth threshold ({})",
                self.low_depth_threshold, self.high_depth_threshold
            )));
        }
        if self.min_rep_frames == 0 {
            return Err(EngineError::config("min_rep_frames must be at least 1"));
        }
        if self.min_rep_frames > self.max_rep_frames {
            return Err(EngineError::config(format!(
                "min_rep_frames ({}) exceeds max_rep_frames ({})",
                self.min_rep_frames, self.max_rep_frames
            )));
        }
        Ok(())
    }
}

/// Phase of the current repetition.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SegmentationState {
    #[default]
    Idle,
    Descending,
    Bottom,
    Ascending,
}

/// Diagnostic outcome of processing one frame.
///
/// Only `RepClassified` carries a result; aborts and discards are defined
/// negative outcomes, not errors.
#[derive(Clone, Debug, PartialEq)]
pub enum SegmentEvent {
    RepStarted,
    BottomReached,
    AscentStarted,
    /// Dropped back to depth while ascending.
    Rebounded,
    /// Stood up before reaching depth.
    RepAborted { frames: usize },
    /// Completed but shorter than `min_rep_frames`.
    RepDiscarded { frames: usize },
    /// Too many consecutive dropouts mid-rep.
    DropoutReset { frames: usize },
    RepClassified(ClassificationResult),
}

/// Cumulative counters. Not cleared by `reset`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SegmenterStats {
    pub frames_processed: u64,
    pub frames_missing: u64,
    pub reps_classified: u64,
    pub reps_aborted: u64,
    pub reps_discarded: u64,
    pub dropout_resets: u64,
}

/// Streaming repetition segmenter.
pub struct RepSegmenter<S: SequenceScorer> {
    config: SegmenterConfig,
    extractor: FeatureExtractor,
    scorer: Arc<S>,
    state: SegmentationState,
    buffer: VecDeque<FeatureVector>,
    consecutive_missing_frames: u32,
    stats: SegmenterStats,
}

impl<S: SequenceScorer> RepSegmenter<S> {
    pub fn new(config: SegmenterConfig, scorer: Arc<S>) -> Self {
        let extractor = FeatureExtractor::new(config.joint_confidence_threshold);
        let capacity = config.max_rep_frames;
        Self {
            config,
            extractor,
            scorer,
            state: SegmentationState::Idle,
            buffer: VecDeque::with_capacity(capacity),
            consecutive_missing_frames: 0,
            stats: SegmenterStats::default(),
        }
    }

    pub fn config(&self) -> &SegmenterConfig {
        &self.config
    }

    pub fn state(&self) -> SegmentationState {
        self.state
    }

    pub fn buffered_frames(&self) -> usize {
        self.buffer.len()
    }

    pub fn consecutive_missing_frames(&self) -> u32 {
        self.consecutive_missing_frames
    }

    pub fn stats(&self) -> &SegmenterStats {
        &self.stats
    }

    /// Return to Idle, dropping any buffered repetition.
    pub fn reset(&mut self) {
        self.state = SegmentationState::Idle;
        self.buffer.clear();
        self.consecutive_missing_frames = 0;
    }

    /// Advance the state machine by one frame.
    pub fn process(&mut self, frame: &PoseFrame) -> Option<SegmentEvent> {
        self.stats.frames_processed += 1;
        if self.stats.frames_processed % LOG_EVERY_FRAMES == 0 {
            log::debug!(
                "segmenter: frame={} state={:?} buffered={} stats={:?}",
                self.stats.frames_processed,
                self.state,
                self.buffer.len(),
                self.stats
            );
        }

        let Some(sample) = frame.sample() else {
            return self.on_dropout();
        };
        let depth = hip_ankle_distance(sample, self.config.joint_confidence_threshold);
        let features = match self.extractor.extract(sample) {
            Ok(features) => {
                self.consecutive_missing_frames = 0;
                Some(features)
            }
            Err(err) => {
                log::trace!("frame {}: {}", self.stats.frames_processed, err);
                if let Some(reset) = self.on_dropout() {
                    return Some(reset);
                }
                None
            }
        };

        let squatting = depth < self.config.low_depth_threshold;
        let standing = depth > self.config.high_depth_threshold;

        let event = match self.state {
            SegmentationState::Idle => {
                if squatting {
                    self.buffer.clear();
                    self.push(features);
                    self.state = SegmentationState::Descending;
                    Some(SegmentEvent::RepStarted)
                } else {
                    None
                }
            }
            SegmentationState::Descending => {
                self.push(features);
                if squatting {
                    self.state = SegmentationState::Bottom;
                    Some(SegmentEvent::BottomReached)
                } else if standing {
                    let frames = self.buffer.len();
                    self.reset();
                    self.stats.reps_aborted += 1;
                    Some(SegmentEvent::RepAborted { frames })
                } else {
                    None
                }
            }
            SegmentationState::Bottom => {
                self.push(features);
                if standing {
                    self.state = SegmentationState::Ascending;
                    Some(SegmentEvent::AscentStarted)
                } else {
                    None
                }
            }
            SegmentationState::Ascending => {
                self.push(features);
                if squatting {
                    self.state = SegmentationState::Bottom;
                    Some(SegmentEvent::Rebounded)
                } else if standing {
                    Some(self.finish_rep())
                } else {
                    None
                }
            }
        };

        if let Some(event) = &event {
            if !matches!(event, SegmentEvent::RepClassified(_)) {
                log::debug!(
                    "segmenter: {:?} depth={:.3} state={:?}",
                    event,
                    depth,
                    self.state
                );
            }
        }
        event
    }

    fn push(&mut self, features: Option<FeatureVector>) {
        let Some(features) = features else {
            return;
        };
        self.buffer.push_back(features);
        while self.buffer.len() > self.config.max_rep_frames {
            self.buffer.pop_front();
        }
    }

    fn finish_rep(&mut self) -> SegmentEvent {
        let frames = self.buffer.len();
        if frames < self.config.min_rep_frames {
            self.reset();
            self.stats.reps_discarded += 1;
            return SegmentEvent::RepDiscarded { frames };
        }

        let result = self.scorer.classify(self.buffer.make_contiguous());
        self.reset();
        self.stats.reps_classified += 1;
        log::info!(
            "rep #{}: frames={} correct={} ll={:.2} z={:.2} worst_joint={}",
            self.stats.reps_classified,
            frames,
            result.is_correct,
            result.log_likelihood,
            result.z_score,
            result
                .worst_joint()
                .map(|j| j.name())
                .unwrap_or("none")
        );
        SegmentEvent::RepClassified(result)
    }

    fn on_dropout(&mut self) -> Option<SegmentEvent> {
        self.consecutive_missing_frames = self.consecutive_missing_frames.saturating_add(1);
        self.stats.frames_missing += 1;
        if self.state == SegmentationState::Idle
            || self.consecutive_missing_frames <= self.config.max_consecutive_missing_frames
        {
            return None;
        }

        let frames = self.buffer.len();
        log::warn!(
            "segmenter: {} consecutive frames without joints in {:?}, dropping {} buffered frames",
            self.consecutive_missing_frames,
            self.state,
            frames
        );
        self.state = SegmentationState::Idle;
        self.buffer.clear();
        self.stats.dropout_resets += 1;
        Some(SegmentEvent::DropoutReset { frames })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::{Joint, JointPoint, JointSample};
    use std::sync::Mutex;

    #[derive(Default)]
    struct CountingScorer {
        lengths: Mutex<Vec<usize>>,
    }

    impl SequenceScorer for CountingScorer {
        fn classify(&self, sequence: &[FeatureVector]) -> ClassificationResult {
            self.lengths.lock().unwrap().push(sequence.len());
            ClassificationResult {
                path: vec![0; sequence.len()],
                log_likelihood: -1.0,
                z_score: 0.0,
                is_correct: true,
                joint_errors: Vec::new(),
            }
        }
    }

    fn frame_at_depth(depth: f64) -> PoseFrame {
        let ankle_y = 0.9;
        let hip_y = ankle_y - depth;
        let knee_y = (hip_y + ankle_y) / 2.0;
        let coords = [
            (Joint::LeftShoulder, 0.45, hip_y - 0.2),
            (Joint::RightShoulder, 0.55, hip_y - 0.2),
            (Joint::LeftHip, 0.46, hip_y),
            (Joint::RightHip, 0.54, hip_y),
            (Joint::LeftKnee, 0.44, knee_y),
            (Joint::RightKnee, 0.56, knee_y),
            (Joint::LeftAnkle, 0.46, ankle_y),
            (Joint::RightAnkle, 0.54, ankle_y),
        ];
        PoseFrame::Detected(coords.iter().fold(JointSample::new(), |s, &(j, x, y)| {
            s.with_joint(j, JointPoint::new(x, y, 0.9))
        }))
    }

    fn config() -> SegmenterConfig {
        SegmenterConfig {
            min_rep_frames: 4,
            max_rep_frames: 20,
            max_consecutive_missing_frames: 2,
            ..SegmenterConfig::default()
        }
    }

    fn segmenter() -> (RepSegmenter<CountingScorer>, Arc<CountingScorer>) {
        let scorer = Arc::new(CountingScorer::default());
        (RepSegmenter::new(config(), scorer.clone()), scorer)
    }

    #[test]
    fn default_config_is_valid() {
        assert!(SegmenterConfig::default().validate().is_ok());
    }

    #[test]
    fn config_validation_rejects_inverted_thresholds() {
        let cfg = SegmenterConfig {
            low_depth_threshold: 0.4,
            high_depth_threshold: 0.3,
            ..SegmenterConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(EngineError::Config { .. })));

        let cfg = SegmenterConfig {
            min_rep_frames: 100,
            ..SegmenterConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn walks_through_all_phases() {
        let (mut seg, scorer) = segmenter();
        assert_eq!(seg.process(&frame_at_depth(0.40)), None);
        assert_eq!(seg.process(&frame_at_depth(0.20)), Some(SegmentEvent::RepStarted));
        assert_eq!(seg.state(), SegmentationState::Descending);
        assert_eq!(seg.process(&frame_at_depth(0.18)), Some(SegmentEvent::BottomReached));
        assert_eq!(seg.process(&frame_at_depth(0.28)), None);
        assert_eq!(seg.process(&frame_at_depth(0.35)), Some(SegmentEvent::AscentStarted));
        assert_eq!(seg.state(), SegmentationState::Ascending);
        match seg.process(&frame_at_depth(0.40)) {
            Some(SegmentEvent::RepClassified(result)) => assert_eq!(result.path.len(), 5),
            other => panic!("expected classification, got {:?}", other),
        }
        assert_eq!(seg.state(), SegmentationState::Idle);
        assert_eq!(seg.buffered_frames(), 0);
        assert_eq!(*scorer.lengths.lock().unwrap(), vec![5]);
        assert_eq!(seg.stats().reps_classified, 1);
    }

    #[test]
    fn dead_band_holds_state() {
        let (mut seg, _) = segmenter();
        for _ in 0..10 {
            assert_eq!(seg.process(&frame_at_depth(0.28)), None);
        }
        assert_eq!(seg.state(), SegmentationState::Idle);
        assert_eq!(seg.buffered_frames(), 0);
    }

    #[test]
    fn standing_before_depth_aborts() {
        let (mut seg, scorer) = segmenter();
        seg.process(&frame_at_depth(0.20));
        seg.process(&frame_at_depth(0.28));
        assert_eq!(
            seg.process(&frame_at_depth(0.40)),
            Some(SegmentEvent::RepAborted { frames: 3 })
        );
        assert_eq!(seg.state(), SegmentationState::Idle);
        assert_eq!(seg.buffered_frames(), 0);
        assert!(scorer.lengths.lock().unwrap().is_empty());
    }

    #[test]
    fn rebound_keeps_buffer() {
        let (mut seg, _) = segmenter();
        for depth in [0.20, 0.18, 0.35] {
            seg.process(&frame_at_depth(depth));
        }
        assert_eq!(seg.process(&frame_at_depth(0.20)), Some(SegmentEvent::Rebounded));
        assert_eq!(seg.state(), SegmentationState::Bottom);
        assert_eq!(seg.buffered_frames(), 4);
    }

    #[test]
    fn buffer_is_capped_from_the_front() {
        let (mut seg, scorer) = segmenter();
        seg.process(&frame_at_depth(0.20));
        for _ in 0..50 {
            seg.process(&frame_at_depth(0.18));
        }
        assert_eq!(seg.buffered_frames(), 20);
        seg.process(&frame_at_depth(0.35));
        seg.process(&frame_at_depth(0.40));
        assert_eq!(*scorer.lengths.lock().unwrap(), vec![20]);
    }

    #[test]
    fn dropout_counter_resets_on_good_frame() {
        let (mut seg, _) = segmenter();
        seg.process(&frame_at_depth(0.20));
        seg.process(&PoseFrame::NoDetection);
        seg.process(&PoseFrame::NoDetection);
        assert_eq!(seg.consecutive_missing_frames(), 2);
        seg.process(&frame_at_depth(0.18));
        assert_eq!(seg.consecutive_missing_frames(), 0);
        assert_eq!(seg.state(), SegmentationState::Bottom);
        assert_eq!(seg.stats().frames_missing, 2);
    }

    #[test]
    fn partial_frame_moves_state_but_is_not_buffered() {
        let (mut seg, _) = segmenter();
        seg.process(&frame_at_depth(0.20));
        let PoseFrame::Detected(mut sample) = frame_at_depth(0.18) else {
            unreachable!()
        };
        sample.set(Joint::LeftKnee, None);
        assert_eq!(
            seg.process(&PoseFrame::Detected(sample)),
            Some(SegmentEvent::BottomReached)
        );
        assert_eq!(seg.consecutive_missing_frames(), 1);
        assert_eq!(seg.state(), SegmentationState::Bottom);
        assert_eq!(seg.buffered_frames(), 1);
    }

    #[test]
    fn one_sided_ankles_still_measure_depth() {
        let (mut seg, _) = segmenter();
        let PoseFrame::Detected(mut sample) = frame_at_depth(0.20) else {
            unreachable!()
        };
        sample.set(Joint::RightAnkle, None);
        assert_eq!(
            seg.process(&PoseFrame::Detected(sample)),
            Some(SegmentEvent::RepStarted)
        );
        assert_eq!(seg.buffered_frames(), 0);
    }

    #[test]
    fn failed_extractions_past_the_limit_reset() {
        let (mut seg, _) = segmenter();
        seg.process(&frame_at_depth(0.20));
        seg.process(&frame_at_depth(0.18));
        let PoseFrame::Detected(mut sample) = frame_at_depth(0.18) else {
            unreachable!()
        };
        sample.set(Joint::LeftShoulder, None);
        let partial = PoseFrame::Detected(sample);
        assert_eq!(seg.process(&partial), None);
        assert_eq!(seg.process(&partial), None);
        assert_eq!(
            seg.process(&partial),
            Some(SegmentEvent::DropoutReset { frames: 2 })
        );
        assert_eq!(seg.state(), SegmentationState::Idle);
    }

    #[test]
    fn reset_returns_to_idle() {
        let (mut seg, _) = segmenter();
        seg.process(&frame_at_depth(0.20));
        seg.process(&frame_at_depth(0.18));
        seg.reset();
        assert_eq!(seg.state(), SegmentationState::Idle);
        assert_eq!(seg.buffered_frames(), 0);
        assert_eq!(seg.stats().frames_processed, 2);
    }
}
