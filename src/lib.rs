//! Squat Form Kernel
//!
//! This crate implements the motion-sequence classification core for bodyweight
//! squat form checking from 2-D joint keypoints.
//!
//! # Architecture
//!
//! Frames flow one at a time through a fixed pipeline:
//!
//! 1. **Pose input**: a `PoseProvider` yields one `PoseFrame` per camera frame
//!    (8 joints with confidence, or no detection).
//! 2. **Features**: `FeatureExtractor` maps a frame into a hip-centered,
//!    torso-scaled 16-dim `FeatureVector`.
//! 3. **Segmentation**: `RepSegmenter` runs a hysteresis state machine over the
//!    hip-ankle distance and buffers the frames of one repetition.
//! 4. **Scoring**: `HmmClassifier` decodes the repetition with log-space Viterbi,
//!    normalizes the likelihood against training statistics and ranks joints by
//!    accumulated deviation.
//!
//! # Module Structure
//!
//! - `pose`: joints, samples, and the `PoseProvider` capability
//! - `features`: per-frame normalization and the depth metric
//! - `model`: trained parameters, Gaussian emissions, Viterbi classifier
//! - `segment`: rep boundary state machine
//! - `engine`: single-owner wrapper driving a provider through the segmenter
//! - `provider`: synthetic and recorded keypoint sources
//! - `config`: file + environment configuration

pub mod config;
pub mod engine;
pub mod features;
pub mod model;
pub mod pose;
pub mod provider;
pub mod segment;

pub use engine::{FormEngine, RunSummary};
pub use features::{hip_ankle_distance, FeatureExtractor, FeatureVector};
pub use model::{
    ClassificationResult, GaussianEmission, HmmClassifier, HmmParameters, JointError,
    SequenceScorer,
};
pub use pose::{Joint, JointPoint, JointSample, PoseFrame, PoseProvider};
pub use provider::{open_provider, JsonlReplayProvider, SyntheticConfig, SyntheticSquatProvider};
pub use segment::{RepSegmenter, SegmentEvent, SegmentationState, SegmenterConfig, SegmenterStats};

/// Number of tracked joints.
pub const NUM_JOINTS: usize = 8;

/// Feature dimensionality: (x, y) per tracked joint.
pub const NUM_FEATURES: usize = 2 * NUM_JOINTS;

/// Default minimum confidence for a joint to be trusted.
pub const DEFAULT_JOINT_CONFIDENCE: f64 = 0.2;

// -------------------- Errors --------------------

/// Distinguishable failure kinds of the classification core.
///
/// Outer boundaries carry these inside `anyhow::Error`; callers that need to
/// branch on the kind use `err.downcast_ref::<EngineError>()`.
#[derive(Clone, Debug, PartialEq)]
pub enum EngineError {
    /// A frame lacked one or more trusted joints. Absorbed by the segmenter.
    MissingJoints { missing: Vec<Joint> },
    /// Trained parameters were unreadable or structurally invalid.
    ModelLoad { reason: String },
    /// A vector did not match the feature dimensionality. Internal contract violation.
    DimensionMismatch { expected: usize, actual: usize },
    /// Configuration values were out of range.
    Config { reason: String },
}

impl EngineError {
    pub(crate) fn model_load(reason: impl Into<String>) -> Self {
        EngineError::ModelLoad {
            reason: reason.into(),
        }
    }

    pub(crate) fn config(reason: impl Into<String>) -> Self {
        EngineError::Config {
            reason: reason.into(),
        }
    }

    /// Stable code for logs.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::MissingJoints { .. } => "MISSING_JOINTS",
            EngineError::ModelLoad { .. } => "MODEL_LOAD",
            EngineError::DimensionMismatch { .. } => "DIMENSION_MISMATCH",
            EngineError::Config { .. } => "CONFIG",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::MissingJoints { missing } => {
                let names: Vec<&str> = missing.iter().map(|j| j.name()).collect();
                write!(f, "{}: untrusted joints [{}]", self.code(), names.join(", "))
            }
            EngineError::ModelLoad { reason } => write!(f, "{}: {}", self.code(), reason),
            EngineError::DimensionMismatch { expected, actual } => write!(
                f,
                "{}: expected {} features, got {}",
                self.code(),
                expected,
                actual
            ),
            EngineError::Config { reason } => write!(f, "{}: {}", self.code(), reason),
        }
    }
}

impl std::error::Error for EngineError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_carries_code() {
        let err = EngineError::DimensionMismatch {
            expected: 16,
            actual: 15,
        };
        assert_eq!(err.to_string(), "DIMENSION_MISMATCH: expected 16 features, got 15");

        let err = EngineError::MissingJoints {
            missing: vec![Joint::LeftKnee, Joint::RightAnkle],
        };
        assert_eq!(err.to_string(), "MISSING_JOINTS: untrusted joints [left_knee, right_ankle]");
    }

    #[test]
    fn engine_error_survives_anyhow_context() {
        use anyhow::Context;
        let res: anyhow::Result<()> =
            Err::<(), _>(EngineError::model_load("bad")).context("loading model");
        let err = res.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::ModelLoad { .. })
        ));
    }
}
