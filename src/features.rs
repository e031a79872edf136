//! Per-frame feature extraction.
//!
//! A frame's 8 joints are re-expressed in a body-local coordinate frame:
//! origin at the hip center, unit length equal to the shoulder-center to
//! hip-center distance. This removes camera distance and subject position so
//! the trained model only sees posture.

use serde::{Deserialize, Serialize};

use crate::pose::{Joint, JointPoint, JointSample};
use crate::{EngineError, DEFAULT_JOINT_CONFIDENCE, NUM_FEATURES};

/// Below this torso length the frame is treated as degenerate and the hip width
/// is used as scale instead.
const MIN_SCALE: f64 = 1e-3;

/// Hip/ankle height substituted when neither side of a joint type is trusted.
const NEUTRAL_JOINT_Y: f64 = 0.5;

/// Normalized 16-dim feature vector: (x, y) per joint in `Joint::ALL` order.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector([f64; NUM_FEATURES]);

impl FeatureVector {
    pub fn new(values: [f64; NUM_FEATURES]) -> Self {
        Self(values)
    }

    /// Build from an arbitrary slice. Any length other than `NUM_FEATURES` is a
    /// contract violation and is reported, never padded or truncated.
    pub fn from_slice(values: &[f64]) -> Result<Self, EngineError> {
        let array: [f64; NUM_FEATURES] =
            values
                .try_into()
                .map_err(|_| EngineError::DimensionMismatch {
                    expected: NUM_FEATURES,
                    actual: values.len(),
                })?;
        Ok(Self(array))
    }

    pub fn as_array(&self) -> &[f64; NUM_FEATURES] {
        &self.0
    }

    /// Normalized (x, y) of a single joint.
    pub fn joint(&self, joint: Joint) -> (f64, f64) {
        let i = 2 * joint.index();
        (self.0[i], self.0[i + 1])
    }
}

impl std::ops::Index<usize> for FeatureVector {
    type Output = f64;

    fn index(&self, idx: usize) -> &f64 {
        &self.0[idx]
    }
}

/// Stateless frame-to-feature converter.
#[derive(Clone, Copy, Debug)]
pub struct FeatureExtractor {
    confidence_threshold: f64,
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_JOINT_CONFIDENCE)
    }
}

impl FeatureExtractor {
    pub fn new(confidence_threshold: f64) -> Self {
        Self {
            confidence_threshold,
        }
    }

    pub fn confidence_threshold(&self) -> f64 {
        self.confidence_threshold
    }

    /// Extract a feature vector, or report which joints were not trusted.
    pub fn extract(&self, sample: &JointSample) -> Result<FeatureVector, EngineError> {
        let mut points = [JointPoint::new(0.0, 0.0, 0.0); crate::NUM_JOINTS];
        let mut missing = Vec::new();
        for joint in Joint::ALL {
            match sample.trusted(joint, self.confidence_threshold) {
                Some(p) => points[joint.index()] = *p,
                None => missing.push(joint),
            }
        }
        if !missing.is_empty() {
            return Err(EngineError::MissingJoints { missing });
        }

        let at = |joint: Joint| points[joint.index()];
        let left_hip = at(Joint::LeftHip);
        let right_hip = at(Joint::RightHip);
        let hip_center = midpoint(&left_hip, &right_hip);
        let shoulder_center = midpoint(&at(Joint::LeftShoulder), &at(Joint::RightShoulder));

        let mut scale = distance(hip_center, shoulder_center);
        if scale < MIN_SCALE {
            scale = distance((left_hip.x, left_hip.y), (right_hip.x, right_hip.y)).max(MIN_SCALE);
        }

        let mut values = [0.0; NUM_FEATURES];
        for joint in Joint::ALL {
            let p = at(joint);
            let i = 2 * joint.index();
            values[i] = (p.x - hip_center.0) / scale;
            values[i + 1] = (p.y - hip_center.1) / scale;
        }
        Ok(FeatureVector(values))
    }
}

/// Vertical hip-to-ankle distance in image coordinates.
///
/// Each of hip and ankle height is the mean of whichever sides are trusted; a
/// joint type with neither side trusted contributes `0.5`.
pub fn hip_ankle_distance(sample: &JointSample, confidence_threshold: f64) -> f64 {
    let hip_y = average_y(sample, Joint::LeftHip, Joint::RightHip, confidence_threshold);
    let ankle_y = average_y(sample, Joint::LeftAnkle, Joint::RightAnkle, confidence_threshold);
    (hip_y - ankle_y).abs()
}

fn average_y(sample: &JointSample, left: Joint, right: Joint, threshold: f64) -> f64 {
    match (
        sample.trusted(left, threshold),
        sample.trusted(right, threshold),
    ) {
        (Some(l), Some(r)) => (l.y + r.y) / 2.0,
        (Some(p), None) | (None, Some(p)) => p.y,
        (None, None) => NEUTRAL_JOINT_Y,
    }
}

fn midpoint(a: &JointPoint, b: &JointPoint) -> (f64, f64) {
    ((a.x + b.x) / 2.0, (a.y + b.y) / 2.0)
}

fn distance(a: (f64, f64), b: (f64, f64)) -> f64 {
    (a.0 - b.0).hypot(a.1 - b.1)
}
