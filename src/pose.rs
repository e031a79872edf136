//! Pose input surface.
//!
//! - `Joint`: the 8 tracked joints, in the fixed order shared by feature
//!   extraction and the trained model's feature indexing.
//! - `JointSample`: one frame of keypoints, each joint present or absent.
//! - `PoseProvider`: the capability that yields frames from a detection backend.
//!
//! The core never talks to a detector directly. Anything that can produce
//! confidence-scored 2-D joints per frame can sit behind `PoseProvider`.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::NUM_JOINTS;

/// Tracked joints in feature order.
///
/// Feature index `2 * joint.index()` is x, `2 * joint.index() + 1` is y.
/// Reordering these variants invalidates every trained model.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Joint {
    LeftShoulder,
    RightShoulder,
    LeftHip,
    RightHip,
    LeftKnee,
    RightKnee,
    LeftAnkle,
    RightAnkle,
}

impl Joint {
    pub const ALL: [Joint; NUM_JOINTS] = [
        Joint::LeftShoulder,
        Joint::RightShoulder,
        Joint::LeftHip,
        Joint::RightHip,
        Joint::LeftKnee,
        Joint::RightKnee,
        Joint::LeftAnkle,
        Joint::RightAnkle,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(idx: usize) -> Option<Self> {
        Self::ALL.get(idx).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            Joint::LeftShoulder => "left_shoulder",
            Joint::RightShoulder => "right_shoulder",
            Joint::LeftHip => "left_hip",
            Joint::RightHip => "right_hip",
            Joint::LeftKnee => "left_knee",
            Joint::RightKnee => "right_knee",
            Joint::LeftAnkle => "left_ankle",
            Joint::RightAnkle => "right_ankle",
        }
    }
}

impl std::fmt::Display for Joint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A detected keypoint in normalized image coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct JointPoint {
    pub x: f64,
    pub y: f64,
    /// Detector confidence in 0..=1.
    pub confidence: f64,
}

impl JointPoint {
    pub fn new(x: f64, y: f64, confidence: f64) -> Self {
        Self { x, y, confidence }
    }
}

/// One frame of detected joints. Absent joints are `None`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct JointSample {
    points: [Option<JointPoint>; NUM_JOINTS],
}

impl JointSample {
    /// An empty sample with every joint absent.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter.
    pub fn with_joint(mut self, joint: Joint, point: JointPoint) -> Self {
        self.set(joint, Some(point));
        self
    }

    pub fn set(&mut self, joint: Joint, point: Option<JointPoint>) {
        self.points[joint.index()] = point;
    }

    pub fn get(&self, joint: Joint) -> Option<&JointPoint> {
        self.points[joint.index()].as_ref()
    }

    /// The joint's point if present with confidence strictly above `threshold`.
    pub fn trusted(&self, joint: Joint, threshold: f64) -> Option<&JointPoint> {
        self.get(joint).filter(|p| p.confidence > threshold)
    }

    /// Joints that are absent or not above `threshold`, in feature order.
    pub fn untrusted_joints(&self, threshold: f64) -> Vec<Joint> {
        Joint::ALL
            .into_iter()
            .filter(|&joint| self.trusted(joint, threshold).is_none())
            .collect()
    }
}

/// What a provider yields for one camera frame.
#[derive(Clone, Debug, PartialEq)]
pub enum PoseFrame {
    Detected(JointSample),
    /// The detector ran but found no subject.
    NoDetection,
}

impl PoseFrame {
    pub fn sample(&self) -> Option<&JointSample> {
        match self {
            PoseFrame::Detected(sample) => Some(sample),
            PoseFrame::NoDetection => None,
        }
    }
}

/// Pose provider trait.
///
/// Implementations wrap a detection backend (or a recording of one) and yield
/// frames in strict temporal order. The core performs no reordering or
/// frame-drop correction; skipped upstream frames are simply never seen.
pub trait PoseProvider: Send {
    /// Provider identifier.
    fn name(&self) -> &'static str;

    /// Produce the next frame. `Ok(None)` signals end of stream.
    fn next_frame(&mut self) -> Result<Option<PoseFrame>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
