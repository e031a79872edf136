//! Replay of recorded keypoints.
//!
//! Input is JSON lines, one frame per line, in capture order:
//!
//! ```text
//! {"joints": {"left_shoulder": {"x": 0.44, "y": 0.31, "confidence": 0.93}, ...}}
//! null
//! ```
//!
//! `null` is a frame where the detector found nobody. Joints missing from the
//! map are absent for that frame. Blank lines are skipped; unknown fields are
//! ignored so recordings can carry extra metadata.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::pose::{Joint, JointPoint, JointSample, PoseFrame, PoseProvider};

/// On-disk form of one detected frame.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameRecord {
    pub joints: BTreeMap<Joint, JointPoint>,
}

impl FrameRecord {
    pub fn from_sample(sample: &JointSample) -> Self {
        let joints = Joint::ALL
            .into_iter()
            .filter_map(|joint| sample.get(joint).map(|p| (joint, *p)))
            .collect();
        Self { joints }
    }

    pub fn into_sample(self) -> JointSample {
        self.joints
            .into_iter()
            .fold(JointSample::new(), |sample, (joint, point)| {
                sample.with_joint(joint, point)
            })
    }

    /// Encode a frame as one JSON line (without the newline).
    pub fn encode_frame(frame: &PoseFrame) -> Result<String> {
        let record = frame.sample().map(Self::from_sample);
        Ok(serde_json::to_string(&record)?)
    }
}

pub struct JsonlReplayProvider {
    reader: Box<dyn BufRead + Send>,
    source: String,
    line_number: u64,
}

impl JsonlReplayProvider {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("failed to open keypoint recording {}", path.display()))?;
        Ok(Self::from_reader(
            BufReader::new(file),
            path.display().to_string(),
        ))
    }

    pub fn from_reader<R: BufRead + Send + 'static>(reader: R, source: impl Into<String>) -> Self {
        Self {
            reader: Box::new(reader),
            source: source.into(),
            line_number: 0,
        }
    }

    pub fn lines_read(&self) -> u64 {
        self.line_number
    }
}

impl PoseProvider for JsonlReplayProvider {
    fn name(&self) -> &'static str {
        "jsonl-replay"
    }

    fn next_frame(&mut self) -> Result<Option<PoseFrame>> {
        let mut line = String::new();
        loop {
            line.clear();
            let read = self
                .reader
                .read_line(&mut line)
                .with_context(|| format!("failed to read {}", self.source))?;
            if read == 0 {
                return Ok(None);
            }
            self.line_number += 1;
            if !line.trim().is_empty() {
                break;
            }
        }

        let record: Option<FrameRecord> = serde_json::from_str(line.trim()).map_err(|e| {
            anyhow!(
                "{} line {}: invalid frame record: {}",
                self.source,
                self.line_number,
                e
            )
        })?;
        Ok(Some(match record {
            Some(record) => PoseFrame::Detected(record.into_sample()),
            None => PoseFrame::NoDetection,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn provider(text: &str) -> JsonlReplayProvider {
        JsonlReplayProvider::from_reader(Cursor::new(text.to_string()), "test")
    }

    #[test]
    fn reads_detected_and_empty_frames() {
        let mut p = provider(
            "{\"joints\": {\"left_knee\": {\"x\": 0.4, \"y\": 0.7, \"confidence\": 0.8}}, \"t\": 1}\n\
             \n\
             null\n",
        );
        let first = p.next_frame().unwrap().unwrap();
        let sample = first.sample().unwrap();
        assert_eq!(sample.get(Joint::LeftKnee), Some(&JointPoint::new(0.4, 0.7, 0.8)));
        assert_eq!(sample.get(Joint::RightKnee), None);

        assert_eq!(p.next_frame().unwrap(), Some(PoseFrame::NoDetection));
        assert_eq!(p.lines_read(), 3);
        assert_eq!(p.next_frame().unwrap(), None);
    }

    #[test]
    fn malformed_line_reports_position() {
        let mut p = provider("null\n{\"joints\": {\"elbow\": {}}}\n");
        p.next_frame().unwrap();
        let err = p.next_frame().unwrap_err().to_string();
        assert!(err.contains("line 2"), "{}", err);
    }

    #[test]
    fn encoded_frames_replay_identically() {
        let sample = JointSample::new()
            .with_joint(Joint::LeftHip, JointPoint::new(0.46, 0.5, 0.9))
            .with_joint(Joint::RightAnkle, JointPoint::new(0.54, 0.9, 0.7));
        let frames = vec![PoseFrame::Detected(sample), PoseFrame::NoDetection];
        let text: String = frames
            .iter()
            .map(|f| FrameRecord::encode_frame(f).unwrap() + "\n")
            .collect();

        let mut p = provider(&text);
        for expected in &frames {
            assert_eq!(p.next_frame().unwrap().as_ref(), Some(expected));
        }
    }
}
