//! Generated squat stream.
//!
//! Produces a fixed body seen from the front: standing pauses alternating with
//! cosine-shaped squat cycles. Optional noise, dropouts and a knee-cave fault
//! make the stream useful for exercising the segmenter and scorer without a
//! camera. Output is deterministic for a given seed.

use anyhow::{anyhow, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::pose::{Joint, JointPoint, JointSample, PoseFrame, PoseProvider};

const ANKLE_Y: f64 = 0.9;
const TORSO_LENGTH: f64 = 0.2;
const HIP_HALF_WIDTH: f64 = 0.04;
const SHOULDER_HALF_WIDTH: f64 = 0.06;
const STANCE_HALF_WIDTH: f64 = 0.05;
/// Knees track slightly outward at full depth.
const KNEE_TRACK_OUT: f64 = 0.02;
const CONFIDENCE: f64 = 0.9;

#[derive(Clone, Debug, PartialEq)]
pub struct SyntheticConfig {
    /// Repetitions to generate. 0 streams forever.
    pub reps: u32,
    pub frames_per_rep: u32,
    /// Standing frames before each rep and after the last one.
    pub pause_frames: u32,
    /// Hip-ankle distance while standing.
    pub standing_depth: f64,
    /// Hip-ankle distance at the bottom of a rep.
    pub bottom_depth: f64,
    /// Uniform positional noise amplitude.
    pub noise: f64,
    /// Probability that a frame has no detection.
    pub dropout_probability: f64,
    /// Inward knee displacement at full depth (form fault).
    pub knee_cave: f64,
    pub seed: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            reps: 5,
            frames_per_rep: 45,
            pause_frames: 15,
            standing_depth: 0.40,
            bottom_depth: 0.18,
            noise: 0.0,
            dropout_probability: 0.0,
            knee_cave: 0.0,
            seed: 7,
        }
    }
}

impl SyntheticConfig {
    /// Parse `name?key=value&...` (the part after `stub://`).
    pub fn from_query(rest: &str) -> Result<Self> {
        let mut config = Self::default();
        let Some((_, query)) = rest.split_once('?') else {
            return Ok(config);
        };
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("stub parameter {:?} must be key=value", pair))?;
            match key {
                "reps" => config.reps = parse_param(key, value)?,
                "seed" => config.seed = parse_param(key, value)?,
                "noise" => config.noise = parse_param(key, value)?,
                "dropout" => config.dropout_probability = parse_param(key, value)?,
                "knee_cave" => config.knee_cave = parse_param(key, value)?,
                other => return Err(anyhow!("unknown stub parameter {}", other)),
            }
        }
        if !(0.0..=1.0).contains(&config.dropout_probability) {
            return Err(anyhow!("stub dropout must be within 0..=1"));
        }
        Ok(config)
    }
}

fn parse_param<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| anyhow!("stub parameter {} has invalid value {:?}", key, value))
}

pub struct SyntheticSquatProvider {
    config: SyntheticConfig,
    rng: StdRng,
    frame_index: u64,
}

impl SyntheticSquatProvider {
    pub fn new(config: SyntheticConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            config,
            rng,
            frame_index: 0,
        }
    }

    fn cycle_len(&self) -> u64 {
        u64::from(self.config.pause_frames) + u64::from(self.config.frames_per_rep)
    }

    fn total_frames(&self) -> Option<u64> {
        match self.config.reps {
            0 => None,
            reps => Some(u64::from(reps) * self.cycle_len() + u64::from(self.config.pause_frames)),
        }
    }

    /// Squat progress in 0..=1 (0 standing, 1 full depth) for a frame index.
    fn progress(&self, index: u64) -> f64 {
        let pos = index % self.cycle_len();
        let pause = u64::from(self.config.pause_frames);
        if pos < pause || self.config.frames_per_rep == 0 {
            return 0.0;
        }
        let phase = (pos - pause) as f64 / f64::from(self.config.frames_per_rep);
        (1.0 - (2.0 * std::f64::consts::PI * phase).cos()) / 2.0
    }

    fn sample_at(&mut self, progress: f64) -> JointSample {
        let c = &self.config;
        let depth = c.standing_depth - (c.standing_depth - c.bottom_depth) * progress;
        let hip_y = ANKLE_Y - depth;
        let knee_y = hip_y + (ANKLE_Y - hip_y) * 0.5;
        let knee_offset = STANCE_HALF_WIDTH + KNEE_TRACK_OUT * progress - c.knee_cave * progress;
        let center = 0.5;

        let layout = [
            (Joint::LeftShoulder, center - SHOULDER_HALF_WIDTH, hip_y - TORSO_LENGTH),
            (Joint::RightShoulder, center + SHOULDER_HALF_WIDTH, hip_y - TORSO_LENGTH),
            (Joint::LeftHip, center - HIP_HALF_WIDTH, hip_y),
            (Joint::RightHip, center + HIP_HALF_WIDTH, hip_y),
            (Joint::LeftKnee, center - knee_offset, knee_y),
            (Joint::RightKnee, center + knee_offset, knee_y),
            (Joint::LeftAnkle, center - STANCE_HALF_WIDTH, ANKLE_Y),
            (Joint::RightAnkle, center + STANCE_HALF_WIDTH, ANKLE_Y),
        ];

        let noise = c.noise;
        let mut sample = JointSample::new();
        for (joint, x, y) in layout {
            let (dx, dy) = if noise > 0.0 {
                (
                    self.rng.gen_range(-noise..=noise),
                    self.rng.gen_range(-noise..=noise),
                )
            } else {
                (0.0, 0.0)
            };
            sample.set(joint, Some(JointPoint::new(x + dx, y + dy, CONFIDENCE)));
        }
        sample
    }
}

impl PoseProvider for SyntheticSquatProvider {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn next_frame(&mut self) -> Result<Option<PoseFrame>> {
        if let Some(total) = self.total_frames() {
            if self.frame_index >= total {
                return Ok(None);
            }
        }
        let index = self.frame_index;
        self.frame_index += 1;

        if self.config.dropout_probability > 0.0
            && self.rng.gen_bool(self.config.dropout_probability)
        {
            return Ok(Some(PoseFrame::NoDetection));
        }
        let progress = self.progress(index);
        Ok(Some(PoseFrame::Detected(self.sample_at(progress))))
    }

    fn warm_up(&mut self) -> Result<()> {
        log::info!(
            "synthetic provider: reps={} frames_per_rep={} noise={} dropout={} knee_cave={} seed={}",
            self.config.reps,
            self.config.frames_per_rep,
            self.config.noise,
            self.config.dropout_probability,
            self.config.knee_cave,
            self.config.seed
        );
        Ok(())
    }
}
