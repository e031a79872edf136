use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::segment::SegmenterConfig;
use crate::EngineError;

const DEFAULT_MODEL_PATH: &str = "squat_hmm_model.json";
const DEFAULT_SOURCE: &str = "stub://squats";
const DEFAULT_TARGET_FPS: u32 = 30;

#[derive(Debug, Deserialize, Default)]
struct EngineConfigFile {
    model_path: Option<PathBuf>,
    source: Option<String>,
    target_fps: Option<u32>,
    threshold_sigma: Option<f64>,
    segmenter: Option<SegmenterConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct SegmenterConfigFile {
    joint_confidence_threshold: Option<f64>,
    low_depth_threshold: Option<f64>,
    high_depth_threshold: Option<f64>,
    min_rep_frames: Option<usize>,
    max_rep_frames: Option<usize>,
    max_consecutive_missing_frames: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub model_path: PathBuf,
    /// Pose source: `stub://...` or a local JSON-lines recording.
    pub source: String,
    pub target_fps: u32,
    /// Overrides the model's correctness cutoff when set.
    pub threshold_sigma: Option<f64>,
    pub segmenter: SegmenterConfig,
}

impl EngineConfig {
    /// Defaults, then the file named by `FORM_CONFIG`, then `FORM_*` overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("FORM_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: EngineConfigFile) -> Self {
        let defaults = SegmenterConfig::default();
        let seg = file.segmenter.unwrap_or_default();
        let segmenter = SegmenterConfig {
            joint_confidence_threshold: seg
                .joint_confidence_threshold
                .unwrap_or(defaults.joint_confidence_threshold),
            low_depth_threshold: seg
                .low_depth_threshold
                .unwrap_or(defaults.low_depth_threshold),
            high_depth_threshold: seg
                .high_depth_threshold
                .unwrap_or(defaults.high_depth_threshold),
            min_rep_frames: seg.min_rep_frames.unwrap_or(defaults.min_rep_frames),
            max_rep_frames: seg.max_rep_frames.unwrap_or(defaults.max_rep_frames),
            max_consecutive_missing_frames: seg
                .max_consecutive_missing_frames
                .unwrap_or(defaults.max_consecutive_missing_frames),
        };
        Self {
            model_path: file
                .model_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_PATH)),
            source: file.source.unwrap_or_else(|| DEFAULT_SOURCE.to_string()),
            target_fps: file.target_fps.unwrap_or(DEFAULT_TARGET_FPS),
            threshold_sigma: file.threshold_sigma,
            segmenter,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("FORM_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.model_path = PathBuf::from(path);
            }
        }
        if let Ok(source) = std::env::var("FORM_SOURCE") {
            if !source.trim().is_empty() {
                self.source = source;
            }
        }
        if let Some(fps) = env_parse("FORM_TARGET_FPS")? {
            self.target_fps = fps;
        }
        if let Some(sigma) = env_parse("FORM_THRESHOLD_SIGMA")? {
            self.threshold_sigma = Some(sigma);
        }
        let seg = &mut self.segmenter;
        if let Some(v) = env_parse("FORM_JOINT_CONFIDENCE")? {
            seg.joint_confidence_threshold = v;
        }
        if let Some(v) = env_parse("FORM_LOW_DEPTH")? {
            seg.low_depth_threshold = v;
        }
        if let Some(v) = env_parse("FORM_HIGH_DEPTH")? {
            seg.high_depth_threshold = v;
        }
        if let Some(v) = env_parse("FORM_MIN_REP_FRAMES")? {
            seg.min_rep_frames = v;
        }
        if let Some(v) = env_parse("FORM_MAX_REP_FRAMES")? {
            seg.max_rep_frames = v;
        }
        if let Some(v) = env_parse("FORM_MAX_MISSING_FRAMES")? {
            seg.max_consecutive_missing_frames = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.segmenter.validate()?;
        if self.target_fps == 0 {
            return Err(EngineError::config("target_fps must be greater than zero").into());
        }
        if let Some(sigma) = self.threshold_sigma {
            if !sigma.is_finite() || sigma < 0.0 {
                return Err(
                    EngineError::config("threshold_sigma must be finite and non-negative").into(),
                );
            }
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("{} has invalid value {:?}", key, raw)),
        _ => Ok(None),
    }
}

fn read_config_file(path: &Path) -> Result<EngineConfigFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
