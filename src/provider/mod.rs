//! Pose providers.
//!
//! - `SyntheticSquatProvider` (`stub://...`): generated squat cycles for tests
//!   and demos.
//! - `JsonlReplayProvider`: keypoints recorded by an external detector, one
//!   JSON document per line.
//!
//! Providers only read local data. Remote URL schemes are rejected.

pub mod replay;
pub mod synthetic;

use anyhow::{anyhow, Result};
use std::path::Path;

use crate::pose::PoseProvider;

pub use replay::{FrameRecord, JsonlReplayProvider};
pub use synthetic::{SyntheticConfig, SyntheticSquatProvider};

/// Open a provider for a source string.
///
/// `stub://name[?key=value&...]` yields a synthetic stream; anything else must
/// be a local JSON-lines file path.
pub fn open_provider(source: &str) -> Result<Box<dyn PoseProvider>> {
    if source.trim().is_empty() {
        return Err(anyhow!("pose source must not be empty"));
    }
    if let Some(rest) = source.strip_prefix("stub://") {
        let config = SyntheticConfig::from_query(rest)?;
        return Ok(Box::new(SyntheticSquatProvider::new(config)));
    }
    if source.contains("://") {
        return Err(anyhow!(
            "pose source {} is not supported (only stub:// and local paths)",
            source
        ));
    }
    Ok(Box::new(JsonlReplayProvider::open(Path::new(source))?))
}
