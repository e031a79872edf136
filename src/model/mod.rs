mod classifier;
mod emission;
mod params;

pub use classifier::{ClassificationResult, HmmClassifier, JointError, SequenceScorer};
pub use emission::{GaussianEmission, MIN_STD};
pub use params::HmmParameters;
