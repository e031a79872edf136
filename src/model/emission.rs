use crate::features::FeatureVector;
use crate::{EngineError, NUM_FEATURES};

/// Floor applied to every trained standard deviation.
pub const MIN_STD: f64 = 1e-6;

const LN_2PI: f64 = 1.837_877_066_409_345_5;

/// Diagonal-covariance Gaussian over the feature space, one per hidden state.
#[derive(Clone, Debug, PartialEq)]
pub struct GaussianEmission {
    means: [f64; NUM_FEATURES],
    stds: [f64; NUM_FEATURES],
    /// Sum over dimensions of `-0.5 * ln(2 * pi * std^2)`, fixed at construction.
    log_norm: f64,
}

impl GaussianEmission {
    /// Build from trained means and standard deviations.
    ///
    /// Both slices must have exactly `NUM_FEATURES` entries. Standard deviations
    /// are floored at `MIN_STD` so no dimension can collapse to a singularity.
    pub fn new(means: &[f64], stds: &[f64]) -> Result<Self, EngineError> {
        let means: [f64; NUM_FEATURES] = to_array(means)?;
        let raw_stds: [f64; NUM_FEATURES] = to_array(stds)?;
        let stds = raw_stds.map(|sd| sd.max(MIN_STD));
        let log_norm = stds
            .iter()
            .map(|sd| -0.5 * (LN_2PI + 2.0 * sd.ln()))
            .sum();
        Ok(Self {
            means,
            stds,
            log_norm,
        })
    }

    pub fn means(&self) -> &[f64; NUM_FEATURES] {
        &self.means
    }

    pub fn stds(&self) -> &[f64; NUM_FEATURES] {
        &self.stds
    }

    /// Log density of `x` under this state.
    pub fn log_prob(&self, x: &FeatureVector) -> f64 {
        let quad: f64 = x
            .as_array()
            .iter()
            .zip(self.means.iter().zip(self.stds.iter()))
            .map(|(v, (mu, sd))| {
                let d = (v - mu) / sd;
                0.5 * d * d
            })
            .sum();
        self.log_norm - quad
    }

    /// Per-dimension standardized deviation. Diagnostic only.
    pub fn z_scores(&self, x: &FeatureVector) -> [f64; NUM_FEATURES] {
        let mut z = [0.0; NUM_FEATURES];
        for (i, out) in z.iter_mut().enumerate() {
            *out = (x[i] - self.means[i]) / self.stds[i];
        }
        z
    }
}

fn to_array(values: &[f64]) -> Result<[f64; NUM_FEATURES], EngineError> {
    values
        .try_into()
        .map_err(|_| EngineError::DimensionMismatch {
            expected: NUM_FEATURES,
            actual: values.len(),
        })
}
