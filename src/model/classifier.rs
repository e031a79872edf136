use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::params::HmmParameters;
use crate::features::FeatureVector;
use crate::pose::Joint;
use crate::NUM_FEATURES;

/// Accumulated deviation attributed to one joint over a repetition.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct JointError {
    pub joint: Joint,
    pub error: f64,
}

/// Outcome of scoring one repetition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    /// Decoded hidden state per frame.
    pub path: Vec<usize>,
    /// Log-likelihood of the best path. `-inf` for an empty sequence.
    pub log_likelihood: f64,
    /// Log-likelihood in training standard deviations from the training mean.
    pub z_score: f64,
    pub is_correct: bool,
    /// Joints ordered by descending error.
    pub joint_errors: Vec<JointError>,
}

impl ClassificationResult {
    fn empty() -> Self {
        Self {
            path: Vec::new(),
            log_likelihood: f64::NEG_INFINITY,
            z_score: f64::NEG_INFINITY,
            is_correct: false,
            joint_errors: Vec::new(),
        }
    }

    /// Joint with the largest error, if any frames were scored.
    pub fn worst_joint(&self) -> Option<Joint> {
        self.joint_errors.first().map(|e| e.joint)
    }
}

/// Scores a finished feature sequence.
///
/// Implementations must be pure with respect to the sequence: the segmenter
/// may hand over any number of sequences and expects no carried state.
pub trait SequenceScorer: Send + Sync {
    fn classify(&self, sequence: &[FeatureVector]) -> ClassificationResult;
}

/// Viterbi scorer over shared, immutable trained parameters.
#[derive(Clone, Debug)]
pub struct HmmClassifier {
    params: Arc<HmmParameters>,
    threshold_sigma: f64,
}

impl HmmClassifier {
    pub fn new(params: Arc<HmmParameters>) -> Self {
        let threshold_sigma = params.threshold_sigma();
        Self {
            params,
            threshold_sigma,
        }
    }

    /// Replace the model's correctness cutoff.
    pub fn with_threshold_sigma(mut self, threshold_sigma: f64) -> Self {
        self.threshold_sigma = threshold_sigma;
        self
    }

    pub fn params(&self) -> &HmmParameters {
        &self.params
    }

    pub fn threshold_sigma(&self) -> f64 {
        self.threshold_sigma
    }

    /// Most probable state path and its log-likelihood.
    ///
    /// Ties, both in the recurrence and at termination, go to the lowest state
    /// index. Backpointers are dense for every `t >= 1`, so the backtrace always
    /// covers the whole sequence.
    pub fn viterbi(&self, sequence: &[FeatureVector]) -> (Vec<usize>, f64) {
        let t_len = sequence.len();
        if t_len == 0 {
            return (Vec::new(), f64::NEG_INFINITY);
        }
        let p = &self.params;
        let s_len = p.num_states();

        let mut prev: Vec<f64> = (0..s_len)
            .map(|s| p.log_prior()[s] + p.emission(s).log_prob(&sequence[0]))
            .collect();
        let mut curr = vec![f64::NEG_INFINITY; s_len];
        let mut back = vec![vec![0usize; s_len]; t_len];

        for t in 1..t_len {
            for s in 0..s_len {
                let (best_prev, best_score) =
                    argmax((0..s_len).map(|sp| prev[sp] + p.log_trans(sp, s)));
                back[t][s] = best_prev;
                curr[s] = best_score + p.emission(s).log_prob(&sequence[t]);
            }
            std::mem::swap(&mut prev, &mut curr);
        }

        let (last_state, best_log) = argmax(prev.iter().copied());
        let mut path = vec![0usize; t_len];
        let mut state = last_state;
        path[t_len - 1] = state;
        for t in (1..t_len).rev() {
            state = back[t][state];
            path[t - 1] = state;
        }
        (path, best_log)
    }

    /// Sum of squared z-scores per feature along `path`.
    fn feature_errors(&self, sequence: &[FeatureVector], path: &[usize]) -> [f64; NUM_FEATURES] {
        let mut totals = [0.0; NUM_FEATURES];
        for (x, &state) in sequence.iter().zip(path) {
            let z = self.params.emission(state).z_scores(x);
            for (total, zi) in totals.iter_mut().zip(z.iter()) {
                *total += zi * zi;
            }
        }
        totals
    }
}

impl SequenceScorer for HmmClassifier {
    fn classify(&self, sequence: &[FeatureVector]) -> ClassificationResult {
        if sequence.is_empty() {
            return ClassificationResult::empty();
        }

        let (path, log_likelihood) = self.viterbi(sequence);
        let z_score = (log_likelihood - self.params.mean_log_likelihood())
            / self.params.std_log_likelihood();
        let is_correct = z_score >= -self.threshold_sigma;

        let feature_errors = self.feature_errors(sequence, &path);
        let mut joint_errors: Vec<JointError> = Joint::ALL
            .iter()
            .map(|&joint| {
                let j = joint.index();
                JointError {
                    joint,
                    error: feature_errors[2 * j] + feature_errors[2 * j + 1],
                }
            })
            .collect();
        // stable: equal errors keep joint order
        joint_errors.sort_by(|a, b| b.error.total_cmp(&a.error));

        ClassificationResult {
            path,
            log_likelihood,
            z_score,
            is_correct,
            joint_errors,
        }
    }
}

/// Index and value of the maximum; first index wins ties.
fn argmax(values: impl Iterator<Item = f64>) -> (usize, f64) {
    let mut best = (0, f64::NEG_INFINITY);
    for (i, v) in values.enumerate() {
        if v > best.1 {
            best = (i, v);
        }
    }
    best
}
