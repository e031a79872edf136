//! Trained model parameters and their serialized form.
//!
//! The offline trainer writes a JSON document with camelCase keys. Loading
//! validates every structural constraint up front so the scorer never has to
//! re-check dimensions per call.

use anyhow::Result;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::borrow::Cow;
use std::path::Path;

use super::emission::GaussianEmission;
use crate::{EngineError, NUM_FEATURES};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelFile {
    num_states: usize,
    num_features: usize,
    log_prior: Vec<Option<LogValue>>,
    log_trans: Vec<Vec<Option<LogValue>>>,
    emissions: Vec<EmissionFile>,
    mean_log_likelihood: f64,
    std_log_likelihood: f64,
    threshold_sigma: f64,
}

#[derive(Debug, Deserialize)]
struct EmissionFile {
    means: Vec<f64>,
    stds: Vec<f64>,
}

/// A log-probability as it may appear on disk. `null` and the strings
/// "-Infinity" / "-inf" / "-infinity" stand for log(0); bare non-finite tokens
/// are quoted into strings by `quote_non_finite` before parsing.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LogValue {
    Number(f64),
    Text(String),
}

fn decode_log(value: Option<LogValue>, what: &str) -> Result<f64, EngineError> {
    let v = match value {
        None => f64::NEG_INFINITY,
        Some(LogValue::Number(v)) => v,
        Some(LogValue::Text(s)) => match s.trim() {
            "-Infinity" | "-inf" | "-infinity" => f64::NEG_INFINITY,
            other => {
                return Err(EngineError::model_load(format!(
                    "{} has non-numeric value {:?}",
                    what, other
                )))
            }
        },
    };
    Ok(v)
}

/// Python's `json.dump` writes bare `-Infinity`, `Infinity` and `NaN`, which
/// serde_json rejects. Quote them (outside string literals) so they reach
/// `LogValue::Text`.
fn quote_non_finite(raw: &str) -> Cow<'_, str> {
    const TOKENS: [&str; 3] = ["-Infinity", "Infinity", "NaN"];

    let mut out = String::with_capacity(raw.len() + 16);
    let mut rest = raw;
    let mut in_string = false;
    let mut escaped = false;
    let mut changed = false;
    while let Some(c) = rest.chars().next() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
        } else if c == '"' {
            in_string = true;
        } else if let Some(token) = TOKENS.iter().find(|t| rest.starts_with(**t)) {
            out.push('"');
            out.push_str(token);
            out.push('"');
            rest = &rest[token.len()..];
            changed = true;
            continue;
        }
        out.push(c);
        rest = &rest[c.len_utf8()..];
    }
    if changed {
        Cow::Owned(out)
    } else {
        Cow::Borrowed(raw)
    }
}

fn check_log_prob(v: f64, what: &str) -> Result<(), EngineError> {
    if v.is_nan() || v > 0.0 {
        return Err(EngineError::model_load(format!(
            "{} must be a log-probability (<= 0 or -inf), got {}",
            what, v
        )));
    }
    Ok(())
}

/// Trained HMM: priors, transitions and per-state emissions, all in log space,
/// plus the training-set likelihood statistics used to normalize scores.
#[derive(Clone, Debug)]
pub struct HmmParameters {
    log_prior: Vec<f64>,
    log_trans: Vec<Vec<f64>>,
    emissions: Vec<GaussianEmission>,
    mean_log_likelihood: f64,
    std_log_likelihood: f64,
    threshold_sigma: f64,
}

impl HmmParameters {
    /// Assemble and validate parameters.
    pub fn new(
        log_prior: Vec<f64>,
        log_trans: Vec<Vec<f64>>,
        emissions: Vec<GaussianEmission>,
        mean_log_likelihood: f64,
        std_log_likelihood: f64,
        threshold_sigma: f64,
    ) -> Result<Self, EngineError> {
        let num_states = log_prior.len();
        if num_states == 0 {
            return Err(EngineError::model_load("model must have at least one state"));
        }
        for (s, v) in log_prior.iter().enumerate() {
            check_log_prob(*v, &format!("logPrior[{}]", s))?;
        }
        if log_trans.len() != num_states {
            return Err(EngineError::model_load(format!(
                "logTrans has {} rows, expected {}",
                log_trans.len(),
                num_states
            )));
        }
        for (from, row) in log_trans.iter().enumerate() {
            if row.len() != num_states {
                return Err(EngineError::model_load(format!(
                    "logTrans row {} has {} entries, expected {} (matrix must be square)",
                    from,
                    row.len(),
                    num_states
                )));
            }
            for (to, v) in row.iter().enumerate() {
                check_log_prob(*v, &format!("logTrans[{}][{}]", from, to))?;
            }
        }
        if emissions.len() != num_states {
            return Err(EngineError::model_load(format!(
                "{} emissions for {} states",
                emissions.len(),
                num_states
            )));
        }
        if !mean_log_likelihood.is_finite() {
            return Err(EngineError::model_load("meanLogLikelihood must be finite"));
        }
        if !std_log_likelihood.is_finite() || std_log_likelihood <= 0.0 {
            return Err(EngineError::model_load(
                "stdLogLikelihood must be finite and greater than zero",
            ));
        }
        if !threshold_sigma.is_finite() || threshold_sigma < 0.0 {
            return Err(EngineError::model_load(
                "thresholdSigma must be finite and non-negative",
            ));
        }
        Ok(Self {
            log_prior,
            log_trans,
            emissions,
            mean_log_likelihood,
            std_log_likelihood,
            threshold_sigma,
        })
    }

    /// Parse and validate the trainer's JSON output.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let file: ModelFile = serde_json::from_str(&quote_non_finite(raw))
            .map_err(|e| EngineError::model_load(format!("invalid model JSON: {}", e)))?;
        Ok(Self::from_file(file)?)
    }

    /// Read a model file from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            EngineError::model_load(format!("failed to read {}: {}", path.display(), e))
        })?;
        let params = Self::from_json_str(&raw)?;
        log::info!(
            "loaded model {} states={} fingerprint={}",
            path.display(),
            params.num_states(),
            params.fingerprint_hex()
        );
        Ok(params)
    }

    fn from_file(file: ModelFile) -> Result<Self, EngineError> {
        if file.num_features != NUM_FEATURES {
            return Err(EngineError::model_load(format!(
                "numFeatures is {}, feature extractor produces {}",
                file.num_features, NUM_FEATURES
            )));
        }
        if file.log_prior.len() != file.num_states {
            return Err(EngineError::model_load(format!(
                "logPrior has {} entries, numStates is {}",
                file.log_prior.len(),
                file.num_states
            )));
        }

        let log_prior = file
            .log_prior
            .into_iter()
            .enumerate()
            .map(|(s, v)| decode_log(v, &format!("logPrior[{}]", s)))
            .collect::<Result<Vec<_>, _>>()?;
        let log_trans = file
            .log_trans
            .into_iter()
            .enumerate()
            .map(|(from, row)| {
                row.into_iter()
                    .enumerate()
                    .map(|(to, v)| decode_log(v, &format!("logTrans[{}][{}]", from, to)))
                    .collect::<Result<Vec<_>, _>>()
            })
            .collect::<Result<Vec<_>, _>>()?;
        let emissions = file
            .emissions
            .iter()
            .enumerate()
            .map(|(s, e)| {
                if e.means.iter().chain(e.stds.iter()).any(|v| !v.is_finite()) {
                    return Err(EngineError::model_load(format!(
                        "emission {} has non-finite parameters",
                        s
                    )));
                }
                if e.stds.iter().any(|sd| *sd < 0.0) {
                    return Err(EngineError::model_load(format!(
                        "emission {} has a negative std",
                        s
                    )));
                }
                GaussianEmission::new(&e.means, &e.stds)
                    .map_err(|err| EngineError::model_load(format!("emission {}: {}", s, err)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Self::new(
            log_prior,
            log_trans,
            emissions,
            file.mean_log_likelihood,
            file.std_log_likelihood,
            file.threshold_sigma,
        )
    }

    pub fn num_states(&self) -> usize {
        self.log_prior.len()
    }

    pub fn num_features(&self) -> usize {
        NUM_FEATURES
    }

    pub fn log_prior(&self) -> &[f64] {
        &self.log_prior
    }

    /// Log transition probability `from -> to`.
    pub fn log_trans(&self, from: usize, to: usize) -> f64 {
        self.log_trans[from][to]
    }

    pub fn emission(&self, state: usize) -> &GaussianEmission {
        &self.emissions[state]
    }

    pub fn mean_log_likelihood(&self) -> f64 {
        self.mean_log_likelihood
    }

    pub fn std_log_likelihood(&self) -> f64 {
        self.std_log_likelihood
    }

    pub fn threshold_sigma(&self) -> f64 {
        self.threshold_sigma
    }

    /// SHA-256 over every parameter value, in a fixed order.
    ///
    /// Independent of JSON formatting, so two files with the same numbers
    /// share a fingerprint.
    pub fn fingerprint(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(b"squat-form-hmm:v1");
        hasher.update((self.num_states() as u64).to_le_bytes());
        for v in &self.log_prior {
            hasher.update(v.to_le_bytes());
        }
        for row in &self.log_trans {
            for v in row {
                hasher.update(v.to_le_bytes());
            }
        }
        for e in &self.emissions {
            for v in e.means().iter().chain(e.stds().iter()) {
                hasher.update(v.to_le_bytes());
            }
        }
        hasher.update(self.mean_log_likelihood.to_le_bytes());
        hasher.update(self.std_log_likelihood.to_le_bytes());
        hasher.update(self.threshold_sigma.to_le_bytes());
        hasher.finalize().into()
    }

    pub fn fingerprint_hex(&self) -> String {
        hex::encode(self.fingerprint())
    }
}
