// src/models/decay.rs
use super::model::{ModelDimensions, SystemEvaluator};
use crate::error::{validation::*, SdeResult};
use ndarray::{ArrayView1, ArrayViewMut1, ArrayViewMut2};

/// First-order decay with additive noise
///
/// ```text
/// dX_t = -k X_t dt + σ dW_t
/// ```
///
/// Each threshold `c_i` contributes a root `X - c_i`. The single state
/// variable is physically constrained to stay non-negative. With `σ = 0`
/// the model has no noise sources and integrates deterministically.
#[derive(Debug, Clone)]
pub struct LinearDecay {
    pub k: f64,
    pub sigma: f64,
    pub thresholds: Vec<f64>,
}

impl LinearDecay {
    pub fn new(k: f64, sigma: f64) -> SdeResult<Self> {
        validate_finite("k", k)?;
        validate_non_negative("sigma", sigma)?;
        Ok(LinearDecay {
            k,
            sigma,
            thresholds: Vec::new(),
        })
    }

    pub fn with_threshold(mut self, level: f64) -> Self {
        self.thresholds.push(level);
        self
    }

    /// Deterministic solution `x0 e^{-kt}`
    pub fn exact(&self, x0: f64, t: f64) -> f64 {
        x0 * (-self.k * t).exp()
    }
}

impl SystemEvaluator for LinearDecay {
    fn dimensions(&self) -> ModelDimensions {
        ModelDimensions {
            variables: 1,
            noise_sources: usize::from(self.sigma > 0.0),
            roots: self.thresholds.len(),
            physical: vec![0],
            discrete_roots: Vec::new(),
        }
    }

    fn eval_rate(&self, _time: f64, state: ArrayView1<f64>, mut rates: ArrayViewMut1<f64>) {
        rates[0] = -self.k * state[0];
    }

    fn eval_noise(&self, _time: f64, _state: ArrayView1<f64>, mut noise: ArrayViewMut2<f64>) {
        if self.sigma > 0.0 {
            noise[[0, 0]] = self.sigma;
        }
    }

    fn eval_roots(&self, _time: f64, state: ArrayView1<f64>, mut roots: ArrayViewMut1<f64>) {
        for (root, level) in roots.iter_mut().zip(&self.thresholds) {
            *root = state[0] - level;
        }
    }
}
