// src/models/ou_process.rs
use super::model::{ModelDimensions, SystemEvaluator};
use crate::error::{validation::*, SdeResult};
use ndarray::{ArrayView1, ArrayViewMut1, ArrayViewMut2};

/// Ornstein-Uhlenbeck process `dX = θ(μ − X) dt + σ dW` with barrier roots `X − b`
///
/// The state is unconstrained (no physical components).
#[derive(Debug, Clone)]
pub struct OuProcess {
    pub theta: f64,
    pub mu: f64,
    pub sigma: f64,
    pub barriers: Vec<f64>,
}

impl OuProcess {
    pub fn new(theta: f64, mu: f64, sigma: f64) -> SdeResult<Self> {
        validate_positive("theta", theta)?;
        validate_finite("mu", mu)?;
        validate_non_negative("sigma", sigma)?;
        Ok(OuProcess {
            theta,
            mu,
            sigma,
            barriers: Vec::new(),
        })
    }

    pub fn with_barrier(mut self, level: f64) -> Self {
        self.barriers.push(level);
        self
    }

    /// Exact mean `E[X_t] = μ + (x0 − μ) e^{−θt}`
    pub fn exact_mean(&self, x0: f64, t: f64) -> f64 {
        self.mu + (x0 - self.mu) * (-self.theta * t).exp()
    }

    /// Exact variance `σ²/(2θ) (1 − e^{−2θt})`
    pub fn exact_variance(&self, t: f64) -> f64 {
        self.sigma * self.sigma / (2.0 * self.theta) * (1.0 - (-2.0 * self.theta * t).exp())
    }
}

impl SystemEvaluator for OuProcess {
    fn dimensions(&self) -> ModelDimensions {
        ModelDimensions {
            variables: 1,
            noise_sources: 1,
            roots: self.barriers.len(),
            physical: Vec::new(),
            discrete_roots: Vec::new(),
        }
    }

    fn eval_rate(&self, _time: f64, state: ArrayView1<f64>, mut rates: ArrayViewMut1<f64>) {
        rates[0] = self.theta * (self.mu - state[0]);
    }

    fn eval_noise(&self, _time: f64, _state: ArrayView1<f64>, mut noise: ArrayViewMut2<f64>) {
        noise[[0, 0]] = self.sigma;
    }

    fn eval_roots(&self, _time: f64, state: ArrayView1<f64>, mut roots: ArrayViewMut1<f64>) {
        for (root, barrier) in roots.iter_mut().zip(&self.barriers) {
            *root = state[0] - barrier;
        }
    }
}
