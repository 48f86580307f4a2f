// src/models/model.rs
//! System Evaluator contract
//!
//! The integrator never owns the model. It holds a shared reference to a
//! [`SystemEvaluator`] and calls back into it for drift, diffusion and root
//! values. Evaluations must be deterministic for identical inputs; all
//! randomness is drawn by the integrator itself.

use crate::error::{SdeError, SdeResult};
use ndarray::{ArrayView1, ArrayViewMut1, ArrayViewMut2};

/// Structural dimensions of a model, queried once at `start()`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ModelDimensions {
    /// Number of state variables
    pub variables: usize,
    /// Number of independent noise sources (Wiener processes)
    pub noise_sources: usize,
    /// Number of root (trigger) functions
    pub roots: usize,
    /// State indices subject to the physical-validity predicate
    pub physical: Vec<usize>,
    /// Root indices that only depend on discrete quantities
    pub discrete_roots: Vec<usize>,
}

impl ModelDimensions {
    /// Index lists must address existing state components and roots
    pub fn validate(&self) -> SdeResult<()> {
        if let Some(&index) = self.physical.iter().find(|&&i| i >= self.variables) {
            return Err(SdeError::DimensionMismatch {
                what: format!("physical index {} (state variables)", index),
                expected: self.variables,
                actual: index + 1,
            });
        }
        if let Some(&index) = self.discrete_roots.iter().find(|&&i| i >= self.roots) {
            return Err(SdeError::DimensionMismatch {
                what: format!("discrete root index {} (root functions)", index),
                expected: self.roots,
                actual: index + 1,
            });
        }
        Ok(())
    }
}

pub trait SystemEvaluator {
    fn dimensions(&self) -> ModelDimensions;

    /// Drift `a(t, x)`, one entry per state variable
    fn eval_rate(&self, time: f64, state: ArrayView1<f64>, rates: ArrayViewMut1<f64>);

    /// Diffusion `b(t, x)` as a `variables × noise_sources` matrix; column `k`
    /// multiplies the increment of noise source `k`
    fn eval_noise(&self, time: f64, state: ArrayView1<f64>, noise: ArrayViewMut2<f64>);

    /// Root (trigger) function values
    fn eval_roots(&self, time: f64, state: ArrayView1<f64>, roots: ArrayViewMut1<f64>);

    /// Physical-validity predicate for a constrained state component
    fn is_physical(&self, _index: usize, value: f64) -> bool {
        value >= 0.0
    }
}

impl<T: SystemEvaluator + ?Sized> SystemEvaluator for &T {
    fn dimensions(&self) -> ModelDimensions {
        (**self).dimensions()
    }

    fn eval_rate(&self, time: f64, state: ArrayView1<f64>, rates: ArrayViewMut1<f64>) {
        (**self).eval_rate(time, state, rates)
    }

    fn eval_noise(&self, time: f64, state: ArrayView1<f64>, noise: ArrayViewMut2<f64>) {
        (**self).eval_noise(time, state, noise)
    }

    fn eval_roots(&self, time: f64, state: ArrayView1<f64>, roots: ArrayViewMut1<f64>) {
        (**self).eval_roots(time, state, roots)
    }

    fn is_physical(&self, index: usize, value: f64) -> bool {
        (**self).is_physical(index, value)
    }
}
