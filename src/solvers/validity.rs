// src/solvers/validity.rs
//! Physical-validity adaptor and internal step-size control
//!
//! Concentrations and particle numbers must never go negative. Instead of
//! clipping an unphysical candidate, the internal step is halved and the
//! step rebuilt from the same starting point. After `grow_after`
//! consecutive successful steps the step size doubles again, never beyond
//! the target derived from the current external step.

use crate::models::model::SystemEvaluator;
use ndarray::ArrayView1;

/// A constrained component that failed the physical-validity predicate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Violation {
    pub component: usize,
    pub value: f64,
}

/// Checks the physically constrained subset of the state vector
#[derive(Debug, Clone, Default)]
pub struct PhysicalValidity {
    indices: Vec<usize>,
    enabled: bool,
}

impl PhysicalValidity {
    pub fn new(indices: Vec<usize>, enabled: bool) -> Self {
        PhysicalValidity { indices, enabled }
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled && !self.indices.is_empty()
    }

    /// First constrained component for which the model's predicate fails
    pub fn check<E: SystemEvaluator + ?Sized>(
        &self,
        evaluator: &E,
        state: ArrayView1<f64>,
    ) -> Option<Violation> {
        if !self.enabled {
            return None;
        }
        self.indices
            .iter()
            .find(|&&i| !evaluator.is_physical(i, state[i]))
            .map(|&i| Violation {
                component: i,
                value: state[i],
            })
    }

    /// Smallest value among the constrained components
    pub fn smallest_value(&self, state: ArrayView1<f64>) -> Option<f64> {
        self.indices
            .iter()
            .map(|&i| state[i])
            .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.min(v))))
    }
}

/// The step size could not be reduced any further
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepFloor {
    pub min_step: f64,
}

/// Adaptive internal step size with shrink-on-violation and hysteresis growth
#[derive(Debug, Clone)]
pub struct StepSizeController {
    pub min_step: f64,
    pub max_step: f64,
    pub initial_fraction: f64,
    pub grow_after: usize,
    current: Option<f64>,
    target: f64,
    streak: usize,
}

impl StepSizeController {
    pub fn new(min_step: f64, max_step: f64, initial_fraction: f64, grow_after: usize) -> Self {
        StepSizeController {
            min_step,
            max_step,
            initial_fraction,
            grow_after,
            current: None,
            target: max_step,
            streak: 0,
        }
    }

    /// Discard all step-size learning
    pub fn reset(&mut self) {
        self.current = None;
        self.streak = 0;
    }

    /// Prepare for an external step of `delta_t`; returns the growth target
    pub fn begin(&mut self, delta_t: f64) -> f64 {
        self.target = (self.initial_fraction * delta_t).clamp(self.min_step, self.max_step);
        self.current = Some(match self.current {
            Some(h) => h.min(self.target),
            None => self.target,
        });
        self.target
    }

    /// Current internal step size (before truncation to the remaining interval)
    pub fn current(&self) -> Option<f64> {
        self.current
    }

    /// Step size to attempt when `remaining` time is left in the external step
    pub fn proposal(&self, remaining: f64) -> f64 {
        self.current.unwrap_or(self.target).min(remaining)
    }

    /// Halve after a rejected attempt of size `attempted`
    pub fn shrink(&mut self, attempted: f64) -> Result<f64, StepFloor> {
        self.streak = 0;
        if attempted <= self.min_step {
            return Err(StepFloor {
                min_step: self.min_step,
            });
        }
        let h = (0.5 * attempted).max(self.min_step);
        self.current = Some(h);
        Ok(h)
    }

    /// Record an accepted internal step; may grow the step size
    pub fn accept(&mut self) {
        self.streak += 1;
        if self.streak < self.grow_after {
            return;
        }
        self.streak = 0;
        if let Some(h) = self.current {
            if h < self.target {
                self.current = Some((2.0 * h).min(self.target));
            }
        }
    }
}
