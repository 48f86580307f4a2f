// src/solvers/root_finder.rs
//! Event localization for vectors of root functions
//!
//! # Overview
//!
//! After every internal step the integrator compares the root values at
//! both ends of the step. When at least one enabled root changed sign, the
//! bracket `[t0, t1]` is narrowed until its width drops below
//! `relative_tolerance · (t1 − t0)`:
//!
//! - interpolation steps estimate every crossing root linearly and probe
//!   the earliest estimate;
//! - bisection steps alternate with interpolation steps so the bracket at
//!   least halves every second iteration.
//!
//! The bracket invariant is: no enabled root changes sign on `[t0, a]`,
//! some enabled root changes sign on `[a, b]`. The result is the right end
//! `b`, where the crossing has happened, and every root that changes sign
//! inside the final bracket is reported as fired. Roots crossing within
//! the tolerance of each other therefore fire together.

use crate::error::{SdeError, SdeResult};
use ndarray::{Array1, ArrayView1, ArrayViewMut1};
use tracing::debug;

/// Which roots take part in event detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RootMasking {
    /// Every root is live
    #[default]
    None,
    /// No root can fire
    All,
    /// Roots that only depend on discrete quantities are ignored
    Discrete,
}

/// Per-root enable flags derived from a [`RootMasking`] mode
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RootMask {
    mode: RootMasking,
    enabled: Vec<bool>,
}

impl RootMask {
    pub fn new(mode: RootMasking, roots: usize, discrete: &[usize]) -> Self {
        let enabled = match mode {
            RootMasking::None => vec![true; roots],
            RootMasking::All => vec![false; roots],
            RootMasking::Discrete => (0..roots).map(|i| !discrete.contains(&i)).collect(),
        };
        RootMask { mode, enabled }
    }

    pub fn mode(&self) -> RootMasking {
        self.mode
    }

    pub fn len(&self) -> usize {
        self.enabled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.enabled.is_empty()
    }

    pub fn is_enabled(&self, index: usize) -> bool {
        self.enabled.get(index).copied().unwrap_or(false)
    }

    pub fn any_enabled(&self) -> bool {
        self.enabled.iter().any(|&e| e)
    }

    /// Replace masked root values by the constant `1.0`
    pub fn apply(&self, mut values: ArrayViewMut1<f64>) {
        for (value, &enabled) in values.iter_mut().zip(&self.enabled) {
            if !enabled {
                *value = 1.0;
            }
        }
    }
}

/// Outcome for one root after localization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootStatus {
    Masked,
    Quiet,
    Fired,
}

/// Whether the bracket reached the requested width
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RootConfidence {
    #[default]
    Converged,
    /// Iteration limit reached; the time is the best available estimate
    LowConfidence,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RootLocation {
    /// Localized event time (right end of the final bracket)
    pub time: f64,
    /// Left end of the final bracket
    pub lower: f64,
    pub status: Vec<RootStatus>,
    pub iterations: usize,
    pub confidence: RootConfidence,
}

impl RootLocation {
    pub fn fired(&self) -> Vec<usize> {
        self.status
            .iter()
            .enumerate()
            .filter(|(_, s)| **s == RootStatus::Fired)
            .map(|(i, _)| i)
            .collect()
    }
}

/// Check if a root changed sign between two samples
///
/// A sample landing exactly on zero counts as a crossing; leaving zero does
/// not, so a root sitting on zero at the start of a step cannot re-fire.
/// Non-finite samples never cross.
pub fn sign_change_detected(g_old: f64, g_new: f64) -> bool {
    if !g_old.is_finite() || !g_new.is_finite() {
        return false;
    }
    if g_old * g_new > 0.0 {
        return false;
    }
    if g_new == 0.0 {
        return true;
    }
    g_old != 0.0
}

/// True if any enabled root changes sign between `g0` and `g1`
pub fn bracketed(g0: ArrayView1<f64>, g1: ArrayView1<f64>, mask: &RootMask) -> bool {
    g0.iter()
        .zip(g1.iter())
        .enumerate()
        .any(|(i, (&a, &b))| mask.is_enabled(i) && sign_change_detected(a, b))
}

#[derive(Debug, Clone)]
pub struct RootFinder {
    /// Bracket width relative to `t1 − t0` at which localization stops
    pub relative_tolerance: f64,
    pub max_iter: usize,
}

impl Default for RootFinder {
    fn default() -> Self {
        Self {
            relative_tolerance: 1e-6,
            max_iter: 100,
        }
    }
}

impl RootFinder {
    pub fn new(relative_tolerance: f64, max_iter: usize) -> Self {
        Self {
            relative_tolerance,
            max_iter,
        }
    }

    /// Localize the earliest crossing of any enabled root in `[t0, t1]`
    ///
    /// `f(t, out)` writes all root values at time `t`; `g0`/`g1` are the
    /// values at the bracket ends.
    pub fn locate<F>(
        &self,
        mut f: F,
        t0: f64,
        t1: f64,
        g0: ArrayView1<f64>,
        g1: ArrayView1<f64>,
        mask: &RootMask,
    ) -> SdeResult<RootLocation>
    where
        F: FnMut(f64, ArrayViewMut1<f64>) -> SdeResult<()>,
    {
        if !bracketed(g0, g1, mask) {
            return Err(SdeError::RootNotBracketed { t0, t1 });
        }

        let n = g0.len();
        let width_goal = self.relative_tolerance * (t1 - t0).abs();
        let (mut a, mut b) = (t0, t1);
        let mut ga = g0.to_owned();
        let mut gb = g1.to_owned();
        let mut gt = Array1::zeros(n);
        let mut iterations = 0;
        let mut converged = false;

        while iterations < self.max_iter {
            let width = b - a;
            if width <= width_goal {
                converged = true;
                break;
            }

            let mid = a + 0.5 * width;
            let t = if iterations % 2 == 0 {
                let estimate = (0..n)
                    .filter(|&i| mask.is_enabled(i) && sign_change_detected(ga[i], gb[i]))
                    .map(|i| {
                        let denom = ga[i] - gb[i];
                        if denom != 0.0 {
                            a + width * ga[i] / denom
                        } else {
                            mid
                        }
                    })
                    .fold(f64::INFINITY, f64::min);
                if estimate > a && estimate < b {
                    estimate
                } else {
                    mid
                }
            } else {
                mid
            };

            if t <= a || t >= b {
                // The bracket cannot be split any further in floating point
                converged = true;
                break;
            }

            f(t, gt.view_mut())?;
            iterations += 1;

            if bracketed(ga.view(), gt.view(), mask) {
                b = t;
                gb.assign(&gt);
            } else {
                a = t;
                ga.assign(&gt);
            }
        }

        if !converged && b - a <= width_goal {
            converged = true;
        }

        let status = (0..n)
            .map(|i| {
                if !mask.is_enabled(i) {
                    RootStatus::Masked
                } else if sign_change_detected(ga[i], gb[i]) {
                    RootStatus::Fired
                } else {
                    RootStatus::Quiet
                }
            })
            .collect();

        debug!(
            t0,
            t1,
            root_time = b,
            bracket = b - a,
            iterations,
            converged,
            "Localized root crossing"
        );

        Ok(RootLocation {
            time: b,
            lower: a,
            status,
            iterations,
            confidence: if converged {
                RootConfidence::Converged
            } else {
                RootConfidence::LowConfidence
            },
        })
    }
}
