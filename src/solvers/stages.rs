// src/solvers/stages.rs
//! Stochastic Stage Builder for the RI5 scheme
//!
//! # Mathematical Framework
//!
//! For an Itô SDE with `m` noise sources,
//! ```text
//! dX_t = a(t, X_t) dt + Σ_k b^k(t, X_t) dW^k_t
//! ```
//! one step of size `h` builds, for `i = 1..3`,
//! ```text
//! H⁽⁰⁾ᵢ = Y + Σⱼ A⁽⁰⁾ᵢⱼ a(H⁽⁰⁾ⱼ) h + Σⱼ Σₗ B⁽⁰⁾ᵢⱼ bˡ(H⁽ˡ⁾ⱼ) Îₗ
//! H⁽ᵏ⁾ᵢ = Y + Σⱼ A⁽¹⁾ᵢⱼ a(H⁽⁰⁾ⱼ) h + Σⱼ B⁽¹⁾ᵢⱼ bᵏ(H⁽ᵏ⁾ⱼ) √h
//! Ĥ⁽ᵏ⁾ᵢ = Y + Σⱼ A⁽²⁾ᵢⱼ a(H⁽⁰⁾ⱼ) h + Σⱼ Σ_{l≠k} B⁽²⁾ᵢⱼ bˡ(H⁽ˡ⁾ⱼ) Î₍ₖ,ₗ₎/√h
//! ```
//! and closes with
//! ```text
//! Y' = Y + Σᵢ αᵢ a(H⁽⁰⁾ᵢ) h
//!        + Σᵢ Σₖ bᵏ(H⁽ᵏ⁾ᵢ) (β⁽¹⁾ᵢ Îₖ + β⁽²⁾ᵢ Î₍ₖ,ₖ₎/√h)
//!        + Σᵢ Σₖ bᵏ(Ĥ⁽ᵏ⁾ᵢ) (β⁽³⁾ᵢ Îₖ + β⁽⁴⁾ᵢ √h)
//! ```
//!
//! # Evaluation Cost
//!
//! Per step: 3 drift evaluations and `1 + 4m` diffusion evaluations. The
//! first stage of every family coincides with `Y`, so one diffusion matrix
//! serves all of them.
//!
//! # Failure Mode
//!
//! Any non-finite drift, diffusion or resulting state entry aborts the
//! build with [`SdeError::EvaluationFailure`].

use super::tableau::{Ri5Tableau, STAGES};
use crate::error::{SdeError, SdeResult};
use crate::math_utils::first_non_finite;
use crate::models::model::SystemEvaluator;
use crate::rng::ItoVariates;
use ndarray::{Array1, Array2, ArrayView1, ArrayViewMut1};

/// Evaluation counters accumulated by a [`StageBuilder`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvaluationCounts {
    pub rate: u64,
    pub noise: u64,
}

/// Workspace for building RI5 steps of a fixed model size
#[derive(Debug, Clone)]
pub struct StageBuilder {
    variables: usize,
    noise_sources: usize,
    /// Drift at the drift stages `H⁽⁰⁾ᵢ`
    rates: Vec<Array1<f64>>,
    /// Column `k` of entry `i` holds `bᵏ(H⁽ᵏ⁾ᵢ)`
    noise: Vec<Array2<f64>>,
    /// Column `k` of entry `i` holds `bᵏ(Ĥ⁽ᵏ⁾ᵢ)`
    noise_hat: Vec<Array2<f64>>,
    stage: Array1<f64>,
    scratch_noise: Array2<f64>,
    pub counts: EvaluationCounts,
}

impl StageBuilder {
    pub fn new(variables: usize, noise_sources: usize) -> Self {
        StageBuilder {
            variables,
            noise_sources,
            rates: vec![Array1::zeros(variables); STAGES],
            noise: vec![Array2::zeros((variables, noise_sources)); STAGES],
            noise_hat: vec![Array2::zeros((variables, noise_sources)); STAGES],
            stage: Array1::zeros(variables),
            scratch_noise: Array2::zeros((variables, noise_sources)),
            counts: EvaluationCounts::default(),
        }
    }

    pub fn variables(&self) -> usize {
        self.variables
    }

    pub fn noise_sources(&self) -> usize {
        self.noise_sources
    }

    /// Build one step of size `h` from `(t, y)` into `out`
    ///
    /// The variates are taken from `variates` unchanged, so calling this
    /// again with a smaller `h` rebuilds the same Brownian path fraction.
    #[allow(clippy::too_many_arguments)]
    pub fn build<E: SystemEvaluator + ?Sized>(
        &mut self,
        evaluator: &E,
        tableau: &Ri5Tableau,
        variates: &ItoVariates,
        t: f64,
        y: ArrayView1<f64>,
        h: f64,
        mut out: ArrayViewMut1<f64>,
    ) -> SdeResult<()> {
        let m = self.noise_sources;
        let sqrt_h = h.sqrt();

        for i in 0..STAGES {
            // Drift stage H⁽⁰⁾ᵢ
            self.stage.assign(&y);
            for j in 0..i {
                let a = tableau.a0[i][j];
                if a != 0.0 {
                    self.stage.scaled_add(a * h, &self.rates[j]);
                }
                let b = tableau.b0[i][j];
                if b != 0.0 {
                    for l in 0..m {
                        let w = b * variates.i_hat(l, sqrt_h);
                        self.stage.scaled_add(w, &self.noise[j].column(l));
                    }
                }
            }

            let stage_time = t + tableau.c0[i] * h;
            self.rates[i].fill(0.0);
            evaluator.eval_rate(stage_time, self.stage.view(), self.rates[i].view_mut());
            self.counts.rate += 1;
            if let Some(index) = first_non_finite(self.rates[i].view()) {
                return Err(evaluation_failure(stage_time, i, "drift", index));
            }

            if m == 0 {
                continue;
            }

            if i == 0 {
                // Every first stage equals Y: one evaluation serves H⁽ᵏ⁾₁ and Ĥ⁽ᵏ⁾₁
                self.scratch_noise.fill(0.0);
                evaluator.eval_noise(t, y, self.scratch_noise.view_mut());
                self.counts.noise += 1;
                self.check_noise(t, i, "diffusion")?;
                self.noise[0].assign(&self.scratch_noise);
                self.noise_hat[0].assign(&self.scratch_noise);
                continue;
            }

            for k in 0..m {
                // H⁽ᵏ⁾ᵢ
                self.stage.assign(&y);
                for j in 0..i {
                    let a = tableau.a1[i][j];
                    if a != 0.0 {
                        self.stage.scaled_add(a * h, &self.rates[j]);
                    }
                    let b = tableau.b1[i][j];
                    if b != 0.0 {
                        self.stage.scaled_add(b * sqrt_h, &self.noise[j].column(k));
                    }
                }
                let stage_time = t + tableau.c1[i] * h;
                self.eval_noise_column(evaluator, stage_time, i, k, false)?;

                // Ĥ⁽ᵏ⁾ᵢ
                self.stage.assign(&y);
                for j in 0..i {
                    let a = tableau.a2[i][j];
                    if a != 0.0 {
                        self.stage.scaled_add(a * h, &self.rates[j]);
                    }
                    let b = tableau.b2[i][j];
                    if b != 0.0 {
                        for l in (0..m).filter(|&l| l != k) {
                            let w = b * variates.i_mixed(k, l, h) / sqrt_h;
                            self.stage.scaled_add(w, &self.noise[j].column(l));
                        }
                    }
                }
                let stage_time = t + tableau.c2[i] * h;
                self.eval_noise_column(evaluator, stage_time, i, k, true)?;
            }
        }

        // Closure: weighted sum of all stage evaluations
        out.assign(&y);
        for i in 0..STAGES {
            out.scaled_add(tableau.alpha[i] * h, &self.rates[i]);
            for k in 0..m {
                let i_k = variates.i_hat(k, sqrt_h);
                let w = tableau.beta1[i] * i_k + tableau.beta2[i] * variates.i_mixed(k, k, h) / sqrt_h;
                if w != 0.0 {
                    out.scaled_add(w, &self.noise[i].column(k));
                }
                let w_hat = tableau.beta3[i] * i_k + tableau.beta4[i] * sqrt_h;
                if w_hat != 0.0 {
                    out.scaled_add(w_hat, &self.noise_hat[i].column(k));
                }
            }
        }

        if let Some(index) = first_non_finite(out.view()) {
            return Err(evaluation_failure(t + h, STAGES - 1, "state", index));
        }
        Ok(())
    }

    fn eval_noise_column<E: SystemEvaluator + ?Sized>(
        &mut self,
        evaluator: &E,
        stage_time: f64,
        i: usize,
        k: usize,
        hat: bool,
    ) -> SdeResult<()> {
        self.scratch_noise.fill(0.0);
        evaluator.eval_noise(stage_time, self.stage.view(), self.scratch_noise.view_mut());
        self.counts.noise += 1;
        self.check_noise(stage_time, i, "diffusion")?;

        let target = if hat {
            &mut self.noise_hat[i]
        } else {
            &mut self.noise[i]
        };
        target.column_mut(k).assign(&self.scratch_noise.column(k));
        Ok(())
    }

    fn check_noise(&self, time: f64, i: usize, what: &str) -> SdeResult<()> {
        match self.scratch_noise.iter().position(|v| !v.is_finite()) {
            Some(flat) => Err(evaluation_failure(time, i, what, flat / self.noise_sources.max(1))),
            None => Ok(()),
        }
    }
}

fn evaluation_failure(time: f64, stage: usize, what: &str, index: usize) -> SdeError {
    SdeError::EvaluationFailure {
        time,
        stage: format!("stage {} {}", stage + 1, what),
        index,
    }
}
