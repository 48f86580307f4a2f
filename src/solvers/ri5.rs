// src/solvers/ri5.rs
//! Hybrid RI5 Integrator Driver
//!
//! # Overview
//!
//! [`Ri5Integrator`] advances a [`SystemEvaluator`] by externally requested
//! steps `deltaT`, subdividing each into adaptive internal steps:
//!
//! 1. draw fresh Itô variates for the internal step;
//! 2. build the candidate state with the RI5 stage builder;
//! 3. reject unphysical or non-finite candidates, halve the step and retry
//!    with fresh variates;
//! 4. compare root signs at both ends and, if a root is bracketed,
//!    localize the crossing by rebuilding the same internal step with a
//!    shorter step size and the same unit variates;
//! 5. commit the state into the caller's view.
//!
//! A `step()` call stops exactly at a localized root so that the caller can
//! apply the discrete event, notify the integrator through
//! [`Ri5Integrator::state_change`] and continue.
//!
//! # State Machine
//!
//! ```text
//! Uninitialized → Started → Stepping → (RootBracketed → Localizing) → Completed
//!                              └──────→ Failed
//! any state ──state_change()──→ Uninitialized (reinitialized on next step)
//! ```

use super::root_finder::{bracketed, RootConfidence, RootFinder, RootLocation, RootMask, RootMasking};
use super::stages::{EvaluationCounts, StageBuilder};
use super::tableau::Ri5Tableau;
use super::validity::{PhysicalValidity, StepSizeController, Violation};
use crate::error::{validation::*, SdeError, SdeResult};
use crate::math_utils::first_non_finite;
use crate::models::model::{ModelDimensions, SystemEvaluator};
use crate::rng::{ItoVariates, VariateGenerator};
use bitflags::bitflags;
use ndarray::{Array1, ArrayView1, ArrayViewMut1};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

const MAX_INTERNAL_STEPS_LIMIT: usize = 1_000_000_000;
const MAX_ROOT_ITERATIONS_LIMIT: usize = 10_000;
/// Leftover intervals shorter than this fraction of `deltaT` join the last internal step
const SNAP_FRACTION: f64 = 1e-12;

#[derive(Debug, Clone)]
pub struct IntegratorConfig {
    pub min_step: f64,
    pub max_step: f64,
    /// Initial internal step as a fraction of the requested external step
    pub initial_step_fraction: f64,
    /// Attempted internal steps allowed per `step()` call
    pub max_internal_steps: usize,
    /// Consecutive accepted steps before the internal step doubles
    pub grow_after: usize,
    /// Root bracket width relative to the internal step
    pub root_relative_tolerance: f64,
    pub root_max_iterations: usize,
    pub root_masking: RootMasking,
    pub force_physical_correctness: bool,
    /// `None` seeds from the operating system entropy source
    pub seed: Option<u64>,
}

impl IntegratorConfig {
    pub fn validate(&self) -> SdeResult<()> {
        validate_positive("min_step", self.min_step)?;
        validate_finite("max_step", self.max_step)?;
        if !(self.max_step >= self.min_step) {
            return Err(SdeError::InvalidConfiguration {
                field: "max_step".to_string(),
                reason: format!("must not be smaller than min_step ({})", self.min_step),
            });
        }
        validate_positive("initial_step_fraction", self.initial_step_fraction)?;
        validate_range("initial_step_fraction", self.initial_step_fraction, 0.0, 1.0)?;
        validate_count("max_internal_steps", self.max_internal_steps, MAX_INTERNAL_STEPS_LIMIT)?;
        validate_count("grow_after", self.grow_after, MAX_INTERNAL_STEPS_LIMIT)?;
        validate_positive("root_relative_tolerance", self.root_relative_tolerance)?;
        validate_range("root_relative_tolerance", self.root_relative_tolerance, 0.0, 1.0)?;
        validate_count("root_max_iterations", self.root_max_iterations, MAX_ROOT_ITERATIONS_LIMIT)?;
        Ok(())
    }
}

impl Default for IntegratorConfig {
    fn default() -> Self {
        IntegratorConfig {
            min_step: 1e-12,
            max_step: 1.0,
            initial_step_fraction: 0.01,
            max_internal_steps: 100_000,
            grow_after: 4,
            root_relative_tolerance: 1e-6,
            root_max_iterations: 100,
            root_masking: RootMasking::None,
            force_physical_correctness: true,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Uninitialized,
    Started,
    Stepping,
    RootBracketed,
    Localizing,
    Completed,
    Failed,
}

/// Message sent by the host after it mutated the state outside the integrator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateChange {
    /// State values changed, model dimensions did not
    Values,
    /// Model structure changed; dimensions are queried again
    Structure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    /// The full requested step was taken
    Completed,
    /// Stopped at a localized root
    RootFound,
    /// The internal step budget ran out; partial progress was kept
    BudgetExhausted,
    /// The cancellation flag was raised
    Canceled,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StepFlags: u32 {
        const ROOTS_FOUND         = 1 << 0;
        const ROOT_LOW_CONFIDENCE = 1 << 1;
        const STEP_REDUCED        = 1 << 2;
        const REINITIALIZED       = 1 << 3;
        const BUDGET_EXHAUSTED    = 1 << 4;
        const CANCELED            = 1 << 5;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub status: StepStatus,
    /// Time actually advanced, `0 ≤ advanced ≤ deltaT`
    pub advanced: f64,
    /// Simulation time after the step
    pub time: f64,
    pub fired_roots: Vec<usize>,
    pub root_confidence: RootConfidence,
    /// Internal step attempts, rejected ones included
    pub internal_steps: usize,
    pub flags: StepFlags,
}

impl StepOutcome {
    pub fn root_found(&self) -> bool {
        self.status == StepStatus::RootFound
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntegrationStats {
    pub accepted_steps: u64,
    pub rejected_steps: u64,
    pub rate_evaluations: u64,
    pub noise_evaluations: u64,
    pub root_evaluations: u64,
    pub root_iterations: u64,
    pub roots_found: u64,
    pub reinitializations: u64,
}

/// Why an internal step attempt was thrown away
enum Rejection {
    Unphysical(Violation),
    Evaluation(SdeError),
}

/// Hybrid stochastic/deterministic integrator with event localization
pub struct Ri5Integrator<'m, E: SystemEvaluator + ?Sized> {
    model: &'m E,
    config: IntegratorConfig,
    tableau: Ri5Tableau,
    generator: VariateGenerator,
    variates: ItoVariates,
    builder: StageBuilder,
    controller: StepSizeController,
    validity: PhysicalValidity,
    finder: RootFinder,
    mask: RootMask,
    dims: ModelDimensions,
    phase: Phase,
    started: bool,
    pending: Option<StateChange>,
    time: f64,
    candidate: Array1<f64>,
    probe: Array1<f64>,
    roots_start: Array1<f64>,
    roots_end: Array1<f64>,
    cancel: Option<Arc<AtomicBool>>,
    stats: IntegrationStats,
    retired_counts: EvaluationCounts,
}

impl<'m, E: SystemEvaluator + ?Sized> Ri5Integrator<'m, E> {
    pub fn new(model: &'m E, config: IntegratorConfig) -> SdeResult<Self> {
        config.validate()?;
        let dims = model.dimensions();
        dims.validate()?;

        Ok(Ri5Integrator {
            model,
            tableau: Ri5Tableau::new(),
            generator: VariateGenerator::new(config.seed),
            variates: ItoVariates::new(dims.noise_sources),
            builder: StageBuilder::new(dims.variables, dims.noise_sources),
            controller: StepSizeController::new(
                config.min_step,
                config.max_step,
                config.initial_step_fraction,
                config.grow_after,
            ),
            validity: PhysicalValidity::new(dims.physical.clone(), config.force_physical_correctness),
            finder: RootFinder::new(config.root_relative_tolerance, config.root_max_iterations),
            mask: RootMask::new(config.root_masking, dims.roots, &dims.discrete_roots),
            phase: Phase::Uninitialized,
            started: false,
            pending: None,
            time: 0.0,
            candidate: Array1::zeros(dims.variables),
            probe: Array1::zeros(dims.variables),
            roots_start: Array1::zeros(dims.roots),
            roots_end: Array1::zeros(dims.roots),
            cancel: None,
            stats: IntegrationStats::default(),
            retired_counts: EvaluationCounts::default(),
            dims,
            config,
        })
    }

    /// Attach to the model at time `t0` with the initial state
    pub fn start(&mut self, t0: f64, state: ArrayView1<f64>) -> SdeResult<()> {
        validate_finite("t0", t0)?;
        self.resize_buffers()?;
        self.check_state(state)?;
        self.check_finite(state)?;

        self.time = t0;
        self.pending = None;
        self.controller.reset();
        self.variates.invalidate();
        self.started = true;
        self.phase = Phase::Started;

        info!(
            t0,
            variables = self.dims.variables,
            noise_sources = self.dims.noise_sources,
            roots = self.dims.roots,
            physical = self.validity.indices().len(),
            enforce_physical = self.validity.is_enabled(),
            "Integrator started"
        );
        Ok(())
    }

    /// Advance `state` by at most `delta_t`
    ///
    /// On `Ok` the state satisfies the physical-validity predicate. On a hard
    /// failure the state holds the last valid internal state and the error
    /// carries the time reached.
    pub fn step(&mut self, mut state: ArrayViewMut1<f64>, delta_t: f64) -> SdeResult<StepOutcome> {
        let mut flags = self.prepare()?;
        validate_positive("delta_t", delta_t)?;
        validate_finite("delta_t", delta_t)?;
        self.check_state(state.view())?;

        self.phase = Phase::Stepping;
        self.controller.begin(delta_t);
        let t_start = self.time;
        let mut advanced = 0.0;
        let mut attempts = 0;

        // Sign reference for the first internal step
        let model = self.model;
        self.stats.root_evaluations += 1;
        if let Err(e) = masked_roots(model, &self.mask, self.time, state.view(), self.roots_start.view_mut()) {
            self.phase = Phase::Failed;
            return Err(e);
        }

        loop {
            if advanced >= delta_t {
                return Ok(self.finish(StepStatus::Completed, delta_t, attempts, flags, None));
            }
            if self.is_canceled() {
                flags |= StepFlags::CANCELED;
                warn!(time = self.time, advanced, "Integration canceled");
                return Ok(self.finish(StepStatus::Canceled, advanced, attempts, flags, None));
            }
            if attempts >= self.config.max_internal_steps {
                flags |= StepFlags::BUDGET_EXHAUSTED;
                warn!(
                    time = self.time,
                    advanced,
                    delta_t,
                    max_internal_steps = self.config.max_internal_steps,
                    "Internal step budget exhausted"
                );
                return Ok(self.finish(StepStatus::BudgetExhausted, advanced, attempts, flags, None));
            }

            let remaining = delta_t - advanced;
            let mut h = self.controller.proposal(remaining);
            if remaining - h <= SNAP_FRACTION * delta_t {
                h = remaining;
            }
            let last = h >= remaining;
            if !self.variates.is_valid() {
                self.variates.regenerate(&mut self.generator);
            }
            attempts += 1;

            match self.attempt(state.view(), h) {
                Ok(location) => {
                    state.assign(&self.candidate);
                    self.variates.invalidate();
                    self.stats.accepted_steps += 1;

                    if let Some(location) = location {
                        self.time = location.time;
                        let advanced = (location.time - t_start).min(delta_t);
                        flags |= StepFlags::ROOTS_FOUND;
                        if location.confidence == RootConfidence::LowConfidence {
                            flags |= StepFlags::ROOT_LOW_CONFIDENCE;
                            warn!(
                                time = location.time,
                                bracket = location.time - location.lower,
                                "Root tolerance not achieved"
                            );
                        }
                        return Ok(self.finish(StepStatus::RootFound, advanced, attempts, flags, Some(location)));
                    }

                    advanced = if last { delta_t } else { advanced + h };
                    self.time = if last { t_start + delta_t } else { self.time + h };
                    self.roots_start.assign(&self.roots_end);

                    let before = self.controller.current();
                    self.controller.accept();
                    if self.controller.current() != before {
                        debug!(time = self.time, step = ?self.controller.current(), "Internal step grown");
                    }
                }
                Err(rejection) => {
                    self.phase = Phase::Stepping;
                    // The retry draws a fresh set of variates
                    self.variates.invalidate();
                    self.stats.rejected_steps += 1;
                    flags |= StepFlags::STEP_REDUCED;
                    match self.controller.shrink(h) {
                        Ok(next) => {
                            debug!(time = self.time, attempted = h, next, "Internal step halved");
                        }
                        Err(floor) => {
                            self.phase = Phase::Failed;
                            return Err(match rejection {
                                Rejection::Unphysical(v) => {
                                    warn!(
                                        time = self.time,
                                        component = v.component,
                                        value = v.value,
                                        smallest_accepted = ?self.validity.smallest_value(state.view()),
                                        "Physical validity unreachable at minimum step"
                                    );
                                    SdeError::ValidityFloor {
                                        time: self.time,
                                        component: v.component,
                                        value: v.value,
                                        min_step: floor.min_step,
                                    }
                                }
                                Rejection::Evaluation(e) => e,
                            });
                        }
                    }
                }
            }
        }
    }

    /// Notify the integrator that the host mutated the state
    ///
    /// Caches are invalidated now; buffers, step size and root signs are
    /// re-derived on the next `step()`.
    pub fn state_change(&mut self, change: StateChange) {
        if !self.started {
            return;
        }
        self.pending = match (self.pending, change) {
            (Some(StateChange::Structure), _) | (_, StateChange::Structure) => Some(StateChange::Structure),
            _ => Some(StateChange::Values),
        };
        self.variates.invalidate();
        self.phase = Phase::Uninitialized;
    }

    /// Evaluate all root functions; masked roots read `1.0`
    pub fn eval_root(&self, time: f64, state: ArrayView1<f64>, roots: ArrayViewMut1<f64>) -> SdeResult<()> {
        self.check_state(state)?;
        if roots.len() != self.dims.roots {
            return Err(SdeError::DimensionMismatch {
                what: "root buffer".to_string(),
                expected: self.dims.roots,
                actual: roots.len(),
            });
        }
        masked_roots(self.model, &self.mask, time, state, roots)
    }

    pub fn set_root_masking(&mut self, mode: RootMasking) {
        self.config.root_masking = mode;
        self.mask = RootMask::new(mode, self.dims.roots, &self.dims.discrete_roots);
    }

    /// Flag polled before every internal sub-step
    pub fn set_cancel_flag(&mut self, flag: Arc<AtomicBool>) {
        self.cancel = Some(flag);
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn dimensions(&self) -> &ModelDimensions {
        &self.dims
    }

    pub fn config(&self) -> &IntegratorConfig {
        &self.config
    }

    pub fn root_mask(&self) -> &RootMask {
        &self.mask
    }

    /// Current internal step size, if one has been derived
    pub fn internal_step(&self) -> Option<f64> {
        self.controller.current()
    }

    /// Number of Itô variate sets drawn so far
    pub fn variates_generation(&self) -> u64 {
        self.variates.generation()
    }

    /// Number of uniform deviates drawn so far
    pub fn draws(&self) -> u64 {
        self.generator.draws()
    }

    pub fn stats(&self) -> IntegrationStats {
        let mut stats = self.stats;
        stats.rate_evaluations = self.retired_counts.rate + self.builder.counts.rate;
        stats.noise_evaluations = self.retired_counts.noise + self.builder.counts.noise;
        stats
    }

    /// Bring the integrator into a steppable phase; applies pending state changes
    fn prepare(&mut self) -> SdeResult<StepFlags> {
        match self.phase {
            Phase::Started | Phase::Completed => Ok(StepFlags::empty()),
            Phase::Uninitialized => match self.pending.take() {
                Some(change) => {
                    if let Err(e) = self.reinitialize(change) {
                        self.phase = Phase::Failed;
                        return Err(e);
                    }
                    Ok(StepFlags::REINITIALIZED)
                }
                None => Err(SdeError::NotStarted {
                    reason: "call start() before step()".to_string(),
                }),
            },
            Phase::Failed => Err(SdeError::NotStarted {
                reason: format!("integration failed at t = {}; call start() again", self.time),
            }),
            Phase::Stepping | Phase::RootBracketed | Phase::Localizing => Err(SdeError::NotStarted {
                reason: "previous step did not finish".to_string(),
            }),
        }
    }

    fn reinitialize(&mut self, change: StateChange) -> SdeResult<()> {
        if change == StateChange::Structure {
            self.resize_buffers()?;
        }
        self.controller.reset();
        self.variates.invalidate();
        self.stats.reinitializations += 1;
        self.phase = Phase::Started;
        info!(time = self.time, ?change, "Integrator reinitialized after state change");
        Ok(())
    }

    fn resize_buffers(&mut self) -> SdeResult<()> {
        let dims = self.model.dimensions();
        dims.validate()?;
        if dims.variables != self.builder.variables() || dims.noise_sources != self.builder.noise_sources() {
            self.retired_counts.rate += self.builder.counts.rate;
            self.retired_counts.noise += self.builder.counts.noise;
            self.builder = StageBuilder::new(dims.variables, dims.noise_sources);
        }
        if dims.noise_sources != self.variates.noise_sources() {
            self.variates.resize(dims.noise_sources);
        }
        self.candidate = Array1::zeros(dims.variables);
        self.probe = Array1::zeros(dims.variables);
        self.roots_start = Array1::zeros(dims.roots);
        self.roots_end = Array1::zeros(dims.roots);
        self.validity = PhysicalValidity::new(dims.physical.clone(), self.config.force_physical_correctness);
        self.mask = RootMask::new(self.config.root_masking, dims.roots, &dims.discrete_roots);
        self.dims = dims;
        Ok(())
    }

    fn check_state(&self, state: ArrayView1<f64>) -> SdeResult<()> {
        if state.len() != self.dims.variables {
            return Err(SdeError::DimensionMismatch {
                what: "state vector".to_string(),
                expected: self.dims.variables,
                actual: state.len(),
            });
        }
        Ok(())
    }

    fn check_finite(&self, state: ArrayView1<f64>) -> SdeResult<()> {
        validate_state(&state.to_vec())
    }

    fn is_canceled(&self) -> bool {
        self.cancel.as_ref().map_or(false, |flag| flag.load(Ordering::Relaxed))
    }

    /// Build, check and scan one internal step of size `h` from `y0`
    ///
    /// On success the accepted state is in `candidate` and the roots at that
    /// state are in `roots_end`.
    fn attempt(&mut self, y0: ArrayView1<f64>, h: f64) -> Result<Option<RootLocation>, Rejection> {
        let model = self.model;
        let t0 = self.time;

        self.builder
            .build(model, &self.tableau, &self.variates, t0, y0, h, self.candidate.view_mut())
            .map_err(Rejection::Evaluation)?;
        if let Some(violation) = self.validity.check(model, self.candidate.view()) {
            return Err(Rejection::Unphysical(violation));
        }

        self.stats.root_evaluations += 1;
        masked_roots(model, &self.mask, t0 + h, self.candidate.view(), self.roots_end.view_mut())
            .map_err(Rejection::Evaluation)?;
        if !bracketed(self.roots_start.view(), self.roots_end.view(), &self.mask) {
            return Ok(None);
        }

        self.phase = Phase::RootBracketed;
        debug!(t0, t1 = t0 + h, "Root bracketed");

        let location = {
            let phase = &mut self.phase;
            let tableau = &self.tableau;
            let variates = &self.variates;
            let mask = &self.mask;
            let builder = &mut self.builder;
            let probe = &mut self.probe;
            let mut evaluations = 0;
            let result = self.finder.locate(
                |tau, out| {
                    *phase = Phase::Localizing;
                    evaluations += 1;
                    builder.build(model, tableau, variates, t0, y0, tau - t0, probe.view_mut())?;
                    masked_roots(model, mask, tau, probe.view(), out)
                },
                t0,
                t0 + h,
                self.roots_start.view(),
                self.roots_end.view(),
                &self.mask,
            );
            self.stats.root_evaluations += evaluations;
            result.map_err(Rejection::Evaluation)?
        };
        self.stats.root_iterations += location.iterations as u64;
        self.phase = Phase::Stepping;

        // Rebuild the state at the stop time
        let h_root = location.time - t0;
        self.builder
            .build(model, &self.tableau, &self.variates, t0, y0, h_root, self.candidate.view_mut())
            .map_err(Rejection::Evaluation)?;
        if let Some(violation) = self.validity.check(model, self.candidate.view()) {
            return Err(Rejection::Unphysical(violation));
        }
        self.stats.root_evaluations += 1;
        masked_roots(model, &self.mask, location.time, self.candidate.view(), self.roots_end.view_mut())
            .map_err(Rejection::Evaluation)?;

        Ok(Some(location))
    }

    fn finish(
        &mut self,
        status: StepStatus,
        advanced: f64,
        internal_steps: usize,
        flags: StepFlags,
        location: Option<RootLocation>,
    ) -> StepOutcome {
        self.phase = Phase::Completed;
        let (fired_roots, root_confidence) = match location {
            Some(location) => {
                let fired = location.fired();
                self.stats.roots_found += fired.len() as u64;
                debug!(time = self.time, ?fired, "Step stopped at root");
                (fired, location.confidence)
            }
            None => (Vec::new(), RootConfidence::Converged),
        };

        StepOutcome {
            status,
            advanced,
            time: self.time,
            fired_roots,
            root_confidence,
            internal_steps,
            flags,
        }
    }
}

/// Root values with masked entries replaced by `1.0`; a non-finite unmasked
/// value is an evaluation failure
fn masked_roots<E: SystemEvaluator + ?Sized>(
    model: &E,
    mask: &RootMask,
    time: f64,
    state: ArrayView1<f64>,
    mut roots: ArrayViewMut1<f64>,
) -> SdeResult<()> {
    if roots.is_empty() {
        return Ok(());
    }
    roots.fill(0.0);
    model.eval_roots(time, state, roots.view_mut());
    mask.apply(roots.view_mut());
    match first_non_finite(roots.view()) {
        Some(index) => Err(SdeError::EvaluationFailure {
            time,
            stage: "roots".to_string(),
            index,
        }),
        None => Ok(()),
    }
}
