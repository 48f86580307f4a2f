// src/trajectory.rs
//! Time-course runner
//!
//! Drives an [`Ri5Integrator`] over a fixed duration, sampling the state on
//! a regular output grid. Whenever a step stops at a root, the caller's
//! [`EventHandler`] applies the discrete mutation and the returned
//! [`StateChange`] is forwarded to the integrator before stepping on.

use crate::error::{validation::*, SdeError, SdeResult};
use crate::models::model::SystemEvaluator;
use crate::solvers::ri5::{Ri5Integrator, StateChange, StepStatus};
use crate::solvers::root_finder::RootConfidence;
use ndarray::{Array1, ArrayViewMut1};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct TimeCourseConfig {
    pub t0: f64,
    pub duration: f64,
    /// Spacing of the output grid
    pub output_interval: f64,
    /// Upper bound on handled events per run
    pub max_events: usize,
}

impl TimeCourseConfig {
    pub fn validate(&self) -> SdeResult<()> {
        validate_finite("t0", self.t0)?;
        validate_positive("duration", self.duration)?;
        validate_finite("duration", self.duration)?;
        validate_positive("output_interval", self.output_interval)?;
        if self.output_interval > self.duration {
            return Err(SdeError::InvalidConfiguration {
                field: "output_interval".to_string(),
                reason: format!("exceeds the duration ({})", self.duration),
            });
        }
        validate_count("max_events", self.max_events, usize::MAX)?;
        Ok(())
    }

    pub fn output_points(&self) -> usize {
        (self.duration / self.output_interval).ceil() as usize + 1
    }
}

impl Default for TimeCourseConfig {
    fn default() -> Self {
        TimeCourseConfig {
            t0: 0.0,
            duration: 10.0,
            output_interval: 0.1,
            max_events: 10_000,
        }
    }
}

/// Discrete-event collaborator
pub trait EventHandler {
    /// Apply the mutation for the `fired` roots at `time` and report what changed
    fn apply(&mut self, time: f64, fired: &[usize], state: ArrayViewMut1<f64>) -> StateChange;
}

/// Records events without touching the state
#[derive(Debug, Clone, Copy, Default)]
pub struct NoEvents;

impl EventHandler for NoEvents {
    fn apply(&mut self, _time: f64, _fired: &[usize], _state: ArrayViewMut1<f64>) -> StateChange {
        StateChange::Values
    }
}

impl<F> EventHandler for F
where
    F: FnMut(f64, &[usize], ArrayViewMut1<f64>) -> StateChange,
{
    fn apply(&mut self, time: f64, fired: &[usize], state: ArrayViewMut1<f64>) -> StateChange {
        self(time, fired, state)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    pub time: f64,
    pub roots: Vec<usize>,
    pub confidence: RootConfidence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeCourseStatus {
    Finished,
    Canceled,
}

#[derive(Debug, Clone)]
pub struct Trajectory {
    pub times: Vec<f64>,
    pub states: Vec<Array1<f64>>,
    pub events: Vec<EventRecord>,
    pub status: TimeCourseStatus,
    /// `step()` calls that hit the internal step budget
    pub budget_exhaustions: usize,
}

impl Trajectory {
    fn new(capacity: usize) -> Self {
        Trajectory {
            times: Vec::with_capacity(capacity),
            states: Vec::with_capacity(capacity),
            events: Vec::new(),
            status: TimeCourseStatus::Finished,
            budget_exhaustions: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn final_state(&self) -> Option<&Array1<f64>> {
        self.states.last()
    }

    /// Time series of a single variable
    pub fn variable(&self, index: usize) -> Vec<f64> {
        self.states.iter().map(|s| s[index]).collect()
    }
}

/// Integrate from `config.t0` for `config.duration`, starting at `state`
///
/// `state` holds the final state afterwards. Budget exhaustion is tolerated
/// as long as time advances; a step without progress is an error.
pub fn run_time_course<E, H>(
    integrator: &mut Ri5Integrator<'_, E>,
    mut state: ArrayViewMut1<f64>,
    config: &TimeCourseConfig,
    handler: &mut H,
) -> SdeResult<Trajectory>
where
    E: SystemEvaluator + ?Sized,
    H: EventHandler + ?Sized,
{
    config.validate()?;
    integrator.start(config.t0, state.view())?;

    let end = config.t0 + config.duration;
    let mut trajectory = Trajectory::new(config.output_points());
    trajectory.times.push(config.t0);
    trajectory.states.push(state.to_owned());

    let mut next_index = 1usize;
    loop {
        let next_output = (config.t0 + next_index as f64 * config.output_interval).min(end);
        let delta_t = next_output - integrator.time();
        if delta_t <= 0.0 {
            // Output point already reached through an event stop
            trajectory.times.push(next_output);
            trajectory.states.push(state.to_owned());
            if next_output >= end {
                break;
            }
            next_index += 1;
            continue;
        }

        let outcome = integrator.step(state.view_mut(), delta_t)?;
        match outcome.status {
            StepStatus::Canceled => {
                trajectory.status = TimeCourseStatus::Canceled;
                info!(time = outcome.time, "Time course canceled");
                break;
            }
            StepStatus::BudgetExhausted => {
                trajectory.budget_exhaustions += 1;
                warn!(time = outcome.time, advanced = outcome.advanced, "Continuing after exhausted step budget");
            }
            StepStatus::RootFound => {
                if trajectory.events.len() >= config.max_events {
                    return Err(SdeError::NoProgress {
                        time: outcome.time,
                        reason: format!("more than {} events", config.max_events),
                    });
                }
                debug!(time = outcome.time, roots = ?outcome.fired_roots, "Applying event");
                let change = handler.apply(outcome.time, &outcome.fired_roots, state.view_mut());
                integrator.state_change(change);
                trajectory.events.push(EventRecord {
                    time: outcome.time,
                    roots: outcome.fired_roots,
                    confidence: outcome.root_confidence,
                });
            }
            StepStatus::Completed => {
                trajectory.times.push(next_output);
                trajectory.states.push(state.to_owned());
                if next_output >= end {
                    break;
                }
                next_index += 1;
                continue;
            }
        }

        if !(outcome.advanced > 0.0) {
            return Err(SdeError::NoProgress {
                time: outcome.time,
                reason: format!("{:?} step made no progress", outcome.status),
            });
        }
    }

    Ok(trajectory)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::decay::LinearDecay;
    use crate::solvers::ri5::IntegratorConfig;
    use ndarray::array;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    fn integrator_config() -> IntegratorConfig {
        IntegratorConfig {
            initial_step_fraction: 0.01,
            seed: Some(7),
            ..Default::default()
        }
    }

    #[test]
    fn test_output_grid() {
        let model = LinearDecay::new(0.5, 0.0).unwrap();
        let mut integrator = Ri5Integrator::new(&model, integrator_config()).unwrap();
        let mut x = array![2.0];
        let config = TimeCourseConfig {
            duration: 1.0,
            output_interval: 0.25,
            ..Default::default()
        };

        let trajectory = run_time_course(&mut integrator, x.view_mut(), &config, &mut NoEvents).unwrap();
        assert_eq!(trajectory.times, vec![0.0, 0.25, 0.5, 0.75, 1.0]);
        assert_eq!(trajectory.status, TimeCourseStatus::Finished);
        for (t, s) in trajectory.times.iter().zip(&trajectory.states) {
            assert!((s[0] - model.exact(2.0, *t)).abs() < 1e-8);
        }
        assert_eq!(trajectory.final_state(), Some(&x));
    }

    struct Refill;

    impl EventHandler for Refill {
        fn apply(&mut self, _time: f64, fired: &[usize], mut state: ArrayViewMut1<f64>) -> StateChange {
            assert_eq!(fired, &[0]);
            state[0] = 1.0;
            StateChange::Values
        }
    }

    #[test]
    fn test_events_reset_state() {
        // Refill to 1.0 whenever the level drops to 0.5
        let model = LinearDecay::new(1.0, 0.0).unwrap().with_threshold(0.5);
        let mut integrator = Ri5Integrator::new(&model, integrator_config()).unwrap();
        let mut x = array![1.0];
        let config = TimeCourseConfig {
            duration: 3.0,
            output_interval: 0.5,
            ..Default::default()
        };
        let trajectory = run_time_course(&mut integrator, x.view_mut(), &config, &mut Refill).unwrap();
        assert_eq!(trajectory.events.len(), 4);
        for (n, event) in trajectory.events.iter().enumerate() {
            let expected = (n + 1) as f64 * std::f64::consts::LN_2;
            assert!((event.time - expected).abs() < 1e-5, "event {} at {}", n, event.time);
        }
        assert_eq!(trajectory.len(), 7);
        assert!(trajectory.variable(0).iter().all(|&v| v > 0.5 - 1e-6 && v <= 1.0));
    }

    #[test]
    fn test_canceled_run_stops() {
        let model = LinearDecay::new(1.0, 0.0).unwrap();
        let mut integrator = Ri5Integrator::new(&model, integrator_config()).unwrap();
        integrator.set_cancel_flag(Arc::new(AtomicBool::new(true)));
        let mut x = array![1.0];

        let trajectory =
            run_time_course(&mut integrator, x.view_mut(), &TimeCourseConfig::default(), &mut NoEvents).unwrap();
        assert_eq!(trajectory.status, TimeCourseStatus::Canceled);
        assert_eq!(trajectory.len(), 1);
    }

    #[test]
    fn test_invalid_config() {
        let config = TimeCourseConfig {
            duration: 1.0,
            output_interval: 2.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert_eq!(TimeCourseConfig::default().output_points(), 101);
    }
}
