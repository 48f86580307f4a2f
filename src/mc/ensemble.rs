// src/mc/ensemble.rs
//! Parallel ensembles of independent trajectories
//!
//! Every trajectory owns its integrator and its variate generator; the
//! model is shared read-only. Trajectory `i` is seeded with `seed + i`, so
//! results do not depend on the number of worker threads.

use crate::error::{validation::*, SdeError, SdeResult};
use crate::models::model::SystemEvaluator;
use crate::rng::RngFactory;
use crate::solvers::ri5::{IntegratorConfig, Ri5Integrator};
use crate::trajectory::{run_time_course, EventHandler, TimeCourseConfig, TimeCourseStatus};
use ndarray::Array1;
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use statrs::statistics::Statistics;
use tracing::info;

const MAX_TRAJECTORIES: usize = 100_000_000;

#[derive(Debug, Clone)]
pub struct EnsembleConfig {
    pub trajectories: usize,
    pub seed: u64,
    /// Worker threads; `None` uses one per logical CPU
    pub threads: Option<usize>,
    pub initial_state: Array1<f64>,
    pub time_course: TimeCourseConfig,
    /// Integrator settings shared by all trajectories; the seed is overridden
    pub integrator: IntegratorConfig,
}

impl EnsembleConfig {
    pub fn new(initial_state: Array1<f64>) -> Self {
        EnsembleConfig {
            trajectories: 1_000,
            seed: 12345,
            threads: None,
            initial_state,
            time_course: TimeCourseConfig::default(),
            integrator: IntegratorConfig::default(),
        }
    }

    pub fn validate(&self) -> SdeResult<()> {
        validate_count("trajectories", self.trajectories, MAX_TRAJECTORIES)?;
        if let Some(threads) = self.threads {
            validate_count("threads", threads, 4096)?;
        }
        validate_state(&self.initial_state.to_vec())?;
        self.time_course.validate()?;
        self.integrator.validate()
    }
}

/// Final state and event count of one trajectory
#[derive(Debug, Clone)]
pub struct TrajectorySummary {
    pub seed: u64,
    pub final_state: Array1<f64>,
    pub events: usize,
    pub canceled: bool,
}

/// Per-variable statistics over all final states
#[derive(Debug, Clone)]
pub struct EnsembleStatistics {
    pub mean: Array1<f64>,
    pub std_dev: Array1<f64>,
    pub min: Array1<f64>,
    pub max: Array1<f64>,
}

#[derive(Debug, Clone)]
pub struct EnsembleResult {
    pub trajectories: Vec<TrajectorySummary>,
    pub statistics: EnsembleStatistics,
    pub threads: usize,
}

impl EnsembleResult {
    pub fn mean_events(&self) -> f64 {
        self.trajectories.iter().map(|t| t.events as f64).mean()
    }
}

/// Run `config.trajectories` independent time courses in parallel
///
/// `handler_factory(i)` builds the event handler of trajectory `i`.
pub fn run_ensemble<E, H, F>(model: &E, config: &EnsembleConfig, handler_factory: F) -> SdeResult<EnsembleResult>
where
    E: SystemEvaluator + Sync + ?Sized,
    H: EventHandler,
    F: Fn(usize) -> H + Sync,
{
    config.validate()?;
    let dims = model.dimensions();
    if config.initial_state.len() != dims.variables {
        return Err(SdeError::DimensionMismatch {
            what: "initial state".to_string(),
            expected: dims.variables,
            actual: config.initial_state.len(),
        });
    }

    let threads = config.threads.unwrap_or_else(num_cpus::get);
    let pool = ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .map_err(|e| SdeError::ThreadPool { reason: e.to_string() })?;
    let factory = RngFactory::new(config.seed);

    info!(
        trajectories = config.trajectories,
        threads,
        seed = config.seed,
        duration = config.time_course.duration,
        "Running ensemble"
    );

    let trajectories = pool.install(|| {
        (0..config.trajectories)
            .into_par_iter()
            .map(|i| -> SdeResult<TrajectorySummary> {
                let seed = factory.seed_for(i as u64);
                let integrator_config = IntegratorConfig {
                    seed: Some(seed),
                    ..config.integrator.clone()
                };
                let mut integrator = Ri5Integrator::new(model, integrator_config)?;
                let mut state = config.initial_state.clone();
                let mut handler = handler_factory(i);
                let trajectory =
                    run_time_course(&mut integrator, state.view_mut(), &config.time_course, &mut handler)?;

                Ok(TrajectorySummary {
                    seed,
                    final_state: state,
                    events: trajectory.events.len(),
                    canceled: trajectory.status == TimeCourseStatus::Canceled,
                })
            })
            .collect::<SdeResult<Vec<_>>>()
    })?;

    let statistics = summarize(&trajectories, dims.variables);
    Ok(EnsembleResult {
        trajectories,
        statistics,
        threads,
    })
}

fn summarize(trajectories: &[TrajectorySummary], variables: usize) -> EnsembleStatistics {
    let mut stats = EnsembleStatistics {
        mean: Array1::zeros(variables),
        std_dev: Array1::zeros(variables),
        min: Array1::zeros(variables),
        max: Array1::zeros(variables),
    };
    for j in 0..variables {
        let values: Vec<f64> = trajectories.iter().map(|t| t.final_state[j]).collect();
        stats.mean[j] = values.iter().mean();
        stats.std_dev[j] = if values.len() > 1 { values.iter().std_dev() } else { 0.0 };
        stats.min[j] = Statistics::min(values.iter());
        stats.max[j] = Statistics::max(values.iter());
    }
    stats
}
