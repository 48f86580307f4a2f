// tests/ensemble_test.rs
use hybrid_sde::mc::ensemble::{run_ensemble, EnsembleConfig};
use hybrid_sde::models::reaction_network::{Reaction, ReactionNetwork, Trigger};
use hybrid_sde::solvers::ri5::{IntegratorConfig, Ri5Integrator, StateChange};
use hybrid_sde::trajectory::{run_time_course, EventHandler, NoEvents, TimeCourseConfig, TimeCourseStatus};
use ndarray::{array, ArrayViewMut1};
use std::f64::consts::LN_2;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

fn production_decay(production: f64, decay: f64) -> ReactionNetwork {
    ReactionNetwork::new(1)
        .with_reaction(Reaction::new(production).product(0, 1))
        .expect("valid reaction")
        .with_reaction(Reaction::new(decay).reactant(0, 1))
        .expect("valid reaction")
}

/// Empties the species whenever its trigger fires
struct Harvest {
    harvested: f64,
}

impl EventHandler for Harvest {
    fn apply(&mut self, _time: f64, _fired: &[usize], mut state: ArrayViewMut1<f64>) -> StateChange {
        self.harvested += state[0];
        state[0] = 0.0;
        StateChange::Values
    }
}

/// Raises the cancel flag on the first event
struct StopOnFirst {
    flag: Arc<AtomicBool>,
}

impl EventHandler for StopOnFirst {
    fn apply(&mut self, _time: f64, _fired: &[usize], _state: ArrayViewMut1<f64>) -> StateChange {
        self.flag.store(true, Ordering::Relaxed);
        StateChange::Values
    }
}

#[test]
fn test_deterministic_harvest_cycle() {
    // x(t) = 10 (1 - e^-t) reaches 5 after ln 2, then restarts from zero
    let network = production_decay(10.0, 1.0)
        .deterministic()
        .with_trigger(Trigger::SpeciesLevel { species: 0, level: 5.0 })
        .unwrap();
    let config = IntegratorConfig {
        initial_step_fraction: 1e-2,
        seed: Some(3),
        ..Default::default()
    };
    let mut integrator = Ri5Integrator::new(&network, config).unwrap();
    let mut x = array![0.0];
    let time_course = TimeCourseConfig {
        duration: 5.0,
        output_interval: 0.5,
        ..Default::default()
    };
    let mut handler = Harvest { harvested: 0.0 };

    let trajectory = run_time_course(&mut integrator, x.view_mut(), &time_course, &mut handler).unwrap();

    assert_eq!(trajectory.status, TimeCourseStatus::Finished);
    assert_eq!(trajectory.len(), 11);
    assert_eq!(trajectory.events.len(), 7);
    for (n, event) in trajectory.events.iter().enumerate() {
        let expected = (n + 1) as f64 * LN_2;
        assert!((event.time - expected).abs() < 1e-5, "event {} at {}", n, event.time);
        assert_eq!(event.roots, vec![0]);
    }
    assert!((handler.harvested - 35.0).abs() < 1e-4);
    assert!(x[0] < 5.0);
}

#[test]
fn test_cancel_from_event_handler() {
    let network = production_decay(10.0, 1.0)
        .deterministic()
        .with_trigger(Trigger::SpeciesLevel { species: 0, level: 5.0 })
        .unwrap();
    let flag = Arc::new(AtomicBool::new(false));
    let mut integrator = Ri5Integrator::new(&network, IntegratorConfig::default()).unwrap();
    integrator.set_cancel_flag(Arc::clone(&flag));
    let mut x = array![0.0];
    let mut handler = StopOnFirst { flag };

    let trajectory = run_time_course(&mut integrator, x.view_mut(), &TimeCourseConfig::default(), &mut handler).unwrap();

    assert_eq!(trajectory.status, TimeCourseStatus::Canceled);
    assert_eq!(trajectory.events.len(), 1);
    assert!(integrator.time() < 1.0);
}

#[test]
fn test_birth_death_ensemble_mean() {
    let network = production_decay(50.0, 1.0);
    let config = EnsembleConfig {
        trajectories: 1_000,
        seed: 2024,
        threads: Some(2),
        time_course: TimeCourseConfig {
            duration: 2.0,
            output_interval: 1.0,
            ..Default::default()
        },
        ..EnsembleConfig::new(array![50.0])
    };

    let result = run_ensemble(&network, &config, |_| NoEvents).unwrap();

    // Stationary Poisson statistics: mean 50, variance 50
    println!("\nmean = {:.3}, std = {:.3}", result.statistics.mean[0], result.statistics.std_dev[0]);
    assert!((result.statistics.mean[0] - 50.0).abs() < 1.5);
    assert!((result.statistics.std_dev[0] - 50f64.sqrt()).abs() < 1.0);
    assert!(result.trajectories.iter().all(|t| t.final_state[0] >= 0.0 && !t.canceled));
    assert_eq!(result.mean_events(), 0.0);
}

#[test]
fn test_handler_factory_per_trajectory() {
    let network = production_decay(10.0, 1.0)
        .deterministic()
        .with_trigger(Trigger::SpeciesLevel { species: 0, level: 5.0 })
        .unwrap();
    let config = EnsembleConfig {
        trajectories: 8,
        threads: Some(3),
        time_course: TimeCourseConfig {
            duration: 1.0,
            output_interval: 0.5,
            ..Default::default()
        },
        ..EnsembleConfig::new(array![0.0])
    };

    let result = run_ensemble(&network, &config, |_| Harvest { harvested: 0.0 }).unwrap();

    assert_eq!(result.threads, 3);
    for summary in &result.trajectories {
        assert_eq!(summary.events, 1);
        // One harvest at ln 2, then regrowth for 1 - ln 2
        let expected = 10.0 * (1.0 - (-(1.0 - LN_2)).exp());
        assert!((summary.final_state[0] - expected).abs() < 1e-4);
    }
}
