// tests/integrator_test.rs
use hybrid_sde::models::decay::LinearDecay;
use hybrid_sde::models::model::{ModelDimensions, SystemEvaluator};
use hybrid_sde::models::ou_process::OuProcess;
use hybrid_sde::models::reaction_network::{Reaction, ReactionNetwork, Trigger};
use hybrid_sde::solvers::ri5::{IntegratorConfig, Phase, Ri5Integrator, StateChange, StepFlags, StepStatus};
use hybrid_sde::solvers::root_finder::{RootConfidence, RootMasking};
use hybrid_sde::SdeError;
use ndarray::{array, Array1, ArrayView1, ArrayViewMut1, ArrayViewMut2};
use std::cell::RefCell;
use std::f64::consts::LN_2;

/// Decay with two roots that cross at the same instant
struct TwinThresholds;

impl SystemEvaluator for TwinThresholds {
    fn dimensions(&self) -> ModelDimensions {
        ModelDimensions {
            variables: 1,
            roots: 2,
            physical: vec![0],
            ..Default::default()
        }
    }
    fn eval_rate(&self, _t: f64, x: ArrayView1<f64>, mut r: ArrayViewMut1<f64>) {
        r[0] = -x[0];
    }
    fn eval_noise(&self, _t: f64, _x: ArrayView1<f64>, _n: ArrayViewMut2<f64>) {}
    fn eval_roots(&self, _t: f64, x: ArrayView1<f64>, mut roots: ArrayViewMut1<f64>) {
        roots[0] = x[0] - 0.5;
        roots[1] = 2.0 * x[0] - 1.0;
    }
}

/// Decay whose threshold list can grow while an integrator is attached
struct GrowingThresholds {
    thresholds: RefCell<Vec<f64>>,
}

impl SystemEvaluator for GrowingThresholds {
    fn dimensions(&self) -> ModelDimensions {
        ModelDimensions {
            variables: 1,
            noise_sources: 1,
            roots: self.thresholds.borrow().len(),
            physical: vec![0],
            ..Default::default()
        }
    }
    fn eval_rate(&self, _t: f64, x: ArrayView1<f64>, mut r: ArrayViewMut1<f64>) {
        r[0] = -x[0];
    }
    fn eval_noise(&self, _t: f64, _x: ArrayView1<f64>, mut n: ArrayViewMut2<f64>) {
        n[[0, 0]] = 0.01;
    }
    fn eval_roots(&self, _t: f64, x: ArrayView1<f64>, mut roots: ArrayViewMut1<f64>) {
        for (root, level) in roots.iter_mut().zip(self.thresholds.borrow().iter()) {
            *root = x[0] - level;
        }
    }
}

fn fine_config(seed: u64) -> IntegratorConfig {
    IntegratorConfig {
        initial_step_fraction: 1e-3,
        seed: Some(seed),
        ..Default::default()
    }
}

fn birth_death(birth: f64, death: f64) -> ReactionNetwork {
    ReactionNetwork::new(1)
        .with_reaction(Reaction::new(birth).product(0, 1))
        .expect("valid reaction")
        .with_reaction(Reaction::new(death).reactant(0, 1))
        .expect("valid reaction")
}

#[test]
fn test_end_to_end_decay_scenario() {
    let model = LinearDecay::new(1.0, 0.0).unwrap().with_threshold(0.5);
    let config = IntegratorConfig {
        seed: Some(1),
        ..Default::default()
    };
    let mut integrator = Ri5Integrator::new(&model, config).unwrap();
    let mut x = array![1.0];
    integrator.start(0.0, x.view()).unwrap();

    let outcome = integrator.step(x.view_mut(), 10.0).unwrap();

    println!("\nStopped at t = {} (ln 2 = {}), x = {}", outcome.time, LN_2, x[0]);
    assert_eq!(outcome.status, StepStatus::RootFound);
    assert_eq!(outcome.fired_roots, vec![0]);
    assert!((outcome.advanced - LN_2).abs() < 1e-3);
    assert!((x[0] - 0.5).abs() < 1e-3);
}

#[test]
fn test_root_localized_within_tolerance() {
    let model = LinearDecay::new(1.0, 0.0).unwrap().with_threshold(0.5);
    let mut integrator = Ri5Integrator::new(&model, fine_config(1)).unwrap();
    let mut x = array![1.0];
    integrator.start(0.0, x.view()).unwrap();

    let outcome = integrator.step(x.view_mut(), 10.0).unwrap();
    assert_eq!(outcome.fired_roots, vec![0]);
    assert_eq!(outcome.root_confidence, RootConfidence::Converged);
    assert!((outcome.time - LN_2).abs() < 1e-6, "t = {}", outcome.time);
    assert!(outcome.time >= LN_2 - 1e-9, "the step never stops before the crossing");
    assert!(x[0] <= 0.5);
}

#[test]
fn test_simultaneous_roots_fire_together() {
    let mut integrator = Ri5Integrator::new(&TwinThresholds, fine_config(3)).unwrap();
    let mut x = array![1.0];
    integrator.start(0.0, x.view()).unwrap();

    let outcome = integrator.step(x.view_mut(), 5.0).unwrap();
    assert_eq!(outcome.status, StepStatus::RootFound);
    assert_eq!(outcome.fired_roots, vec![0, 1]);
    assert!((outcome.time - LN_2).abs() < 1e-6);
    assert_eq!(integrator.stats().roots_found, 2);
}

#[test]
fn test_progress_never_overshoots() {
    let model = OuProcess::new(2.0, 1.0, 0.5).unwrap().with_barrier(1.2).with_barrier(0.8);
    let mut integrator = Ri5Integrator::new(&model, IntegratorConfig { seed: Some(11), ..Default::default() }).unwrap();
    let mut x = array![1.0];
    integrator.start(0.0, x.view()).unwrap();

    let mut previous = 0.0;
    let mut roots = 0;
    for n in 0..200 {
        let delta_t = 0.01 + 0.05 * (n % 7) as f64;
        let outcome = integrator.step(x.view_mut(), delta_t).unwrap();
        assert!(outcome.advanced > 0.0, "no progress at step {}", n);
        assert!(outcome.advanced <= delta_t);
        assert!(outcome.time > previous);
        assert!((outcome.time - previous - outcome.advanced).abs() < 1e-12);
        previous = outcome.time;

        if outcome.root_found() {
            roots += 1;
            integrator.state_change(StateChange::Values);
        }
    }
    assert!(roots > 0, "barriers at μ ± 0.2 should be crossed");
}

#[test]
fn test_eval_root_is_idempotent() {
    let model = LinearDecay::new(1.0, 0.0).unwrap().with_threshold(0.25).with_threshold(0.75);
    let mut integrator = Ri5Integrator::new(&model, fine_config(5)).unwrap();
    let x = array![0.6];
    integrator.start(0.0, x.view()).unwrap();

    let mut first = Array1::zeros(2);
    let mut second = Array1::zeros(2);
    integrator.eval_root(0.3, x.view(), first.view_mut()).unwrap();
    integrator.eval_root(0.3, x.view(), second.view_mut()).unwrap();
    assert_eq!(first, second);
    assert!((first[0] - 0.35).abs() < 1e-15);
    assert!((first[1] + 0.15).abs() < 1e-15);

    let mut wrong = Array1::zeros(3);
    assert!(matches!(
        integrator.eval_root(0.3, x.view(), wrong.view_mut()),
        Err(SdeError::DimensionMismatch { .. })
    ));
}

#[test]
fn test_physical_components_stay_non_negative() {
    // Low copy numbers keep the Langevin noise close to the zero boundary
    let network = birth_death(2.0, 1.0);
    for seed in 0..20 {
        let mut integrator = Ri5Integrator::new(&network, IntegratorConfig { seed: Some(seed), ..Default::default() }).unwrap();
        let mut x = array![1.0];
        integrator.start(0.0, x.view()).unwrap();
        for _ in 0..20 {
            let outcome = integrator.step(x.view_mut(), 0.25).unwrap();
            assert_ne!(outcome.status, StepStatus::BudgetExhausted);
            assert!(x[0] >= 0.0, "seed {}: x = {}", seed, x[0]);
        }
    }
}

#[test]
fn test_fixed_seed_is_bitwise_reproducible() {
    let network = birth_death(20.0, 0.5).with_trigger(Trigger::SpeciesLevel { species: 0, level: 30.0 }).unwrap();

    let run = |seed: u64| -> Vec<u64> {
        let mut integrator = Ri5Integrator::new(&network, IntegratorConfig { seed: Some(seed), ..Default::default() }).unwrap();
        let mut x = array![5.0];
        integrator.start(0.0, x.view()).unwrap();
        let mut bits = Vec::new();
        for _ in 0..50 {
            let outcome = integrator.step(x.view_mut(), 0.2).unwrap();
            bits.push(outcome.time.to_bits());
            bits.push(x[0].to_bits());
            if outcome.root_found() {
                x[0] *= 0.5;
                integrator.state_change(StateChange::Values);
            }
        }
        bits
    };

    assert_eq!(run(17), run(17));
    assert_ne!(run(17), run(18));
}

#[test]
fn test_state_change_regenerates_variates() {
    let model = OuProcess::new(1.0, 0.0, 0.2).unwrap();
    let mut integrator = Ri5Integrator::new(&model, fine_config(23)).unwrap();
    let mut x = array![1.0];
    integrator.start(0.0, x.view()).unwrap();
    integrator.step(x.view_mut(), 0.01).unwrap();

    let generation = integrator.variates_generation();
    let draws = integrator.draws();

    x[0] = 3.0;
    integrator.state_change(StateChange::Values);
    assert_eq!(integrator.phase(), Phase::Uninitialized);
    assert_eq!(integrator.variates_generation(), generation);

    let outcome = integrator.step(x.view_mut(), 0.01).unwrap();
    assert!(outcome.flags.contains(StepFlags::REINITIALIZED));
    assert!(integrator.variates_generation() > generation);
    assert!(integrator.draws() > draws);
    assert_eq!(integrator.phase(), Phase::Completed);

    // Only the first step after the change reinitializes
    let outcome = integrator.step(x.view_mut(), 0.01).unwrap();
    assert!(!outcome.flags.contains(StepFlags::REINITIALIZED));
}

#[test]
fn test_structure_change_resizes_buffers() {
    let model = GrowingThresholds {
        thresholds: RefCell::new(vec![0.9]),
    };
    let mut integrator = Ri5Integrator::new(&model, fine_config(29)).unwrap();
    let mut x = array![1.0];
    integrator.start(0.0, x.view()).unwrap();
    let outcome = integrator.step(x.view_mut(), 1.0).unwrap();
    assert_eq!(outcome.fired_roots, vec![0]);

    model.thresholds.borrow_mut().push(0.5);
    integrator.state_change(StateChange::Structure);
    let outcome = integrator.step(x.view_mut(), 1.0).unwrap();
    assert!(outcome.flags.contains(StepFlags::REINITIALIZED));
    assert_eq!(integrator.dimensions().roots, 2);
    assert_eq!(outcome.fired_roots, vec![1]);

    let mut roots = Array1::zeros(2);
    integrator.eval_root(outcome.time, x.view(), roots.view_mut()).unwrap();
    assert!(roots[0] < 0.0 && roots[1] <= 0.0);
}

#[test]
fn test_discrete_roots_can_be_masked() {
    let network = birth_death(5.0, 1.0).with_trigger(Trigger::Time(2.0)).unwrap();

    let mut integrator = Ri5Integrator::new(&network, fine_config(31)).unwrap();
    let mut x = array![5.0];
    integrator.start(0.0, x.view()).unwrap();
    let outcome = integrator.step(x.view_mut(), 5.0).unwrap();
    assert_eq!(outcome.fired_roots, vec![0]);
    assert!((outcome.time - 2.0).abs() < 1e-8);

    let config = IntegratorConfig {
        root_masking: RootMasking::Discrete,
        ..fine_config(31)
    };
    let mut integrator = Ri5Integrator::new(&network, config).unwrap();
    let mut x = array![5.0];
    integrator.start(0.0, x.view()).unwrap();
    let outcome = integrator.step(x.view_mut(), 5.0).unwrap();
    assert_eq!(outcome.status, StepStatus::Completed);
    assert_eq!(outcome.advanced, 5.0);
}

#[test]
fn test_low_confidence_root_is_flagged() {
    let model = LinearDecay::new(1.0, 0.0).unwrap().with_threshold(0.5);
    let config = IntegratorConfig {
        root_relative_tolerance: 1e-12,
        root_max_iterations: 1,
        ..fine_config(37)
    };
    let mut integrator = Ri5Integrator::new(&model, config).unwrap();
    let mut x = array![1.0];
    integrator.start(0.0, x.view()).unwrap();

    let outcome = integrator.step(x.view_mut(), 10.0).unwrap();
    assert_eq!(outcome.status, StepStatus::RootFound);
    assert_eq!(outcome.root_confidence, RootConfidence::LowConfidence);
    assert!(outcome.flags.contains(StepFlags::ROOT_LOW_CONFIDENCE));
    // The best estimate still lies past the crossing, within one internal step
    assert!(outcome.time >= LN_2 - 1e-9 && outcome.time < LN_2 + 0.01);
}

#[test]
fn test_evaluation_failure_reports_time_reached() {
    struct Blowup;

    impl SystemEvaluator for Blowup {
        fn dimensions(&self) -> ModelDimensions {
            ModelDimensions {
                variables: 1,
                ..Default::default()
            }
        }
        fn eval_rate(&self, t: f64, _x: ArrayView1<f64>, mut r: ArrayViewMut1<f64>) {
            r[0] = if t >= 0.5 { f64::INFINITY } else { 1.0 };
        }
        fn eval_noise(&self, _t: f64, _x: ArrayView1<f64>, _n: ArrayViewMut2<f64>) {}
        fn eval_roots(&self, _t: f64, _x: ArrayView1<f64>, _r: ArrayViewMut1<f64>) {}
    }

    let config = IntegratorConfig {
        min_step: 1e-6,
        initial_step_fraction: 0.1,
        seed: Some(41),
        ..Default::default()
    };
    let mut integrator = Ri5Integrator::new(&Blowup, config).unwrap();
    let mut x = array![0.0];
    integrator.start(0.0, x.view()).unwrap();

    match integrator.step(x.view_mut(), 1.0) {
        Err(SdeError::EvaluationFailure { time, .. }) => {
            assert!(time >= 0.5 - 1e-5 && time <= 0.5 + 1e-5, "failed at {}", time);
        }
        other => panic!("expected an evaluation failure, got {:?}", other),
    }
    assert_eq!(integrator.phase(), Phase::Failed);
    assert!((x[0] - integrator.time()).abs() < 1e-9, "state holds the last valid point");
}
