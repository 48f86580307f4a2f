// demos/decay_event.rs
use hybrid_sde::models::decay::LinearDecay;
use hybrid_sde::output::{write_events_to_csv, write_trajectory_to_csv};
use hybrid_sde::solvers::ri5::{IntegratorConfig, Ri5Integrator, StateChange};
use hybrid_sde::trajectory::{run_time_course, EventHandler, TimeCourseConfig};
use hybrid_sde::SdeResult;
use ndarray::{array, ArrayViewMut1};
use tracing_subscriber::EnvFilter;

/// Tops the pool back up to its initial level whenever the threshold fires
struct Refill {
    level: f64,
}

impl EventHandler for Refill {
    fn apply(&mut self, time: f64, _fired: &[usize], mut state: ArrayViewMut1<f64>) -> StateChange {
        println!("   refill at t = {:.6} (x = {:.6})", time, state[0]);
        state[0] = self.level;
        StateChange::Values
    }
}

fn main() -> SdeResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("Decay Event Demo for hybrid-sde");
    println!("===============================\n");

    // 1. Single step stopping at the threshold
    println!("1. dx/dt = -x, x(0) = 1, trigger x = 0.5, deltaT = 10");
    let model = LinearDecay::new(1.0, 0.0)?.with_threshold(0.5);
    let config = IntegratorConfig {
        initial_step_fraction: 1e-3,
        seed: Some(2024),
        ..Default::default()
    };
    let mut integrator = Ri5Integrator::new(&model, config.clone())?;
    let mut x = array![1.0];
    integrator.start(0.0, x.view())?;
    let outcome = integrator.step(x.view_mut(), 10.0)?;
    println!("   status:        {:?}", outcome.status);
    println!("   advanced:      {:.9} (ln 2 = {:.9})", outcome.advanced, std::f64::consts::LN_2);
    println!("   fired roots:   {:?}", outcome.fired_roots);
    println!("   x at the root: {:.9}", x[0]);
    println!("   stats:         {:?}\n", integrator.stats());

    // 2. Noisy time course with repeated refills
    println!("2. Noisy decay (σ = 0.05) with refills over 5 time units");
    let noisy = LinearDecay::new(1.0, 0.05)?.with_threshold(0.5);
    let mut integrator = Ri5Integrator::new(&noisy, config)?;
    let mut x = array![1.0];
    let time_course = TimeCourseConfig {
        duration: 5.0,
        output_interval: 0.05,
        ..Default::default()
    };
    let trajectory = run_time_course(&mut integrator, x.view_mut(), &time_course, &mut Refill { level: 1.0 })?;
    println!("   output points: {}", trajectory.len());
    println!("   events:        {}", trajectory.events.len());
    println!("   final x:       {:.6}", x[0]);

    if let Err(e) = write_trajectory_to_csv("decay_trajectory.csv", &trajectory)
        .and_then(|_| write_events_to_csv("decay_events.csv", &trajectory))
    {
        eprintln!("   could not write CSV output: {}", e);
    } else {
        println!("   wrote decay_trajectory.csv and decay_events.csv");
    }

    Ok(())
}
