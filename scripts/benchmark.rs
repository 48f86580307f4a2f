// scripts/benchmark.rs
use hybrid_sde::math_utils::Timer;
use hybrid_sde::mc::ensemble::{run_ensemble, EnsembleConfig};
use hybrid_sde::models::decay::LinearDecay;
use hybrid_sde::models::ou_process::OuProcess;
use hybrid_sde::models::reaction_network::{Reaction, ReactionNetwork};
use hybrid_sde::solvers::ri5::{IntegratorConfig, Ri5Integrator, StateChange};
use hybrid_sde::trajectory::{run_time_course, NoEvents, TimeCourseConfig};
use ndarray::{array, ArrayViewMut1};
use std::env;
use std::error::Error;
use std::fs::File;
use std::io::{self, Write};

#[derive(Debug)]
struct SystemInfo {
    os: String,
    cpu_model: String,
    cpu_cores: usize,
    rustc_flags: String,
    rayon_threads: usize,
}

impl SystemInfo {
    fn gather() -> Self {
        SystemInfo {
            os: env::consts::OS.to_string(),
            cpu_model: Self::cpu_model(),
            cpu_cores: num_cpus::get(),
            rustc_flags: env::var("RUSTFLAGS").unwrap_or_else(|_| "default".to_string()),
            rayon_threads: rayon::current_num_threads(),
        }
    }

    fn cpu_model() -> String {
        std::fs::read_to_string("/proc/cpuinfo")
            .ok()
            .and_then(|content| {
                content
                    .lines()
                    .find(|line| line.starts_with("model name"))
                    .and_then(|line| line.split(':').nth(1))
                    .map(|s| s.trim().to_string())
            })
            .unwrap_or_else(|| "Unknown CPU".to_string())
    }
}

#[derive(Debug)]
struct BenchmarkResult {
    name: String,
    trajectories: usize,
    time_ms: f64,
    throughput_per_sec: f64,
    value: f64,
    reference: Option<f64>,
}

impl BenchmarkResult {
    fn relative_error(&self) -> Option<f64> {
        self.reference.map(|r| (self.value - r).abs() / r.abs().max(f64::MIN_POSITIVE))
    }
}

fn refill(_time: f64, _fired: &[usize], mut state: ArrayViewMut1<f64>) -> StateChange {
    state[0] = 1.0;
    StateChange::Values
}

fn run_single_trajectory_benchmarks() -> Result<Vec<BenchmarkResult>, Box<dyn Error>> {
    let mut results = Vec::new();
    let mut timer = Timer::new();

    for &fraction in &[1e-2, 1e-3, 1e-4] {
        println!("Decay root localization with initial step fraction {:e}...", fraction);
        let model = LinearDecay::new(1.0, 0.0)?.with_threshold(0.5);
        let config = IntegratorConfig {
            initial_step_fraction: fraction,
            seed: Some(42),
            ..Default::default()
        };
        let mut integrator = Ri5Integrator::new(&model, config)?;
        let mut x = array![1.0];

        timer.start();
        integrator.start(0.0, x.view())?;
        let outcome = integrator.step(x.view_mut(), 10.0)?;
        let time_ms = timer.elapsed_ms();

        results.push(BenchmarkResult {
            name: format!("Decay root (fraction {:e})", fraction),
            trajectories: 1,
            time_ms,
            throughput_per_sec: 1000.0 / time_ms.max(1e-9),
            value: outcome.time,
            reference: Some(std::f64::consts::LN_2),
        });
    }

    println!("Refill time course with events...");
    let model = LinearDecay::new(1.0, 0.02)?.with_threshold(0.5);
    let mut integrator = Ri5Integrator::new(&model, IntegratorConfig { seed: Some(1), ..Default::default() })?;
    let mut x = array![1.0];
    let time_course = TimeCourseConfig {
        duration: 100.0,
        output_interval: 0.1,
        ..Default::default()
    };
    let mut handler = refill;
    timer.start();
    let trajectory = run_time_course(&mut integrator, x.view_mut(), &time_course, &mut handler)?;
    let time_ms = timer.elapsed_ms();
    results.push(BenchmarkResult {
        name: "Refill time course (events)".to_string(),
        trajectories: 1,
        time_ms,
        throughput_per_sec: 1000.0 / time_ms.max(1e-9),
        value: trajectory.events.len() as f64,
        reference: Some(100.0 / std::f64::consts::LN_2),
    });

    Ok(results)
}

fn run_ensemble_benchmarks() -> Result<Vec<BenchmarkResult>, Box<dyn Error>> {
    let mut results = Vec::new();
    let mut timer = Timer::new();

    let ou = OuProcess::new(1.0, 0.0, 0.3)?;
    let max_threads = num_cpus::get();
    let mut thread_counts = vec![1, 2, 4, max_threads];
    thread_counts.retain(|&t| t <= max_threads);
    thread_counts.dedup();

    for &threads in &thread_counts {
        println!("OU ensemble on {} thread(s)...", threads);
        let config = EnsembleConfig {
            trajectories: 10_000,
            seed: 42,
            threads: Some(threads),
            time_course: TimeCourseConfig {
                duration: 1.0,
                output_interval: 0.25,
                ..Default::default()
            },
            ..EnsembleConfig::new(array![1.0])
        };

        timer.start();
        let result = run_ensemble(&ou, &config, |_| NoEvents)?;
        let time_ms = timer.elapsed_ms();
        results.push(BenchmarkResult {
            name: format!("OU ensemble mean ({} threads)", threads),
            trajectories: config.trajectories,
            time_ms,
            throughput_per_sec: config.trajectories as f64 / (time_ms / 1000.0),
            value: result.statistics.mean[0],
            reference: Some(ou.exact_mean(1.0, 1.0)),
        });
    }

    println!("Birth-death Langevin ensemble...");
    let network = ReactionNetwork::new(1)
        .with_reaction(Reaction::new(50.0).product(0, 1))?
        .with_reaction(Reaction::new(1.0).reactant(0, 1))?;
    let config = EnsembleConfig {
        trajectories: 2_000,
        seed: 7,
        time_course: TimeCourseConfig {
            duration: 5.0,
            output_interval: 1.0,
            ..Default::default()
        },
        ..EnsembleConfig::new(array![50.0])
    };
    timer.start();
    let result = run_ensemble(&network, &config, |_| NoEvents)?;
    let time_ms = timer.elapsed_ms();
    results.push(BenchmarkResult {
        name: "Birth-death stationary mean".to_string(),
        trajectories: config.trajectories,
        time_ms,
        throughput_per_sec: config.trajectories as f64 / (time_ms / 1000.0),
        value: result.statistics.mean[0],
        reference: Some(50.0),
    });

    Ok(results)
}

fn write_results_to_csv(results: &[BenchmarkResult], system_info: &SystemInfo, filename: &str) -> io::Result<()> {
    let mut file = File::create(filename)?;

    writeln!(file, "# System Information")?;
    writeln!(file, "# OS: {}", system_info.os)?;
    writeln!(file, "# CPU: {}", system_info.cpu_model)?;
    writeln!(file, "# CPU Cores: {}", system_info.cpu_cores)?;
    writeln!(file, "# RUSTFLAGS: {}", system_info.rustc_flags)?;
    writeln!(file, "# Rayon Threads: {}", system_info.rayon_threads)?;
    writeln!(
        file,
        "# Benchmark Date: {}",
        chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
    )?;
    writeln!(file, "#")?;
    writeln!(file, "Benchmark,Trajectories,Time_ms,Throughput_per_sec,Value,Reference,Relative_Error")?;

    for result in results {
        writeln!(
            file,
            "{},{},{:.2},{:.0},{:.6},{},{}",
            result.name,
            result.trajectories,
            result.time_ms,
            result.throughput_per_sec,
            result.value,
            result
                .reference
                .map(|v| format!("{:.6}", v))
                .unwrap_or_else(|| "N/A".to_string()),
            result
                .relative_error()
                .map(|e| format!("{:.6}", e))
                .unwrap_or_else(|| "N/A".to_string())
        )?;
    }

    println!("Results written to {}", filename);
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    println!("hybrid-sde Benchmark Suite");
    println!("==========================\n");

    let system_info = SystemInfo::gather();
    println!("System Information:");
    println!("  OS: {}", system_info.os);
    println!("  CPU: {}", system_info.cpu_model);
    println!("  CPU Cores: {}", system_info.cpu_cores);
    println!("  RUSTFLAGS: {}", system_info.rustc_flags);
    println!("  Rayon Threads: {}", system_info.rayon_threads);
    println!();

    let mut results = run_single_trajectory_benchmarks()?;
    results.extend(run_ensemble_benchmarks()?);

    println!("\n{:<36} {:>8} {:>12} {:>14} {:>12}", "Benchmark", "Paths", "Time (ms)", "Value", "Rel. Error");
    for result in &results {
        println!(
            "{:<36} {:>8} {:>12.2} {:>14.6} {:>12}",
            result.name,
            result.trajectories,
            result.time_ms,
            result.value,
            result
                .relative_error()
                .map(|e| format!("{:.2e}", e))
                .unwrap_or_else(|| "N/A".to_string())
        );
    }
    println!();

    let filename = format!("benchmark_{}.csv", chrono::Local::now().format("%Y%m%d_%H%M%S"));
    write_results_to_csv(&results, &system_info, &filename)?;
    Ok(())
}
