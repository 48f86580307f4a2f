// src/rng.rs
//! Random Variates for Stochastic Runge-Kutta Integration
//!
//! # Design Philosophy
//!
//! The integrator needs a seeded, exclusively owned stream of deviates:
//! 1. **Reproducibility**: Same seed → bitwise-identical trajectories
//! 2. **Isolation**: Every integrator instance owns its generator, ensembles
//!    derive one generator per trajectory through [`RngFactory`]
//! 3. **Scheme-specific variates**: the RI5 scheme only needs discrete
//!    variates matching the first moments of the Itô integrals
//!
//! # Itô Integral Variates
//!
//! Per internal step of size `h` and per noise source `k`:
//! ```text
//! Î_k ∈ {-√(3h), 0, +√(3h)}   with P = 1/6, 2/3, 1/6
//! Ĩ_k ∈ {-√h, +√h}            with P = 1/2, 1/2
//! Î_(k,l) = ½(Î_k Î_l − √h Ĩ_k)   k < l
//!         = ½(Î_k Î_l + √h Ĩ_l)   l < k
//!         = ½(Î_k² − h)           k = l
//! ```
//!
//! The cache stores these in unit form (`Î_k/√h`, `Ĩ_k/√h`, `Î_(k,l)/h`),
//! which lets a step be rebuilt for any fraction of `h` with the same draws.

use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal, Uniform};

const SQRT_3: f64 = 1.732_050_807_568_877_2;

/// Seeded stream of uniform, normal and Itô variates
///
/// Counts every uniform/normal draw so callers can observe when fresh
/// variates were generated.
#[derive(Debug, Clone)]
pub struct VariateGenerator {
    rng: StdRng,
    uniform: Uniform<f64>,
    draws: u64,
}

impl VariateGenerator {
    /// Seeded generator; `None` seeds from the operating system entropy source
    pub fn new(seed: Option<u64>) -> Self {
        match seed {
            Some(seed) => Self::from_seed(seed),
            None => Self::from_entropy(),
        }
    }

    pub fn from_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    pub fn from_entropy() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            rng,
            uniform: Uniform::new(0.0, 1.0),
            draws: 0,
        }
    }

    /// Uniform deviate in [0, 1)
    pub fn uniform(&mut self) -> f64 {
        self.draws += 1;
        self.uniform.sample(&mut self.rng)
    }

    /// Standard normal deviate
    pub fn normal(&mut self) -> f64 {
        self.draws += 1;
        StandardNormal.sample(&mut self.rng)
    }

    /// Three-point variate `Î/√h`: ±√3 with probability 1/6 each, 0 otherwise
    pub fn unit_i_hat(&mut self) -> f64 {
        let u = self.uniform();
        if u < 1.0 / 6.0 {
            -SQRT_3
        } else if u < 1.0 / 3.0 {
            SQRT_3
        } else {
            0.0
        }
    }

    /// Two-point variate `Ĩ/√h`: ±1 with probability 1/2 each
    pub fn unit_i_tilde(&mut self) -> f64 {
        if self.uniform() < 0.5 {
            -1.0
        } else {
            1.0
        }
    }

    /// Number of uniform/normal deviates drawn so far
    pub fn draws(&self) -> u64 {
        self.draws
    }
}

/// Per-internal-step cache of Itô variates in unit form
#[derive(Debug, Clone)]
pub struct ItoVariates {
    i_hat: Array1<f64>,
    i_tilde: Array1<f64>,
    i_matrix: Array2<f64>,
    generation: u64,
    valid: bool,
}

impl ItoVariates {
    pub fn new(noise_sources: usize) -> Self {
        Self {
            i_hat: Array1::zeros(noise_sources),
            i_tilde: Array1::zeros(noise_sources),
            i_matrix: Array2::zeros((noise_sources, noise_sources)),
            generation: 0,
            valid: false,
        }
    }

    pub fn noise_sources(&self) -> usize {
        self.i_hat.len()
    }

    /// Draw a fresh set of variates for the next internal step
    pub fn regenerate(&mut self, generator: &mut VariateGenerator) {
        let m = self.noise_sources();
        for k in 0..m {
            self.i_hat[k] = generator.unit_i_hat();
            self.i_tilde[k] = generator.unit_i_tilde();
        }

        for k in 0..m {
            for l in 0..m {
                let product = self.i_hat[k] * self.i_hat[l];
                self.i_matrix[[k, l]] = match k.cmp(&l) {
                    std::cmp::Ordering::Less => 0.5 * (product - self.i_tilde[k]),
                    std::cmp::Ordering::Greater => 0.5 * (product + self.i_tilde[l]),
                    std::cmp::Ordering::Equal => 0.5 * (product - 1.0),
                };
            }
        }

        self.generation += 1;
        self.valid = true;
    }

    /// Reallocate for a new number of noise sources; the generation counter survives
    pub fn resize(&mut self, noise_sources: usize) {
        self.i_hat = Array1::zeros(noise_sources);
        self.i_tilde = Array1::zeros(noise_sources);
        self.i_matrix = Array2::zeros((noise_sources, noise_sources));
        self.valid = false;
    }

    /// Drop the cached draws; the next internal step must regenerate them
    pub fn invalidate(&mut self) {
        self.valid = false;
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Number of times the cache has been regenerated
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// `Î_k` for a step with `√h = sqrt_h`
    #[inline]
    pub fn i_hat(&self, k: usize, sqrt_h: f64) -> f64 {
        sqrt_h * self.i_hat[k]
    }

    /// `Î_(k,l)` for a step of size `h`
    #[inline]
    pub fn i_mixed(&self, k: usize, l: usize, h: f64) -> f64 {
        h * self.i_matrix[[k, l]]
    }
}

/// RNG factory for reproducible ensembles
pub struct RngFactory {
    base_seed: u64,
}

impl RngFactory {
    pub fn new(base_seed: u64) -> Self {
        Self { base_seed }
    }

    /// Seed used for a specific trajectory
    pub fn seed_for(&self, path_id: u64) -> u64 {
        self.base_seed.wrapping_add(path_id)
    }

    /// Create an independent generator for a specific trajectory/thread
    pub fn create_generator(&self, path_id: u64) -> VariateGenerator {
        VariateGenerator::from_seed(self.seed_for(path_id))
    }
}
