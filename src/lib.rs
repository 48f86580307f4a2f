//! # hybrid-sde: Hybrid Stochastic Integration with Event Detection
//!
//! A Rust library for integrating biochemical reaction networks and other
//! continuous-time systems written as Itô SDEs, while detecting and
//! localizing discrete events (sign changes of trigger functions).
//!
//! ## Key Features
//!
//! - **Weak Order 2**: Rößler's RI5 stochastic Runge-Kutta scheme, third
//!   order in the deterministic limit
//! - **Physical Validity**: Internal steps are halved instead of accepting
//!   negative concentrations
//! - **Event Localization**: Vector root finder stopping exactly at the
//!   crossing, with simultaneous roots reported together
//! - **Reproducible Ensembles**: Parallel trajectories with Rayon,
//!   bitwise-identical for a fixed seed
//!
//! ## Quick Start
//!
//! ```rust
//! use hybrid_sde::models::decay::LinearDecay;
//! use hybrid_sde::solvers::ri5::{IntegratorConfig, Ri5Integrator, StepStatus};
//! use ndarray::array;
//!
//! // dx/dt = -x with a trigger at x = 0.5
//! let model = LinearDecay::new(1.0, 0.0)?.with_threshold(0.5);
//! let config = IntegratorConfig {
//!     initial_step_fraction: 1e-3,
//!     seed: Some(1),
//!     ..Default::default()
//! };
//!
//! let mut integrator = Ri5Integrator::new(&model, config)?;
//! let mut x = array![1.0];
//! integrator.start(0.0, x.view())?;
//!
//! let outcome = integrator.step(x.view_mut(), 10.0)?;
//! assert_eq!(outcome.status, StepStatus::RootFound);
//! assert_eq!(outcome.fired_roots, vec![0]);
//! assert!((outcome.time - std::f64::consts::LN_2).abs() < 1e-6);
//! # Ok::<(), hybrid_sde::SdeError>(())
//! ```
//!
//! ## Event Protocol
//!
//! When `step()` stops at a root, the caller applies the discrete state
//! change and calls `state_change()` before stepping again. The
//! [`trajectory`] module wraps this loop for whole time courses, and
//! [`mc::ensemble`] runs many of them in parallel.

// Module declarations
pub mod error;
pub mod rng;
pub mod math_utils;
pub mod models;
pub mod solvers;
pub mod trajectory;
pub mod mc;
pub mod output;

// Re-export commonly used types for convenience
pub use error::{SdeError, SdeResult};
pub use models::model::{ModelDimensions, SystemEvaluator};
pub use solvers::ri5::{IntegratorConfig, Phase, Ri5Integrator, StateChange, StepFlags, StepOutcome, StepStatus};
pub use solvers::root_finder::{RootConfidence, RootMasking};
