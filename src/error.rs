// src/error.rs
use thiserror::Error;

/// Error types for the hybrid-sde library
///
/// Hard integration failures carry the simulation time reached; the
/// caller's state view always holds the last valid state when one of
/// them is returned.
#[derive(Debug, Clone, Error)]
pub enum SdeError {
    /// Invalid parameter values
    #[error("Invalid parameter '{parameter}' = {value}: {constraint}")]
    InvalidParameters {
        parameter: String,
        value: f64,
        constraint: String,
    },

    /// Invalid configuration
    #[error("Invalid configuration for '{field}': {reason}")]
    InvalidConfiguration { field: String, reason: String },

    /// A buffer or state vector does not match the model dimensions
    #[error("Dimension mismatch for {what}: expected {expected}, got {actual}")]
    DimensionMismatch {
        what: String,
        expected: usize,
        actual: usize,
    },

    /// `step()` was called before `start()`, or after a hard failure
    #[error("Integrator not started: {reason}")]
    NotStarted { reason: String },

    /// The system evaluator produced a non-finite rate, noise or state value
    #[error("Evaluation failure at t = {time} in {stage}: non-finite value at index {index}")]
    EvaluationFailure {
        time: f64,
        stage: String,
        index: usize,
    },

    /// The physical-validity predicate still fails at the minimum step size
    #[error("Physical validity violated for component {component} (value {value:.6e}) at t = {time} with minimum step {min_step:e}")]
    ValidityFloor {
        time: f64,
        component: usize,
        value: f64,
        min_step: f64,
    },

    /// Root localization was requested on an interval without a sign change
    #[error("No root bracketed in [{t0}, {t1}]")]
    RootNotBracketed { t0: f64, t1: f64 },

    /// A time-course step returned without advancing time
    #[error("No progress at t = {time}: {reason}")]
    NoProgress { time: f64, reason: String },

    /// Worker pool construction failed
    #[error("Thread pool error: {reason}")]
    ThreadPool { reason: String },
}

/// Result type alias for hybrid-sde operations
pub type SdeResult<T> = Result<T, SdeError>;

/// Validation utilities
pub mod validation {
    use super::{SdeError, SdeResult};

    /// Validate that a parameter is positive
    pub fn validate_positive(name: &str, value: f64) -> SdeResult<()> {
        if !(value > 0.0) {
            Err(SdeError::InvalidParameters {
                parameter: name.to_string(),
                value,
                constraint: "must be positive (> 0)".to_string(),
            })
        } else {
            Ok(())
        }
    }

    /// Validate that a parameter is non-negative
    pub fn validate_non_negative(name: &str, value: f64) -> SdeResult<()> {
        if !(value >= 0.0) {
            Err(SdeError::InvalidParameters {
                parameter: name.to_string(),
                value,
                constraint: "must be non-negative (≥ 0)".to_string(),
            })
        } else {
            Ok(())
        }
    }

    /// Validate that a parameter is within a range
    pub fn validate_range(name: &str, value: f64, min: f64, max: f64) -> SdeResult<()> {
        if !(value >= min && value <= max) {
            Err(SdeError::InvalidParameters {
                parameter: name.to_string(),
                value,
                constraint: format!("must be in range [{}, {}]", min, max),
            })
        } else {
            Ok(())
        }
    }

    /// Validate that a value is finite and not NaN
    pub fn validate_finite(name: &str, value: f64) -> SdeResult<()> {
        if !value.is_finite() {
            Err(SdeError::InvalidParameters {
                parameter: name.to_string(),
                value,
                constraint: "must be finite (not NaN or infinite)".to_string(),
            })
        } else {
            Ok(())
        }
    }

    /// Validate a count that must lie in `1..=max`
    pub fn validate_count(field: &str, count: usize, max: usize) -> SdeResult<()> {
        if count == 0 {
            Err(SdeError::InvalidConfiguration {
                field: field.to_string(),
                reason: "must be greater than 0".to_string(),
            })
        } else if count > max {
            Err(SdeError::InvalidConfiguration {
                field: field.to_string(),
                reason: format!("exceeds maximum allowed ({})", max),
            })
        } else {
            Ok(())
        }
    }

    /// Validate that every entry of a state vector is finite
    pub fn validate_state(values: &[f64]) -> SdeResult<()> {
        match values.iter().position(|v| !v.is_finite()) {
            Some(i) => Err(SdeError::InvalidParameters {
                parameter: format!("state[{}]", i),
                value: values[i],
                constraint: "must be finite (not NaN or infinite)".to_string(),
            }),
            None => Ok(()),
        }
    }
}
