use thiserror::Error;

/// Errors surfaced by the simulation engine and the analytic solver.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimError {
    /// A configuration field is out of range.
    #[error("invalid configuration: `{field}` {reason}")]
    InvalidConfig { field: &'static str, reason: String },

    /// Adaptive quadrature hit its subdivision cap (or produced a non-finite value)
    /// before meeting the requested tolerance.
    #[error(
        "integration of {integrand} did not converge: {value:e} ± {abs_error:e} after {intervals} subintervals"
    )]
    Integration {
        integrand: &'static str,
        value: f64,
        abs_error: f64,
        intervals: usize,
    },

    /// The fading rejection sampler ran out of attempts, even after refining f_max.
    #[error("fading sampler rejected {attempts} draws in a row after {refinements} bounding-box refinements")]
    SamplingExhausted { attempts: usize, refinements: usize },

    /// The background worker thread is gone.
    #[error("simulation worker disconnected")]
    WorkerDisconnected,
}

impl SimError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        SimError::InvalidConfig {
            field,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SimError>;
