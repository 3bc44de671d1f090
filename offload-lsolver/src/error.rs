use derive_more::From;

use offload_core::OffloadError;

pub type Result<T> = core::result::Result<T, SolveError>;

/// Status reported for numerical failures of a solver.
pub const SOLVER_STATUS: i32 = -5000;

#[derive(Debug, From)]
pub enum SolveError {
    // -- Externals
    #[from]
    Offload(OffloadError),

    DimensionError(String),

    NonConvergence {
        iterations: usize,
        residual_norm: f64,
    },

    Breakdown {
        iteration: usize,
        quantity: &'static str,
    },

    /// Negative status written back by the accelerator firmware.
    Firmware(i64),

    Unsupported(String),
}

impl SolveError {
    pub fn status(&self) -> i32 {
        match self {
            SolveError::Offload(err) => err.status(),
            SolveError::DimensionError(_) => offload_core::error::INVALID_INPUT_STATUS,
            SolveError::Firmware(status) => i32::try_from(*status).unwrap_or(SOLVER_STATUS),
            SolveError::NonConvergence { .. }
            | SolveError::Breakdown { .. }
            | SolveError::Unsupported(_) => SOLVER_STATUS,
        }
    }
}

// region:    --- Error Boilerplate

impl core::fmt::Display for SolveError {
    fn fmt(&self, fmt: &mut core::fmt::Formatter) -> core::result::Result<(), core::fmt::Error> {
        write!(fmt, "{self:?}")
    }
}

impl std::error::Error for SolveError {}

// endregion: --- Error Boilerplate
