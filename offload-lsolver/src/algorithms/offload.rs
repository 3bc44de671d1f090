//! Builds the firmware call for one solve and runs it through an
//! [`AcceleratorSession`].
//!
//! Argument order, which the firmware relies on:
//!
//! | position | argument        | direction |
//! |----------|-----------------|-----------|
//! | 0        | [`SolverControl`] | IN      |
//! | 1        | matrix A        | IN        |
//! | 2        | right-hand side | IN        |
//! | 3        | solution x      | IN_OUT    |
//! | 4        | status (i64)    | OUT       |
//! | 5        | residual norm   | OUT       |

use offload_core::{
    AcceleratorSession, ArgumentList, DeviceTransport, Direction, MatrixView, OffloadConfig,
};

use super::{SolveAlgorithm, SolveResult, SolverControl};
use crate::error::{Result, SolveError};

pub const CONTROL_POSITION: usize = 0;
pub const MATRIX_POSITION: usize = 1;
pub const RHS_POSITION: usize = 2;
pub const SOLUTION_POSITION: usize = 3;
pub const STATUS_POSITION: usize = 4;
pub const RESIDUAL_POSITION: usize = 5;

/// Runs `algorithm` on the accelerator. `x` starts at zero; the firmware
/// overwrites it, the status, and the residual norm in place.
pub fn offload_solve(
    algorithm: &dyn SolveAlgorithm,
    transport: &dyn DeviceTransport,
    config: &OffloadConfig,
    a: &MatrixView,
    b: &[f64],
) -> Result<SolveResult> {
    algorithm.validate_inputs(a, b)?;
    let control: SolverControl = algorithm.control(b.len());
    let mut x = vec![0.0f64; b.len()];
    let mut status = 0i64;
    let mut residual_norm = 0.0f64;

    let stats = {
        let mut args = ArgumentList::new();
        args.add_config(&control);
        args.add_matrix(a, Direction::In)?;
        args.add_buffer(b);
        args.add_buffer_mut(&mut x, Direction::InOut);
        args.add_scalar_mut(&mut status, Direction::Out);
        args.add_scalar_mut(&mut residual_norm, Direction::Out);

        let mut session = AcceleratorSession::new(transport, config);
        session.run(algorithm.kind().firmware_name(), &args)?;
        session.transfer_stats()
    };
    log::debug!(
        "{:?} offload finished: status {}, {} commands, {} record bytes",
        algorithm.kind(),
        status,
        stats.commands_issued,
        stats.bytes_marshalled
    );

    if status < 0 {
        return Err(SolveError::Firmware(status));
    }
    Ok(SolveResult {
        x,
        iterations: status as usize,
        residual_norm,
    })
}
