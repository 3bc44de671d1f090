//! `offload-lsolver`: iterative linear solvers that run on a companion
//! accelerator when offloading is enabled, and on a local worker pool
//! otherwise.

pub mod algorithms;
pub mod error;
pub mod solver;

pub use algorithms::{
    BiConjugateGradient, ConjugateGradient, Qmr, SolveAlgorithm, SolveResult, SolverControl,
    SolverKind,
};
pub use error::{Result, SolveError};
pub use solver::{status_of, OffloadSolver};

// Re-export from offload_core
pub use offload_core::{
    DeviceTransport, DispatchConfig, Matrix, MatrixView, OffloadConfig, OffloadError, Triplet,
};
