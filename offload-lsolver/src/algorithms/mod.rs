use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use offload_core::{Matrix, MatrixView};

use crate::error::{Result, SolveError};

pub mod local;
pub mod offload;

pub use local::LocalContext;

/// Solvers the accelerator firmware implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SolverKind {
    Bicg,
    Cg,
    Qmr,
}

impl SolverKind {
    /// Firmware image expected in the firmware directory.
    pub fn firmware_name(self) -> &'static str {
        match self {
            SolverKind::Bicg => "bicg_wrapper.bin",
            SolverKind::Cg => "cg_wrapper.bin",
            SolverKind::Qmr => "qmr_wrapper.bin",
        }
    }

    pub fn tag(self) -> u64 {
        match self {
            SolverKind::Bicg => 0,
            SolverKind::Cg => 1,
            SolverKind::Qmr => 2,
        }
    }
}

/// Configuration struct passed to the firmware as the first argument.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable, PartialEq)]
pub struct SolverControl {
    pub tolerance: f64,
    pub max_iterations: u64,
    pub rows: u64,
    pub solver: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SolveResult {
    pub x: Vec<f64>, // Solution vector
    pub iterations: usize,
    pub residual_norm: f64,
}

// --- Algorithm Trait Definition ---
/// A linear system solver that can run on the accelerator or locally.
pub trait SolveAlgorithm: std::fmt::Debug {
    fn kind(&self) -> SolverKind;

    fn tolerance(&self) -> f64;

    fn max_iterations(&self) -> usize;

    fn control(&self, rows: usize) -> SolverControl {
        SolverControl {
            tolerance: self.tolerance(),
            max_iterations: self.max_iterations() as u64,
            rows: rows as u64,
            solver: self.kind().tag(),
        }
    }

    /// Solves `a x = b` on the host through the local worker pool.
    fn solve_local(
        &self,
        ctx: &LocalContext<'_>,
        a: &Arc<MatrixView>,
        b: &[f64],
    ) -> Result<SolveResult>;

    fn validate_inputs(&self, a: &MatrixView, b: &[f64]) -> Result<()> {
        let (rows, cols) = a.dims();
        if !a.is_square() {
            return Err(SolveError::DimensionError(format!(
                "Matrix A must be square (dims: {}x{})",
                rows, cols
            )));
        }
        if rows != b.len() {
            return Err(SolveError::DimensionError(format!(
                "Matrix A rows ({}) must match RHS vector b length ({})",
                rows,
                b.len()
            )));
        }
        Ok(())
    }
}

// --- Algorithm Struct Definitions ---

/// Conjugate Gradient, for symmetric positive definite systems.
#[derive(Debug, Clone)]
pub struct ConjugateGradient {
    pub tolerance: f64,
    pub max_iterations: usize,
}

impl Default for ConjugateGradient {
    fn default() -> Self {
        Self {
            tolerance: 1e-6,
            max_iterations: 1000,
        }
    }
}

impl ConjugateGradient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_params(tolerance: f64, max_iterations: usize) -> Self {
        Self {
            tolerance,
            max_iterations,
        }
    }
}

/// BiConjugate Gradient, for general non-singular systems.
#[derive(Debug, Clone)]
pub struct BiConjugateGradient {
    pub tolerance: f64,
    pub max_iterations: usize,
}

impl Default for BiConjugateGradient {
    fn default() -> Self {
        Self {
            tolerance: 1e-6,
            max_iterations: 1000,
        }
    }
}

impl BiConjugateGradient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_params(tolerance: f64, max_iterations: usize) -> Self {
        Self {
            tolerance,
            max_iterations,
        }
    }
}

/// Quasi-Minimal Residual. Only available on the accelerator.
#[derive(Debug, Clone)]
pub struct Qmr {
    pub tolerance: f64,
    pub max_iterations: usize,
}

impl Default for Qmr {
    fn default() -> Self {
        Self {
            tolerance: 1e-6,
            max_iterations: 1000,
        }
    }
}

impl Qmr {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_params(tolerance: f64, max_iterations: usize) -> Self {
        Self {
            tolerance,
            max_iterations,
        }
    }
}

impl SolveAlgorithm for ConjugateGradient {
    fn kind(&self) -> SolverKind {
        SolverKind::Cg
    }

    fn tolerance(&self) -> f64 {
        self.tolerance
    }

    fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    fn solve_local(
        &self,
        ctx: &LocalContext<'_>,
        a: &Arc<MatrixView>,
        b: &[f64],
    ) -> Result<SolveResult> {
        self.validate_inputs(a, b)?;
        local::conjugate_gradient(ctx, a, b, self.tolerance, self.max_iterations)
    }
}

impl SolveAlgorithm for BiConjugateGradient {
    fn kind(&self) -> SolverKind {
        SolverKind::Bicg
    }

    fn tolerance(&self) -> f64 {
        self.tolerance
    }

    fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    fn solve_local(
        &self,
        ctx: &LocalContext<'_>,
        a: &Arc<MatrixView>,
        b: &[f64],
    ) -> Result<SolveResult> {
        self.validate_inputs(a, b)?;
        local::biconjugate_gradient(ctx, a, b, self.tolerance, self.max_iterations)
    }
}

impl SolveAlgorithm for Qmr {
    fn kind(&self) -> SolverKind {
        SolverKind::Qmr
    }

    fn tolerance(&self) -> f64 {
        self.tolerance
    }

    fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    fn solve_local(
        &self,
        _ctx: &LocalContext<'_>,
        _a: &Arc<MatrixView>,
        _b: &[f64],
    ) -> Result<SolveResult> {
        Err(SolveError::Unsupported(
            "QMR has no local implementation; enable offloading".to_string(),
        ))
    }
}
