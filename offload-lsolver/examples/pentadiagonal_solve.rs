use std::sync::Arc;
use std::time::Instant;

use offload_lsolver::{
    status_of, BiConjugateGradient, MatrixView, OffloadConfig, OffloadSolver, Triplet,
};

/// Pentadiagonal n x n matrix: 4.0 on the diagonal, -1.0 on the first
/// off-diagonals, -0.5 on the second ones.
fn create_pentadiagonal_matrix(n: usize) -> offload_lsolver::Result<MatrixView> {
    let mut triplets = Vec::new();
    for i in 0..n {
        if i >= 2 {
            triplets.push(Triplet::new(i, i - 2, -0.5));
        }
        if i >= 1 {
            triplets.push(Triplet::new(i, i - 1, -1.0));
        }
        triplets.push(Triplet::new(i, i, 4.0));
        if i + 1 < n {
            triplets.push(Triplet::new(i, i + 1, -1.0));
        }
        if i + 2 < n {
            triplets.push(Triplet::new(i, i + 2, -0.5));
        }
    }
    Ok(MatrixView::from_triplets(n, n, triplets)?)
}

/// b[i] = sin(i / n)
fn create_sin_vector(n: usize) -> Vec<f64> {
    (0..n).map(|i| (i as f64 / n as f64).sin()).collect()
}

fn main() -> offload_lsolver::Result<()> {
    // Initialize logging based on RUST_LOG environment variable
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let n = 500;
    log::info!("Setting up {}x{} pentadiagonal matrix A and sin vector b...", n, n);
    let a = Arc::new(create_pentadiagonal_matrix(n)?);
    let b = create_sin_vector(n);

    // SOLVER_OFFLOAD=1 and SOLVER_FIRMWARE_DIR select the accelerator.
    let config = OffloadConfig::from_env()?;
    let solver = OffloadSolver::new(config)?;

    let algorithm = BiConjugateGradient::with_params(1e-8, n * 5);
    log::info!("  Size: {}", n);
    log::info!("  Tolerance: {}", algorithm.tolerance);
    log::info!("  Max Iterations: {}", algorithm.max_iterations);

    let start_time = Instant::now();
    let result = solver.solve(&algorithm, &a, &b);
    let duration = start_time.elapsed();

    match &result {
        Ok(solved) => {
            log::info!("Solver finished successfully!");
            log::info!("  Iterations: {}", solved.iterations);
            log::info!("  Final Residual Norm: {:.6e}", solved.residual_norm);
            log::info!("  Time elapsed: {:?}", duration);
            log::debug!("  x[..5] = {:?}", &solved.x[..5.min(n)]);
        }
        Err(e) => log::error!("Solver failed: {:?}", e),
    }
    log::info!("Status: {}", status_of(&result));
    Ok(())
}
