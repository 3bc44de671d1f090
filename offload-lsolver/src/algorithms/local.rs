//! Host-side CG and BiCG. Matrix products are split into row chunks and run
//! on the [`LocalJobDispatcher`]; the vector updates stay on the caller's
//! thread.

use std::sync::mpsc;
use std::sync::Arc;

use num_traits::Float;
use offload_core::{LocalJobDispatcher, Matrix, MatrixView, OffloadError};

use super::SolveResult;
use crate::error::{Result, SolveError};

/// Worker pool plus the row granularity used to split matrix products.
#[derive(Debug, Clone, Copy)]
pub struct LocalContext<'d> {
    dispatcher: &'d LocalJobDispatcher,
    chunk_rows: usize,
}

impl<'d> LocalContext<'d> {
    pub fn new(dispatcher: &'d LocalJobDispatcher, chunk_rows: usize) -> Self {
        Self {
            dispatcher,
            chunk_rows: chunk_rows.max(1),
        }
    }

    pub fn chunk_rows(&self) -> usize {
        self.chunk_rows
    }

    /// `A x`, one job per row chunk.
    pub fn matvec(&self, a: &Arc<MatrixView>, x: &[f64]) -> Result<Vec<f64>> {
        let rows = a.rows();
        let x = Arc::new(x.to_vec());
        let (sender, receiver) = mpsc::channel();
        let mut jobs = 0;
        for start in (0..rows).step_by(self.chunk_rows) {
            let end = (start + self.chunk_rows).min(rows);
            let (a, x, sender) = (Arc::clone(a), Arc::clone(&x), sender.clone());
            self.dispatcher.spawn(move || {
                let part = a.matvec_rows(start..end, &x);
                let _ = sender.send((start, part));
            })?;
            jobs += 1;
        }
        drop(sender);

        let mut y = vec![0.0; rows];
        for _ in 0..jobs {
            let (start, part) = receiver.recv().map_err(|_| {
                OffloadError::Dispatcher("matvec job ended without a result".to_string())
            })?;
            let part = part?;
            y[start..start + part.len()].copy_from_slice(&part);
        }
        Ok(y)
    }

    /// `A^T x`, one partial sum per row chunk.
    pub fn transpose_matvec(&self, a: &Arc<MatrixView>, x: &[f64]) -> Result<Vec<f64>> {
        let rows = a.rows();
        let x = Arc::new(x.to_vec());
        let (sender, receiver) = mpsc::channel();
        let mut jobs = 0;
        for start in (0..rows).step_by(self.chunk_rows) {
            let end = (start + self.chunk_rows).min(rows);
            let (a, x, sender) = (Arc::clone(a), Arc::clone(&x), sender.clone());
            self.dispatcher.spawn(move || {
                let _ = sender.send(a.transpose_matvec_rows(start..end, &x));
            })?;
            jobs += 1;
        }
        drop(sender);

        let mut y = vec![0.0; a.cols()];
        for _ in 0..jobs {
            let part = receiver.recv().map_err(|_| {
                OffloadError::Dispatcher("transpose job ended without a result".to_string())
            })??;
            axpy(1.0, &part, &mut y);
        }
        Ok(y)
    }
}

fn dot<T: Float>(a: &[T], b: &[T]) -> T {
    a.iter()
        .zip(b)
        .fold(T::zero(), |acc, (&x, &y)| acc + x * y)
}

fn norm<T: Float>(a: &[T]) -> T {
    dot(a, a).sqrt()
}

/// `y += alpha x`
fn axpy<T: Float>(alpha: T, x: &[T], y: &mut [T]) {
    y.iter_mut().zip(x).for_each(|(yi, &xi)| *yi = *yi + alpha * xi);
}

/// `p = r + beta p`
fn xpby<T: Float>(r: &[T], beta: T, p: &mut [T]) {
    p.iter_mut().zip(r).for_each(|(pi, &ri)| *pi = ri + beta * *pi);
}

fn zero_solution(n: usize) -> SolveResult {
    SolveResult {
        x: vec![0.0; n],
        iterations: 0,
        residual_norm: 0.0,
    }
}

pub fn conjugate_gradient(
    ctx: &LocalContext<'_>,
    a: &Arc<MatrixView>,
    b: &[f64],
    tolerance: f64,
    max_iterations: usize,
) -> Result<SolveResult> {
    let n = b.len();
    let b_norm = norm(b);
    if b_norm == 0.0 {
        return Ok(zero_solution(n));
    }
    let threshold = tolerance * b_norm;

    let mut x = vec![0.0; n];
    let mut r = b.to_vec();
    let mut p = r.clone();
    let mut rs_old = dot(&r, &r);

    for iteration in 1..=max_iterations {
        let ap = ctx.matvec(a, &p)?;
        let p_ap = dot(&p, &ap);
        if p_ap <= 0.0 || !p_ap.is_finite() {
            log::warn!("CG breakdown at iteration {}: p.Ap = {}", iteration, p_ap);
            return Err(SolveError::Breakdown {
                iteration,
                quantity: "p.Ap",
            });
        }
        let alpha = rs_old / p_ap;
        axpy(alpha, &p, &mut x);
        axpy(-alpha, &ap, &mut r);

        let rs_new = dot(&r, &r);
        let residual_norm = rs_new.sqrt();
        log::trace!("CG iteration {}: residual {}", iteration, residual_norm);
        if residual_norm <= threshold {
            log::debug!("CG converged in {} iterations", iteration);
            return Ok(SolveResult {
                x,
                iterations: iteration,
                residual_norm,
            });
        }
        xpby(&r, rs_new / rs_old, &mut p);
        rs_old = rs_new;
    }

    Err(SolveError::NonConvergence {
        iterations: max_iterations,
        residual_norm: rs_old.sqrt(),
    })
}

pub fn biconjugate_gradient(
    ctx: &LocalContext<'_>,
    a: &Arc<MatrixView>,
    b: &[f64],
    tolerance: f64,
    max_iterations: usize,
) -> Result<SolveResult> {
    let n = b.len();
    let b_norm = norm(b);
    if b_norm == 0.0 {
        return Ok(zero_solution(n));
    }
    let threshold = tolerance * b_norm;

    let mut x = vec![0.0; n];
    let mut r = b.to_vec();
    let mut r_shadow = r.clone();
    let mut p = r.clone();
    let mut p_shadow = r_shadow.clone();
    let mut rho = dot(&r_shadow, &r);
    let mut residual_norm = b_norm;

    for iteration in 1..=max_iterations {
        let q = ctx.matvec(a, &p)?;
        let q_shadow = ctx.transpose_matvec(a, &p_shadow)?;
        let denominator = dot(&p_shadow, &q);
        if denominator == 0.0 || !denominator.is_finite() {
            return Err(SolveError::Breakdown {
                iteration,
                quantity: "p~.Ap",
            });
        }
        let alpha = rho / denominator;
        axpy(alpha, &p, &mut x);
        axpy(-alpha, &q, &mut r);
        axpy(-alpha, &q_shadow, &mut r_shadow);

        residual_norm = norm(&r);
        log::trace!("BiCG iteration {}: residual {}", iteration, residual_norm);
        if residual_norm <= threshold {
            log::debug!("BiCG converged in {} iterations", iteration);
            return Ok(SolveResult {
                x,
                iterations: iteration,
                residual_norm,
            });
        }

        let rho_next = dot(&r_shadow, &r);
        if rho_next == 0.0 {
            return Err(SolveError::Breakdown {
                iteration,
                quantity: "r~.r",
            });
        }
        let beta = rho_next / rho;
        xpby(&r, beta, &mut p);
        xpby(&r_shadow, beta, &mut p_shadow);
        rho = rho_next;
    }

    Err(SolveError::NonConvergence {
        iterations: max_iterations,
        residual_norm,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use offload_core::DispatchConfig;

    fn dispatcher(workers: usize) -> LocalJobDispatcher {
        LocalJobDispatcher::new(&DispatchConfig {
            workers,
            chunk_rows: 2,
        })
        .unwrap()
    }

    #[test]
    fn test_chunked_products_match_serial() {
        let pool = dispatcher(3);
        let ctx = LocalContext::new(&pool, 2);
        let a = Arc::new(
            MatrixView::from_dense_rows(&[
                vec![1.0, 2.0, 0.0],
                vec![0.0, 3.0, 4.0],
                vec![5.0, 0.0, 6.0],
            ])
            .unwrap(),
        );
        let x = [1.0, -1.0, 2.0];
        assert_eq!(ctx.matvec(&a, &x).unwrap(), vec![-1.0, 5.0, 17.0]);
        assert_eq!(
            ctx.transpose_matvec(&a, &x).unwrap(),
            a.transpose_matvec(&x).unwrap()
        );
    }

    #[test]
    fn test_zero_rhs_short_circuits() {
        let pool = dispatcher(1);
        let ctx = LocalContext::new(&pool, 4);
        let a = Arc::new(MatrixView::from_dense_rows(&[vec![2.0, 0.0], vec![0.0, 2.0]]).unwrap());
        let result = conjugate_gradient(&ctx, &a, &[0.0, 0.0], 1e-8, 10).unwrap();
        assert_eq!(result.iterations, 0);
        assert_eq!(result.x, vec![0.0, 0.0]);
    }

    #[test]
    fn test_cg_reports_non_convergence() {
        let pool = dispatcher(2);
        let ctx = LocalContext::new(&pool, 1);
        let a = Arc::new(
            MatrixView::from_dense_rows(&[
                vec![4.0, -1.0, 0.0],
                vec![-1.0, 4.0, -1.0],
                vec![0.0, -1.0, 4.0],
            ])
            .unwrap(),
        );
        match conjugate_gradient(&ctx, &a, &[1.0, 2.0, 3.0], 1e-14, 1) {
            Err(SolveError::NonConvergence { iterations, .. }) => assert_eq!(iterations, 1),
            other => panic!("Expected NonConvergence, got {:?}", other),
        }
    }
}
