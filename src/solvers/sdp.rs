//! Positive-semidefinite constrained least squares
//!
//! Solves min ||Ax - y||^2 subject to one or more linear matrix
//! inequalities: for each constraint block, the symmetric matrix
//! assembled from the solution coefficients must be positive
//! semidefinite. The backend is pluggable; the built-in solver runs
//! projected gradient descent with projection by eigenvalue clipping.
//!
//! Reference:
//! Dela Haije, T., Özarslan, E., Feragen, A. (2020). "Enforcing
//! necessary non-negativity constraints for common diffusion MRI models
//! using sum of squares programming." NeuroImage 209, 116405.
//! https://doi.org/10.1016/j.neuroimage.2019.116405

use nalgebra::{DMatrix, DVector};

use crate::error::ModelError;

/// One linear matrix inequality: sum_k x_k * basis[k] must be positive
/// semidefinite. `basis` holds one dim x dim symmetric matrix per
/// solution coefficient; coefficients that do not participate have a
/// zero matrix.
#[derive(Debug, Clone)]
pub struct ConstraintBlock {
    pub dim: usize,
    pub basis: Vec<DMatrix<f64>>,
}

impl ConstraintBlock {
    /// Assemble the constraint matrix at a solution vector
    pub fn assemble(&self, x: &DVector<f64>) -> DMatrix<f64> {
        let mut m = DMatrix::zeros(self.dim, self.dim);
        for (k, b) in self.basis.iter().enumerate() {
            if b.iter().any(|&v| v != 0.0) {
                m += b * x[k];
            }
        }
        m
    }

    /// Project `x` so that the assembled matrix becomes positive
    /// semidefinite: clip negative eigenvalues and read the coefficients
    /// back through the (Frobenius-orthogonal) basis.
    pub fn project(&self, x: &mut DVector<f64>) {
        let m = self.assemble(x);
        let eig = m.symmetric_eigen();
        if eig.eigenvalues.iter().all(|&l| l >= 0.0) {
            return;
        }
        let clipped = DVector::from_iterator(
            self.dim,
            eig.eigenvalues.iter().map(|&l| l.max(0.0)),
        );
        let m_psd =
            &eig.eigenvectors * DMatrix::from_diagonal(&clipped) * eig.eigenvectors.transpose();

        for (k, b) in self.basis.iter().enumerate() {
            let bb: f64 = b.iter().map(|&v| v * v).sum();
            if bb > 0.0 {
                let mb: f64 = m_psd.iter().zip(b.iter()).map(|(&m, &bv)| m * bv).sum();
                x[k] = mb / bb;
            }
        }
    }
}

/// A convex solver for PSD-constrained least squares. Implementations
/// must be safe to share across voxel threads.
pub trait SdpSolver: Send + Sync {
    fn solve(
        &self,
        a: &DMatrix<f64>,
        y: &DVector<f64>,
        constraints: &[ConstraintBlock],
    ) -> Result<DVector<f64>, ModelError>;
}

/// Built-in backend: projected gradient descent on the least squares
/// objective with a fixed 1/L step from the largest singular value.
/// Warm-started at the unconstrained solution; feasible problems
/// terminate immediately.
#[derive(Debug, Clone)]
pub struct ProjectedGradientSolver {
    pub max_iter: usize,
    pub tol: f64,
}

impl Default for ProjectedGradientSolver {
    fn default() -> Self {
        ProjectedGradientSolver {
            max_iter: 500,
            tol: 1e-10,
        }
    }
}

impl SdpSolver for ProjectedGradientSolver {
    fn solve(
        &self,
        a: &DMatrix<f64>,
        y: &DVector<f64>,
        constraints: &[ConstraintBlock],
    ) -> Result<DVector<f64>, ModelError> {
        let svd = a.clone().svd(true, true);
        let mut x = svd
            .solve(y, 1e-12)
            .map_err(|e| ModelError::SolverFailure(e.to_string()))?;

        if constraints.is_empty() {
            return Ok(x);
        }

        // Unconstrained solution already feasible: done
        if constraints.iter().all(|c| is_feasible(c, &x)) {
            return Ok(x);
        }

        let sigma_max = svd.singular_values.max();
        if sigma_max <= 0.0 {
            return Err(ModelError::SolverFailure(
                "design matrix has no positive singular values".into(),
            ));
        }
        let step = 1.0 / (sigma_max * sigma_max);

        let at = a.transpose();
        for _ in 0..self.max_iter {
            let grad = &at * (a * &x - y);
            let mut x_new = &x - step * grad;
            for c in constraints {
                c.project(&mut x_new);
            }
            let delta = (&x_new - &x).norm();
            let scale = 1.0 + x.norm();
            x = x_new;
            if delta < self.tol * scale {
                break;
            }
        }

        Ok(x)
    }
}

fn is_feasible(block: &ConstraintBlock, x: &DVector<f64>) -> bool {
    let m = block.assemble(x);
    m.symmetric_eigen().eigenvalues.iter().all(|&l| l >= -1e-12)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 3x3 symmetric block over the first six coefficients in
    /// lower-triangular order [m00, m10, m11, m20, m21, m22]
    fn symmetric3_block(n_params: usize) -> ConstraintBlock {
        let positions: [(usize, usize); 6] = [(0, 0), (1, 0), (1, 1), (2, 0), (2, 1), (2, 2)];
        let mut basis = vec![DMatrix::zeros(3, 3); n_params];
        for (k, &(r, c)) in positions.iter().enumerate() {
            basis[k][(r, c)] = 1.0;
            if r != c {
                basis[k][(c, r)] = 1.0;
            }
        }
        ConstraintBlock { dim: 3, basis }
    }

    #[test]
    fn test_unconstrained_matches_least_squares() {
        // Identity design: the solution is y itself, feasible when the
        // assembled matrix is already PSD
        let a = DMatrix::<f64>::identity(6, 6);
        let y = DVector::from_vec(vec![2.0, 0.0, 1.0, 0.0, 0.0, 3.0]);
        let solver = ProjectedGradientSolver::default();
        let x = solver.solve(&a, &y, &[symmetric3_block(6)]).unwrap();
        for i in 0..6 {
            assert!((x[i] - y[i]).abs() < 1e-10, "x[{i}] = {}", x[i]);
        }
    }

    #[test]
    fn test_no_constraints_is_plain_least_squares() {
        let a = DMatrix::from_row_slice(4, 2, &[1.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0, -1.0]);
        let y = DVector::from_vec(vec![1.0, 2.0, 3.0, -1.0]);
        let solver = ProjectedGradientSolver::default();
        let x = solver.solve(&a, &y, &[]).unwrap();
        // Normal equations solved directly for comparison
        let ata = a.transpose() * &a;
        let aty = a.transpose() * &y;
        let expected = ata.try_inverse().unwrap() * aty;
        assert!((x[0] - expected[0]).abs() < 1e-10);
        assert!((x[1] - expected[1]).abs() < 1e-10);
    }

    #[test]
    fn test_infeasible_target_lands_on_cone() {
        // Identity design with a negative-definite target: the solution
        // must end on the PSD cone boundary, not at the target
        let a = DMatrix::<f64>::identity(6, 6);
        let y = DVector::from_vec(vec![-1.0, 0.0, -1.0, 0.0, 0.0, -1.0]);
        let block = symmetric3_block(6);
        let solver = ProjectedGradientSolver::default();
        let x = solver.solve(&a, &y, std::slice::from_ref(&block)).unwrap();

        let m = block.assemble(&x);
        for &l in m.symmetric_eigen().eigenvalues.iter() {
            assert!(l >= -1e-9, "eigenvalue {l} violates PSD constraint");
        }
    }

    #[test]
    fn test_projection_keeps_psd_part() {
        // Matrix with one negative eigenvalue: projection zeroes it and
        // keeps the positive subspace
        let block = symmetric3_block(6);
        let mut x = DVector::from_vec(vec![1.0, 0.0, 1.0, 0.0, 0.0, -0.5]);
        block.project(&mut x);
        let m = block.assemble(&x);
        let eig = m.symmetric_eigen();
        for &l in eig.eigenvalues.iter() {
            assert!(l >= -1e-12);
        }
        // The untouched positive diagonal entries survive
        assert!((x[0] - 1.0).abs() < 1e-12);
        assert!((x[2] - 1.0).abs() < 1e-12);
        assert!(x[5].abs() < 1e-12, "negative direction should be clipped to zero");
    }

    #[test]
    fn test_coefficients_outside_block_untouched() {
        // Coefficients with a zero basis matrix must pass through the
        // projection unchanged
        let block = symmetric3_block(8);
        let mut x = DVector::from_vec(vec![-1.0, 0.0, -1.0, 0.0, 0.0, -1.0, 7.0, -3.0]);
        block.project(&mut x);
        assert_eq!(x[6], 7.0);
        assert_eq!(x[7], -3.0);
    }
}
