//! Regression design matrix of the diffusion kurtosis model
//!
//! Maps the 21 tensor unknowns (6 diffusion + 15 kurtosis) plus an
//! intercept to log-signal: each acquisition row holds the quadratic
//! direction terms scaled by -b, the quartic terms scaled by b^2/6 with
//! their multiplicities, and a -1 intercept column. The pseudo-inverse
//! is computed once and shared by every voxel fit.

use nalgebra::DMatrix;

use crate::error::ModelError;

/// Two b-values closer than this (s/mm^2 scale) count as one shell
const SHELL_TOLERANCE: f64 = 20.0;

/// Numeric tolerance from which the minimum diffusivity floor is derived
const DIFFUSIVITY_TOL: f64 = 1e-6;

/// Design matrix of shape (g, 22) with its cached pseudo-inverse
#[derive(Debug, Clone)]
pub struct DesignMatrix {
    pub matrix: DMatrix<f64>,
    pub pseudo_inverse: DMatrix<f64>,
    /// Eigenvalue floor used when packing fitted tensors, derived from
    /// the numeric scale of the matrix
    pub min_diffusivity: f64,
}

impl DesignMatrix {
    /// Build from b-values and unit gradient directions
    ///
    /// Requires at least three distinct b-value shells (b=0 counts).
    pub fn new(bvals: &[f64], bvecs: &[[f64; 3]]) -> Result<Self, ModelError> {
        if bvals.len() != bvecs.len() {
            return Err(ModelError::GradientTableMismatch {
                bvals: bvals.len(),
                bvecs: bvecs.len(),
            });
        }

        let shells = count_shells(bvals);
        if shells < 3 {
            return Err(ModelError::InsufficientShells(shells));
        }

        let g = bvals.len();
        let mut matrix = DMatrix::zeros(g, 22);
        for (row, (&b, v)) in bvals.iter().zip(bvecs.iter()).enumerate() {
            let (x, y, z) = (v[0], v[1], v[2]);
            matrix[(row, 0)] = -b * x * x;
            matrix[(row, 1)] = -2.0 * b * x * y;
            matrix[(row, 2)] = -b * y * y;
            matrix[(row, 3)] = -2.0 * b * x * z;
            matrix[(row, 4)] = -2.0 * b * y * z;
            matrix[(row, 5)] = -b * z * z;

            let bb6 = b * b / 6.0;
            matrix[(row, 6)] = bb6 * x * x * x * x;
            matrix[(row, 7)] = bb6 * y * y * y * y;
            matrix[(row, 8)] = bb6 * z * z * z * z;
            matrix[(row, 9)] = bb6 * 4.0 * x * x * x * y;
            matrix[(row, 10)] = bb6 * 4.0 * x * x * x * z;
            matrix[(row, 11)] = bb6 * 4.0 * x * y * y * y;
            matrix[(row, 12)] = bb6 * 4.0 * y * y * y * z;
            matrix[(row, 13)] = bb6 * 4.0 * x * z * z * z;
            matrix[(row, 14)] = bb6 * 4.0 * y * z * z * z;
            matrix[(row, 15)] = bb6 * 6.0 * x * x * y * y;
            matrix[(row, 16)] = bb6 * 6.0 * x * x * z * z;
            matrix[(row, 17)] = bb6 * 6.0 * y * y * z * z;
            matrix[(row, 18)] = bb6 * 12.0 * x * x * y * z;
            matrix[(row, 19)] = bb6 * 12.0 * x * y * y * z;
            matrix[(row, 20)] = bb6 * 12.0 * x * y * z * z;

            matrix[(row, 21)] = -1.0;
        }

        let pseudo_inverse = matrix
            .clone()
            .svd(true, true)
            .pseudo_inverse(1e-12)
            .map_err(|e| ModelError::DesignMatrixSingular(e.to_string()))?;

        let min_diffusivity = DIFFUSIVITY_TOL / -matrix.min();

        Ok(DesignMatrix {
            matrix,
            pseudo_inverse,
            min_diffusivity,
        })
    }

    /// Number of measurements per voxel
    pub fn n_measurements(&self) -> usize {
        self.matrix.nrows()
    }
}

fn count_shells(bvals: &[f64]) -> usize {
    let mut sorted: Vec<f64> = bvals.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let mut shells = 0;
    let mut last = f64::NEG_INFINITY;
    for &b in &sorted {
        if b - last > SHELL_TOLERANCE {
            shells += 1;
            last = b;
        }
    }
    shells
}

/// A small multi-shell acquisition scheme used across the test suite:
/// one b=0 plus two shells over the given directions.
#[cfg(test)]
pub fn test_scheme(directions: usize) -> (Vec<f64>, Vec<[f64; 3]>) {
    let sphere = crate::sphere::Sphere::fibonacci(directions);
    let mut bvals = vec![0.0];
    let mut bvecs = vec![[0.0, 0.0, 0.0]];
    for &b in &[1000.0, 2000.0] {
        for v in &sphere.vertices {
            bvals.push(b);
            bvecs.push(*v);
        }
    }
    (bvals, bvecs)
}
