//! Signal prediction from fitted model parameters
//!
//! The predicted signal is S = S0 * exp(-b*D(n) + b^2/6 * D(n)^2 * K(n)),
//! evaluated through the same design matrix used for fitting: the
//! parameter vector [dt, kt * MD^2, -ln S0] is pushed through each
//! acquisition row. Used by the iteratively reweighted fit and for
//! simulating test data.

use rayon::prelude::*;

use crate::fit::design::DesignMatrix;
use crate::tensor::KurtosisParams;

/// Predict the signal of one voxel for every acquisition row
pub fn predict_signal(params: &KurtosisParams, s0: f64, design: &DesignMatrix) -> Vec<f64> {
    let g = design.n_measurements();
    if s0 <= 0.0 {
        // Zero-filled voxels (outside the fitting mask) predict nothing
        return vec![0.0; g];
    }

    let dt = params.dt.lower_triangular();
    let md = params.dt.md();

    let mut x = [0.0; 22];
    x[..6].copy_from_slice(&dt);
    for (e, &k) in params.kt.iter().enumerate() {
        x[6 + e] = k * md * md;
    }
    x[21] = -s0.ln();

    let a = &design.matrix;
    (0..g)
        .map(|row| {
            let mut acc = 0.0;
            for (col, &xv) in x.iter().enumerate() {
                acc += a[(row, col)] * xv;
            }
            acc.exp()
        })
        .collect()
}

/// Predict the signal of every voxel in a parameter volume, voxel-major
pub fn predict_signal_volume(
    params: &[KurtosisParams],
    s0: &[f64],
    design: &DesignMatrix,
) -> Vec<f64> {
    params
        .par_iter()
        .zip(s0.par_iter())
        .flat_map_iter(|(p, &s)| predict_signal(p, s, design))
        .collect()
}
