//! Common test utilities for DKI-core integration tests

use dki_core::fit::DesignMatrix;
use dki_core::predict::predict_signal;
use dki_core::sphere::Sphere;
use dki_core::tensor::{DiffusionTensorParams, KurtosisParams};
use nalgebra::Matrix3;

/// Multi-shell acquisition: one b=0 plus shells at b=1000 and b=2000
/// over near-uniform directions
pub fn acquisition(directions: usize) -> (Vec<f64>, Vec<[f64; 3]>) {
    let sphere = Sphere::fibonacci(directions);
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

pub fn design(directions: usize) -> DesignMatrix {
    let (bvals, bvecs) = acquisition(directions);
    DesignMatrix::new(&bvals, &bvecs).unwrap()
}

/// Voxel with a diagonal diffusion tensor
pub fn diagonal_voxel(evals: [f64; 3], kt: [f64; 15]) -> KurtosisParams {
    KurtosisParams {
        dt: DiffusionTensorParams {
            evals,
            evecs: Matrix3::identity(),
        },
        kt,
    }
}

/// Isotropic kurtosis tensor K * I4
pub fn isotropic_kt(k: f64) -> [f64; 15] {
    let mut kt = [0.0; 15];
    kt[0] = k;
    kt[1] = k;
    kt[2] = k;
    kt[9] = k / 3.0;
    kt[10] = k / 3.0;
    kt[11] = k / 3.0;
    kt
}

/// Synthesize a noiseless signal volume, voxel-major
pub fn synthesize_volume(
    voxels: &[(KurtosisParams, f64)],
    design: &DesignMatrix,
) -> Vec<f64> {
    let mut data = Vec::with_capacity(voxels.len() * design.n_measurements());
    for (params, s0) in voxels {
        data.extend(predict_signal(params, *s0, design));
    }
    data
}

/// Root mean square error between two slices
pub fn rmse(a: &[f64], b: &[f64]) -> f64 {
    assert_eq!(a.len(), b.len());
    if a.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum();
    (sum_sq / a.len() as f64).sqrt()
}

/// Small deterministic generator for reproducible pseudo-random test
/// inputs (no external dependency needed at this scale)
pub struct TestRng(u64);

impl TestRng {
    pub fn new(seed: u64) -> Self {
        TestRng(seed.max(1))
    }

    /// Uniform value in [lo, hi)
    pub fn uniform(&mut self, lo: f64, hi: f64) -> f64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        let unit = (self.0 >> 11) as f64 / (1u64 << 53) as f64;
        lo + unit * (hi - lo)
    }
}
