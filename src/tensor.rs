//! Fourth-order kurtosis tensor algebra and model parameter packing
//!
//! The kurtosis tensor is fully symmetric under permutation of its four
//! indices, so the 81 components over 3 axes collapse to 15 independent
//! values. Any index quadruple maps to its slot through the product of
//! 1-based indices: two quadruples share that product exactly when they
//! are permutations of each other.
//!
//! Reference:
//! Hui, E.S., Cheung, M.M., Qi, L., Wu, E.X. (2008). "Towards better MR
//! characterization of neural tissues using directional diffusion kurtosis
//! analysis." NeuroImage, 42(1), 122-134.
//! https://doi.org/10.1016/j.neuroimage.2008.04.237

use nalgebra::Matrix3;

use crate::tabesh::positive_evals;

/// Index quadruples of the 15 independent kurtosis tensor elements, in
/// storage order: Wxxxx, Wyyyy, Wzzzz, Wxxxy, Wxxxz, Wxyyy, Wyyyz,
/// Wxzzz, Wyzzz, Wxxyy, Wxxzz, Wyyzz, Wxxyz, Wxyyz, Wxyzz
pub const KT_INDICES: [[usize; 4]; 15] = [
    [0, 0, 0, 0],
    [1, 1, 1, 1],
    [2, 2, 2, 2],
    [0, 0, 0, 1],
    [0, 0, 0, 2],
    [0, 1, 1, 1],
    [1, 1, 1, 2],
    [0, 2, 2, 2],
    [1, 2, 2, 2],
    [0, 0, 1, 1],
    [0, 0, 2, 2],
    [1, 1, 2, 2],
    [0, 0, 1, 2],
    [0, 1, 1, 2],
    [0, 1, 2, 2],
];

/// Map an index quadruple (0-based axes) to its slot in the 15-element
/// storage through the product of 1-based indices
pub fn kt_slot(i: usize, j: usize, k: usize, l: usize) -> usize {
    match (i + 1) * (j + 1) * (k + 1) * (l + 1) {
        1 => 0,
        16 => 1,
        81 => 2,
        2 => 3,
        3 => 4,
        8 => 5,
        24 => 6,
        27 => 7,
        54 => 8,
        4 => 9,
        9 => 10,
        36 => 11,
        6 => 12,
        12 => 13,
        18 => 14,
        key => unreachable!("invalid symmetric tensor index key {key}"),
    }
}

/// Compute one component of the kurtosis tensor expressed in a new
/// orthonormal basis (columns of `basis` are the new axes)
///
/// The component is the full contraction over all 81 original-basis
/// index combinations.
pub fn rotate_element(
    kt: &[f64; 15],
    i: usize,
    j: usize,
    k: usize,
    l: usize,
    basis: &Matrix3<f64>,
) -> f64 {
    let mut out = 0.0;
    for p in 0..3 {
        for q in 0..3 {
            for r in 0..3 {
                for s in 0..3 {
                    out += basis[(p, i)]
                        * basis[(q, j)]
                        * basis[(r, k)]
                        * basis[(s, l)]
                        * kt[kt_slot(p, q, r, s)];
                }
            }
        }
    }
    out
}

/// Rotate all 15 independent kurtosis tensor elements into a new basis
pub fn rotate_all(kt: &[f64; 15], basis: &Matrix3<f64>) -> [f64; 15] {
    let mut out = [0.0; 15];
    for (e, ind) in KT_INDICES.iter().enumerate() {
        out[e] = rotate_element(kt, ind[0], ind[1], ind[2], ind[3], basis);
    }
    out
}

/// Reconstruct the dense 81-component tensor from the 15 independent
/// values. Diagnostics and testing only; the fitting path never needs
/// the dense form.
pub fn dense_tensor(kt: &[f64; 15]) -> [[[[f64; 3]; 3]; 3]; 3] {
    let mut w = [[[[0.0; 3]; 3]; 3]; 3];
    for i in 0..3 {
        for j in 0..3 {
            for k in 0..3 {
                for l in 0..3 {
                    w[i][j][k][l] = kt[kt_slot(i, j, k, l)];
                }
            }
        }
    }
    w
}

/// Diffusion tensor expressed by its eigendecomposition
///
/// Eigenvector columns are unit-norm and mutually orthogonal; eigenvalues
/// are sorted in descending order by `decompose_tensor`.
#[derive(Debug, Clone, PartialEq)]
pub struct DiffusionTensorParams {
    pub evals: [f64; 3],
    /// Eigenvector matrix, columns are the eigenvectors
    pub evecs: Matrix3<f64>,
}

impl DiffusionTensorParams {
    /// Mean diffusivity
    pub fn md(&self) -> f64 {
        (self.evals[0] + self.evals[1] + self.evals[2]) / 3.0
    }

    /// Axial diffusivity (largest eigenvalue)
    pub fn ad(&self) -> f64 {
        self.evals[0]
    }

    /// Radial diffusivity (mean of the two smaller eigenvalues)
    pub fn rd(&self) -> f64 {
        (self.evals[1] + self.evals[2]) / 2.0
    }

    /// True when all eigenvalues are significantly larger than zero
    pub fn has_positive_evals(&self) -> bool {
        positive_evals(self.evals[0], self.evals[1], self.evals[2])
    }

    /// Lower-triangular elements [Dxx, Dxy, Dyy, Dxz, Dyz, Dzz] of the
    /// reassembled tensor V diag(L) V^T
    pub fn lower_triangular(&self) -> [f64; 6] {
        let v = &self.evecs;
        let l = &self.evals;
        let mut d = [[0.0; 3]; 3];
        for r in 0..3 {
            for c in 0..3 {
                for (e, &le) in l.iter().enumerate() {
                    d[r][c] += v[(r, e)] * le * v[(c, e)];
                }
            }
        }
        [d[0][0], d[1][0], d[1][1], d[2][0], d[2][1], d[2][2]]
    }
}

/// Full per-voxel parameter set of the diffusion kurtosis model: a
/// diffusion tensor plus the 15 kurtosis tensor elements. Immutable once
/// produced by the fitting engine.
#[derive(Debug, Clone, PartialEq)]
pub struct KurtosisParams {
    pub dt: DiffusionTensorParams,
    pub kt: [f64; 15],
}

impl KurtosisParams {
    /// All-zero parameters, used to fill voxels outside the fitting mask
    pub fn zeros() -> Self {
        KurtosisParams {
            dt: DiffusionTensorParams {
                evals: [0.0; 3],
                evecs: Matrix3::zeros(),
            },
            kt: [0.0; 15],
        }
    }

    /// Flatten to the 27-value layout [evals(3), eigenvector matrix rows(9),
    /// kurtosis elements(15)]
    pub fn to_flat(&self) -> [f64; 27] {
        let mut out = [0.0; 27];
        out[..3].copy_from_slice(&self.dt.evals);
        for r in 0..3 {
            for c in 0..3 {
                out[3 + 3 * r + c] = self.dt.evecs[(r, c)];
            }
        }
        out[12..27].copy_from_slice(&self.kt);
        out
    }

    /// Rebuild from the flat 27-value layout
    pub fn from_flat(flat: &[f64; 27]) -> Self {
        let mut evecs = Matrix3::zeros();
        for r in 0..3 {
            for c in 0..3 {
                evecs[(r, c)] = flat[3 + 3 * r + c];
            }
        }
        KurtosisParams {
            dt: DiffusionTensorParams {
                evals: [flat[0], flat[1], flat[2]],
                evecs,
            },
            kt: {
                let mut kt = [0.0; 15];
                kt.copy_from_slice(&flat[12..27]);
                kt
            },
        }
    }
}

/// Assemble a symmetric 3x3 matrix from its lower-triangular elements
/// [Dxx, Dxy, Dyy, Dxz, Dyz, Dzz]
pub fn from_lower_triangular(d: &[f64; 6]) -> Matrix3<f64> {
    Matrix3::new(d[0], d[1], d[3], d[1], d[2], d[4], d[3], d[4], d[5])
}

/// Eigendecompose a symmetric 3x3 tensor
///
/// Eigenvalues are returned in descending order with matching eigenvector
/// columns, floored at `min_diffusivity`.
pub fn decompose_tensor(tensor: &Matrix3<f64>, min_diffusivity: f64) -> DiffusionTensorParams {
    let eig = nalgebra::SymmetricEigen::new(*tensor);

    let mut order = [0usize, 1, 2];
    order.sort_by(|&a, &b| {
        eig.eigenvalues[b]
            .partial_cmp(&eig.eigenvalues[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut evals = [0.0; 3];
    let mut evecs = Matrix3::zeros();
    for (dst, &src) in order.iter().enumerate() {
        evals[dst] = eig.eigenvalues[src].max(min_diffusivity);
        for r in 0..3 {
            evecs[(r, dst)] = eig.eigenvectors[(r, src)];
        }
    }

    DiffusionTensorParams { evals, evecs }
}

/// Convert a raw 22-element least-squares solution (6 lower-triangular
/// diffusion elements, 15 unnormalized kurtosis elements, intercept) into
/// model parameters plus the estimated b=0 signal
pub fn pack_params(raw: &[f64; 22], min_diffusivity: f64) -> (KurtosisParams, f64) {
    let mut dt6 = [0.0; 6];
    dt6.copy_from_slice(&raw[..6]);
    let dt = decompose_tensor(&from_lower_triangular(&dt6), min_diffusivity);

    let md_square = dt.md() * dt.md();
    let mut kt = [0.0; 15];
    if md_square != 0.0 {
        for (e, k) in kt.iter_mut().enumerate() {
            *k = raw[6 + e] / md_square;
        }
    }

    let s0 = (-raw[21]).exp();

    (KurtosisParams { dt, kt }, s0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kt_slot_roundtrip() {
        // Every canonical quadruple must map to its own position
        for (e, ind) in KT_INDICES.iter().enumerate() {
            assert_eq!(kt_slot(ind[0], ind[1], ind[2], ind[3]), e);
        }
    }

    #[test]
    fn test_kt_slot_permutation_invariance() {
        // All permutations of a quadruple share the slot
        assert_eq!(kt_slot(0, 0, 1, 2), kt_slot(2, 1, 0, 0));
        assert_eq!(kt_slot(0, 1, 1, 1), kt_slot(1, 1, 1, 0));
        assert_eq!(kt_slot(0, 0, 2, 2), kt_slot(2, 0, 2, 0));
    }

    #[test]
    fn test_dense_matches_slots() {
        let kt: [f64; 15] = core::array::from_fn(|e| e as f64 + 1.0);
        let w = dense_tensor(&kt);
        for i in 0..3 {
            for j in 0..3 {
                for k in 0..3 {
                    for l in 0..3 {
                        assert_eq!(w[i][j][k][l], kt[kt_slot(i, j, k, l)]);
                    }
                }
            }
        }
    }

    #[test]
    fn test_rotation_by_identity_is_identity() {
        let kt: [f64; 15] = core::array::from_fn(|e| (e as f64) * 0.3 - 1.0);
        let rotated = rotate_all(&kt, &Matrix3::identity());
        for e in 0..15 {
            assert!(
                (rotated[e] - kt[e]).abs() < 1e-12,
                "element {e}: {} vs {}",
                rotated[e],
                kt[e]
            );
        }
    }

    #[test]
    fn test_rotation_by_axis_permutation() {
        // Basis that maps new x -> old y, new y -> old z, new z -> old x
        let basis = Matrix3::new(0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0);
        let mut kt = [0.0; 15];
        kt[0] = 5.0; // Wxxxx
        kt[1] = 7.0; // Wyyyy
        kt[2] = 9.0; // Wzzzz

        let rotated = rotate_all(&kt, &basis);
        assert!((rotated[0] - 7.0).abs() < 1e-12, "new Wxxxx should be old Wyyyy");
        assert!((rotated[1] - 9.0).abs() < 1e-12, "new Wyyyy should be old Wzzzz");
        assert!((rotated[2] - 5.0).abs() < 1e-12, "new Wzzzz should be old Wxxxx");
    }

    #[test]
    fn test_rotation_preserves_isotropic_tensor() {
        // The fully symmetric isotropic tensor K * I4 is invariant under
        // any rotation: Wiiii = K, Wiijj = K/3
        let k = 0.8;
        let mut kt = [0.0; 15];
        kt[0] = k;
        kt[1] = k;
        kt[2] = k;
        kt[9] = k / 3.0;
        kt[10] = k / 3.0;
        kt[11] = k / 3.0;

        let angle: f64 = 0.7;
        let basis = Matrix3::new(
            angle.cos(),
            -angle.sin(),
            0.0,
            angle.sin(),
            angle.cos(),
            0.0,
            0.0,
            0.0,
            1.0,
        );

        let rotated = rotate_all(&kt, &basis);
        for e in 0..15 {
            assert!(
                (rotated[e] - kt[e]).abs() < 1e-12,
                "isotropic tensor changed at element {e}"
            );
        }
    }

    #[test]
    fn test_decompose_orders_descending_and_floors() {
        let d = Matrix3::new(
            0.3e-3, 0.0, 0.0, //
            0.0, 1.7e-3, 0.0, //
            0.0, 0.0, -1e-5,
        );
        let p = decompose_tensor(&d, 0.0);
        assert!((p.evals[0] - 1.7e-3).abs() < 1e-12);
        assert!((p.evals[1] - 0.3e-3).abs() < 1e-12);
        assert_eq!(p.evals[2], 0.0, "negative eigenvalue should be floored");
        // Principal eigenvector should be along y
        assert!(p.evecs[(1, 0)].abs() > 0.999);
    }

    #[test]
    fn test_lower_triangular_roundtrip() {
        let dt6 = [1.5e-3, 0.1e-3, 0.9e-3, -0.05e-3, 0.02e-3, 0.5e-3];
        let p = decompose_tensor(&from_lower_triangular(&dt6), 0.0);
        let rebuilt = p.lower_triangular();
        for e in 0..6 {
            assert!(
                (rebuilt[e] - dt6[e]).abs() < 1e-12,
                "element {e}: {} vs {}",
                rebuilt[e],
                dt6[e]
            );
        }
    }

    #[test]
    fn test_flat_roundtrip() {
        let dt6 = [1.5e-3, 0.1e-3, 0.9e-3, 0.0, 0.0, 0.5e-3];
        let p = decompose_tensor(&from_lower_triangular(&dt6), 0.0);
        let params = KurtosisParams {
            dt: p,
            kt: core::array::from_fn(|e| e as f64 * 0.1),
        };
        let flat = params.to_flat();
        let back = KurtosisParams::from_flat(&flat);
        assert_eq!(params, back);
    }

    #[test]
    fn test_pack_params_known_tensor() {
        // Diagonal diffusion tensor, known kurtosis scaled by MD^2
        let evals = [1.7e-3, 0.4e-3, 0.3e-3];
        let md = (evals[0] + evals[1] + evals[2]) / 3.0;
        let kt_true = 1.2;

        let mut raw = [0.0; 22];
        raw[0] = evals[0]; // Dxx
        raw[2] = evals[1]; // Dyy
        raw[5] = evals[2]; // Dzz
        raw[6] = kt_true * md * md; // Wxxxx, unnormalized
        raw[21] = -(100.0f64).ln(); // intercept for S0 = 100

        let (params, s0) = pack_params(&raw, 0.0);
        assert!((params.dt.evals[0] - evals[0]).abs() < 1e-12);
        assert!((params.dt.evals[1] - evals[1]).abs() < 1e-12);
        assert!((params.dt.evals[2] - evals[2]).abs() < 1e-12);
        assert!((params.kt[0] - kt_true).abs() < 1e-9);
        assert!((s0 - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_pack_params_zero_md_zeroes_kurtosis() {
        let mut raw = [0.0; 22];
        raw[6] = 3.0; // unnormalized kurtosis with MD = 0
        let (params, _) = pack_params(&raw, 0.0);
        assert_eq!(params.kt, [0.0; 15], "zero MD must yield zero kurtosis");
    }
}
