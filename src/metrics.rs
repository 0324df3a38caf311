//! Scalar invariants of the diffusion kurtosis model
//!
//! Directional primitives (ADC, diffusion variance, directional
//! kurtosis) are hand-expanded polynomial contractions; the averaged
//! metrics come either from the analytical Tabesh solutions (rotated
//! tensor elements weighted by F/G coefficients) or from numerical
//! averaging of directional kurtosis over a direction set.
//!
//! Every metric follows the same two-stage policy: voxels without three
//! significantly positive eigenvalues output zero, and results are
//! clipped to the caller's kurtosis bounds.
//!
//! References:
//! Tabesh, A. et al. (2011). MRM 65(3), 823-836.
//! Hansen, B. et al. (2013). MRM 69(6), 1754-1760.
//! Glenn, G.R. et al. (2015). NMR in Biomedicine 28(4), 448-459.

use rayon::prelude::*;

use crate::sphere::{perpendicular_directions, Sphere};
use crate::tabesh::{f1, f2, g1, g2};
use crate::tensor::{rotate_element, KurtosisParams};

/// Theoretical lower bound of kurtosis for water confined to spherical
/// pores; the default floor for all kurtosis metrics
pub const MIN_KURTOSIS: f64 = -3.0 / 7.0;

/// Default ceiling for mean kurtosis
pub const MAX_MEAN_KURTOSIS: f64 = 3.0;

/// Default ceiling for the remaining kurtosis metrics
pub const MAX_KURTOSIS: f64 = 10.0;

/// Number of perpendicular directions sampled by the numerical radial
/// kurtosis estimator
pub const RADIAL_SAMPLES_DEFAULT: usize = 10;

fn clip(x: f64, min: Option<f64>, max: Option<f64>) -> f64 {
    let mut out = x;
    if let Some(lo) = min {
        out = out.max(lo);
    }
    if let Some(hi) = max {
        out = out.min(hi);
    }
    out
}

/// Apparent diffusion coefficient along a direction
///
/// `dt` holds the lower-triangular diffusion tensor elements
/// [Dxx, Dxy, Dyy, Dxz, Dyz, Dzz]. Values below `min_diffusivity` are
/// floored there.
pub fn directional_diffusion(dt: &[f64; 6], n: &[f64; 3], min_diffusivity: f64) -> f64 {
    let adc = n[0] * n[0] * dt[0]
        + 2.0 * n[0] * n[1] * dt[1]
        + n[1] * n[1] * dt[2]
        + 2.0 * n[0] * n[2] * dt[3]
        + 2.0 * n[1] * n[2] * dt[4]
        + n[2] * n[2] * dt[5];
    adc.max(min_diffusivity)
}

/// Apparent diffusion variance along a direction: the quartic form of
/// the direction with the 15 kurtosis tensor elements
pub fn directional_variance(kt: &[f64; 15], n: &[f64; 3]) -> f64 {
    let (x, y, z) = (n[0], n[1], n[2]);
    x * x * x * x * kt[0]
        + y * y * y * y * kt[1]
        + z * z * z * z * kt[2]
        + 4.0 * x * x * x * y * kt[3]
        + 4.0 * x * x * x * z * kt[4]
        + 4.0 * x * y * y * y * kt[5]
        + 4.0 * y * y * y * z * kt[6]
        + 4.0 * x * z * z * z * kt[7]
        + 4.0 * y * z * z * z * kt[8]
        + 6.0 * x * x * y * y * kt[9]
        + 6.0 * x * x * z * z * kt[10]
        + 6.0 * y * y * z * z * kt[11]
        + 12.0 * x * x * y * z * kt[12]
        + 12.0 * x * y * y * z * kt[13]
        + 12.0 * x * y * z * z * kt[14]
}

/// Apparent kurtosis coefficient along a direction:
/// AKC(n) = ADV(n) * (MD / ADC(n))^2, floored at `min_kurtosis`
pub fn directional_kurtosis(
    dt: &[f64; 6],
    md: f64,
    kt: &[f64; 15],
    n: &[f64; 3],
    min_diffusivity: f64,
    min_kurtosis: Option<f64>,
) -> f64 {
    let adc = directional_diffusion(dt, n, min_diffusivity);
    let adv = directional_variance(kt, n);
    let akc = adv * (md / adc) * (md / adc);
    clip(akc, min_kurtosis, None)
}

/// Apparent kurtosis coefficient at every vertex of a direction set for
/// one voxel. Voxels without positive eigenvalues yield all zeros.
pub fn apparent_kurtosis_coef(
    params: &KurtosisParams,
    sphere: &Sphere,
    min_diffusivity: f64,
    min_kurtosis: Option<f64>,
) -> Vec<f64> {
    if !params.dt.has_positive_evals() {
        return vec![0.0; sphere.len()];
    }
    let dt = params.dt.lower_triangular();
    let md = params.dt.md();
    sphere
        .vertices
        .iter()
        .map(|v| directional_kurtosis(&dt, md, &params.kt, v, min_diffusivity, min_kurtosis))
        .collect()
}

/// AKC for every voxel of a parameter volume, flattened voxel-major
/// (voxel * sphere.len() + direction)
pub fn apparent_kurtosis_coef_volume(
    params: &[KurtosisParams],
    sphere: &Sphere,
    min_diffusivity: f64,
    min_kurtosis: Option<f64>,
) -> Vec<f64> {
    params
        .par_iter()
        .flat_map_iter(|p| apparent_kurtosis_coef(p, sphere, min_diffusivity, min_kurtosis))
        .collect()
}

/// Mean kurtosis from the analytical Tabesh solution
///
/// The kurtosis tensor is rotated into the diffusion eigenvector frame
/// and its quartic and mixed elements are weighted by F1/F2 evaluated at
/// cyclic eigenvalue permutations. Degenerate voxels give zero through
/// the F-function gates.
pub fn mean_kurtosis(
    params: &KurtosisParams,
    min_kurtosis: Option<f64>,
    max_kurtosis: Option<f64>,
) -> f64 {
    let e = &params.dt.evals;
    let b = &params.dt.evecs;
    let kt = &params.kt;

    let wxxxx = rotate_element(kt, 0, 0, 0, 0, b);
    let wyyyy = rotate_element(kt, 1, 1, 1, 1, b);
    let wzzzz = rotate_element(kt, 2, 2, 2, 2, b);
    let wxxyy = rotate_element(kt, 0, 0, 1, 1, b);
    let wxxzz = rotate_element(kt, 0, 0, 2, 2, b);
    let wyyzz = rotate_element(kt, 1, 1, 2, 2, b);

    let mk = f1(e[0], e[1], e[2]) * wxxxx
        + f1(e[1], e[0], e[2]) * wyyyy
        + f1(e[2], e[1], e[0]) * wzzzz
        + f2(e[0], e[1], e[2]) * wyyzz
        + f2(e[1], e[0], e[2]) * wxxzz
        + f2(e[2], e[1], e[0]) * wxxyy;

    clip(mk, min_kurtosis, max_kurtosis)
}

/// Mean kurtosis estimated numerically as the mean AKC over a direction
/// set (the 45-direction integration preset in the volume wrapper)
pub fn mean_kurtosis_numerical(
    params: &KurtosisParams,
    sphere: &Sphere,
    min_kurtosis: Option<f64>,
    max_kurtosis: Option<f64>,
) -> f64 {
    let akc = apparent_kurtosis_coef(params, sphere, 0.0, min_kurtosis);
    let mk = akc.iter().sum::<f64>() / akc.len() as f64;
    clip(mk, min_kurtosis, max_kurtosis)
}

/// Radial kurtosis from the analytical Tabesh solution
pub fn radial_kurtosis(
    params: &KurtosisParams,
    min_kurtosis: Option<f64>,
    max_kurtosis: Option<f64>,
) -> f64 {
    let e = &params.dt.evals;
    let b = &params.dt.evecs;
    let kt = &params.kt;

    let wyyyy = rotate_element(kt, 1, 1, 1, 1, b);
    let wzzzz = rotate_element(kt, 2, 2, 2, 2, b);
    let wyyzz = rotate_element(kt, 1, 1, 2, 2, b);

    let rk = g1(e[0], e[1], e[2]) * wyyyy
        + g1(e[0], e[2], e[1]) * wzzzz
        + g2(e[0], e[1], e[2]) * wyyzz;

    clip(rk, min_kurtosis, max_kurtosis)
}

/// Radial kurtosis estimated numerically as the mean AKC over directions
/// perpendicular to the principal eigenvector
pub fn radial_kurtosis_numerical(
    params: &KurtosisParams,
    num_directions: usize,
    min_kurtosis: Option<f64>,
    max_kurtosis: Option<f64>,
) -> f64 {
    if !params.dt.has_positive_evals() {
        return clip(0.0, min_kurtosis, max_kurtosis);
    }
    let e1 = [
        params.dt.evecs[(0, 0)],
        params.dt.evecs[(1, 0)],
        params.dt.evecs[(2, 0)],
    ];
    let dt = params.dt.lower_triangular();
    let md = params.dt.md();
    let dirs = perpendicular_directions(&e1, num_directions, true);
    let rk = dirs
        .iter()
        .map(|v| directional_kurtosis(&dt, md, &params.kt, v, 0.0, min_kurtosis))
        .sum::<f64>()
        / dirs.len() as f64;
    clip(rk, min_kurtosis, max_kurtosis)
}

/// Axial kurtosis from the rotated tensor:
/// AK = Wxxxx * (l1 + l2 + l3)^2 / (9 * l1^2)
pub fn axial_kurtosis(
    params: &KurtosisParams,
    min_kurtosis: Option<f64>,
    max_kurtosis: Option<f64>,
) -> f64 {
    if !params.dt.has_positive_evals() {
        return clip(0.0, min_kurtosis, max_kurtosis);
    }
    let md = params.dt.md();
    let l1 = params.dt.evals[0];
    let wxxxx = rotate_element(&params.kt, 0, 0, 0, 0, &params.dt.evecs);
    clip(wxxxx * md * md / (l1 * l1), min_kurtosis, max_kurtosis)
}

/// Axial kurtosis sampled directly along the principal eigenvector
pub fn axial_kurtosis_numerical(
    params: &KurtosisParams,
    min_kurtosis: Option<f64>,
    max_kurtosis: Option<f64>,
) -> f64 {
    if !params.dt.has_positive_evals() {
        return clip(0.0, min_kurtosis, max_kurtosis);
    }
    let e1 = [
        params.dt.evecs[(0, 0)],
        params.dt.evecs[(1, 0)],
        params.dt.evecs[(2, 0)],
    ];
    let dt = params.dt.lower_triangular();
    let ak = directional_kurtosis(&dt, params.dt.md(), &params.kt, &e1, 0.0, min_kurtosis);
    clip(ak, min_kurtosis, max_kurtosis)
}

/// Mean of the kurtosis tensor from the trace identity
/// MKT = 1/5 (Wxxxx + Wyyyy + Wzzzz + 2Wxxyy + 2Wxxzz + 2Wyyzz),
/// using raw (unrotated) elements
pub fn mean_kurtosis_tensor(
    params: &KurtosisParams,
    min_kurtosis: Option<f64>,
    max_kurtosis: Option<f64>,
) -> f64 {
    if !params.dt.has_positive_evals() {
        return clip(0.0, min_kurtosis, max_kurtosis);
    }
    let kt = &params.kt;
    let mkt = (kt[0] + kt[1] + kt[2] + 2.0 * kt[9] + 2.0 * kt[10] + 2.0 * kt[11]) / 5.0;
    clip(mkt, min_kurtosis, max_kurtosis)
}

/// Rescaled radial tensor kurtosis:
/// RTK = 3/8 (Wyyyy + Wzzzz + 2Wyyzz) * (MD / RD)^2 on rotated elements
pub fn radial_tensor_kurtosis(
    params: &KurtosisParams,
    min_kurtosis: Option<f64>,
    max_kurtosis: Option<f64>,
) -> f64 {
    if !params.dt.has_positive_evals() {
        return clip(0.0, min_kurtosis, max_kurtosis);
    }
    let b = &params.dt.evecs;
    let kt = &params.kt;
    let wyyyy = rotate_element(kt, 1, 1, 1, 1, b);
    let wzzzz = rotate_element(kt, 2, 2, 2, 2, b);
    let wyyzz = rotate_element(kt, 1, 1, 2, 2, b);
    let wtk = 3.0 / 8.0 * (wyyyy + wzzzz + 2.0 * wyyzz);
    let md = params.dt.md();
    let rd = params.dt.rd();
    clip(wtk * md * md / (rd * rd), min_kurtosis, max_kurtosis)
}

/// Mean magnitude below which KFA is forced to zero, avoiding blow-up on
/// near-isotropic tensors
const KFA_MEAN_TOL: f64 = 1e-8;

/// Kurtosis fractional anisotropy: the Frobenius-norm ratio
/// ||W - MKT * I4|| / ||W|| expanded into an explicit polynomial of the
/// 15 raw elements. Zero when the denominator vanishes or the tensor
/// mean is negligible.
pub fn kurtosis_fractional_anisotropy(params: &KurtosisParams) -> f64 {
    if !params.dt.has_positive_evals() {
        return 0.0;
    }
    let kt = &params.kt;
    let (wxxxx, wyyyy, wzzzz) = (kt[0], kt[1], kt[2]);
    let (wxxxy, wxxxz, wxyyy) = (kt[3], kt[4], kt[5]);
    let (wyyyz, wxzzz, wyzzz) = (kt[6], kt[7], kt[8]);
    let (wxxyy, wxxzz, wyyzz) = (kt[9], kt[10], kt[11]);
    let (wxxyz, wxyyz, wxyzz) = (kt[12], kt[13], kt[14]);

    let w = (wxxxx + wyyyy + wzzzz + 2.0 * wxxyy + 2.0 * wxxzz + 2.0 * wyyzz) / 5.0;

    let sq = |x: f64| x * x;
    let numerator = sq(wxxxx - w)
        + sq(wyyyy - w)
        + sq(wzzzz - w)
        + 4.0 * (sq(wxxxy) + sq(wxxxz) + sq(wxyyy) + sq(wyyyz) + sq(wxzzz) + sq(wyzzz))
        + 6.0 * (sq(wxxyy - w / 3.0) + sq(wxxzz - w / 3.0) + sq(wyyzz - w / 3.0))
        + 12.0 * (sq(wxxyz) + sq(wxyyz) + sq(wxyzz));

    let denominator = sq(wxxxx)
        + sq(wyyyy)
        + sq(wzzzz)
        + 4.0 * (sq(wxxxy) + sq(wxxxz) + sq(wxyyy) + sq(wyyyz) + sq(wxzzz) + sq(wyzzz))
        + 6.0 * (sq(wxxyy) + sq(wxxzz) + sq(wyyzz))
        + 12.0 * (sq(wxxyz) + sq(wxyyz) + sq(wxyzz));

    if denominator > 0.0 && w > KFA_MEAN_TOL {
        (numerator / denominator).sqrt()
    } else {
        0.0
    }
}

/// Mean kurtosis over a parameter volume; numerical estimation uses the
/// 45-direction integration preset
pub fn mean_kurtosis_volume(
    params: &[KurtosisParams],
    min_kurtosis: Option<f64>,
    max_kurtosis: Option<f64>,
    analytical: bool,
) -> Vec<f64> {
    if analytical {
        params
            .par_iter()
            .map(|p| mean_kurtosis(p, min_kurtosis, max_kurtosis))
            .collect()
    } else {
        let sphere = Sphere::integration_default();
        params
            .par_iter()
            .map(|p| mean_kurtosis_numerical(p, &sphere, min_kurtosis, max_kurtosis))
            .collect()
    }
}

/// Radial kurtosis over a parameter volume
pub fn radial_kurtosis_volume(
    params: &[KurtosisParams],
    min_kurtosis: Option<f64>,
    max_kurtosis: Option<f64>,
    analytical: bool,
) -> Vec<f64> {
    if analytical {
        params
            .par_iter()
            .map(|p| radial_kurtosis(p, min_kurtosis, max_kurtosis))
            .collect()
    } else {
        params
            .par_iter()
            .map(|p| {
                radial_kurtosis_numerical(p, RADIAL_SAMPLES_DEFAULT, min_kurtosis, max_kurtosis)
            })
            .collect()
    }
}

/// Axial kurtosis over a parameter volume
pub fn axial_kurtosis_volume(
    params: &[KurtosisParams],
    min_kurtosis: Option<f64>,
    max_kurtosis: Option<f64>,
    analytical: bool,
) -> Vec<f64> {
    params
        .par_iter()
        .map(|p| {
            if analytical {
                axial_kurtosis(p, min_kurtosis, max_kurtosis)
            } else {
                axial_kurtosis_numerical(p, min_kurtosis, max_kurtosis)
            }
        })
        .collect()
}

/// Mean kurtosis tensor over a parameter volume
pub fn mean_kurtosis_tensor_volume(
    params: &[KurtosisParams],
    min_kurtosis: Option<f64>,
    max_kurtosis: Option<f64>,
) -> Vec<f64> {
    params
        .par_iter()
        .map(|p| mean_kurtosis_tensor(p, min_kurtosis, max_kurtosis))
        .collect()
}

/// Rescaled radial tensor kurtosis over a parameter volume
pub fn radial_tensor_kurtosis_volume(
    params: &[KurtosisParams],
    min_kurtosis: Option<f64>,
    max_kurtosis: Option<f64>,
) -> Vec<f64> {
    params
        .par_iter()
        .map(|p| radial_tensor_kurtosis(p, min_kurtosis, max_kurtosis))
        .collect()
}

/// Kurtosis fractional anisotropy over a parameter volume
pub fn kurtosis_fractional_anisotropy_volume(params: &[KurtosisParams]) -> Vec<f64> {
    params
        .par_iter()
        .map(kurtosis_fractional_anisotropy)
        .collect()
}
