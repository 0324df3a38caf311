//! Kurtosis maximum search
//!
//! Two stages per voxel: directional kurtosis is sampled at every vertex
//! of a discretized sphere and local maxima are detected through the
//! sphere's adjacency graph; each candidate is then optionally refined
//! by quasi-Newton minimization of negative directional kurtosis over
//! the two polar angles. A refined candidate replaces its coarse value
//! only on strict improvement, so the result never falls below the best
//! coarse sample.

use rayon::prelude::*;

use crate::error::ModelError;
use crate::metrics::{directional_kurtosis, MIN_KURTOSIS};
use crate::solvers::bfgs::minimize_bfgs;
use crate::sphere::{cart2sphere, local_maxima, sphere2cart, Sphere};
use crate::tensor::KurtosisParams;

/// Iteration ceiling of one polar-angle refinement
const REFINE_MAX_ITER: usize = 100;

/// Maximum directional kurtosis of one voxel
///
/// # Arguments
/// * `dt` - Lower-triangular diffusion tensor elements
/// * `md` - Mean diffusivity
/// * `kt` - Kurtosis tensor elements
/// * `sphere` - Direction set for the coarse search
/// * `gtol` - Gradient tolerance for the refinement stage; `None`
///   disables refinement and the coarse sample wins
///
/// # Returns
/// (maximum value, direction of the maximum). When the sampled field has
/// no local maxima (spherical or null kurtosis tensors) the mean sampled
/// value and a zero direction are returned.
pub fn voxel_kurtosis_maximum(
    dt: &[f64; 6],
    md: f64,
    kt: &[f64; 15],
    sphere: &Sphere,
    gtol: Option<f64>,
) -> (f64, [f64; 3]) {
    let akc: Vec<f64> = sphere
        .vertices
        .iter()
        .map(|v| directional_kurtosis(dt, md, kt, v, 0.0, Some(MIN_KURTOSIS)))
        .collect();

    let candidates = local_maxima(&akc, sphere);
    if candidates.is_empty() {
        let mean = akc.iter().sum::<f64>() / akc.len() as f64;
        return (mean, [0.0, 0.0, 0.0]);
    }

    // Candidate with the globally largest sampled value
    let mut max_value = f64::NEG_INFINITY;
    let mut max_direction = [0.0, 0.0, 0.0];
    for &c in &candidates {
        if akc[c] > max_value {
            max_value = akc[c];
            max_direction = sphere.vertices[c];
        }
    }

    if let Some(gtol) = gtol {
        for &c in &candidates {
            let (theta, phi) = cart2sphere(&sphere.vertices[c]);
            let objective = |ang: &[f64]| {
                let n = sphere2cart(ang[0], ang[1]);
                -directional_kurtosis(dt, md, kt, &n, 0.0, Some(MIN_KURTOSIS))
            };
            let refined = minimize_bfgs(objective, &[theta, phi], gtol, REFINE_MAX_ITER);
            let direction = sphere2cart(refined.x[0], refined.x[1]);
            let value = directional_kurtosis(dt, md, kt, &direction, 0.0, Some(MIN_KURTOSIS));
            if value > max_value {
                max_value = value;
                max_direction = direction;
            }
        }
    }

    (max_value, max_direction)
}

/// Kurtosis maximum values and directions over a parameter volume
#[derive(Debug, Clone)]
pub struct KurtosisMaximum {
    pub values: Vec<f64>,
    pub directions: Vec<[f64; 3]>,
}

/// Compute the kurtosis maximum for every selected voxel
///
/// Voxels are selected by the eigenvalue-positivity mask intersected
/// with the optional caller mask (checked against the volume shape);
/// unselected voxels output zero.
pub fn kurtosis_maximum(
    params: &[KurtosisParams],
    sphere: &Sphere,
    gtol: Option<f64>,
    mask: Option<&[bool]>,
) -> Result<KurtosisMaximum, ModelError> {
    if let Some(m) = mask {
        if m.len() != params.len() {
            return Err(ModelError::MaskShapeMismatch {
                mask: m.len(),
                voxels: params.len(),
            });
        }
    }

    let results: Vec<(f64, [f64; 3])> = params
        .par_iter()
        .enumerate()
        .map(|(v, p)| {
            let selected = mask.map_or(true, |m| m[v]) && p.dt.has_positive_evals();
            if !selected {
                return (0.0, [0.0, 0.0, 0.0]);
            }
            let dt = p.dt.lower_triangular();
            voxel_kurtosis_maximum(&dt, p.dt.md(), &p.kt, sphere, gtol)
        })
        .collect();

    let (values, directions) = results.into_iter().unzip();
    Ok(KurtosisMaximum { values, directions })
}
