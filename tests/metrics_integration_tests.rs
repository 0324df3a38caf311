//! Cross-validation of the scalar metrics and the kurtosis maximum
//! search against their sampling-based counterparts

mod common;

use common::{diagonal_voxel, isotropic_kt, TestRng};
use dki_core::maximum::kurtosis_maximum;
use dki_core::metrics::{
    apparent_kurtosis_coef, directional_kurtosis, mean_kurtosis, mean_kurtosis_numerical,
    mean_kurtosis_tensor, MAX_MEAN_KURTOSIS, MIN_KURTOSIS,
};
use dki_core::sphere::Sphere;
use dki_core::tensor::KurtosisParams;

/// Deterministic batch of plausible voxels: positive eigenvalues with
/// moderate anisotropy and bounded kurtosis elements
fn random_voxels(count: usize, seed: u64) -> Vec<KurtosisParams> {
    let mut rng = TestRng::new(seed);
    (0..count)
        .map(|_| {
            let mut evals = [
                rng.uniform(0.3e-3, 2.0e-3),
                rng.uniform(0.3e-3, 2.0e-3),
                rng.uniform(0.3e-3, 2.0e-3),
            ];
            evals.sort_by(|a, b| b.partial_cmp(a).unwrap());
            let mut kt = [0.0; 15];
            for k in kt.iter_mut() {
                *k = rng.uniform(-0.5, 1.5);
            }
            diagonal_voxel(evals, kt)
        })
        .collect()
}

#[test]
fn test_mkt_cross_validates_against_dense_sampling() {
    // For isotropic diffusion the trace identity must match the AKC mean
    // over an antipodally symmetric exact quadrature (the icosahedron)
    let sphere = Sphere::icosphere(0);
    let mut rng = TestRng::new(7);
    for _ in 0..20 {
        let mut kt = [0.0; 15];
        for k in kt.iter_mut() {
            *k = rng.uniform(-1.0, 2.0);
        }
        let params = diagonal_voxel([1e-3; 3], kt);
        let akc = apparent_kurtosis_coef(&params, &sphere, 0.0, None);
        let sampled = akc.iter().sum::<f64>() / akc.len() as f64;
        let mkt = mean_kurtosis_tensor(&params, None, None);
        assert!(
            (sampled - mkt).abs() < 1e-12,
            "sampled mean {sampled} vs trace identity {mkt}"
        );
    }
}

#[test]
fn test_analytic_mk_tracks_numerical_mk() {
    let sphere = Sphere::integration_default();
    for (i, p) in random_voxels(25, 11).iter().enumerate() {
        let analytic = mean_kurtosis(p, None, None);
        let numeric = mean_kurtosis_numerical(p, &sphere, None, None);
        // The 45-direction rule is a quadrature, not an exact design:
        // allow a mixed absolute/relative tolerance
        assert!(
            (analytic - numeric).abs() < 0.05 + 0.1 * analytic.abs(),
            "voxel {i}: analytic {analytic} vs numeric {numeric}"
        );
    }
}

#[test]
fn test_clipping_holds_over_random_voxels() {
    for p in &random_voxels(50, 23) {
        let mk = mean_kurtosis(p, Some(MIN_KURTOSIS), Some(MAX_MEAN_KURTOSIS));
        assert!((MIN_KURTOSIS..=MAX_MEAN_KURTOSIS).contains(&mk), "MK = {mk}");
    }
}

#[test]
fn test_kurtosis_maximum_dominates_every_sampled_direction() {
    let sphere = Sphere::search_default();
    let voxels = random_voxels(10, 41);
    let result = kurtosis_maximum(&voxels, &sphere, Some(1e-4), None).unwrap();

    for (v, p) in voxels.iter().enumerate() {
        let dt = p.dt.lower_triangular();
        let md = p.dt.md();
        let coarse_best = sphere
            .vertices
            .iter()
            .map(|n| directional_kurtosis(&dt, md, &p.kt, n, 0.0, Some(MIN_KURTOSIS)))
            .fold(f64::NEG_INFINITY, f64::max);
        assert!(
            result.values[v] >= coarse_best - 1e-12,
            "voxel {v}: maximum {} below coarse best {coarse_best}",
            result.values[v]
        );
    }
}

#[test]
fn test_kurtosis_maximum_direction_is_unit_or_zero() {
    let sphere = Sphere::search_default();
    let mut voxels = random_voxels(8, 57);
    // Append a degenerate voxel: zero direction expected
    voxels.push(KurtosisParams::zeros());
    let result = kurtosis_maximum(&voxels, &sphere, Some(1e-4), None).unwrap();

    for (v, d) in result.directions.iter().enumerate() {
        let n = (d[0] * d[0] + d[1] * d[1] + d[2] * d[2]).sqrt();
        assert!(
            (n - 1.0).abs() < 1e-9 || n == 0.0,
            "voxel {v} direction norm {n}"
        );
    }
    assert_eq!(*result.directions.last().unwrap(), [0.0, 0.0, 0.0]);
}

#[test]
fn test_isotropic_scenario_all_metrics_zero() {
    use dki_core::metrics::{
        axial_kurtosis, kurtosis_fractional_anisotropy, radial_kurtosis, radial_tensor_kurtosis,
    };
    let p = diagonal_voxel([1e-3; 3], [0.0; 15]);
    assert_eq!(mean_kurtosis(&p, Some(MIN_KURTOSIS), Some(3.0)), 0.0);
    assert_eq!(radial_kurtosis(&p, Some(MIN_KURTOSIS), Some(10.0)), 0.0);
    assert_eq!(axial_kurtosis(&p, Some(MIN_KURTOSIS), Some(10.0)), 0.0);
    assert_eq!(mean_kurtosis_tensor(&p, Some(MIN_KURTOSIS), Some(10.0)), 0.0);
    assert_eq!(
        radial_tensor_kurtosis(&p, Some(MIN_KURTOSIS), Some(10.0)),
        0.0
    );
    assert_eq!(kurtosis_fractional_anisotropy(&p), 0.0);

    // A constant positive kurtosis shifts every average to that constant
    let k = 0.5;
    let p = diagonal_voxel([1e-3; 3], isotropic_kt(k));
    assert!((mean_kurtosis(&p, None, None) - k).abs() < 1e-9);
    assert!((radial_kurtosis(&p, None, None) - k).abs() < 1e-9);
    assert!((axial_kurtosis(&p, None, None) - k).abs() < 1e-9);
}
