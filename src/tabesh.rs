//! Closed-form coefficient functions for analytical kurtosis averages
//!
//! F1/F2 weight the rotated kurtosis tensor elements in the analytical
//! mean kurtosis solution; G1/G2 play the same role for radial kurtosis.
//! Each function branches on near-equality of the eigenvalue arguments to
//! avoid the singular denominators of the generic closed form.
//!
//! Reference:
//! Tabesh, A., Jensen, J.H., Ardekani, B.A., Helpern, J.A. (2011).
//! "Estimation of tensors and tensor-derived measures in diffusional
//! kurtosis imaging." Magnetic Resonance in Medicine, 65(3), 823-836.
//! https://doi.org/10.1002/mrm.22655

use crate::elliptic::{carlson_rd_default, carlson_rf_default};

/// Eigenvalues at or below this threshold mark a voxel as degenerate;
/// all kurtosis metrics gate on it and output zero.
pub const POSITIVE_EVAL_THRESHOLD: f64 = 2e-7;

/// Relative tolerance under which two eigenvalues are treated as equal
/// in the F-functions.
const F_EQUALITY_TOL: f64 = 2.5e-2;

/// True when all three eigenvalues are significantly larger than zero
pub fn positive_evals(l1: f64, l2: f64, l3: f64) -> bool {
    l1 > POSITIVE_EVAL_THRESHOLD && l2 > POSITIVE_EVAL_THRESHOLD && l3 > POSITIVE_EVAL_THRESHOLD
}

/// Function F1 of the analytical mean kurtosis solution
///
/// Evaluated at an eigenvalue triplet; returns 0 for non-positive
/// eigenvalues. Singularities at a = b and a = c are resolved by reduced
/// closed forms, and the fully isotropic limit is the constant 1/5.
pub fn f1(a: f64, b: f64, c: f64) -> f64 {
    if !positive_evals(a, b, c) {
        return 0.0;
    }

    let er = F_EQUALITY_TOL;
    let ab = (a - b).abs();
    let ac = (a - c).abs();

    if ab >= a * er && ac >= a * er {
        let rf = carlson_rf_default(a / b, a / c, 1.0);
        let rd = carlson_rd_default(a / b, a / c, 1.0);
        let sum = a + b + c;
        let sqrt_bc = (b * c).sqrt();
        return sum * sum / (18.0 * (a - b) * (a - c))
            * (sqrt_bc / a * rf
                + (3.0 * a * a - a * b - a * c - b * c) / (3.0 * a * sqrt_bc) * rd
                - 1.0);
    }

    // a == b singularity
    if ab < a * er && ac > a * er {
        let m = (a + b) / 2.0;
        return f2(c, m, m) / 2.0;
    }

    // a == c singularity
    if ac < a * er && ab > a * er {
        let m = (a + c) / 2.0;
        return f2(b, m, m) / 2.0;
    }

    // fully isotropic limit
    if ac < a * er && ab < a * er {
        return 1.0 / 5.0;
    }

    0.0
}

/// Function F2 of the analytical mean kurtosis solution
///
/// The b = c singularity is resolved with a signed-square-root branch:
/// arctanh when 1 - a/c is positive, arctan otherwise, keeping the
/// result real on both sides.
pub fn f2(a: f64, b: f64, c: f64) -> f64 {
    if !positive_evals(a, b, c) {
        return 0.0;
    }

    let er = F_EQUALITY_TOL;
    let bc = (b - c).abs();

    if bc > b * er {
        let rf = carlson_rf_default(a / b, a / c, 1.0);
        let rd = carlson_rd_default(a / b, a / c, 1.0);
        let sum = a + b + c;
        let sqrt_bc = (b * c).sqrt();
        return sum * sum / (3.0 * (b - c) * (b - c))
            * ((b + c) / sqrt_bc * rf + (2.0 * a - b - c) / (3.0 * sqrt_bc) * rd - 2.0);
    }

    // b == c singularity
    if bc < b * er && (a - b).abs() > b * er {
        let l3 = (c + b) / 2.0;
        let x = 1.0 - a / l3;
        let alpha = if x > 0.0 {
            x.sqrt().atanh() / x.sqrt()
        } else {
            (-x).sqrt().atan() / (-x).sqrt()
        };
        return 6.0 * (a + 2.0 * l3) * (a + 2.0 * l3)
            / (144.0 * l3 * l3 * (a - l3) * (a - l3))
            * (l3 * (a + 2.0 * l3) + a * (a - 4.0 * l3) * alpha);
    }

    // fully isotropic limit
    if bc < b * er && (a - b).abs() < b * er {
        return 6.0 / 15.0;
    }

    0.0
}

/// Equality tolerance for the G-functions. Five orders of magnitude
/// above machine epsilon, as in the reference behavior.
fn g_equality_tol() -> f64 {
    f64::EPSILON * 1e5
}

/// Function G1 of the analytical radial kurtosis solution
pub fn g1(a: f64, b: f64, c: f64) -> f64 {
    if !positive_evals(a, b, c) {
        return 0.0;
    }

    let er = g_equality_tol();
    let bc = (b - c).abs();
    let sum = a + b + c;

    if bc > er {
        return sum * sum / (18.0 * b * (b - c) * (b - c))
            * (2.0 * b + (c * c - 3.0 * b * c) / (b * c).sqrt());
    }

    if bc < er {
        return (a + 2.0 * b) * (a + 2.0 * b) / (24.0 * b * b);
    }

    0.0
}

/// Function G2 of the analytical radial kurtosis solution
pub fn g2(a: f64, b: f64, c: f64) -> f64 {
    if !positive_evals(a, b, c) {
        return 0.0;
    }

    let er = g_equality_tol();
    let bc = (b - c).abs();
    let sum = a + b + c;

    if bc > er {
        return sum * sum / (3.0 * (b - c) * (b - c)) * ((b + c) / (b * c).sqrt() - 2.0);
    }

    if bc < er {
        return (a + 2.0 * b) * (a + 2.0 * b) / (12.0 * b * b);
    }

    0.0
}
