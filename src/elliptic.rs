//! Carlson's incomplete elliptic integrals of the first and second kind
//!
//! Both integrals are evaluated with Carlson's duplication algorithm: the
//! argument triplet is repeatedly averaged towards its mean until the
//! remaining deviation is below the requested tolerance, then a short
//! truncated series in the normalized deviations gives the result.
//!
//! Reference:
//! Carlson, B.C. (1995). "Numerical computation of real or complex
//! elliptic integrals." Numerical Algorithms 10, 13-26.
//! https://doi.org/10.1007/BF02198293

/// Default relative error tolerance for `carlson_rf`
pub const RF_DEFAULT_ERRTOL: f64 = 3e-4;

/// Default relative error tolerance for `carlson_rd`
pub const RD_DEFAULT_ERRTOL: f64 = 1e-4;

/// Safety ceiling on duplication steps. The reference behavior iterates
/// unboundedly; NaN or zero-variance input would never converge, so the
/// loop is cut here and the series is applied to the current state.
const MAX_DUPLICATIONS: u32 = 256;

/// Carlson's incomplete elliptic integral of the first kind
///
/// R_F(x, y, z) = 1/2 * integral of [(t+x)(t+y)(t+z)]^(-1/2) dt over [0, inf)
///
/// # Arguments
/// * `x`, `y`, `z` - Nonnegative arguments; at most one may be zero
/// * `errtol` - Relative error tolerance
///
/// # Returns
/// Value of the integral
pub fn carlson_rf(x: f64, y: f64, z: f64, errtol: f64) -> f64 {
    let mut xn = x;
    let mut yn = y;
    let mut zn = z;
    let mut an = (xn + yn + zn) / 3.0;

    let q = (3.0 * errtol).powf(-1.0 / 6.0)
        * (an - xn).abs().max((an - yn).abs()).max((an - zn).abs());

    let mut n: u32 = 0;
    while 4f64.powi(-(n as i32)) * q > an.abs() {
        if n >= MAX_DUPLICATIONS {
            log::warn!("carlson_rf did not converge within {MAX_DUPLICATIONS} duplications");
            break;
        }
        let xroot = xn.sqrt();
        let yroot = yn.sqrt();
        let zroot = zn.sqrt();
        let lamda = xroot * (yroot + zroot) + yroot * zroot;
        n += 1;
        xn = (xn + lamda) * 0.25;
        yn = (yn + lamda) * 0.25;
        zn = (zn + lamda) * 0.25;
        an = (an + lamda) * 0.25;
    }

    let big_x = 1.0 - xn / an;
    let big_y = 1.0 - yn / an;
    let big_z = -big_x - big_y;
    let e2 = big_x * big_y - big_z * big_z;
    let e3 = big_x * big_y * big_z;

    an.powf(-0.5) * (1.0 - e2 / 10.0 + e3 / 14.0 + e2 * e2 / 24.0 - 3.0 / 44.0 * e2 * e3)
}

/// `carlson_rf` at the default tolerance
pub fn carlson_rf_default(x: f64, y: f64, z: f64) -> f64 {
    carlson_rf(x, y, z, RF_DEFAULT_ERRTOL)
}

/// Carlson's incomplete elliptic integral of the second kind
///
/// R_D(x, y, z) = 3/2 * integral of (t+x)^(-1/2) (t+y)^(-1/2) (t+z)^(-3/2) dt
/// over [0, inf)
///
/// # Arguments
/// * `x`, `y`, `z` - Nonnegative arguments; at most one of `x`, `y` may be zero
/// * `errtol` - Relative error tolerance
///
/// # Returns
/// Value of the integral
pub fn carlson_rd(x: f64, y: f64, z: f64, errtol: f64) -> f64 {
    let mut xn = x;
    let mut yn = y;
    let mut zn = z;
    let a0 = (xn + yn + 3.0 * zn) / 5.0;
    let mut an = a0;

    let q = (errtol / 4.0).powf(-1.0 / 6.0)
        * (an - xn).abs().max((an - yn).abs()).max((an - zn).abs());

    let mut sum_term = 0.0;
    let mut n: u32 = 0;
    while 4f64.powi(-(n as i32)) * q > an.abs() {
        if n >= MAX_DUPLICATIONS {
            log::warn!("carlson_rd did not converge within {MAX_DUPLICATIONS} duplications");
            break;
        }
        let xroot = xn.sqrt();
        let yroot = yn.sqrt();
        let zroot = zn.sqrt();
        let lamda = xroot * (yroot + zroot) + yroot * zroot;
        sum_term += 4f64.powi(-(n as i32)) / (zroot * (zn + lamda));
        n += 1;
        xn = (xn + lamda) * 0.25;
        yn = (yn + lamda) * 0.25;
        zn = (zn + lamda) * 0.25;
        an = (an + lamda) * 0.25;
    }

    let scale = 4f64.powi(-(n as i32));
    let big_x = (a0 - x) / (4f64.powi(n as i32) * an);
    let big_y = (a0 - y) / (4f64.powi(n as i32) * an);
    let big_z = -(big_x + big_y) / 3.0;
    let e2 = big_x * big_y - 6.0 * big_z * big_z;
    let e3 = (3.0 * big_x * big_y - 8.0 * big_z * big_z) * big_z;
    let e4 = 3.0 * (big_x * big_y - big_z * big_z) * big_z * big_z;
    let e5 = big_x * big_y * big_z * big_z * big_z;

    scale
        * an.powf(-1.5)
        * (1.0 - 3.0 / 14.0 * e2 + 1.0 / 6.0 * e3 + 9.0 / 88.0 * e2 * e2
            - 3.0 / 22.0 * e4
            - 9.0 / 52.0 * e2 * e3
            + 3.0 / 26.0 * e5)
        + 3.0 * sum_term
}

/// `carlson_rd` at the default tolerance
pub fn carlson_rd_default(x: f64, y: f64, z: f64) -> f64 {
    carlson_rd(x, y, z, RD_DEFAULT_ERRTOL)
}
