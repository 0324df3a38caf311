//! Positive-semidefiniteness constraint bases for constrained fitting
//!
//! The constrained strategies require the fitted tensors to stay in the
//! PSD cone: the 3x3 diffusion tensor assembled from the first six
//! solution coefficients (order 2), and additionally the kurtosis tensor
//! in its 6x6 quadratic-form representation over symmetric matrices
//! (order 4). "Full" selects every supported order. The basis matrices
//! are assembled once per fitter and shared read-only across voxels.

use nalgebra::DMatrix;

use crate::error::ModelError;
use crate::solvers::sdp::ConstraintBlock;
use crate::tensor::kt_slot;

/// Number of coefficients in the raw fitting solution
const N_PARAMS: usize = 22;

/// Highest tensor order with a constraint basis
const MAX_ORDER: u32 = 4;

/// Requested convexity constraint order, before validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvexityRequest {
    /// Constrain tensors up to this (positive, even) order
    Order(u32),
    /// All supported orders
    Full,
}

/// Behavior when the requested order exceeds the supported maximum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExcessOrderPolicy {
    /// Clamp to the maximum and log a warning (reference behavior)
    #[default]
    ClampWithWarning,
    /// Fail with a configuration error
    Reject,
}

/// Validated constraint order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvexityLevel {
    Order2,
    Order4,
}

impl ConvexityRequest {
    /// Validate the request: odd or zero orders are configuration
    /// errors; orders above the maximum follow `policy`.
    pub fn resolve(self, policy: ExcessOrderPolicy) -> Result<ConvexityLevel, ModelError> {
        match self {
            ConvexityRequest::Full => Ok(ConvexityLevel::Order4),
            ConvexityRequest::Order(o) => {
                if o == 0 || o % 2 != 0 {
                    return Err(ModelError::InvalidConvexityLevel(o.to_string()));
                }
                if o > MAX_ORDER {
                    return match policy {
                        ExcessOrderPolicy::ClampWithWarning => {
                            log::warn!(
                                "convexity level {o} exceeds the supported maximum, clamping to {MAX_ORDER}"
                            );
                            Ok(ConvexityLevel::Order4)
                        }
                        ExcessOrderPolicy::Reject => Err(ModelError::ConvexityLevelTooHigh(o)),
                    };
                }
                Ok(match o {
                    2 => ConvexityLevel::Order2,
                    _ => ConvexityLevel::Order4,
                })
            }
        }
    }

    /// Parse "full" or an integer order
    pub fn parse(text: &str) -> Result<Self, ModelError> {
        if text.eq_ignore_ascii_case("full") {
            return Ok(ConvexityRequest::Full);
        }
        text.parse::<u32>()
            .map(ConvexityRequest::Order)
            .map_err(|_| ModelError::InvalidConvexityLevel(text.to_string()))
    }
}

/// Build the constraint blocks for a validated convexity level
pub fn constraint_basis(level: ConvexityLevel) -> Vec<ConstraintBlock> {
    match level {
        ConvexityLevel::Order2 => vec![diffusion_block()],
        ConvexityLevel::Order4 => vec![diffusion_block(), kurtosis_block()],
    }
}

/// 3x3 diffusion tensor block over coefficients 0..6, stored in
/// lower-triangular order [Dxx, Dxy, Dyy, Dxz, Dyz, Dzz]
fn diffusion_block() -> ConstraintBlock {
    let positions: [(usize, usize); 6] = [(0, 0), (1, 0), (1, 1), (2, 0), (2, 1), (2, 2)];
    let mut basis = vec![DMatrix::zeros(3, 3); N_PARAMS];
    for (k, &(r, c)) in positions.iter().enumerate() {
        basis[k][(r, c)] = 1.0;
        if r != c {
            basis[k][(c, r)] = 1.0;
        }
    }
    ConstraintBlock { dim: 3, basis }
}

/// 6x6 kurtosis tensor block over coefficients 6..21: the quadratic form
/// of the fourth-order tensor on symmetric matrices, indexed by the
/// pairs (xx, yy, zz, xy, xz, yz)
fn kurtosis_block() -> ConstraintBlock {
    let pairs: [(usize, usize); 6] = [(0, 0), (1, 1), (2, 2), (0, 1), (0, 2), (1, 2)];
    let mut basis = vec![DMatrix::zeros(6, 6); N_PARAMS];
    for (a, &(i, j)) in pairs.iter().enumerate() {
        for (b, &(k, l)) in pairs.iter().enumerate() {
            let slot = kt_slot(i, j, k, l);
            basis[6 + slot][(a, b)] = 1.0;
        }
    }
    ConstraintBlock { dim: 6, basis }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DVector;

    #[test]
    fn test_resolve_valid_orders() {
        let policy = ExcessOrderPolicy::default();
        assert_eq!(
            ConvexityRequest::Order(2).resolve(policy).unwrap(),
            ConvexityLevel::Order2
        );
        assert_eq!(
            ConvexityRequest::Order(4).resolve(policy).unwrap(),
            ConvexityLevel::Order4
        );
        assert_eq!(
            ConvexityRequest::Full.resolve(policy).unwrap(),
            ConvexityLevel::Order4
        );
    }

    #[test]
    fn test_resolve_rejects_odd_and_zero() {
        let policy = ExcessOrderPolicy::default();
        assert!(matches!(
            ConvexityRequest::Order(3).resolve(policy),
            Err(ModelError::InvalidConvexityLevel(_))
        ));
        assert!(matches!(
            ConvexityRequest::Order(0).resolve(policy),
            Err(ModelError::InvalidConvexityLevel(_))
        ));
    }

    #[test]
    fn test_excess_order_policies() {
        assert_eq!(
            ConvexityRequest::Order(6)
                .resolve(ExcessOrderPolicy::ClampWithWarning)
                .unwrap(),
            ConvexityLevel::Order4
        );
        assert!(matches!(
            ConvexityRequest::Order(6).resolve(ExcessOrderPolicy::Reject),
            Err(ModelError::ConvexityLevelTooHigh(6))
        ));
    }

    #[test]
    fn test_parse() {
        assert_eq!(
            ConvexityRequest::parse("full").unwrap(),
            ConvexityRequest::Full
        );
        assert_eq!(
            ConvexityRequest::parse("FULL").unwrap(),
            ConvexityRequest::Full
        );
        assert_eq!(
            ConvexityRequest::parse("2").unwrap(),
            ConvexityRequest::Order(2)
        );
        assert!(ConvexityRequest::parse("two").is_err());
    }

    #[test]
    fn test_basis_block_counts() {
        assert_eq!(constraint_basis(ConvexityLevel::Order2).len(), 1);
        assert_eq!(constraint_basis(ConvexityLevel::Order4).len(), 2);
    }

    #[test]
    fn test_diffusion_block_assembles_tensor() {
        let block = diffusion_block();
        // x holding Dxx=1, Dxy=2, Dyy=3, Dxz=4, Dyz=5, Dzz=6
        let mut x = DVector::zeros(N_PARAMS);
        for (k, v) in [1.0, 2.0, 3.0, 4.0, 5.0, 6.0].iter().enumerate() {
            x[k] = *v;
        }
        let m = block.assemble(&x);
        assert_eq!(m[(0, 0)], 1.0);
        assert_eq!(m[(1, 0)], 2.0);
        assert_eq!(m[(0, 1)], 2.0);
        assert_eq!(m[(1, 1)], 3.0);
        assert_eq!(m[(2, 0)], 4.0);
        assert_eq!(m[(2, 1)], 5.0);
        assert_eq!(m[(2, 2)], 6.0);
    }

    #[test]
    fn test_kurtosis_block_symmetry() {
        // The assembled quadratic form must be symmetric for any
        // coefficient vector
        let block = kurtosis_block();
        let mut x = DVector::zeros(N_PARAMS);
        for k in 0..15 {
            x[6 + k] = (k as f64) * 0.7 - 4.0;
        }
        let m = block.assemble(&x);
        for a in 0..6 {
            for b in 0..6 {
                assert_eq!(m[(a, b)], m[(b, a)], "asymmetric at ({a}, {b})");
            }
        }
        // Spot checks: (xx, xx) -> Wxxxx slot 0; (xx, yy) -> Wxxyy slot 9;
        // (xy, xy) -> Wxxyy slot 9 as well
        assert_eq!(m[(0, 0)], x[6]);
        assert_eq!(m[(0, 1)], x[6 + 9]);
        assert_eq!(m[(3, 3)], x[6 + 9]);
    }

    #[test]
    fn test_isotropic_kurtosis_is_psd() {
        // K * I4 with K > 0 must satisfy the order-4 constraint
        let block = kurtosis_block();
        let mut x = DVector::zeros(N_PARAMS);
        let k = 1.0;
        x[6] = k;
        x[7] = k;
        x[8] = k;
        x[6 + 9] = k / 3.0;
        x[6 + 10] = k / 3.0;
        x[6 + 11] = k / 3.0;
        let m = block.assemble(&x);
        for &l in m.symmetric_eigen().eigenvalues.iter() {
            assert!(l >= -1e-12, "eigenvalue {l} should be nonnegative");
        }
    }
}
