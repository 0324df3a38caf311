//! Diffusion kurtosis model fitting
//!
//! The engine estimates the 27-parameter voxel representation from
//! log-transformed multi-shell signal with one of four built-in
//! strategies plus an extension point:
//! - OLS: ordinary least squares through the cached pseudo-inverse
//! - WLS: weighted least squares, weights defaulting to the squared
//!   signal predicted by an internal OLS pass
//! - CLS / CWLS: the same with tensor positive-semidefiniteness enforced
//!   through a convex solver
//! - iteratively reweighted fitting driven by a pluggable weighting
//!   strategy
//!
//! References:
//! Veraart, J. et al. (2013). NeuroImage 81, 335-346.
//! Dela Haije, T. et al. (2020). NeuroImage 209, 116405.

pub mod constraints;
pub mod design;
mod engine;
pub mod weights;

pub use constraints::{constraint_basis, ConvexityLevel, ConvexityRequest, ExcessOrderPolicy};
pub use design::DesignMatrix;
pub use engine::{
    FitConfig, FitDiagnostics, FitMethod, KurtosisFitter, VolumeFit, VoxelFit, VoxelFitResult,
    MIN_POSITIVE_SIGNAL,
};
pub use weights::{MEstimator, ReweightContext, WeightingStrategy};
