//! DKI-Core: diffusion kurtosis model estimation for multi-shell
//! diffusion MRI
//!
//! This crate fits a diffusion-and-kurtosis tensor model per image voxel
//! and derives its scalar biophysical invariants.
//!
//! # Modules
//! - `elliptic`: Carlson elliptic integrals (RF, RD)
//! - `tabesh`: F1/F2/G1/G2 closed-form coefficient functions
//! - `tensor`: 4th-order symmetric tensor algebra and parameter packing
//! - `metrics`: MK, RK, AK, MKT, RTK, KFA and directional primitives
//! - `sphere`: unit direction sets with adjacency
//! - `maximum`: kurtosis maximum search
//! - `fit`: OLS/WLS/constrained/robust-iterative fitting engine
//! - `solvers`: BFGS refinement and PSD-constrained least squares
//! - `predict`: signal prediction from fitted parameters
//!
//! Per-voxel computations are independent and run in parallel across
//! voxels; shared resources (design matrix, spheres, constraint bases)
//! are read-only after construction.

pub mod elliptic;
pub mod error;
pub mod fit;
pub mod maximum;
pub mod metrics;
pub mod predict;
pub mod solvers;
pub mod sphere;
pub mod tabesh;
pub mod tensor;

pub use error::ModelError;
pub use fit::{
    DesignMatrix, FitConfig, FitDiagnostics, FitMethod, KurtosisFitter, MEstimator, VolumeFit,
};
pub use maximum::{kurtosis_maximum, KurtosisMaximum};
pub use sphere::Sphere;
pub use tensor::{DiffusionTensorParams, KurtosisParams};
