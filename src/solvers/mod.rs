//! Iterative numeric solvers
//!
//! - `bfgs`: small unconstrained quasi-Newton minimizer, used to refine
//!   kurtosis-maximum directions
//! - `sdp`: positive-semidefinite constrained least squares with a
//!   pluggable backend, used by the constrained fitting strategies

pub mod bfgs;
pub mod sdp;

pub use bfgs::{minimize_bfgs, BfgsResult};
pub use sdp::{ConstraintBlock, ProjectedGradientSolver, SdpSolver};
