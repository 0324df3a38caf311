use thiserror::Error;

/// Errors raised while configuring a model or a fitter.
///
/// These all fail fast at construction or entry. Numeric degeneracies
/// encountered during a fit (non-positive eigenvalues, zero mean
/// diffusivity, empty local-maxima sets) are handled in place and never
/// surface as errors.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("\"{0}\" is not a known fit method; expected OLS, WLS, CLS or CWLS (or an alias)")]
    UnknownFitMethod(String),

    #[error("`min_signal` must be strictly positive, got {0}")]
    NonPositiveMinSignal(f64),

    #[error("convexity level must be a positive even number or \"full\", got {0}")]
    InvalidConvexityLevel(String),

    #[error("convexity level {0} exceeds the maximum supported order 4")]
    ConvexityLevelTooHigh(u32),

    #[error("mask has {mask} entries but the data has {voxels} voxels")]
    MaskShapeMismatch { mask: usize, voxels: usize },

    #[error("iterative reweighting requires at least 2 rounds, got {0}")]
    TooFewRounds(usize),

    #[error("at least 3 distinct b-values are required (b=0 may be one of them), found {0}")]
    InsufficientShells(usize),

    #[error("b-value and direction tables disagree: {bvals} b-values vs {bvecs} directions")]
    GradientTableMismatch { bvals: usize, bvecs: usize },

    #[error("design matrix pseudo-inverse failed: {0}")]
    DesignMatrixSingular(String),

    #[error("convex solver failed: {0}")]
    SolverFailure(String),
}
