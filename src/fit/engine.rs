use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;

use crate::error::ModelError;
use crate::fit::constraints::{constraint_basis, ConvexityRequest, ExcessOrderPolicy};
use crate::fit::design::DesignMatrix;
use crate::fit::weights::{ReweightContext, WeightingStrategy};
use crate::predict::predict_signal_volume;
use crate::solvers::sdp::{ConstraintBlock, ProjectedGradientSolver, SdpSolver};
use crate::tensor::{pack_params, KurtosisParams};

/// Signal floor applied before the log transform, so zero or negative
/// measurements cannot produce -inf
pub const MIN_POSITIVE_SIGNAL: f64 = 1e-6;

/// Contract for caller-supplied fitting strategies: produce the raw
/// 22-element solution [6 diffusion, 15 unnormalized kurtosis, intercept]
/// from the design matrix and per-voxel log signal.
pub trait VoxelFit: Send + Sync {
    fn fit(&self, design: &DesignMatrix, log_signal: &DVector<f64>) -> [f64; 22];
}

/// Fitting strategy. The closed set of built-in strategies plus one
/// extension variant holding a caller-supplied fit function.
#[derive(Clone)]
pub enum FitMethod {
    Ols,
    Wls,
    ConstrainedOls,
    ConstrainedWls,
    Custom(Arc<dyn VoxelFit>),
}

impl fmt::Debug for FitMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FitMethod::Ols => write!(f, "Ols"),
            FitMethod::Wls => write!(f, "Wls"),
            FitMethod::ConstrainedOls => write!(f, "ConstrainedOls"),
            FitMethod::ConstrainedWls => write!(f, "ConstrainedWls"),
            FitMethod::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

impl FromStr for FitMethod {
    type Err = ModelError;

    fn from_str(name: &str) -> Result<Self, ModelError> {
        match name.to_ascii_uppercase().as_str() {
            "OLS" | "OLLS" | "ULLS" | "LS" | "LLS" => Ok(FitMethod::Ols),
            "WLS" | "WLLS" | "UWLLS" => Ok(FitMethod::Wls),
            "CLS" => Ok(FitMethod::ConstrainedOls),
            "CWLS" => Ok(FitMethod::ConstrainedWls),
            other => Err(ModelError::UnknownFitMethod(other.to_string())),
        }
    }
}

impl FitMethod {
    fn weighted(&self) -> bool {
        matches!(self, FitMethod::Wls | FitMethod::ConstrainedWls)
    }

    fn constrained(&self) -> bool {
        matches!(self, FitMethod::ConstrainedOls | FitMethod::ConstrainedWls)
    }

    /// The weighted counterpart of this strategy, used by the
    /// iteratively reweighted fit
    fn weighted_variant(&self) -> FitMethod {
        match self {
            FitMethod::Ols | FitMethod::Wls => FitMethod::Wls,
            FitMethod::ConstrainedOls | FitMethod::ConstrainedWls => FitMethod::ConstrainedWls,
            FitMethod::Custom(f) => FitMethod::Custom(f.clone()),
        }
    }
}

/// Immutable fitting configuration, validated once when the fitter is
/// constructed
#[derive(Debug, Clone)]
pub struct FitConfig {
    pub method: FitMethod,
    /// Floor applied to the signal before the log transform
    pub min_signal: f64,
    /// Constraint order for the constrained strategies
    pub convexity_level: ConvexityRequest,
    pub excess_order_policy: ExcessOrderPolicy,
}

impl Default for FitConfig {
    fn default() -> Self {
        FitConfig {
            method: FitMethod::Wls,
            min_signal: MIN_POSITIVE_SIGNAL,
            convexity_level: ConvexityRequest::Full,
            excess_order_policy: ExcessOrderPolicy::default(),
        }
    }
}

/// Per-call fit diagnostics, returned alongside the parameters
#[derive(Debug, Clone, Default)]
pub struct FitDiagnostics {
    /// Fitting leverages, voxel-major (voxel * g + observation)
    pub leverages: Option<Vec<f64>>,
    /// Inlier mask from robust fitting, voxel-major
    pub robust: Option<Vec<bool>>,
}

/// Result of a volume fit: index-addressed parameters (zero-filled
/// outside the mask), estimated b=0 signals, and diagnostics
#[derive(Debug, Clone)]
pub struct VolumeFit {
    pub params: Vec<KurtosisParams>,
    pub s0: Vec<f64>,
    pub diagnostics: FitDiagnostics,
}

/// Result of a single-voxel fit
#[derive(Debug, Clone)]
pub struct VoxelFitResult {
    pub params: KurtosisParams,
    pub s0: f64,
    pub leverages: Option<Vec<f64>>,
}

/// The fitting engine: a design matrix, a validated configuration, and
/// (for constrained strategies) the prepared constraint basis and convex
/// solver backend. Shared read-only across voxel threads.
pub struct KurtosisFitter {
    design: DesignMatrix,
    config: FitConfig,
    constraints: Vec<ConstraintBlock>,
    solver: Box<dyn SdpSolver>,
}

impl std::fmt::Debug for KurtosisFitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KurtosisFitter")
            .field("design", &self.design)
            .field("config", &self.config)
            .field("constraints", &self.constraints)
            .field("solver", &"<dyn SdpSolver>")
            .finish()
    }
}

impl KurtosisFitter {
    pub fn new(design: DesignMatrix, config: FitConfig) -> Result<Self, ModelError> {
        if config.min_signal <= 0.0 {
            return Err(ModelError::NonPositiveMinSignal(config.min_signal));
        }

        let constraints = if config.method.constrained() {
            let level = config
                .convexity_level
                .resolve(config.excess_order_policy)?;
            constraint_basis(level)
        } else {
            Vec::new()
        };

        Ok(KurtosisFitter {
            design,
            config,
            constraints,
            solver: Box::new(ProjectedGradientSolver::default()),
        })
    }

    /// Replace the convex solver backend
    pub fn with_solver(mut self, solver: Box<dyn SdpSolver>) -> Self {
        self.solver = solver;
        self
    }

    pub fn design(&self) -> &DesignMatrix {
        &self.design
    }

    /// Fit one voxel
    pub fn fit_voxel(&self, signal: &[f64]) -> Result<VoxelFitResult, ModelError> {
        let (raw, leverages) = self.fit_voxel_raw(signal, &self.config.method, None, false)?;
        let (params, s0) = pack_params(&raw, self.design.min_diffusivity);
        Ok(VoxelFitResult {
            params,
            s0,
            leverages,
        })
    }

    /// Fit a volume of `data.len() / g` voxels, voxel-major. Voxels
    /// outside the mask are zero-filled; output order is index-addressed.
    pub fn fit_volume(
        &self,
        data: &[f64],
        mask: Option<&[bool]>,
        return_leverages: bool,
    ) -> Result<VolumeFit, ModelError> {
        self.fit_volume_with(data, mask, None, return_leverages, &self.config.method)
    }

    /// Fit a volume with caller-supplied per-observation weights
    /// (voxel-major, matching the data layout) instead of the internally
    /// derived squared-prediction weights
    pub fn fit_volume_weighted(
        &self,
        data: &[f64],
        mask: Option<&[bool]>,
        weights: &[f64],
        return_leverages: bool,
    ) -> Result<VolumeFit, ModelError> {
        self.fit_volume_with(
            data,
            mask,
            Some(weights),
            return_leverages,
            &self.config.method,
        )
    }

    /// Iteratively reweighted fitting
    ///
    /// Round 1 is an ordinary (constrained) weighted fit; every later
    /// round recomputes per-observation weights, and optionally an
    /// inlier mask, through the supplied strategy from the previous
    /// round's prediction. Requires at least two rounds.
    pub fn fit_iterative(
        &self,
        data: &[f64],
        mask: Option<&[bool]>,
        rounds: usize,
        strategy: &dyn WeightingStrategy,
    ) -> Result<VolumeFit, ModelError> {
        if rounds < 2 {
            return Err(ModelError::TooFewRounds(rounds));
        }

        let g = self.design.n_measurements();
        let n_voxels = data.len() / g;
        let method = self.config.method.weighted_variant();

        let mut robust: Option<Vec<bool>> = None;
        let mut fit = self.fit_volume_with(data, mask, None, true, &method)?;

        for round in 2..=rounds {
            log::debug!("reweighted fit round {round}/{rounds}");
            let predicted = predict_signal_volume(&fit.params, &fit.s0, &self.design);
            let leverages = fit
                .diagnostics
                .leverages
                .as_deref()
                .expect("leverages are always collected during iterative fitting");

            // Expanded to full volume shape so indexing stays consistent
            // under a mask from the second round on
            let mut w = vec![1.0; n_voxels * g];
            let mut rb = vec![false; n_voxels * g];
            for v in 0..n_voxels {
                if let Some(m) = mask {
                    if !m[v] {
                        continue;
                    }
                }
                let lo = v * g;
                let hi = lo + g;
                let clamped: Vec<f64> = data[lo..hi]
                    .iter()
                    .map(|&s| s.max(self.config.min_signal))
                    .collect();
                let ctx = ReweightContext {
                    data: &clamped,
                    predicted: &predicted[lo..hi],
                    design: &self.design.matrix,
                    leverages: &leverages[lo..hi],
                    round,
                    total_rounds: rounds,
                    prev_robust: robust.as_ref().map(|r| &r[lo..hi]),
                };
                let (wv, rv) = strategy.weights(&ctx);
                w[lo..hi].copy_from_slice(&wv);
                match rv {
                    Some(rv) => rb[lo..hi].copy_from_slice(&rv),
                    None => rb[lo..hi].fill(true),
                }
            }
            robust = Some(rb);

            fit = self.fit_volume_with(data, mask, Some(&w), true, &method)?;
        }

        fit.diagnostics.robust = robust;
        Ok(fit)
    }

    fn fit_volume_with(
        &self,
        data: &[f64],
        mask: Option<&[bool]>,
        weights: Option<&[f64]>,
        return_leverages: bool,
        method: &FitMethod,
    ) -> Result<VolumeFit, ModelError> {
        let g = self.design.n_measurements();
        assert_eq!(data.len() % g, 0, "data length must be a multiple of g");
        let n_voxels = data.len() / g;

        if let Some(m) = mask {
            if m.len() != n_voxels {
                return Err(ModelError::MaskShapeMismatch {
                    mask: m.len(),
                    voxels: n_voxels,
                });
            }
        }

        let results: Vec<(KurtosisParams, f64, Option<Vec<f64>>)> = (0..n_voxels)
            .into_par_iter()
            .map(|v| {
                if let Some(m) = mask {
                    if !m[v] {
                        return Ok((KurtosisParams::zeros(), 0.0, None));
                    }
                }
                let signal = &data[v * g..(v + 1) * g];
                let voxel_weights = weights.map(|w| &w[v * g..(v + 1) * g]);
                let (raw, leverages) =
                    self.fit_voxel_raw(signal, method, voxel_weights, return_leverages)?;
                let (params, s0) = pack_params(&raw, self.design.min_diffusivity);
                Ok((params, s0, leverages))
            })
            .collect::<Result<_, ModelError>>()?;

        let mut params = Vec::with_capacity(n_voxels);
        let mut s0 = Vec::with_capacity(n_voxels);
        let mut leverages = return_leverages.then(|| vec![0.0; n_voxels * g]);
        for (v, (p, s, lev)) in results.into_iter().enumerate() {
            params.push(p);
            s0.push(s);
            if let (Some(all), Some(lev)) = (leverages.as_mut(), lev) {
                all[v * g..(v + 1) * g].copy_from_slice(&lev);
            }
        }

        Ok(VolumeFit {
            params,
            s0,
            diagnostics: FitDiagnostics {
                leverages,
                robust: None,
            },
        })
    }

    /// One raw least-squares solve. `weights` are per-observation weights
    /// on squared residuals; when absent, weighted strategies derive them
    /// from an internal OLS pass.
    fn fit_voxel_raw(
        &self,
        signal: &[f64],
        method: &FitMethod,
        weights: Option<&[f64]>,
        return_leverages: bool,
    ) -> Result<([f64; 22], Option<Vec<f64>>), ModelError> {
        let g = self.design.n_measurements();
        assert_eq!(signal.len(), g, "signal length must match the design matrix");

        let a = &self.design.matrix;
        let y = DVector::from_iterator(
            g,
            signal.iter().map(|&s| s.max(self.config.min_signal).ln()),
        );

        match method {
            FitMethod::Custom(f) => Ok((f.fit(&self.design, &y), None)),

            FitMethod::Ols => {
                let x = &self.design.pseudo_inverse * &y;
                let leverages = return_leverages
                    .then(|| leverage_diagonal(a, &self.design.pseudo_inverse));
                Ok((to_raw(&x), leverages))
            }

            FitMethod::Wls => {
                let w_sqrt = self.residual_weights(&y, weights);
                let wa = scale_rows(a, &w_sqrt);
                let pinv_wa = wa
                    .svd(true, true)
                    .pseudo_inverse(1e-12)
                    .map_err(|e| ModelError::DesignMatrixSingular(e.to_string()))?;
                // pinv(WA) * W, applied as column scaling
                let inv_w_a_w = scale_cols(&pinv_wa, &w_sqrt);
                let x = &inv_w_a_w * &y;
                let leverages = return_leverages.then(|| leverage_diagonal(a, &inv_w_a_w));
                Ok((to_raw(&x), leverages))
            }

            FitMethod::ConstrainedOls | FitMethod::ConstrainedWls => {
                let use_weights = method.weighted() || weights.is_some();
                let (a_eff, y_eff, w_sqrt) = if use_weights {
                    let w_sqrt = self.residual_weights(&y, weights);
                    let wa = scale_rows(a, &w_sqrt);
                    let wy = w_sqrt.component_mul(&y);
                    (wa, wy, Some(w_sqrt))
                } else {
                    (a.clone(), y.clone(), None)
                };

                let x = self.solver.solve(&a_eff, &y_eff, &self.constraints)?;

                let leverages = if return_leverages {
                    let pinv = a_eff
                        .clone()
                        .svd(true, true)
                        .pseudo_inverse(1e-12)
                        .map_err(|e| ModelError::DesignMatrixSingular(e.to_string()))?;
                    let inv = match &w_sqrt {
                        Some(w) => scale_cols(&pinv, w),
                        None => pinv,
                    };
                    Some(leverage_diagonal(a, &inv))
                } else {
                    None
                };
                Ok((to_raw(&x), leverages))
            }
        }
    }

    /// Square roots of the residual weights: user-supplied weights when
    /// given, otherwise the signal predicted by an internal OLS pass
    /// (whose square approximates the measurement variance after the log
    /// transform)
    fn residual_weights(&self, y: &DVector<f64>, weights: Option<&[f64]>) -> DVector<f64> {
        match weights {
            Some(w) => DVector::from_iterator(w.len(), w.iter().map(|&v| v.max(0.0).sqrt())),
            None => {
                let ols = &self.design.pseudo_inverse * y;
                (&self.design.matrix * ols).map(f64::exp)
            }
        }
    }
}

fn to_raw(x: &DVector<f64>) -> [f64; 22] {
    let mut raw = [0.0; 22];
    for (dst, src) in raw.iter_mut().zip(x.iter()) {
        *dst = *src;
    }
    raw
}

fn scale_rows(a: &DMatrix<f64>, w: &DVector<f64>) -> DMatrix<f64> {
    let mut out = a.clone();
    for r in 0..out.nrows() {
        for c in 0..out.ncols() {
            out[(r, c)] *= w[r];
        }
    }
    out
}

fn scale_cols(a: &DMatrix<f64>, w: &DVector<f64>) -> DMatrix<f64> {
    let mut out = a.clone();
    for r in 0..out.nrows() {
        for c in 0..out.ncols() {
            out[(r, c)] *= w[c];
        }
    }
    out
}

/// Diagonal of design * inverse without forming the full product
fn leverage_diagonal(a: &DMatrix<f64>, inv: &DMatrix<f64>) -> Vec<f64> {
    (0..a.nrows())
        .map(|i| (0..a.ncols()).map(|j| a[(i, j)] * inv[(j, i)]).sum())
        .collect()
}
