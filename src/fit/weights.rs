//! Reweighting strategies for the iteratively reweighted fit
//!
//! Each round after the first recomputes per-observation weights (and
//! optionally an outlier mask) from the previous round's prediction. The
//! strategy contract is fixed so callers can plug in their own scheme;
//! the built-in default is an M-estimator on leverage-adjusted
//! log-domain residuals with a MAD scale and Geman-McClure weighting.

use nalgebra::DMatrix;

/// Everything a strategy may consult for one voxel and round. Slices are
/// per-observation (length g).
pub struct ReweightContext<'a> {
    /// Observed signal, floor-clamped
    pub data: &'a [f64],
    /// Signal predicted from the previous round's parameters
    pub predicted: &'a [f64],
    pub design: &'a DMatrix<f64>,
    /// Fitting leverages from the previous round
    pub leverages: &'a [f64],
    /// Current round index, starting at 2 (round 1 is the plain fit)
    pub round: usize,
    pub total_rounds: usize,
    /// Robust mask carried over from the previous round, if any
    pub prev_robust: Option<&'a [bool]>,
}

/// A pluggable weighting scheme. The returned weights apply to squared
/// residuals in the weighted least squares sense; the optional mask
/// marks observations considered inliers.
pub trait WeightingStrategy: Send + Sync {
    fn weights(&self, ctx: &ReweightContext<'_>) -> (Vec<f64>, Option<Vec<bool>>);
}

/// Scale factor turning a median absolute deviation into a normal-
/// consistent standard deviation estimate
const MAD_NORMAL_SCALE: f64 = 1.4826;

/// M-estimator on log-domain residuals
///
/// Residuals are divided by sqrt(1 - leverage) so high-leverage
/// observations are not underweighted, scaled by a MAD estimate, and
/// passed through the Geman-McClure weight function. On the final round
/// observations beyond `cutoff` scaled deviations are rejected outright
/// and reported through the robust mask.
#[derive(Debug, Clone)]
pub struct MEstimator {
    pub cutoff: f64,
}

impl Default for MEstimator {
    fn default() -> Self {
        MEstimator { cutoff: 3.0 }
    }
}

fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

impl WeightingStrategy for MEstimator {
    fn weights(&self, ctx: &ReweightContext<'_>) -> (Vec<f64>, Option<Vec<bool>>) {
        let g = ctx.data.len();

        // Leverage-adjusted log residuals
        let mut residuals = Vec::with_capacity(g);
        for i in 0..g {
            let r = ctx.data[i].ln() - ctx.predicted[i].max(f64::MIN_POSITIVE).ln();
            let h = ctx.leverages.get(i).copied().unwrap_or(0.0).clamp(0.0, 0.99);
            residuals.push(r / (1.0 - h).sqrt());
        }

        let mut centered = residuals.clone();
        let med = median(&mut centered);
        let mut abs_dev: Vec<f64> = residuals.iter().map(|r| (r - med).abs()).collect();
        let scale = MAD_NORMAL_SCALE * median(&mut abs_dev);

        let final_round = ctx.round >= ctx.total_rounds;
        let mut weights = Vec::with_capacity(g);
        let mut robust = Vec::with_capacity(g);
        for i in 0..g {
            // Base WLS weight is the squared predicted signal
            let base = ctx.predicted[i] * ctx.predicted[i];
            if scale <= 0.0 {
                // All residuals identical: plain WLS weights, everything inlier
                weights.push(base);
                robust.push(ctx.prev_robust.map_or(true, |m| m[i]));
                continue;
            }
            let u = (residuals[i] - med) / scale;
            let inlier = u.abs() < self.cutoff;
            if final_round && !inlier {
                weights.push(0.0);
            } else {
                let gm = 1.0 / (1.0 + u * u).powi(2);
                weights.push(base * gm);
            }
            robust.push(inlier);
        }

        (weights, Some(robust))
    }
}
