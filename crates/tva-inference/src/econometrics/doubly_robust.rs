//! Doubly-robust (DR) DID.
//!
//! Combines the untreated-outcome model of [`outcome_regression`] with the
//! IPTW weights of [`iptw`]:
//!
//! `ATT_DR = mean(w1·(Δy − Δŷ₀)) − mean(w0·(Δy − Δŷ₀))`
//!
//! The estimate is consistent if either nuisance model is correct.
//! Both algebraic forms are computed and reported.
//!
//! # References
//!
//! - Sant'Anna & Zhao (2020), "Doubly robust difference-in-differences
//!   estimators." *Journal of Econometrics*.
//!
//! [`outcome_regression`]: crate::econometrics::outcome_regression::outcome_regression
//! [`iptw`]: crate::econometrics::ipw::iptw

use serde::Serialize;
use tva_core::{Error, Predictor, Result, WeightNormalization};

use crate::econometrics::first_difference::FirstDiffTable;
use crate::econometrics::ipw::{IptwResult, IptwWeights, fit_propensity, iptw_with_propensity};
use crate::econometrics::outcome_regression::{OutcomeRegressionResult, outcome_regression};
use crate::math::mean_product;

/// Relative disagreement between the two DR forms, against [`means_scale`],
/// above which a debug event is emitted.
const FORM_AGREEMENT_TOL: f64 = 1e-9;

/// Result of [`doubly_robust`].
#[derive(Debug, Clone, Serialize)]
pub struct DoublyRobustResult {
    /// ATT, residual form.
    pub att: f64,
    /// ATT, difference-of-weighted-means form.
    pub att_means_form: f64,
    /// Normalization of the weights.
    pub normalization: WeightNormalization,
    /// Outcome-regression component.
    pub outcome_regression: OutcomeRegressionResult,
    /// IPTW component (carries overlap diagnostics and any warning).
    pub iptw: IptwResult,
}

/// `mean(w1·(Δy − m)) − mean(w0·(Δy − m))`.
pub fn dr_att_residual_form(w1: &[f64], w0: &[f64], dy: &[f64], m: &[f64]) -> f64 {
    let resid: Vec<f64> = dy.iter().zip(m).map(|(y, p)| y - p).collect();
    mean_product(w1, &resid) - mean_product(w0, &resid)
}

/// `[mean(w1·Δy) − mean(w0·Δy)] − [mean(w1·m) − mean(w0·m)]`.
pub fn dr_att_means_form(w1: &[f64], w0: &[f64], dy: &[f64], m: &[f64]) -> f64 {
    (mean_product(w1, dy) - mean_product(w0, dy)) - (mean_product(w1, m) - mean_product(w0, m))
}

/// DR ATT from already computed weights and outcome predictions.
///
/// Returns `(residual_form, means_form)`. Only mismatched input lengths are
/// an error; the two forms differ by rounding in the weighted means, which
/// grows with the scale of `Δy` rather than with the ATT.
pub fn doubly_robust_from_parts(
    weights: &IptwWeights,
    dy: &[f64],
    predictions: &[f64],
    normalization: WeightNormalization,
) -> Result<(f64, f64)> {
    if dy.len() != predictions.len() || dy.len() != weights.w1.len() {
        return Err(Error::Validation(format!(
            "dy ({}), predictions ({}) and weights ({}) must have the same length",
            dy.len(),
            predictions.len(),
            weights.w1.len()
        )));
    }
    let (w1, w0) = weights.arms(normalization);
    let residual = dr_att_residual_form(w1, w0, dy, predictions);
    let means = dr_att_means_form(w1, w0, dy, predictions);
    let scale = means_scale(w1, w0, dy, predictions);
    if residual.is_finite() && (residual - means).abs() > FORM_AGREEMENT_TOL * scale {
        tracing::debug!(residual, means, scale, "doubly-robust forms differ beyond rounding");
    }
    Ok((residual, means))
}

/// Largest weighted mean entering the means form, floored at 1. Rounding in
/// [`dr_att_means_form`] is relative to this, not to the ATT.
pub fn means_scale(w1: &[f64], w0: &[f64], dy: &[f64], m: &[f64]) -> f64 {
    [mean_product(w1, dy), mean_product(w0, dy), mean_product(w1, m), mean_product(w0, m)]
        .into_iter()
        .map(f64::abs)
        .fold(1.0, f64::max)
}

/// Doubly-robust ATT: fits both nuisance models and combines them.
pub fn doubly_robust(
    table: &FirstDiffTable,
    overlap_threshold: f64,
    normalization: WeightNormalization,
) -> Result<DoublyRobustResult> {
    let or = outcome_regression(table)?;
    let model = fit_propensity(table)?;
    let propensity = model.predict(&table.x)?;
    let ipw = iptw_with_propensity(table, &model, propensity, overlap_threshold, normalization)?;

    let (att, att_means_form) =
        doubly_robust_from_parts(&ipw.weights, &table.dy, &or.predictions, normalization)?;
    tracing::debug!(att, att_means_form, ?normalization, "doubly robust");

    Ok(DoublyRobustResult { att, att_means_form, normalization, outcome_regression: or, iptw: ipw })
}
