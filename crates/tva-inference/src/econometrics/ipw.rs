//! Propensity scores and inverse-probability-of-treatment weighting (IPTW).
//!
//! With `P = P_n(D = 1)` and fitted propensity `p̂`:
//!
//! - `w1 = D / P`
//! - `w0 = (1 − D) · p̂ / (1 − p̂) / P`
//!
//! Horvitz–Thompson uses the raw weights; Hajek divides each by its sample
//! mean. Propensities are never clipped: poor overlap is reported through
//! [`OverlapDiagnostics`] and an optional [`OverlapWarning`] instead.

use serde::Serialize;
use tva_core::{Error, Predictor, Result, WeightNormalization};

use crate::econometrics::first_difference::FirstDiffTable;
use crate::math::mean_product;
use crate::regression::{LogitFit, fit_logit};

/// Absolute standardized mean difference above which a covariate is flagged.
const SMD_FLAG: f64 = 0.25;

/// Treated and untreated IPTW weights, raw and Hajek-normalized.
#[derive(Debug, Clone)]
pub struct IptwWeights {
    /// Raw treated weights `D / P`.
    pub w1: Vec<f64>,
    /// Raw untreated weights.
    pub w0: Vec<f64>,
    /// `w1 / mean(w1)`.
    pub w1_hajek: Vec<f64>,
    /// `w0 / mean(w0)`.
    pub w0_hajek: Vec<f64>,
    /// Sample treated share `P`.
    pub treated_share: f64,
}

impl IptwWeights {
    /// Build weights from treatment indicators and fitted propensities.
    ///
    /// `p̂ ∈ [0, 1]` is accepted; `p̂ = 1` on an untreated county yields an
    /// infinite weight, which the overlap diagnostic reports.
    pub fn from_propensity(treated: &[u8], propensity: &[f64]) -> Result<Self> {
        let n = treated.len();
        if propensity.len() != n {
            return Err(Error::Validation(format!(
                "propensity has {} entries, treated has {}",
                propensity.len(),
                n
            )));
        }
        if treated.iter().any(|&d| d > 1) {
            return Err(Error::Validation("treated must contain only 0/1 values".into()));
        }
        if let Some(i) = propensity.iter().position(|p| !(0.0..=1.0).contains(p)) {
            return Err(Error::Validation(format!(
                "propensity at row {i} is {}, expected a value in [0, 1]",
                propensity[i]
            )));
        }
        let n1 = treated.iter().filter(|&&d| d == 1).count();
        if n1 == 0 || n1 == n {
            return Err(Error::Estimation(format!(
                "IPTW needs treated and untreated counties: {n1} of {n} treated"
            )));
        }

        let share = n1 as f64 / n as f64;
        let w1: Vec<f64> = treated.iter().map(|&d| f64::from(d) / share).collect();
        let w0: Vec<f64> = treated
            .iter()
            .zip(propensity)
            .map(|(&d, &p)| if d == 1 { 0.0 } else { p / (1.0 - p) / share })
            .collect();

        let m1 = w1.iter().sum::<f64>() / n as f64;
        let m0 = w0.iter().sum::<f64>() / n as f64;
        if m0 == 0.0 {
            return Err(Error::Estimation(format!(
                "all {} untreated counties have propensity 0; Hajek weights are undefined",
                n - n1
            )));
        }
        let w1_hajek = w1.iter().map(|w| w / m1).collect();
        let w0_hajek = w0.iter().map(|w| w / m0).collect();

        Ok(Self { w1, w0, w1_hajek, w0_hajek, treated_share: share })
    }

    /// `(w1, w0)` under the requested normalization.
    pub fn arms(&self, normalization: WeightNormalization) -> (&[f64], &[f64]) {
        match normalization {
            WeightNormalization::HorvitzThompson => (&self.w1, &self.w0),
            WeightNormalization::Hajek => (&self.w1_hajek, &self.w0_hajek),
        }
    }

    /// `mean(w1·v) − mean(w0·v)` under the requested normalization.
    pub fn contrast(&self, v: &[f64], normalization: WeightNormalization) -> f64 {
        let (w1, w0) = self.arms(normalization);
        mean_product(w1, v) - mean_product(w0, v)
    }
}

/// Propensity overlap summary. Always computed.
#[derive(Debug, Clone, Serialize)]
pub struct OverlapDiagnostics {
    /// Largest propensity among untreated counties.
    pub max_control_propensity: f64,
    /// Smallest propensity among treated counties.
    pub min_treated_propensity: f64,
    /// Largest raw untreated weight.
    pub max_control_weight: f64,
    /// Largest Hajek-normalized untreated weight.
    pub max_control_weight_normalized: f64,
    /// County carrying the largest untreated weight.
    pub max_weight_county: String,
    /// Untreated counties with propensity above the threshold.
    pub n_above_threshold: usize,
    /// Threshold the diagnostic was run with.
    pub threshold: f64,
    /// Effective sample size (treated): `(Σw)² / Σw²`.
    pub ess_treated: f64,
    /// Effective sample size (untreated).
    pub ess_control: f64,
}

/// Non-fatal overlap violation attached to an IPTW or DR result.
#[derive(Debug, Clone, Serialize)]
pub struct OverlapWarning {
    /// Largest propensity among untreated counties.
    pub max_control_propensity: f64,
    /// Configured threshold.
    pub threshold: f64,
    /// Untreated weights that are infinite or NaN.
    pub n_non_finite_weights: usize,
    /// Human-readable summary.
    pub message: String,
}

impl OverlapDiagnostics {
    /// Summarize overlap for `table` given its propensities and weights.
    pub fn compute(
        table: &FirstDiffTable,
        propensity: &[f64],
        weights: &IptwWeights,
        threshold: f64,
    ) -> Self {
        let mut max_p0 = f64::NEG_INFINITY;
        let mut min_p1 = f64::INFINITY;
        let mut n_above = 0usize;
        let mut argmax = 0usize;
        for (i, (&d, &p)) in table.treated.iter().zip(propensity).enumerate() {
            if d == 1 {
                min_p1 = min_p1.min(p);
                continue;
            }
            max_p0 = max_p0.max(p);
            if p > threshold {
                n_above += 1;
            }
            // Total order so an infinite weight wins.
            if weights.w0[i].total_cmp(&weights.w0[argmax]).is_gt() {
                argmax = i;
            }
        }

        Self {
            max_control_propensity: max_p0,
            min_treated_propensity: min_p1,
            max_control_weight: weights.w0[argmax],
            max_control_weight_normalized: weights.w0_hajek[argmax],
            max_weight_county: table.county[argmax].clone(),
            n_above_threshold: n_above,
            threshold,
            ess_treated: effective_sample_size(&weights.w1),
            ess_control: effective_sample_size(&weights.w0),
        }
    }

    /// An [`OverlapWarning`] if the threshold is exceeded or a weight is non-finite.
    pub fn warning(&self, weights: &IptwWeights) -> Option<OverlapWarning> {
        let non_finite = weights.w0.iter().filter(|w| !w.is_finite()).count();
        if non_finite == 0 && self.max_control_propensity <= self.threshold {
            return None;
        }
        let message = format!(
            "poor overlap: max untreated propensity {:.6} (threshold {}), {} untreated \
             counties above threshold, {} non-finite weights; largest weight {:.3} on county {}",
            self.max_control_propensity,
            self.threshold,
            self.n_above_threshold,
            non_finite,
            self.max_control_weight,
            self.max_weight_county
        );
        Some(OverlapWarning {
            max_control_propensity: self.max_control_propensity,
            threshold: self.threshold,
            n_non_finite_weights: non_finite,
            message,
        })
    }
}

fn effective_sample_size(w: &[f64]) -> f64 {
    let s: f64 = w.iter().sum();
    let s2: f64 = w.iter().map(|x| x * x).sum();
    if s2 > 0.0 { s * s / s2 } else { 0.0 }
}

/// Covariate balance before and after weighting.
#[derive(Debug, Clone, Serialize)]
pub struct CovariateBalance {
    /// Covariate name.
    pub name: String,
    /// Mean among treated counties.
    pub mean_treated: f64,
    /// Unweighted mean among untreated counties.
    pub mean_control: f64,
    /// Hajek-weighted mean among untreated counties.
    pub mean_control_weighted: f64,
    /// Standardized mean difference before weighting.
    pub smd_raw: f64,
    /// Standardized mean difference after weighting.
    pub smd_weighted: f64,
    /// `|smd_weighted|` exceeds 0.25.
    pub flagged: bool,
}

/// Standardized mean differences of each covariate, raw and Hajek-weighted.
pub fn covariate_balance(table: &FirstDiffTable, weights: &IptwWeights) -> Vec<CovariateBalance> {
    (0..table.n_covariates())
        .map(|j| {
            let (mut sum_t, mut ss_t, mut nt) = (0.0, 0.0, 0usize);
            let (mut sum_c, mut ss_c, mut nc) = (0.0, 0.0, 0usize);
            let (mut wsum_c, mut wsum) = (0.0, 0.0);
            for (i, row) in table.x.iter().enumerate() {
                let v = row[j];
                if table.treated[i] == 1 {
                    sum_t += v;
                    ss_t += v * v;
                    nt += 1;
                } else {
                    sum_c += v;
                    ss_c += v * v;
                    nc += 1;
                    wsum_c += weights.w0_hajek[i] * v;
                    wsum += weights.w0_hajek[i];
                }
            }
            let mean_t = sum_t / nt as f64;
            let mean_c = sum_c / nc as f64;
            let mean_cw = if wsum > 0.0 { wsum_c / wsum } else { f64::NAN };
            let var_t =
                if nt > 1 { (ss_t - sum_t * sum_t / nt as f64) / (nt - 1) as f64 } else { 0.0 };
            let var_c =
                if nc > 1 { (ss_c - sum_c * sum_c / nc as f64) / (nc - 1) as f64 } else { 0.0 };
            let pooled_sd = ((var_t + var_c) / 2.0).sqrt();
            let smd = |m: f64| if pooled_sd > 1e-15 { (mean_t - m) / pooled_sd } else { 0.0 };
            let smd_weighted = smd(mean_cw);
            CovariateBalance {
                name: table.covariate_names[j].clone(),
                mean_treated: mean_t,
                mean_control: mean_c,
                mean_control_weighted: mean_cw,
                smd_raw: smd(mean_c),
                smd_weighted,
                flagged: !(smd_weighted.abs() <= SMD_FLAG),
            }
        })
        .collect()
}

/// Result of [`iptw`].
#[derive(Debug, Clone, Serialize)]
pub struct IptwResult {
    /// ATT under the requested normalization.
    pub att: f64,
    /// Normalization used for `att`.
    pub normalization: WeightNormalization,
    /// ATT with Hajek weights.
    pub att_hajek: f64,
    /// ATT with Horvitz–Thompson weights.
    pub att_horvitz_thompson: f64,
    /// Treated counties.
    pub n_treated: usize,
    /// Untreated counties.
    pub n_control: usize,
    /// Propensity logit `[intercept, β_1, …, β_p]`.
    pub propensity_coefficients: Vec<f64>,
    /// Covariate indices dropped as constant.
    pub dropped_columns: Vec<usize>,
    /// Overlap summary.
    pub overlap: OverlapDiagnostics,
    /// Set when overlap is poor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overlap_warning: Option<OverlapWarning>,
    /// Covariate balance before and after weighting.
    pub balance: Vec<CovariateBalance>,
    /// Fitted `p̂` per county.
    #[serde(skip)]
    pub propensity: Vec<f64>,
    /// Weights per county.
    #[serde(skip)]
    pub weights: IptwWeights,
}

/// Fit the propensity logit `P(D = 1 | X)` on all counties.
pub fn fit_propensity(table: &FirstDiffTable) -> Result<LogitFit> {
    let (n1, n0) = (table.n_treated(), table.n_control());
    fit_logit(&table.x, &table.treated).map_err(|e| match e {
        Error::Estimation(msg) => Error::Estimation(format!(
            "propensity model ({n1} treated, {n0} untreated counties): {msg}"
        )),
        other => other,
    })
}

/// IPTW ATT with a freshly fitted propensity model.
pub fn iptw(
    table: &FirstDiffTable,
    overlap_threshold: f64,
    normalization: WeightNormalization,
) -> Result<IptwResult> {
    let (n1, n0) = (table.n_treated(), table.n_control());
    if n1 == 0 || n0 == 0 {
        return Err(Error::Estimation(format!(
            "IPTW needs treated and untreated counties: {n1} treated, {n0} untreated"
        )));
    }
    let model = fit_propensity(table)?;
    let propensity = model.predict(&table.x)?;
    iptw_with_propensity(table, &model, propensity, overlap_threshold, normalization)
}

/// IPTW ATT from an already fitted propensity model and its predictions.
pub fn iptw_with_propensity(
    table: &FirstDiffTable,
    model: &LogitFit,
    propensity: Vec<f64>,
    overlap_threshold: f64,
    normalization: WeightNormalization,
) -> Result<IptwResult> {
    let weights = IptwWeights::from_propensity(&table.treated, &propensity)?;
    let overlap = OverlapDiagnostics::compute(table, &propensity, &weights, overlap_threshold);
    let overlap_warning = overlap.warning(&weights);
    if let Some(w) = &overlap_warning {
        tracing::warn!(
            max_control_propensity = w.max_control_propensity,
            threshold = w.threshold,
            non_finite = w.n_non_finite_weights,
            county = %overlap.max_weight_county,
            "{}",
            w.message
        );
    }

    let att_hajek = weights.contrast(&table.dy, WeightNormalization::Hajek);
    let att_horvitz_thompson = weights.contrast(&table.dy, WeightNormalization::HorvitzThompson);
    let att = match normalization {
        WeightNormalization::Hajek => att_hajek,
        WeightNormalization::HorvitzThompson => att_horvitz_thompson,
    };
    tracing::debug!(att_hajek, att_horvitz_thompson, ess_control = overlap.ess_control, "iptw");

    Ok(IptwResult {
        att,
        normalization,
        att_hajek,
        att_horvitz_thompson,
        n_treated: table.n_treated(),
        n_control: table.n_control(),
        propensity_coefficients: model.coefficients.clone(),
        dropped_columns: model.dropped_columns.clone(),
        balance: covariate_balance(table, &weights),
        overlap,
        overlap_warning,
        propensity,
        weights,
    })
}
