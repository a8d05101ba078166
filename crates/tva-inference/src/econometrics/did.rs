//! Plain difference-in-differences estimators on a county panel.
//!
//! - [`first_difference_did`]: ATT = mean Δy (treated) − mean Δy (untreated),
//!   by OLS of Δy on `[1, D]` with cluster-robust SE.
//! - [`did_canonical`]: the 2×2 levels regression
//!   `y = α + β₁·D + β₂·P + δ·(D×P) + ε` on the pre/post rows.
//! - [`group_means`]: outcome mean by treatment group and year.
//! - [`event_study`]: `tva × 1{year = k}` interactions with county and
//!   year fixed effects, the input to a parallel-trends sensitivity routine.
//!
//! # References
//!
//! - Angrist & Pischke, *Mostly Harmless Econometrics*, Ch. 5.
//! - Kline (2011), "The Tennessee Valley Authority" and Kline & Moretti
//!   (2014), *Quarterly Journal of Economics*.

use std::collections::BTreeMap;

use nalgebra::{DMatrix, DVector};
use serde::Serialize;
use tva_core::{AttEstimate, Error, PeriodColumns, Result, SensitivityInput};

use super::first_difference::FirstDiffTable;
use super::hdfe::FixedEffectsSolver;
use super::panel::{cluster_robust_vcov, dense_cluster_ids, n_clusters};
use crate::frame::PanelFrame;
use crate::math::normal_critical_value;
use crate::regression::{fit_ols, solve_least_squares};

/// Result of [`first_difference_did`].
#[derive(Debug, Clone, Serialize)]
pub struct PlainDidResult {
    /// ATT with cluster-robust SE and normal CI.
    pub estimate: AttEstimate,
    /// Mean Δy among treated counties.
    pub mean_change_treated: f64,
    /// Mean Δy among untreated counties.
    pub mean_change_control: f64,
    /// Treated counties.
    pub n_treated: usize,
    /// Untreated counties.
    pub n_control: usize,
    /// Distinct clusters.
    pub n_clusters: usize,
}

/// Unconditional first-difference DID.
pub fn first_difference_did(table: &FirstDiffTable, conf_level: f64) -> Result<PlainDidResult> {
    let (n1, n0) = (table.n_treated(), table.n_control());
    if n1 == 0 || n0 == 0 {
        return Err(Error::Estimation(format!(
            "plain DID needs treated and untreated counties: {n1} treated, {n0} untreated"
        )));
    }
    let x: Vec<Vec<f64>> = table.treated.iter().map(|&d| vec![f64::from(d)]).collect();
    let fit = fit_ols(&x, &table.dy)?;
    let cluster_ids = table.cluster_ids();
    let se = fit.se_cluster(&cluster_ids)?[1];
    let att = fit.coefficients[1];
    let z = normal_critical_value(conf_level)?;

    tracing::debug!(att, se, n_treated = n1, n_control = n0, "first-difference DID");

    Ok(PlainDidResult {
        estimate: AttEstimate::with_se(att, se, (att - z * se, att + z * se)),
        mean_change_treated: fit.coefficients[0] + att,
        mean_change_control: fit.coefficients[0],
        n_treated: n1,
        n_control: n0,
        n_clusters: n_clusters(&cluster_ids),
    })
}

/// Mean outcome in one (treatment group, year) cell.
#[derive(Debug, Clone, Serialize)]
pub struct GroupMean {
    /// Treatment group (0/1).
    pub treated: u8,
    /// Census year.
    pub year: i64,
    /// Mean of the outcome.
    pub mean: f64,
    /// Observations averaged.
    pub n: usize,
}

/// Outcome mean by treatment group and year, sorted by `(treated, year)`.
///
/// Excluded rows and missing outcomes are skipped.
pub fn group_means(frame: &PanelFrame, outcome: &str) -> Result<Vec<GroupMean>> {
    let y = frame.column(outcome)?;
    let mut cells: BTreeMap<(u8, i64), (f64, usize)> = BTreeMap::new();
    for i in 0..frame.n_rows() {
        if frame.excluded()[i] || !y[i].is_finite() {
            continue;
        }
        let cell = cells.entry((frame.treated()[i], frame.year()[i])).or_insert((0.0, 0));
        cell.0 += y[i];
        cell.1 += 1;
    }
    Ok(cells
        .into_iter()
        .map(|((treated, year), (sum, n))| GroupMean { treated, year, mean: sum / n as f64, n })
        .collect())
}

/// Result of a canonical (2×2) DiD estimator.
#[derive(Debug, Clone, Serialize)]
pub struct DidResult {
    /// ATT estimate (coefficient on treat×post).
    pub att: f64,
    /// Standard error of the ATT (OLS).
    pub se: f64,
    /// Cluster-robust standard error of the ATT.
    pub se_cluster: f64,
    /// t-statistic (ATT / se_cluster).
    pub t_stat: f64,
    /// Mean outcome: treated-post.
    pub mean_treated_post: f64,
    /// Mean outcome: treated-pre.
    pub mean_treated_pre: f64,
    /// Mean outcome: control-post.
    pub mean_control_post: f64,
    /// Mean outcome: control-pre.
    pub mean_control_pre: f64,
    /// Number of observations.
    pub n_obs: usize,
}

/// Canonical two-period DiD on the levels of `outcome`.
///
/// Uses every non-excluded row in the two periods with a finite outcome;
/// unlike [`first_difference_did`] a county need not appear in both.
pub fn did_canonical(
    frame: &PanelFrame,
    outcome: &str,
    periods: PeriodColumns,
    cluster_column: Option<&str>,
) -> Result<DidResult> {
    if periods.pre == periods.post {
        return Err(Error::Validation(format!(
            "pre and post periods must differ (both {})",
            periods.pre
        )));
    }
    let y_all = frame.column(outcome)?;
    let labels = frame.cluster_labels(cluster_column)?;

    let mut y = Vec::new();
    let mut x = Vec::new();
    let mut clusters = Vec::new();
    let mut sums = [[0.0_f64; 2]; 2];
    let mut counts = [[0usize; 2]; 2];
    for i in 0..frame.n_rows() {
        let yr = frame.year()[i];
        if frame.excluded()[i] || !y_all[i].is_finite() || (yr != periods.pre && yr != periods.post)
        {
            continue;
        }
        let d = usize::from(frame.treated()[i]);
        let p = usize::from(yr == periods.post);
        sums[d][p] += y_all[i];
        counts[d][p] += 1;
        let (df, pf) = (d as f64, p as f64);
        x.push(vec![df, pf, df * pf]);
        y.push(y_all[i]);
        clusters.push(labels[i].as_str());
    }

    if counts.iter().flatten().any(|&c| c == 0) {
        return Err(Error::Estimation(format!(
            "all four treat×post cells must have observations (counts {counts:?})"
        )));
    }

    let fit = fit_ols(&x, &y)?;
    let att = fit.coefficients[3];
    let se = fit.se_ols()[3];
    let se_cluster = fit.se_cluster(&dense_cluster_ids(&clusters))?[3];
    let t_stat = if se_cluster > 0.0 { att / se_cluster } else { f64::NAN };
    let cell = |d: usize, p: usize| sums[d][p] / counts[d][p] as f64;

    Ok(DidResult {
        att,
        se,
        se_cluster,
        t_stat,
        mean_treated_post: cell(1, 1),
        mean_treated_pre: cell(1, 0),
        mean_control_post: cell(0, 1),
        mean_control_pre: cell(0, 0),
        n_obs: y.len(),
    })
}

/// Result of [`event_study`].
#[derive(Debug, Clone, Serialize)]
pub struct EventStudyResult {
    /// Year of each coefficient, ascending; the reference year is omitted.
    pub years: Vec<i64>,
    /// Point estimates of `tva × 1{year = k}`.
    pub coefficients: Vec<f64>,
    /// Cluster-robust standard errors.
    pub se_cluster: Vec<f64>,
    /// Cluster-robust covariance, row-major.
    pub vcov: Vec<f64>,
    /// CI lower bounds.
    pub ci_lower: Vec<f64>,
    /// CI upper bounds.
    pub ci_upper: Vec<f64>,
    /// Confidence level of the intervals.
    pub conf_level: f64,
    /// Omitted year.
    pub reference_year: i64,
    /// Number of observations.
    pub n_obs: usize,
    /// Distinct clusters.
    pub n_clusters: usize,
    /// Degrees of freedom absorbed by county and year fixed effects.
    pub df_absorbed: usize,
}

impl EventStudyResult {
    /// Coefficients before the reference year.
    pub fn num_pre_periods(&self) -> usize {
        self.years.iter().filter(|&&y| y < self.reference_year).count()
    }

    /// Coefficients after the reference year.
    pub fn num_post_periods(&self) -> usize {
        self.years.len() - self.num_pre_periods()
    }

    /// Package the estimates for a sensitivity routine.
    pub fn to_sensitivity_input(&self) -> Result<SensitivityInput> {
        let input = SensitivityInput {
            betahat: self.coefficients.clone(),
            sigma: self.vcov.clone(),
            num_pre_periods: self.num_pre_periods(),
            num_post_periods: self.num_post_periods(),
        };
        input.validate()?;
        Ok(input)
    }
}

/// Event study `y = α_county + λ_year + Σ_{k ≠ ref} δ_k · D · 1{year = k} + ε`.
///
/// Uses every non-excluded row with a finite outcome. County and year
/// effects are absorbed by alternating projections.
pub fn event_study(
    frame: &PanelFrame,
    outcome: &str,
    reference_year: i64,
    cluster_column: Option<&str>,
    conf_level: f64,
) -> Result<EventStudyResult> {
    let y_all = frame.column(outcome)?;
    let labels = frame.cluster_labels(cluster_column)?;
    let rows: Vec<usize> = (0..frame.n_rows())
        .filter(|&i| !frame.excluded()[i] && y_all[i].is_finite())
        .collect();
    let n = rows.len();
    if n == 0 {
        return Err(Error::Validation(format!("no usable rows for outcome '{outcome}'")));
    }

    let mut years: Vec<i64> = rows.iter().map(|&i| frame.year()[i]).collect();
    years.sort_unstable();
    years.dedup();
    if !years.contains(&reference_year) {
        return Err(Error::Validation(format!(
            "reference year {reference_year} is not in the panel (years {years:?})"
        )));
    }
    years.retain(|&y| y != reference_year);
    if years.is_empty() {
        return Err(Error::Validation("event study needs at least two years".into()));
    }
    let k = years.len();

    let county_keys: Vec<&String> = rows.iter().map(|&i| &frame.county()[i]).collect();
    let year_keys: Vec<i64> = rows.iter().map(|&i| frame.year()[i]).collect();
    let county_ids: Vec<i64> =
        dense_cluster_ids(&county_keys).into_iter().map(|id| id as i64).collect();
    let hdfe = FixedEffectsSolver::from_keys(&[&county_ids[..], &year_keys[..]])?;

    let y: Vec<f64> = rows.iter().map(|&i| y_all[i]).collect();
    let y_dm = hdfe.partial_out(&y)?;

    let mut x_flat = vec![0.0_f64; n * k];
    for (j, &yr) in years.iter().enumerate() {
        let col: Vec<f64> = rows
            .iter()
            .map(|&i| if frame.year()[i] == yr { f64::from(frame.treated()[i]) } else { 0.0 })
            .collect();
        for (r, v) in hdfe.partial_out(&col)?.into_iter().enumerate() {
            x_flat[r * k + j] = v;
        }
    }

    let x_mat = DMatrix::from_row_slice(n, k, &x_flat);
    let y_vec = DVector::from_column_slice(&y_dm);
    let (beta, xtx_inv) = solve_least_squares(&x_mat, &y_vec, "event study")?;
    let resid = &y_vec - &x_mat * &beta;

    let cluster_keys: Vec<&String> = rows.iter().map(|&i| &labels[i]).collect();
    let cluster_ids = dense_cluster_ids(&cluster_keys);
    let df_absorbed = hdfe.degrees_of_freedom_absorbed();
    let vcov = cluster_robust_vcov(&x_mat, &resid, &xtx_inv, &cluster_ids, df_absorbed)?;

    let coefficients: Vec<f64> = beta.iter().copied().collect();
    let se_cluster: Vec<f64> = (0..k).map(|j| vcov[(j, j)].max(0.0).sqrt()).collect();
    let z = normal_critical_value(conf_level)?;
    let ci_lower = coefficients.iter().zip(&se_cluster).map(|(b, s)| b - z * s).collect();
    let ci_upper = coefficients.iter().zip(&se_cluster).map(|(b, s)| b + z * s).collect();

    // nalgebra is column-major; transpose to store row-major.
    let vcov_rows: Vec<f64> = vcov.transpose().as_slice().to_vec();

    tracing::debug!(outcome, reference_year, n_obs = n, n_coef = k, df_absorbed, "event study");

    Ok(EventStudyResult {
        years,
        coefficients,
        se_cluster,
        vcov: vcov_rows,
        ci_lower,
        ci_upper,
        conf_level,
        reference_year,
        n_obs: n,
        n_clusters: n_clusters(&cluster_ids),
        df_absorbed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const YEARS: [i64; 5] = [1920, 1930, 1940, 1950, 1960];

    /// Balanced panel: county FE + year FE + `effect` for treated after 1940,
    /// plus a small idiosyncratic term so residuals are non-zero.
    fn panel(n_counties: usize, effect: f64) -> PanelFrame {
        let mut county = Vec::new();
        let mut year = Vec::new();
        let mut treated = Vec::new();
        let mut y = Vec::new();
        let mut state = Vec::new();
        for c in 0..n_counties {
            let d = u8::from(c % 3 == 0);
            for (t, &yr) in YEARS.iter().enumerate() {
                county.push(format!("{c:03}"));
                year.push(yr);
                treated.push(d);
                state.push(format!("s{}", c % 4));
                let jitter = (((c * 7 + t * 13) % 11) as f64 - 5.0) * 0.001;
                let post = if d == 1 && yr > 1940 { effect } else { 0.0 };
                y.push(0.5 * c as f64 + 0.1 * t as f64 + post + jitter);
            }
        }
        PanelFrame::new(county, year, treated)
            .unwrap()
            .with_column("y", y)
            .unwrap()
            .with_label_column("state", state)
            .unwrap()
    }

    #[test]
    fn test_first_difference_did_two_counties() {
        let t = FirstDiffTable::from_parts(
            vec!["A".into(), "B".into()],
            vec![1, 0],
            vec![],
            vec![vec![], vec![]],
            vec![0.5, 0.2],
        )
        .unwrap();
        let res = first_difference_did(&t, 0.95).unwrap();
        assert!((res.estimate.att - 0.3).abs() < 1e-12);
        assert!((res.mean_change_control - 0.2).abs() < 1e-12);
        assert_eq!(res.n_clusters, 2);
    }

    #[test]
    fn test_first_difference_did_needs_both_arms() {
        let t = FirstDiffTable::from_parts(
            vec!["A".into(), "B".into()],
            vec![1, 1],
            vec![],
            vec![vec![], vec![]],
            vec![0.5, 0.2],
        )
        .unwrap();
        assert!(matches!(first_difference_did(&t, 0.95), Err(Error::Estimation(_))));
    }

    #[test]
    fn test_group_means() {
        let f = panel(6, 1.0);
        let means = group_means(&f, "y").unwrap();
        assert_eq!(means.len(), 10);
        assert_eq!((means[0].treated, means[0].year, means[0].n), (0, 1920, 4));
        assert_eq!((means[9].treated, means[9].year, means[9].n), (1, 1960, 2));
    }

    #[test]
    fn test_did_canonical_exact() {
        let f = PanelFrame::new(
            ["a", "b", "a", "b", "c", "d", "c", "d"].iter().map(|s| s.to_string()).collect(),
            vec![1940, 1940, 1960, 1960, 1940, 1940, 1960, 1960],
            vec![0, 0, 0, 0, 1, 1, 1, 1],
        )
        .unwrap()
        .with_column("y", vec![10.0, 10.0, 12.0, 12.0, 10.0, 10.0, 15.0, 15.0])
        .unwrap();
        let periods = PeriodColumns { pre: 1940, post: 1960 };
        let res = did_canonical(&f, "y", periods, None).unwrap();
        assert!((res.att - 3.0).abs() < 1e-10, "ATT={}", res.att);
        assert_eq!(res.n_obs, 8);
        assert!((res.mean_treated_post - 15.0).abs() < 1e-10);
        assert!((res.mean_control_pre - 10.0).abs() < 1e-10);
    }

    #[test]
    fn test_did_canonical_empty_cell() {
        let f = panel(6, 1.0);
        let periods = PeriodColumns { pre: 1940, post: 1970 };
        assert!(matches!(did_canonical(&f, "y", periods, None), Err(Error::Estimation(_))));
    }

    #[test]
    fn test_event_study_recovers_effect() {
        let f = panel(12, 0.8);
        let res = event_study(&f, "y", 1940, Some("state"), 0.95).unwrap();
        assert_eq!(res.years, vec![1920, 1930, 1950, 1960]);
        assert_eq!(res.num_pre_periods(), 2);
        assert_eq!(res.num_post_periods(), 2);
        assert_eq!(res.n_clusters, 4);
        for (yr, b) in res.years.iter().zip(&res.coefficients) {
            let expected = if *yr > 1940 { 0.8 } else { 0.0 };
            assert!((b - expected).abs() < 0.02, "year {yr}: {b}");
        }
        assert!(res.se_cluster.iter().all(|s| s.is_finite()));
        let input = res.to_sensitivity_input().unwrap();
        assert_eq!(input.sigma.len(), 16);
        assert!((input.sigma[1] - input.sigma[4]).abs() < 1e-12);
    }

    #[test]
    fn test_event_study_reference_year_must_exist() {
        let f = panel(6, 0.8);
        assert!(matches!(event_study(&f, "y", 1945, None, 0.95), Err(Error::Validation(_))));
    }

    #[test]
    fn test_event_study_last_year_reference_has_no_post() {
        let f = panel(6, 0.8);
        let res = event_study(&f, "y", 1960, None, 0.95).unwrap();
        assert_eq!(res.num_post_periods(), 0);
        assert!(res.to_sensitivity_input().is_err());
    }
}
