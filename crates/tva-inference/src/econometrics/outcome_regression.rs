//! Outcome-regression (OR) DID.
//!
//! Fits `Δy ~ 1 + X` on untreated counties only, predicts the
//! counterfactual change `Δŷ₀` for every county, and averages
//! `Δy − Δŷ₀` over the treated. Predictions for treated counties outside
//! the untreated covariate support are extrapolations and are not flagged.

use serde::Serialize;
use tva_core::{Error, Predictor, Result};

use crate::econometrics::first_difference::FirstDiffTable;
use crate::regression::{OlsFit, fit_ols};

/// Result of [`outcome_regression`].
#[derive(Debug, Clone, Serialize)]
pub struct OutcomeRegressionResult {
    /// ATT estimate.
    pub att: f64,
    /// Treated counties averaged over.
    pub n_treated: usize,
    /// Untreated counties the model was fit on.
    pub n_control: usize,
    /// `[intercept, β_1, …, β_p]` of the untreated-only fit.
    pub coefficients: Vec<f64>,
    /// Covariate indices dropped as constant among untreated counties.
    pub dropped_columns: Vec<usize>,
    /// Predicted counterfactual change `Δŷ₀` for every county.
    #[serde(skip)]
    pub predictions: Vec<f64>,
}

/// Fit the untreated-outcome model `Δy ~ 1 + X` on `D == 0` rows.
pub fn fit_outcome_model(table: &FirstDiffTable) -> Result<OlsFit> {
    let params = table.n_covariates() + 1;
    let (x0, y0): (Vec<Vec<f64>>, Vec<f64>) = table
        .treated
        .iter()
        .zip(table.x.iter().zip(&table.dy))
        .filter(|(d, _)| **d == 0)
        .map(|(_, (x, y))| (x.clone(), *y))
        .unzip();
    if y0.len() < params {
        return Err(Error::Estimation(format!(
            "outcome regression: {} untreated counties for {} parameters",
            y0.len(),
            params
        )));
    }
    fit_ols(&x0, &y0).map_err(|e| match e {
        Error::Estimation(msg) => Error::Estimation(format!(
            "outcome regression ({} untreated counties): {msg}",
            y0.len()
        )),
        other => other,
    })
}

/// Outcome-regression ATT on a first-differenced table.
pub fn outcome_regression(table: &FirstDiffTable) -> Result<OutcomeRegressionResult> {
    let n_treated = table.n_treated();
    if n_treated == 0 {
        return Err(Error::Estimation(format!(
            "outcome regression: no treated counties among {}",
            table.len()
        )));
    }
    let model = fit_outcome_model(table)?;
    let predictions = model.predict(&table.x)?;

    let att = table
        .treated
        .iter()
        .zip(table.dy.iter().zip(&predictions))
        .filter(|(d, _)| **d == 1)
        .map(|(_, (y, m))| y - m)
        .sum::<f64>()
        / n_treated as f64;

    tracing::debug!(att, n_treated, n_control = table.n_control(), "outcome regression");

    Ok(OutcomeRegressionResult {
        att,
        n_treated,
        n_control: table.n_control(),
        coefficients: model.coefficients,
        dropped_columns: model.dropped_columns,
        predictions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(treated: Vec<u8>, x: Vec<Vec<f64>>, dy: Vec<f64>) -> FirstDiffTable {
        let county = (0..dy.len()).map(|i| format!("c{i}")).collect();
        let names = (0..x.first().map_or(0, Vec::len)).map(|j| format!("x{j}")).collect();
        FirstDiffTable::from_parts(county, treated, names, x, dy).unwrap()
    }

    #[test]
    fn test_or_removes_covariate_trend() {
        // Untreated: Δy = 0.2 + 0.5·x. Treated get an extra 1.0.
        let x: Vec<Vec<f64>> = (0..8).map(|i| vec![i as f64 * 0.1]).collect();
        let treated: Vec<u8> = (0..8).map(|i| u8::from(i % 2 == 0)).collect();
        let dy: Vec<f64> = x
            .iter()
            .zip(&treated)
            .map(|(r, &d)| 0.2 + 0.5 * r[0] + f64::from(d))
            .collect();
        let res = outcome_regression(&table(treated, x, dy)).unwrap();
        assert!((res.att - 1.0).abs() < 1e-10, "att={}", res.att);
        assert!((res.coefficients[1] - 0.5).abs() < 1e-10);
        assert_eq!(res.n_treated, 4);
        assert_eq!(res.predictions.len(), 8);
    }

    #[test]
    fn test_or_without_covariates_is_plain_did() {
        let res = outcome_regression(&table(vec![1, 0], vec![vec![], vec![]], vec![0.5, 0.2])).unwrap();
        assert!((res.att - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_or_zero_untreated_is_estimation_error() {
        let t = table(vec![1, 1, 1], vec![vec![0.1], vec![0.2], vec![0.3]], vec![1.0, 2.0, 3.0]);
        match outcome_regression(&t) {
            Err(Error::Estimation(msg)) => assert!(msg.contains("0 untreated"), "{msg}"),
            other => panic!("expected Estimation error, got {other:?}"),
        }
    }

    #[test]
    fn test_or_too_few_untreated_for_covariates() {
        let t = table(
            vec![1, 0, 0],
            vec![vec![0.1, 1.0], vec![0.2, 3.0], vec![0.3, 2.0]],
            vec![1.0, 2.0, 3.0],
        );
        assert!(matches!(outcome_regression(&t), Err(Error::Estimation(_))));
    }

    #[test]
    fn test_or_constant_covariate_among_controls() {
        // x1 varies only among treated; it is dropped from the untreated fit.
        let x = vec![vec![0.0, 5.0], vec![1.0, 7.0], vec![2.0, 7.0], vec![3.0, 7.0]];
        let t = table(vec![1, 0, 0, 0], x, vec![2.0, 1.0, 2.0, 3.0]);
        let res = outcome_regression(&t).unwrap();
        assert_eq!(res.dropped_columns, vec![1]);
        assert_eq!(res.coefficients[2], 0.0);
        assert!((res.att - 2.0).abs() < 1e-10, "att={}", res.att);
    }
}
