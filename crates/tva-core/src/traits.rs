//! Core traits for tva-did
//!
//! Estimators in `tva-inference` only see fitted nuisance models through
//! [`Predictor`], and the parallel-trends sensitivity routine is an external
//! collaborator reached through [`SensitivityAnalyzer`].

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// A fitted, immutable regression that maps a covariate row to a prediction.
pub trait Predictor {
    /// Number of covariates a row must carry (intercept excluded).
    fn n_features(&self) -> usize;

    /// Prediction for a single covariate row.
    fn predict_row(&self, x: &[f64]) -> f64;

    /// Predictions for many rows.
    fn predict(&self, rows: &[Vec<f64>]) -> Result<Vec<f64>> {
        let p = self.n_features();
        rows.iter()
            .enumerate()
            .map(|(i, r)| {
                if r.len() != p {
                    return Err(Error::Validation(format!(
                        "row {} has {} covariates, model expects {}",
                        i,
                        r.len(),
                        p
                    )));
                }
                Ok(self.predict_row(r))
            })
            .collect()
    }
}

/// Time-ordered event-study estimates handed to a sensitivity routine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensitivityInput {
    /// Coefficients ordered by period: all pre periods, then all post periods.
    pub betahat: Vec<f64>,
    /// Covariance of `betahat`, row-major `k × k`.
    pub sigma: Vec<f64>,
    /// Number of pre-treatment coefficients (leading entries of `betahat`).
    pub num_pre_periods: usize,
    /// Number of post-treatment coefficients.
    pub num_post_periods: usize,
}

impl SensitivityInput {
    /// Check shape, symmetry and finiteness.
    pub fn validate(&self) -> Result<()> {
        let k = self.betahat.len();
        if k == 0 {
            return Err(Error::Validation("betahat must be non-empty".into()));
        }
        if self.num_pre_periods + self.num_post_periods != k {
            return Err(Error::Validation(format!(
                "num_pre_periods ({}) + num_post_periods ({}) != len(betahat) ({})",
                self.num_pre_periods, self.num_post_periods, k
            )));
        }
        if self.num_post_periods == 0 {
            return Err(Error::Validation("at least one post period is required".into()));
        }
        if self.sigma.len() != k * k {
            return Err(Error::Validation(format!(
                "sigma has length {}, expected {}",
                self.sigma.len(),
                k * k
            )));
        }
        if self.betahat.iter().chain(&self.sigma).any(|v| !v.is_finite()) {
            return Err(Error::Validation("betahat and sigma must be finite".into()));
        }
        for i in 0..k {
            for j in (i + 1)..k {
                let a = self.sigma[i * k + j];
                let b = self.sigma[j * k + i];
                let scale = a.abs().max(b.abs()).max(1e-300);
                if (a - b).abs() / scale > 1e-8 {
                    return Err(Error::Validation(format!(
                        "sigma is not symmetric at ({i}, {j})"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// External parallel-trends sensitivity routine (e.g. a relative-magnitudes
/// bound search). Returns one confidence-interval width per bound magnitude.
pub trait SensitivityAnalyzer {
    /// Short name used in logs and reports.
    fn name(&self) -> &str;

    /// CI width for each entry of `bounds`, in the same order.
    fn ci_widths(&self, input: &SensitivityInput, bounds: &[f64]) -> Result<Vec<f64>>;
}
