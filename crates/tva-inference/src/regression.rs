//! Regression solvers for the nuisance models.
//!
//! Two fits, both with an intercept:
//! - [`fit_ols`]: closed-form least squares, with OLS and cluster-robust
//!   standard errors.
//! - [`fit_logit`]: binomial logit by Newton–Raphson with step halving.
//!
//! Zero-variance covariates (within the fitting sample) are dropped before
//! solving: they are collinear with the intercept. Their coefficient is
//! reported as `0.0` and listed in `dropped_columns`, so predictions ignore
//! them. Any other exact collinearity is an [`Error::Estimation`].

use nalgebra::{DMatrix, DVector};
use tva_core::{Error, Predictor, Result};

use crate::econometrics::panel::cluster_robust_se;
use crate::math::{log1pexp, sigmoid};

/// Relative tolerance for treating a covariate as constant.
const CONSTANT_TOL: f64 = 1e-12;

/// Smallest singular value of X, relative to the largest, for full rank.
const RANK_TOL: f64 = 1e-10;

/// Intercept + non-constant covariates, row-major into an `n × k` matrix.
#[derive(Debug, Clone)]
struct Design {
    /// Number of covariates in the caller's rows.
    p: usize,
    /// Caller column index of each non-intercept design column.
    active: Vec<usize>,
    dropped: Vec<usize>,
    matrix: DMatrix<f64>,
}

impl Design {
    fn build(x: &[Vec<f64>]) -> Result<Self> {
        let n = x.len();
        let p = x.first().map_or(0, |r| r.len());
        for (i, row) in x.iter().enumerate() {
            if row.len() != p {
                return Err(Error::Validation(format!(
                    "X must be rectangular: row {} has len {}, expected {}",
                    i,
                    row.len(),
                    p
                )));
            }
            if row.iter().any(|v| !v.is_finite()) {
                return Err(Error::Validation(format!("X row {i} contains a non-finite value")));
            }
        }

        let (active, dropped): (Vec<usize>, Vec<usize>) =
            (0..p).partition(|&j| !is_constant_column(x, j));

        let k = 1 + active.len();
        let mut data = Vec::with_capacity(n * k);
        for row in x {
            data.push(1.0);
            data.extend(active.iter().map(|&j| row[j]));
        }
        Ok(Self { p, active, dropped, matrix: DMatrix::from_row_slice(n, k, &data) })
    }

    /// Expand design-column values to `[intercept, x_1, …, x_p]`, filling
    /// dropped columns with `fill`.
    fn expand(&self, values: &[f64], fill: f64) -> Vec<f64> {
        let mut out = vec![fill; self.p + 1];
        out[0] = values[0];
        for (pos, &j) in self.active.iter().enumerate() {
            out[1 + j] = values[1 + pos];
        }
        out
    }
}

fn is_constant_column(x: &[Vec<f64>], j: usize) -> bool {
    let Some(first) = x.first().map(|r| r[j]) else {
        return true;
    };
    let tol = CONSTANT_TOL * (1.0 + first.abs());
    x.iter().all(|r| (r[j] - first).abs() <= tol)
}

/// Fail with [`Error::Estimation`] unless `x` has full column rank.
pub(crate) fn check_full_rank(x: &DMatrix<f64>, what: &str) -> Result<()> {
    if x.ncols() == 0 {
        return Err(Error::Estimation(format!("{what}: design matrix has no columns")));
    }
    if x.nrows() < x.ncols() {
        return Err(Error::Estimation(format!(
            "{what} is underdetermined: {} observations for {} parameters",
            x.nrows(),
            x.ncols()
        )));
    }
    let sv = x.singular_values();
    let max_sv = sv.max();
    let min_sv = sv.min();
    if !(max_sv > 0.0) || min_sv <= RANK_TOL * max_sv {
        return Err(Error::Estimation(format!(
            "{what}: design matrix is rank-deficient (collinear columns; {} observations, {} parameters)",
            x.nrows(),
            x.ncols()
        )));
    }
    Ok(())
}

/// Least squares on a full-rank design: returns `(β, (X'X)⁻¹)`.
pub(crate) fn solve_least_squares(
    x: &DMatrix<f64>,
    y: &DVector<f64>,
    what: &str,
) -> Result<(DVector<f64>, DMatrix<f64>)> {
    check_full_rank(x, what)?;
    let xt = x.transpose();
    let xtx_inv = (&xt * x)
        .try_inverse()
        .ok_or_else(|| Error::Estimation(format!("{what}: X'X is singular")))?;
    let beta = &xtx_inv * (xt * y);
    Ok((beta, xtx_inv))
}

/// Ordinary least squares fit of `y ~ 1 + X`.
#[derive(Debug, Clone)]
pub struct OlsFit {
    /// `[intercept, β_1, …, β_p]`; dropped columns are `0.0`.
    pub coefficients: Vec<f64>,
    /// Covariate indices dropped for having zero variance.
    pub dropped_columns: Vec<usize>,
    /// Number of observations.
    pub n_obs: usize,
    /// Residual sum of squares.
    pub rss: f64,
    /// In-sample residuals.
    pub residuals: Vec<f64>,
    design: Design,
    xtx_inv: DMatrix<f64>,
}

impl OlsFit {
    /// Number of estimated parameters (intercept + kept covariates).
    pub fn n_estimated(&self) -> usize {
        self.design.matrix.ncols()
    }

    /// Homoskedastic standard errors; `NaN` for dropped columns.
    pub fn se_ols(&self) -> Vec<f64> {
        let k = self.n_estimated();
        let dof = self.n_obs as f64 - k as f64;
        let sigma2 = if dof > 0.0 { self.rss / dof } else { f64::NAN };
        let se: Vec<f64> = (0..k).map(|j| (sigma2 * self.xtx_inv[(j, j)]).sqrt()).collect();
        self.design.expand(&se, f64::NAN)
    }

    /// Cluster-robust standard errors; `NaN` for dropped columns.
    pub fn se_cluster(&self, cluster_ids: &[u64]) -> Result<Vec<f64>> {
        let resid = DVector::from_column_slice(&self.residuals);
        let se = cluster_robust_se(&self.design.matrix, &resid, &self.xtx_inv, cluster_ids, 0)?;
        Ok(self.design.expand(&se, f64::NAN))
    }
}

impl Predictor for OlsFit {
    fn n_features(&self) -> usize {
        self.design.p
    }

    fn predict_row(&self, x: &[f64]) -> f64 {
        self.coefficients[0] + row_dot(x, &self.coefficients[1..])
    }
}

/// Fit `y ~ 1 + X` by least squares. `x` is row-wise with `p ≥ 0` covariates.
pub fn fit_ols(x: &[Vec<f64>], y: &[f64]) -> Result<OlsFit> {
    let n = y.len();
    if x.len() != n {
        return Err(Error::Validation(format!("X has {} rows, y has {}", x.len(), n)));
    }
    if y.iter().any(|v| !v.is_finite()) {
        return Err(Error::Validation("y must contain only finite values".into()));
    }
    let p = x.first().map_or(0, |r| r.len());
    if n < p + 1 {
        return Err(Error::Estimation(format!(
            "OLS is underdetermined: {} observations for {} parameters",
            n,
            p + 1
        )));
    }

    let design = Design::build(x)?;
    let y_vec = DVector::from_column_slice(y);
    let (beta, xtx_inv) = solve_least_squares(&design.matrix, &y_vec, "OLS")?;

    let resid = &y_vec - &design.matrix * &beta;
    let rss = resid.iter().map(|r| r * r).sum();
    let coefficients = design.expand(beta.as_slice(), 0.0);

    tracing::debug!(
        n_obs = n,
        n_params = design.matrix.ncols(),
        dropped = ?design.dropped,
        "ols fit"
    );

    Ok(OlsFit {
        coefficients,
        dropped_columns: design.dropped.clone(),
        n_obs: n,
        rss,
        residuals: resid.iter().copied().collect(),
        design,
        xtx_inv,
    })
}

/// Newton–Raphson settings for [`fit_logit_with`].
#[derive(Debug, Clone, Copy)]
pub struct LogitConfig {
    /// Maximum Newton iterations.
    pub max_iter: usize,
    /// Converged when `max |Δβ| < tol · (1 + max |β|)`.
    pub tol: f64,
    /// Perfect separation when every `|d_i − p̂_i|` is below this.
    pub separation_tol: f64,
}

impl Default for LogitConfig {
    fn default() -> Self {
        Self { max_iter: 100, tol: 1e-10, separation_tol: 1e-8 }
    }
}

/// Binomial logit fit of `P(d = 1 | X) = sigmoid(β₀ + Xβ)`.
#[derive(Debug, Clone)]
pub struct LogitFit {
    /// `[intercept, β_1, …, β_p]`; dropped columns are `0.0`.
    pub coefficients: Vec<f64>,
    /// Covariate indices dropped for having zero variance.
    pub dropped_columns: Vec<usize>,
    /// Number of observations.
    pub n_obs: usize,
    /// Newton iterations used.
    pub iterations: usize,
    /// Log-likelihood at the optimum.
    pub log_likelihood: f64,
}

impl Predictor for LogitFit {
    fn n_features(&self) -> usize {
        self.coefficients.len() - 1
    }

    fn predict_row(&self, x: &[f64]) -> f64 {
        sigmoid(self.coefficients[0] + row_dot(x, &self.coefficients[1..]))
    }
}

/// [`fit_logit_with`] using [`LogitConfig::default`].
pub fn fit_logit(x: &[Vec<f64>], d: &[u8]) -> Result<LogitFit> {
    fit_logit_with(x, d, &LogitConfig::default())
}

/// Fit a logit of binary `d` on `1 + X` by maximum likelihood.
pub fn fit_logit_with(x: &[Vec<f64>], d: &[u8], config: &LogitConfig) -> Result<LogitFit> {
    let n = d.len();
    if x.len() != n {
        return Err(Error::Validation(format!("X has {} rows, d has {}", x.len(), n)));
    }
    if d.iter().any(|&v| v > 1) {
        return Err(Error::Validation("d must contain only 0/1 values".into()));
    }
    let n1 = d.iter().filter(|&&v| v == 1).count();
    if n1 == 0 || n1 == n {
        return Err(Error::Estimation(format!(
            "logit needs both outcomes: {n1} of {n} observations are 1"
        )));
    }
    let p = x.first().map_or(0, |r| r.len());
    if n < p + 1 {
        return Err(Error::Estimation(format!(
            "logit is underdetermined: {} observations for {} parameters",
            n,
            p + 1
        )));
    }

    let design = Design::build(x)?;
    let xm = &design.matrix;
    check_full_rank(xm, "logit")?;
    let k = xm.ncols();
    let y = DVector::from_iterator(n, d.iter().map(|&v| v as f64));

    let mut beta = DVector::<f64>::zeros(k);
    beta[0] = (n1 as f64 / (n - n1) as f64).ln();
    let mut ll = log_likelihood(xm, &y, &beta);

    for iter in 1..=config.max_iter {
        let mu = (xm * &beta).map(sigmoid);
        let grad = xm.transpose() * (&y - &mu);

        // Fisher information X' W X, W = diag(μ(1−μ)).
        let mut xw = xm.clone();
        for (i, mut row) in xw.row_iter_mut().enumerate() {
            row *= mu[i] * (1.0 - mu[i]);
        }
        let info = xm.transpose() * xw;
        let step = match info.clone().cholesky() {
            Some(chol) => chol.solve(&grad),
            None => info.lu().solve(&grad).ok_or_else(|| {
                Error::Estimation(format!(
                    "logit information matrix is singular at iteration {iter} \
                     (n={n}, treated={n1}); perfect separation?"
                ))
            })?,
        };

        // Step halving keeps the log-likelihood non-decreasing.
        let mut t = 1.0;
        let (new_beta, new_ll) = loop {
            let cand = &beta + &step * t;
            let cand_ll = log_likelihood(xm, &y, &cand);
            if cand_ll >= ll - 1e-12 * ll.abs() || t < 1e-10 {
                break (cand, cand_ll);
            }
            t *= 0.5;
        };

        let max_change = (&new_beta - &beta).amax();
        beta = new_beta;
        ll = new_ll;

        if !beta.iter().all(|b| b.is_finite()) {
            return Err(Error::Estimation(format!(
                "logit diverged at iteration {iter} (n={n}, treated={n1})"
            )));
        }

        let fitted = (xm * &beta).map(sigmoid);
        let max_gap = (&y - &fitted).amax();
        if max_gap < config.separation_tol {
            return Err(Error::Estimation(format!(
                "perfect separation: fitted probabilities reproduce the outcome exactly \
                 (n={n}, treated={n1})"
            )));
        }

        if max_change < config.tol * (1.0 + beta.amax()) {
            let coefficients = design.expand(beta.as_slice(), 0.0);
            tracing::debug!(n_obs = n, iterations = iter, log_likelihood = ll, "logit fit");
            return Ok(LogitFit {
                coefficients,
                dropped_columns: design.dropped.clone(),
                n_obs: n,
                iterations: iter,
                log_likelihood: ll,
            });
        }
    }

    Err(Error::Estimation(format!(
        "logit did not converge in {} iterations (n={n}, treated={n1})",
        config.max_iter
    )))
}

fn log_likelihood(x: &DMatrix<f64>, y: &DVector<f64>, beta: &DVector<f64>) -> f64 {
    (x * beta).iter().zip(y.iter()).map(|(&eta, &yi)| yi * eta - log1pexp(eta)).sum()
}

#[inline]
fn row_dot(x_row: &[f64], beta: &[f64]) -> f64 {
    debug_assert_eq!(x_row.len(), beta.len());
    x_row.iter().zip(beta).map(|(&x, &b)| x * b).sum()
}
