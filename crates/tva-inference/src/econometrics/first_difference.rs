//! Two-period first differencing of a county panel.
//!
//! Pairs each county's `pre` and `post` rows and keeps
//! `Δy = y_post − y_pre` together with the county's (time-invariant)
//! treatment status and covariates. Counties missing a period, or with a
//! missing covariate or outcome, are dropped and counted. Duplicate
//! `(county, year)` rows, or treatment/covariates that change between the
//! two periods, are integrity errors.

use std::collections::HashMap;

use tva_core::{Error, PeriodColumns, Result};

use crate::econometrics::panel::dense_cluster_ids;
use crate::frame::PanelFrame;

/// Relative tolerance when checking that covariates are time-invariant.
const INVARIANCE_TOL: f64 = 1e-9;

/// What to difference.
#[derive(Debug, Clone, Copy)]
pub struct DiffSpec<'a> {
    /// Outcome column.
    pub outcome: &'a str,
    /// Covariate columns, in design order.
    pub covariates: &'a [String],
    /// Pre/post years.
    pub periods: PeriodColumns,
    /// Label column used as cluster key (`None` = county).
    pub cluster_column: Option<&'a str>,
}

/// One row per county: treatment, covariates and the differenced outcome.
#[derive(Debug, Clone)]
pub struct FirstDiffTable {
    /// County keys.
    pub county: Vec<String>,
    /// Cluster key per county.
    pub cluster: Vec<String>,
    /// Treatment indicator (0/1).
    pub treated: Vec<u8>,
    /// Covariate names, in column order of `x`.
    pub covariate_names: Vec<String>,
    /// Covariate rows.
    pub x: Vec<Vec<f64>>,
    /// `y_post − y_pre`.
    pub dy: Vec<f64>,
}

impl FirstDiffTable {
    /// Assemble a table directly (synthetic data, resampling).
    pub fn from_parts(
        county: Vec<String>,
        treated: Vec<u8>,
        covariate_names: Vec<String>,
        x: Vec<Vec<f64>>,
        dy: Vec<f64>,
    ) -> Result<Self> {
        let n = county.len();
        if treated.len() != n || x.len() != n || dy.len() != n {
            return Err(Error::Validation(format!(
                "county ({}), treated ({}), x ({}) and dy ({}) must have the same length",
                n,
                treated.len(),
                x.len(),
                dy.len()
            )));
        }
        if treated.iter().any(|&d| d > 1) {
            return Err(Error::Validation("treated must contain only 0/1 values".into()));
        }
        let p = covariate_names.len();
        if let Some(i) = x.iter().position(|r| r.len() != p) {
            return Err(Error::Validation(format!(
                "x row {} has {} covariates, expected {}",
                i,
                x[i].len(),
                p
            )));
        }
        let cluster = county.clone();
        Ok(Self { county, cluster, treated, covariate_names, x, dy })
    }

    /// Replace cluster keys (one per county).
    pub fn with_clusters(mut self, cluster: Vec<String>) -> Result<Self> {
        if cluster.len() != self.len() {
            return Err(Error::Validation(format!(
                "cluster has {} entries, table has {} counties",
                cluster.len(),
                self.len()
            )));
        }
        self.cluster = cluster;
        Ok(self)
    }

    /// Number of counties.
    pub fn len(&self) -> usize {
        self.county.len()
    }

    /// `true` if no county survived differencing.
    pub fn is_empty(&self) -> bool {
        self.county.is_empty()
    }

    /// Number of covariates.
    pub fn n_covariates(&self) -> usize {
        self.covariate_names.len()
    }

    /// Number of treated counties.
    pub fn n_treated(&self) -> usize {
        self.treated.iter().filter(|&&d| d == 1).count()
    }

    /// Number of untreated counties.
    pub fn n_control(&self) -> usize {
        self.len() - self.n_treated()
    }

    /// Dense cluster ids for cluster-robust inference.
    pub fn cluster_ids(&self) -> Vec<u64> {
        dense_cluster_ids(&self.cluster)
    }

    /// Row subset (rows may repeat), e.g. a bootstrap draw.
    pub fn subset(&self, rows: &[usize]) -> Self {
        Self {
            county: rows.iter().map(|&i| self.county[i].clone()).collect(),
            cluster: rows.iter().map(|&i| self.cluster[i].clone()).collect(),
            treated: rows.iter().map(|&i| self.treated[i]).collect(),
            covariate_names: self.covariate_names.clone(),
            x: rows.iter().map(|&i| self.x[i].clone()).collect(),
            dy: rows.iter().map(|&i| self.dy[i]).collect(),
        }
    }
}

/// Result of [`first_difference`].
#[derive(Debug, Clone)]
pub struct FirstDiffOutcome {
    /// Differenced table.
    pub table: FirstDiffTable,
    /// Counties dropped for a missing period, covariate or outcome.
    pub dropped_counties: Vec<String>,
}

impl FirstDiffOutcome {
    /// Number of dropped counties.
    pub fn n_dropped(&self) -> usize {
        self.dropped_counties.len()
    }
}

#[derive(Default)]
struct CountyRows {
    pre: Option<usize>,
    post: Option<usize>,
}

/// Difference `spec.outcome` between `spec.periods.pre` and `spec.periods.post`.
///
/// Rows flagged as excluded in the frame are ignored. Output rows follow
/// the order in which counties first appear in the frame.
pub fn first_difference(frame: &PanelFrame, spec: &DiffSpec<'_>) -> Result<FirstDiffOutcome> {
    let PeriodColumns { pre, post } = spec.periods;
    if pre == post {
        return Err(Error::Validation(format!("pre and post periods must differ (both {pre})")));
    }

    let y = frame.column(spec.outcome)?;
    let covs: Vec<&[f64]> =
        spec.covariates.iter().map(|c| frame.column(c)).collect::<Result<_>>()?;
    let cluster = frame.cluster_labels(spec.cluster_column)?;
    let county = frame.county();
    let year = frame.year();
    let treated = frame.treated();
    let excluded = frame.excluded();

    let mut order: Vec<&str> = Vec::new();
    let mut rows: HashMap<&str, CountyRows> = HashMap::new();
    for i in 0..frame.n_rows() {
        if excluded[i] || (year[i] != pre && year[i] != post) {
            continue;
        }
        let key = county[i].as_str();
        let entry = rows.entry(key).or_insert_with(|| {
            order.push(key);
            CountyRows::default()
        });
        let slot = if year[i] == pre { &mut entry.pre } else { &mut entry.post };
        if slot.is_some() {
            return Err(Error::data_integrity(key, format!("duplicate rows for year {}", year[i])));
        }
        *slot = Some(i);
    }

    let p = covs.len();
    let mut out_county = Vec::with_capacity(order.len());
    let mut out_cluster = Vec::with_capacity(order.len());
    let mut out_treated = Vec::with_capacity(order.len());
    let mut out_x = Vec::with_capacity(order.len());
    let mut out_dy = Vec::with_capacity(order.len());
    let mut dropped = Vec::new();

    for key in order {
        let (Some(a), Some(b)) = (rows[key].pre, rows[key].post) else {
            dropped.push(key.to_string());
            continue;
        };

        if treated[a] != treated[b] {
            return Err(Error::data_integrity(
                key,
                format!("treatment status changes between {pre} and {post}"),
            ));
        }

        let mut x_row = Vec::with_capacity(p);
        let mut missing = !(y[a].is_finite() && y[b].is_finite());
        for (j, col) in covs.iter().enumerate() {
            let (va, vb) = (col[a], col[b]);
            if !(va.is_finite() && vb.is_finite()) {
                missing = true;
                continue;
            }
            let scale = va.abs().max(vb.abs()).max(1.0);
            if (va - vb).abs() > INVARIANCE_TOL * scale {
                return Err(Error::data_integrity(
                    key,
                    format!(
                        "covariate '{}' is not time-invariant ({va} in {pre}, {vb} in {post})",
                        spec.covariates[j]
                    ),
                ));
            }
            x_row.push(va);
        }
        if missing {
            dropped.push(key.to_string());
            continue;
        }

        out_county.push(key.to_string());
        out_cluster.push(cluster[a].clone());
        out_treated.push(treated[a]);
        out_x.push(x_row);
        out_dy.push(y[b] - y[a]);
    }

    tracing::debug!(
        outcome = spec.outcome,
        pre,
        post,
        kept = out_county.len(),
        dropped = dropped.len(),
        "first difference"
    );

    let table = FirstDiffTable {
        county: out_county,
        cluster: out_cluster,
        treated: out_treated,
        covariate_names: spec.covariates.to_vec(),
        x: out_x,
        dy: out_dy,
    };
    Ok(FirstDiffOutcome { table, dropped_counties: dropped })
}
