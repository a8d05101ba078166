//! Cluster bootstrap for the first-difference estimators.
//!
//! Clusters are resampled with replacement and the full estimator, nuisance
//! fits included, is re-run on each draw. Replicates run in parallel with
//! Rayon; replicate `b` uses its own `StdRng` seeded with `seed + b`, so the
//! result depends only on the seed, not on the thread count.

use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::Serialize;
use tva_core::{BootstrapConfig, Error, Result};

use crate::econometrics::first_difference::FirstDiffTable;

/// Quantile for sorted data via linear interpolation.
///
/// - `q=0` returns min
/// - `q=1` returns max
/// - empty input returns `NaN`
pub fn quantile_linear_sorted(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    if sorted.len() == 1 {
        return sorted[0];
    }

    let q = q.clamp(0.0, 1.0);
    let pos = q * (sorted.len() - 1) as f64;
    let i = pos.floor() as usize;
    let j = pos.ceil() as usize;
    if i == j {
        return sorted[i];
    }
    let t = pos - i as f64;
    (1.0 - t) * sorted[i] + t * sorted[j]
}

/// Quantile via sorting + linear interpolation.
pub fn quantile_linear(data: &[f64], q: f64) -> f64 {
    let mut v = data.to_vec();
    v.sort_by(f64::total_cmp);
    quantile_linear_sorted(&v, q)
}

/// Percentile bootstrap interval.
pub fn percentile_interval(samples: &[f64], conf_level: f64) -> Result<(f64, f64)> {
    if samples.len() < 2 {
        return Err(Error::Validation("percentile_interval requires at least 2 samples".into()));
    }
    if !(conf_level.is_finite() && conf_level > 0.0 && conf_level < 1.0) {
        return Err(Error::Validation(format!("conf_level must be in (0,1), got {conf_level}")));
    }

    let mut v = samples.to_vec();
    v.sort_by(f64::total_cmp);
    let alpha = (1.0 - conf_level) / 2.0;
    Ok((quantile_linear_sorted(&v, alpha), quantile_linear_sorted(&v, 1.0 - alpha)))
}

/// Summary of a cluster bootstrap.
#[derive(Debug, Clone, Serialize)]
pub struct BootstrapSummary {
    /// Replicates requested.
    pub replicates: usize,
    /// Replicates whose estimator succeeded with a finite value.
    pub n_succeeded: usize,
    /// Replicates skipped because the estimator failed.
    pub n_failed: usize,
    /// Standard deviation of the successful replicates.
    pub se: f64,
    /// Percentile interval.
    pub ci: (f64, f64),
    /// Confidence level of `ci`.
    pub conf_level: f64,
    /// Base seed.
    pub seed: u64,
    /// Successful replicate estimates, in replicate order.
    #[serde(skip)]
    pub draws: Vec<f64>,
}

/// Rows of `table` grouped by cluster, clusters in first-appearance order.
fn cluster_rows(table: &FirstDiffTable) -> Vec<Vec<usize>> {
    let mut groups: Vec<Vec<usize>> = Vec::new();
    for (row, id) in table.cluster_ids().into_iter().enumerate() {
        let id = id as usize;
        if id == groups.len() {
            groups.push(Vec::new());
        }
        groups[id].push(row);
    }
    groups
}

/// One resampled table: `G` clusters drawn with replacement.
fn resample(table: &FirstDiffTable, groups: &[Vec<usize>], seed: u64) -> FirstDiffTable {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    let mut rows = Vec::with_capacity(table.len());
    for _ in 0..groups.len() {
        rows.extend_from_slice(&groups[rng.random_range(0..groups.len())]);
    }
    table.subset(&rows)
}

/// Cluster bootstrap of `estimator` on `table`.
///
/// A replicate whose estimator errors (e.g. a draw with no untreated
/// county) or returns a non-finite value is skipped and counted. Fewer than
/// two successful replicates is an [`Error::Estimation`].
pub fn cluster_bootstrap<F>(
    table: &FirstDiffTable,
    config: &BootstrapConfig,
    conf_level: f64,
    estimator: F,
) -> Result<BootstrapSummary>
where
    F: Fn(&FirstDiffTable) -> Result<f64> + Sync,
{
    if config.replicates < 2 {
        return Err(Error::Validation(format!(
            "bootstrap needs at least 2 replicates, got {}",
            config.replicates
        )));
    }
    if table.is_empty() {
        return Err(Error::Estimation("bootstrap on an empty table".into()));
    }
    let groups = cluster_rows(table);
    let seed = config.seed;

    let results: Vec<Option<f64>> = (0..config.replicates)
        .into_par_iter()
        .map(|b| {
            let draw = resample(table, &groups, seed.wrapping_add(b as u64));
            match estimator(&draw) {
                Ok(v) if v.is_finite() => Some(v),
                Ok(_) => None,
                Err(e) => {
                    tracing::trace!(replicate = b, error = %e, "bootstrap replicate failed");
                    None
                }
            }
        })
        .collect();

    let draws: Vec<f64> = results.into_iter().flatten().collect();
    let n_failed = config.replicates - draws.len();
    if draws.len() < 2 {
        return Err(Error::Estimation(format!(
            "bootstrap: only {} of {} replicates succeeded ({} clusters)",
            draws.len(),
            config.replicates,
            groups.len()
        )));
    }
    if n_failed > 0 {
        tracing::debug!(n_failed, replicates = config.replicates, "bootstrap replicates skipped");
    }

    let m = draws.iter().sum::<f64>() / draws.len() as f64;
    let var = draws.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / (draws.len() - 1) as f64;
    let ci = percentile_interval(&draws, conf_level)?;

    Ok(BootstrapSummary {
        replicates: config.replicates,
        n_succeeded: draws.len(),
        n_failed,
        se: var.sqrt(),
        ci,
        conf_level,
        seed,
        draws,
    })
}
