//! Cluster-robust covariance for linear estimators on county panels.
//!
//! Liang–Zeger (HC0 sandwich) with the usual small-sample correction,
//! optionally accounting for degrees of freedom absorbed by fixed effects.
//!
//! # References
//!
//! - Wooldridge, *Econometric Analysis of Cross Section and Panel Data*, Ch. 10.
//! - Cameron & Miller (2015), "A Practitioner's Guide to Cluster-Robust Inference."

use std::collections::HashMap;

use nalgebra::{DMatrix, DVector};
use tva_core::{Error, Result};

/// Map string cluster labels to dense ids in order of first appearance.
pub fn dense_cluster_ids<S: AsRef<str>>(labels: &[S]) -> Vec<u64> {
    let mut ids: HashMap<&str, u64> = HashMap::new();
    labels
        .iter()
        .map(|l| {
            let next = ids.len() as u64;
            *ids.entry(l.as_ref()).or_insert(next)
        })
        .collect()
}

/// Number of distinct clusters.
pub fn n_clusters(cluster_ids: &[u64]) -> usize {
    let mut v = cluster_ids.to_vec();
    v.sort_unstable();
    v.dedup();
    v.len()
}

/// Cluster-robust covariance `V = c · (X'X)⁻¹ B (X'X)⁻¹`, `B = Σ_g X_g' e_g e_g' X_g`.
///
/// `c = G/(G−1) · (N−1)/(N−K)` with `K = ncols(X) + df_absorbed`; the
/// correction is skipped (c = 1) when `G ≤ 1` or `N ≤ K`.
pub fn cluster_robust_vcov(
    x: &DMatrix<f64>,
    residuals: &DVector<f64>,
    xtx_inv: &DMatrix<f64>,
    cluster_ids: &[u64],
    df_absorbed: usize,
) -> Result<DMatrix<f64>> {
    let n = x.nrows();
    let p = x.ncols();
    if residuals.len() != n || cluster_ids.len() != n {
        return Err(Error::Validation(format!(
            "residuals ({}) and cluster_ids ({}) must have one entry per row ({})",
            residuals.len(),
            cluster_ids.len(),
            n
        )));
    }
    if xtx_inv.nrows() != p || xtx_inv.ncols() != p {
        return Err(Error::Validation("xtx_inv must be p × p".into()));
    }

    // Accumulate one score vector per cluster.
    let mut scores: HashMap<u64, DVector<f64>> = HashMap::new();
    for (i, &cid) in cluster_ids.iter().enumerate() {
        let s = scores.entry(cid).or_insert_with(|| DVector::zeros(p));
        let e_i = residuals[i];
        for j in 0..p {
            s[j] += x[(i, j)] * e_i;
        }
    }
    let g = scores.len() as f64;

    let mut meat = DMatrix::<f64>::zeros(p, p);
    for s in scores.values() {
        meat += s * s.transpose();
    }

    let n_f = n as f64;
    let k_f = (p + df_absorbed) as f64;
    let correction =
        if g > 1.0 && n_f > k_f { (g / (g - 1.0)) * ((n_f - 1.0) / (n_f - k_f)) } else { 1.0 };

    Ok(xtx_inv * meat * xtx_inv * correction)
}

/// Square roots of the diagonal of [`cluster_robust_vcov`].
pub fn cluster_robust_se(
    x: &DMatrix<f64>,
    residuals: &DVector<f64>,
    xtx_inv: &DMatrix<f64>,
    cluster_ids: &[u64],
    df_absorbed: usize,
) -> Result<Vec<f64>> {
    let v = cluster_robust_vcov(x, residuals, xtx_inv, cluster_ids, df_absorbed)?;
    Ok((0..v.nrows()).map(|j| v[(j, j)].max(0.0).sqrt()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dense_cluster_ids_first_appearance() {
        let ids = dense_cluster_ids(&["TN", "AL", "TN", "KY", "AL"]);
        assert_eq!(ids, vec![0, 1, 0, 2, 1]);
        assert_eq!(n_clusters(&ids), 3);
    }

    #[test]
    fn test_vcov_zero_residuals() {
        let x = DMatrix::from_row_slice(4, 2, &[1.0, 0.0, 1.0, 1.0, 1.0, 2.0, 1.0, 3.0]);
        let xtx_inv = (x.transpose() * &x).try_inverse().unwrap();
        let resid = DVector::zeros(4);
        let se = cluster_robust_se(&x, &resid, &xtx_inv, &[1, 1, 2, 2], 0).unwrap();
        assert!(se.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_singleton_clusters_match_hc1() {
        // With one row per cluster the sandwich is HC0 scaled by N/(N-1)·(N-1)/(N-K) = N/(N-K).
        let x = DMatrix::from_row_slice(5, 2, &[1.0, 1.0, 1.0, 2.0, 1.0, 3.0, 1.0, 4.0, 1.0, 5.0]);
        let resid = DVector::from_vec(vec![0.1, -0.2, 0.05, 0.3, -0.25]);
        let xtx_inv = (x.transpose() * &x).try_inverse().unwrap();
        let v = cluster_robust_vcov(&x, &resid, &xtx_inv, &[1, 2, 3, 4, 5], 0).unwrap();

        let mut meat = DMatrix::<f64>::zeros(2, 2);
        for i in 0..5 {
            let xi = x.row(i).transpose();
            meat += &xi * xi.transpose() * (resid[i] * resid[i]);
        }
        let hc1 = &xtx_inv * meat * &xtx_inv * (5.0 / 3.0);
        for a in 0..2 {
            for b in 0..2 {
                assert!((v[(a, b)] - hc1[(a, b)]).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_length_mismatch() {
        let x = DMatrix::from_row_slice(2, 1, &[1.0, 1.0]);
        let xtx_inv = DMatrix::from_row_slice(1, 1, &[0.5]);
        let resid = DVector::zeros(2);
        assert!(cluster_robust_vcov(&x, &resid, &xtx_inv, &[1], 0).is_err());
    }
}
