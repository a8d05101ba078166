//! Difference-in-differences on a two-period county panel.
//!
//! This module provides:
//! - **First differencing** of the panel into one row per county.
//! - **Plain DID**, **outcome-regression DID**, **IPTW DID** and
//!   **doubly-robust DID** on the differenced table.
//! - The canonical 2×2 levels DID and an **event study** with county and
//!   year fixed effects, whose estimates feed an external parallel-trends
//!   sensitivity routine.
//! - **Cluster-robust** (Liang–Zeger) covariance shared by the linear fits.

pub mod did;
pub mod doubly_robust;
pub mod first_difference;
pub mod hdfe;
pub mod ipw;
pub mod outcome_regression;
pub mod panel;
pub mod sensitivity;

pub use did::{
    DidResult, EventStudyResult, GroupMean, PlainDidResult, did_canonical, event_study,
    first_difference_did, group_means,
};
pub use doubly_robust::{
    DoublyRobustResult, doubly_robust, doubly_robust_from_parts, dr_att_means_form,
    dr_att_residual_form, means_scale,
};
pub use first_difference::{DiffSpec, FirstDiffOutcome, FirstDiffTable, first_difference};
pub use hdfe::FixedEffectsSolver;
pub use ipw::{
    CovariateBalance, IptwResult, IptwWeights, OverlapDiagnostics, OverlapWarning,
    fit_propensity, iptw, iptw_with_propensity,
};
pub use outcome_regression::{OutcomeRegressionResult, fit_outcome_model, outcome_regression};
pub use panel::{cluster_robust_se, cluster_robust_vcov, dense_cluster_ids};
pub use sensitivity::{SensitivityReport, run_sensitivity};
