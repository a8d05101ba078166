//! # tva-inference
//!
//! Difference-in-differences estimation for the TVA county panel.
//!
//! This crate provides:
//! - An immutable, versioned panel table ([`PanelFrame`])
//! - OLS and logit nuisance solvers with constant-covariate handling
//! - Plain, outcome-regression, IPTW and doubly-robust DID
//! - Event study, canonical 2×2 DID and group means
//! - Cluster-robust standard errors and a parallel cluster bootstrap
//!
//! ## Architecture
//!
//! Estimators see fitted nuisance models only through
//! [`tva_core::Predictor`]; the parallel-trends sensitivity routine is an
//! external [`tva_core::SensitivityAnalyzer`].

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Cluster bootstrap and percentile intervals.
pub mod bootstrap;
/// DID estimators, event study and cluster-robust covariance.
pub mod econometrics;
/// Immutable county × year panel.
pub mod frame;
/// Numerically stable helpers.
pub mod math;
/// End-to-end estimation for configured outcomes.
pub mod pipeline;
/// OLS and logit solvers.
pub mod regression;

pub use bootstrap::{BootstrapSummary, cluster_bootstrap, percentile_interval};
pub use econometrics::{
    DoublyRobustResult, EventStudyResult, FirstDiffTable, IptwResult, OutcomeRegressionResult,
    OverlapWarning, PlainDidResult, doubly_robust, event_study, first_difference,
    first_difference_did, iptw, outcome_regression,
};
pub use frame::PanelFrame;
pub use pipeline::{DidPipeline, Estimator, OutcomeReport, PipelineReport};
pub use regression::{LogitFit, OlsFit, fit_logit, fit_ols};
