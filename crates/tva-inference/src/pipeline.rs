//! End-to-end DID estimation for every configured outcome.
//!
//! For each outcome: first difference → plain DID → outcome regression →
//! IPTW → doubly robust, plus an optional cluster bootstrap. An estimator
//! failure aborts the run; no estimate is ever replaced by a default.

use serde::Serialize;
use tva_core::{AttEstimate, DidConfig, Predictor, Result, WeightNormalization};

use crate::bootstrap::{BootstrapSummary, cluster_bootstrap};
use crate::econometrics::did::{PlainDidResult, first_difference_did};
use crate::econometrics::doubly_robust::{
    DoublyRobustResult, doubly_robust, doubly_robust_from_parts,
};
use crate::econometrics::first_difference::{
    DiffSpec, FirstDiffOutcome, FirstDiffTable, first_difference,
};
use crate::econometrics::ipw::{IptwWeights, OverlapWarning, fit_propensity};
use crate::econometrics::outcome_regression::{fit_outcome_model, outcome_regression};
use crate::frame::PanelFrame;

/// Estimator label in a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Estimator {
    /// Unconditional first-difference DID.
    Plain,
    /// Outcome-regression DID.
    OutcomeRegression,
    /// IPTW DID with Hajek weights.
    IptwHajek,
    /// IPTW DID with Horvitz–Thompson weights.
    IptwHorvitzThompson,
    /// Doubly-robust DID.
    DoublyRobust,
}

/// One estimator's ATT.
#[derive(Debug, Clone, Serialize)]
pub struct EstimateRow {
    /// Which estimator.
    pub estimator: Estimator,
    /// ATT with SE/CI where available.
    #[serde(flatten)]
    pub estimate: AttEstimate,
}

/// Bootstrap summaries for the covariate-adjusted estimators.
#[derive(Debug, Clone, Serialize)]
pub struct OutcomeBootstrap {
    /// Outcome regression.
    pub outcome_regression: BootstrapSummary,
    /// IPTW under the configured normalization.
    pub iptw: BootstrapSummary,
    /// Doubly robust.
    pub doubly_robust: BootstrapSummary,
}

/// Everything estimated for one outcome.
#[derive(Debug, Clone, Serialize)]
pub struct OutcomeReport {
    /// Outcome column.
    pub outcome: String,
    /// Counties in the differenced table.
    pub n_counties: usize,
    /// Treated counties.
    pub n_treated: usize,
    /// Untreated counties.
    pub n_control: usize,
    /// Counties dropped for a missing period, covariate or outcome.
    pub n_dropped: usize,
    /// Their ids.
    pub dropped_counties: Vec<String>,
    /// Summary table, one row per estimator.
    pub estimates: Vec<EstimateRow>,
    /// Plain DID details.
    pub plain: PlainDidResult,
    /// DR details, including its outcome-regression and IPTW components.
    pub doubly_robust: DoublyRobustResult,
    /// Overlap warning from the propensity model, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overlap_warning: Option<OverlapWarning>,
    /// Bootstrap summaries, when requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bootstrap: Option<OutcomeBootstrap>,
}

impl OutcomeReport {
    /// ATT row for `estimator`.
    pub fn estimate(&self, estimator: Estimator) -> Option<&AttEstimate> {
        self.estimates.iter().find(|r| r.estimator == estimator).map(|r| &r.estimate)
    }
}

/// Result of [`DidPipeline::run`].
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    /// Pre period.
    pub pre: i64,
    /// Post period.
    pub post: i64,
    /// Covariates used by the adjusted estimators.
    pub covariates: Vec<String>,
    /// Weight normalization for IPTW and DR.
    pub weight_normalization: WeightNormalization,
    /// Version of the panel the estimators ran on.
    pub frame_version: usize,
    /// Transforms applied to that panel.
    pub lineage: Vec<String>,
    /// One report per outcome, in configured order.
    pub outcomes: Vec<OutcomeReport>,
}

/// Configured DID run.
#[derive(Debug, Clone)]
pub struct DidPipeline {
    config: DidConfig,
}

impl DidPipeline {
    /// Validate `config` and build a pipeline.
    pub fn new(config: DidConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Configuration in use.
    pub fn config(&self) -> &DidConfig {
        &self.config
    }

    /// The estimation sample: flagged rows dropped, restricted to pre/post.
    pub fn prepare(&self, frame: &PanelFrame) -> PanelFrame {
        let p = self.config.period_columns;
        frame.drop_excluded().restrict_years(&[p.pre, p.post])
    }

    /// First-differenced table for `outcome`.
    pub fn difference(&self, frame: &PanelFrame, outcome: &str) -> Result<FirstDiffOutcome> {
        let spec = DiffSpec {
            outcome,
            covariates: &self.config.covariate_columns,
            periods: self.config.period_columns,
            cluster_column: self.config.cluster_column.as_deref(),
        };
        first_difference(frame, &spec)
    }

    /// Run every estimator for every configured outcome.
    pub fn run(&self, frame: &PanelFrame) -> Result<PipelineReport> {
        let sample = self.prepare(frame);
        let outcomes = self
            .config
            .outcomes
            .iter()
            .map(|o| self.run_outcome(&sample, o))
            .collect::<Result<Vec<_>>>()?;
        Ok(PipelineReport {
            pre: self.config.period_columns.pre,
            post: self.config.period_columns.post,
            covariates: self.config.covariate_columns.clone(),
            weight_normalization: self.config.weight_normalization,
            frame_version: sample.version(),
            lineage: sample.lineage().to_vec(),
            outcomes,
        })
    }

    /// Run every estimator for one outcome.
    pub fn run_outcome(&self, frame: &PanelFrame, outcome: &str) -> Result<OutcomeReport> {
        let cfg = &self.config;
        let diff = self.difference(frame, outcome)?;
        let table = &diff.table;
        tracing::info!(
            outcome,
            counties = table.len(),
            treated = table.n_treated(),
            dropped = diff.n_dropped(),
            "estimating"
        );

        let plain = first_difference_did(table, cfg.confidence_level)?;
        tracing::debug!(
            outcome,
            att = plain.estimate.att,
            t_stat = ?plain.estimate.t_stat(),
            "plain DID"
        );
        let dr = doubly_robust(table, cfg.overlap_threshold, cfg.weight_normalization)?;

        let bootstrap = if cfg.bootstrap.replicates > 0 {
            Some(self.bootstrap(table)?)
        } else {
            None
        };

        let boot = bootstrap.as_ref();
        let ipw = &dr.iptw;
        let iptw_boot = |norm: WeightNormalization| {
            boot.filter(|_| norm == cfg.weight_normalization).map(|b| &b.iptw)
        };
        let estimates = vec![
            EstimateRow { estimator: Estimator::Plain, estimate: plain.estimate.clone() },
            EstimateRow {
                estimator: Estimator::OutcomeRegression,
                estimate: with_bootstrap(
                    dr.outcome_regression.att,
                    boot.map(|b| &b.outcome_regression),
                ),
            },
            EstimateRow {
                estimator: Estimator::IptwHajek,
                estimate: with_bootstrap(ipw.att_hajek, iptw_boot(WeightNormalization::Hajek)),
            },
            EstimateRow {
                estimator: Estimator::IptwHorvitzThompson,
                estimate: with_bootstrap(
                    ipw.att_horvitz_thompson,
                    iptw_boot(WeightNormalization::HorvitzThompson),
                ),
            },
            EstimateRow {
                estimator: Estimator::DoublyRobust,
                estimate: with_bootstrap(dr.att, boot.map(|b| &b.doubly_robust)),
            },
        ];

        Ok(OutcomeReport {
            outcome: outcome.to_string(),
            n_counties: table.len(),
            n_treated: table.n_treated(),
            n_control: table.n_control(),
            n_dropped: diff.n_dropped(),
            dropped_counties: diff.dropped_counties.clone(),
            estimates,
            plain,
            overlap_warning: dr.iptw.overlap_warning.clone(),
            doubly_robust: dr,
            bootstrap,
        })
    }

    fn bootstrap(&self, table: &FirstDiffTable) -> Result<OutcomeBootstrap> {
        let cfg = &self.config;
        let norm = cfg.weight_normalization;
        let level = cfg.confidence_level;
        Ok(OutcomeBootstrap {
            outcome_regression: cluster_bootstrap(table, &cfg.bootstrap, level, |t| {
                Ok(outcome_regression(t)?.att)
            })?,
            iptw: cluster_bootstrap(table, &cfg.bootstrap, level, |t| iptw_att(t, norm))?,
            doubly_robust: cluster_bootstrap(table, &cfg.bootstrap, level, |t| dr_att(t, norm))?,
        })
    }
}

fn with_bootstrap(att: f64, summary: Option<&BootstrapSummary>) -> AttEstimate {
    match summary {
        Some(s) => AttEstimate::with_se(att, s.se, s.ci),
        None => AttEstimate::point(att),
    }
}

/// IPTW point estimate without diagnostics, for resampling.
fn iptw_att(table: &FirstDiffTable, norm: WeightNormalization) -> Result<f64> {
    let propensity = fit_propensity(table)?.predict(&table.x)?;
    let weights = IptwWeights::from_propensity(&table.treated, &propensity)?;
    Ok(weights.contrast(&table.dy, norm))
}

/// DR point estimate without diagnostics, for resampling.
fn dr_att(table: &FirstDiffTable, norm: WeightNormalization) -> Result<f64> {
    let predictions = fit_outcome_model(table)?.predict(&table.x)?;
    let propensity = fit_propensity(table)?.predict(&table.x)?;
    let weights = IptwWeights::from_propensity(&table.treated, &propensity)?;
    Ok(doubly_robust_from_parts(&weights, &table.dy, &predictions, norm)?.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tva_core::{BootstrapConfig, Error, PeriodColumns};

    fn frame() -> PanelFrame {
        // A, C treated; B, D, E untreated; F lacks 1960; G flagged.
        let county = ["A", "A", "B", "B", "C", "C", "D", "D", "E", "E", "F", "G", "G"];
        let year = [1940, 1960, 1940, 1960, 1940, 1960, 1940, 1960, 1940, 1960, 1940, 1940, 1960];
        let treated = [1, 1, 0, 0, 1, 1, 0, 0, 0, 0, 0, 1, 1];
        let y = [1.0, 1.5, 2.0, 2.2, 0.5, 1.1, 1.0, 1.1, 3.0, 3.3, 1.0, 0.0, 9.0];
        let flag = [false, false, false, false, false, false, false, false, false, false, false, true, true];
        PanelFrame::new(county.iter().map(|s| s.to_string()).collect(), year.to_vec(), treated.to_vec())
            .unwrap()
            .with_column("y", y.to_vec())
            .unwrap()
            .with_exclusions(flag.to_vec())
            .unwrap()
    }

    fn config() -> DidConfig {
        DidConfig {
            outcomes: vec!["y".into()],
            covariate_columns: vec![],
            period_columns: PeriodColumns { pre: 1940, post: 1960 },
            ..DidConfig::tva_default()
        }
    }

    #[test]
    fn test_pipeline_without_covariates_collapses_to_plain() {
        let report = DidPipeline::new(config()).unwrap().run(&frame()).unwrap();
        assert_eq!(report.outcomes.len(), 1);
        let out = &report.outcomes[0];
        assert_eq!(out.n_counties, 5);
        assert_eq!(out.dropped_counties, vec!["F"]);
        // Treated Δy: 0.5, 0.6; untreated: 0.2, 0.1, 0.3.
        let plain_row = out.estimate(Estimator::Plain).unwrap();
        let plain = plain_row.att;
        assert!((plain - 0.35).abs() < 1e-10, "{plain}");
        assert!(plain_row.t_stat().unwrap() > 0.0);
        for e in [
            Estimator::OutcomeRegression,
            Estimator::IptwHajek,
            Estimator::IptwHorvitzThompson,
            Estimator::DoublyRobust,
        ] {
            let att = out.estimate(e).unwrap().att;
            assert!((att - plain).abs() < 1e-8, "{e:?}: {att}");
        }
        assert!(report.lineage.iter().any(|s| s.starts_with("drop_excluded")));
        assert!(out.bootstrap.is_none());
    }

    #[test]
    fn test_pipeline_bootstrap_attaches_se() {
        let mut cfg = config();
        cfg.bootstrap = BootstrapConfig { replicates: 40, seed: 5 };
        let report = DidPipeline::new(cfg).unwrap().run(&frame()).unwrap();
        let out = &report.outcomes[0];
        let boot = out.bootstrap.as_ref().unwrap();
        assert_eq!(boot.doubly_robust.replicates, 40);
        assert!(out.estimate(Estimator::DoublyRobust).unwrap().se.is_some());
        assert!(out.estimate(Estimator::IptwHorvitzThompson).unwrap().se.is_none());
    }

    #[test]
    fn test_pipeline_unknown_outcome_fails() {
        let mut cfg = config();
        cfg.outcomes = vec!["ln_missing".into()];
        let err = DidPipeline::new(cfg).unwrap().run(&frame()).unwrap_err();
        assert!(matches!(err, Error::Validation(_)), "{err}");
    }

    #[test]
    fn test_pipeline_rejects_invalid_config() {
        let mut cfg = config();
        cfg.period_columns.post = 1940;
        assert!(DidPipeline::new(cfg).is_err());
    }
}
