//! Estimation configuration.
//!
//! Replaces formula strings with an explicit, typed list of columns. Loaded
//! from YAML by `tvadid` (see `tvadid estimate --config`).

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::types::WeightNormalization;
use crate::{Error, Result};

/// Maps the roles the pipeline needs to source column names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMapping {
    /// County identifier column.
    #[serde(default = "default_county_col")]
    pub county: String,

    /// Census year column (integer).
    #[serde(default = "default_year_col")]
    pub year: String,

    /// Treatment indicator column (0/1).
    #[serde(default = "default_treatment_col")]
    pub treatment: String,

    /// Data-quality flag: rows where this column is truthy are excluded.
    #[serde(default)]
    pub exclude_flag: Option<String>,
}

fn default_county_col() -> String {
    "county_code".to_string()
}

fn default_year_col() -> String {
    "year".to_string()
}

fn default_treatment_col() -> String {
    "tva".to_string()
}

impl Default for ColumnMapping {
    fn default() -> Self {
        Self {
            county: default_county_col(),
            year: default_year_col(),
            treatment: default_treatment_col(),
            exclude_flag: None,
        }
    }
}

/// The two period labels that define a first difference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodColumns {
    /// Pre-treatment year.
    pub pre: i64,
    /// Post-treatment year.
    pub post: i64,
}

/// Cluster bootstrap settings. `replicates == 0` disables the bootstrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapConfig {
    /// Number of bootstrap replicates.
    #[serde(default)]
    pub replicates: usize,
    /// Base seed; replicate `b` uses `seed + b`.
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_seed() -> u64 {
    42
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self { replicates: 0, seed: default_seed() }
    }
}

/// Full configuration for a DID pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DidConfig {
    /// Source column names.
    #[serde(default)]
    pub columns: ColumnMapping,

    /// Outcome columns; one report is produced per outcome.
    pub outcomes: Vec<String>,

    /// Predictors entering the outcome and propensity regressions.
    #[serde(default)]
    pub covariate_columns: Vec<String>,

    /// Grouping key for clustered inference. `None` clusters by county.
    #[serde(default)]
    pub cluster_column: Option<String>,

    /// Pre/post years for first differencing.
    pub period_columns: PeriodColumns,

    /// Untreated propensity above which an overlap warning is raised.
    #[serde(default = "default_overlap_threshold")]
    pub overlap_threshold: f64,

    /// Weights used for the reported IPTW and DR estimates.
    #[serde(default)]
    pub weight_normalization: WeightNormalization,

    /// Two-sided confidence level for intervals.
    #[serde(default = "default_confidence_level")]
    pub confidence_level: f64,

    /// Optional cluster bootstrap.
    #[serde(default)]
    pub bootstrap: BootstrapConfig,
}

fn default_overlap_threshold() -> f64 {
    0.99
}

fn default_confidence_level() -> f64 {
    0.95
}

impl DidConfig {
    /// The TVA study layout: both log employment-share outcomes, the four
    /// 1920/1930 share covariates, 1940 → 1960.
    pub fn tva_default() -> Self {
        Self {
            columns: ColumnMapping::default(),
            outcomes: vec!["ln_agriculture".to_string(), "ln_manufacturing".to_string()],
            covariate_columns: vec![
                "agriculture_share_1920".to_string(),
                "agriculture_share_1930".to_string(),
                "manufacturing_share_1920".to_string(),
                "manufacturing_share_1930".to_string(),
            ],
            cluster_column: None,
            period_columns: PeriodColumns { pre: 1940, post: 1960 },
            overlap_threshold: default_overlap_threshold(),
            weight_normalization: WeightNormalization::default(),
            confidence_level: default_confidence_level(),
            bootstrap: BootstrapConfig::default(),
        }
    }

    /// Reject configurations the pipeline cannot run.
    pub fn validate(&self) -> Result<()> {
        if self.outcomes.is_empty() {
            return Err(Error::Validation("outcomes must be non-empty".into()));
        }
        if let Some(dup) = first_duplicate(&self.outcomes) {
            return Err(Error::Validation(format!("duplicate outcome column: {dup}")));
        }
        if let Some(dup) = first_duplicate(&self.covariate_columns) {
            return Err(Error::Validation(format!("duplicate covariate column: {dup}")));
        }
        for c in &self.covariate_columns {
            if self.outcomes.contains(c) {
                return Err(Error::Validation(format!(
                    "column '{c}' is listed as both outcome and covariate"
                )));
            }
        }
        if self.period_columns.pre == self.period_columns.post {
            return Err(Error::Validation(format!(
                "period_columns.pre and period_columns.post must differ (both {})",
                self.period_columns.pre
            )));
        }
        if !(self.overlap_threshold > 0.0 && self.overlap_threshold < 1.0) {
            return Err(Error::Validation(format!(
                "overlap_threshold must be in (0,1), got {}",
                self.overlap_threshold
            )));
        }
        if !(self.confidence_level > 0.0 && self.confidence_level < 1.0) {
            return Err(Error::Validation(format!(
                "confidence_level must be in (0,1), got {}",
                self.confidence_level
            )));
        }
        if self.bootstrap.replicates == 1 {
            return Err(Error::Validation("bootstrap.replicates must be 0 or >= 2".into()));
        }
        Ok(())
    }
}

fn first_duplicate(names: &[String]) -> Option<&str> {
    let mut seen = HashSet::new();
    names.iter().find(|n| !seen.insert(n.as_str())).map(|s| s.as_str())
}
