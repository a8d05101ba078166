//! Common data types for tva-did

use serde::{Deserialize, Serialize};

/// Which inverse-probability weights enter an ATT.
///
/// Horvitz–Thompson weights are used as-is; Hajek weights are divided by
/// their own sample mean so each arm's weights average to one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightNormalization {
    /// Raw `w1`, `w0`.
    HorvitzThompson,
    /// `w1 / mean(w1)`, `w0 / mean(w0)`.
    #[default]
    Hajek,
}

/// A point estimate of the ATT with optional uncertainty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttEstimate {
    /// Point estimate.
    pub att: f64,

    /// Standard error, when an inference procedure was requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub se: Option<f64>,

    /// Confidence interval `(lower, upper)`, when available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ci: Option<(f64, f64)>,
}

impl AttEstimate {
    /// Point estimate without uncertainty.
    pub fn point(att: f64) -> Self {
        Self { att, se: None, ci: None }
    }

    /// Point estimate with a standard error and interval.
    pub fn with_se(att: f64, se: f64, ci: (f64, f64)) -> Self {
        Self { att, se: Some(se), ci: Some(ci) }
    }

    /// `att / se`, if a positive standard error is available.
    pub fn t_stat(&self) -> Option<f64> {
        match self.se {
            Some(se) if se > 0.0 => Some(self.att / se),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_att_estimate() {
        let est = AttEstimate::with_se(0.3, 0.1, (0.1, 0.5));
        assert!((est.t_stat().unwrap() - 3.0).abs() < 1e-12);
        assert!(AttEstimate::point(0.3).t_stat().is_none());
    }

    #[test]
    fn test_weight_normalization_serde() {
        let w: WeightNormalization = serde_json::from_str("\"horvitz_thompson\"").unwrap();
        assert_eq!(w, WeightNormalization::HorvitzThompson);
        assert_eq!(WeightNormalization::default(), WeightNormalization::Hajek);
    }

    #[test]
    fn test_point_estimate_skips_missing_fields() {
        let json = serde_json::to_string(&AttEstimate::point(1.5)).unwrap();
        assert_eq!(json, "{\"att\":1.5}");
    }
}
