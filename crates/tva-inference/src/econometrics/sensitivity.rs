//! Boundary to an external parallel-trends sensitivity routine.
//!
//! The bias-bound search itself lives outside this crate. Here inputs are
//! checked before the call and outputs after it.

use serde::Serialize;
use tva_core::{Error, Result, SensitivityAnalyzer, SensitivityInput};

/// CI width per bound magnitude, as returned by a [`SensitivityAnalyzer`].
#[derive(Debug, Clone, Serialize)]
pub struct SensitivityReport {
    /// Analyzer name.
    pub analyzer: String,
    /// Bound magnitudes, in request order.
    pub bounds: Vec<f64>,
    /// CI width for each bound.
    pub ci_widths: Vec<f64>,
    /// Pre-periods in the input.
    pub num_pre_periods: usize,
    /// Post-periods in the input.
    pub num_post_periods: usize,
}

/// Run `analyzer` on `input` for each bound in `bounds`.
pub fn run_sensitivity(
    analyzer: &dyn SensitivityAnalyzer,
    input: &SensitivityInput,
    bounds: &[f64],
) -> Result<SensitivityReport> {
    input.validate()?;
    if bounds.is_empty() {
        return Err(Error::Validation("at least one bound is required".into()));
    }
    if let Some(b) = bounds.iter().find(|b| !(b.is_finite() && **b >= 0.0)) {
        return Err(Error::Validation(format!("bounds must be finite and >= 0, got {b}")));
    }

    let widths = analyzer.ci_widths(input, bounds)?;
    if widths.len() != bounds.len() {
        return Err(Error::Validation(format!(
            "{} returned {} widths for {} bounds",
            analyzer.name(),
            widths.len(),
            bounds.len()
        )));
    }
    if let Some(w) = widths.iter().find(|w| !(w.is_finite() && **w >= 0.0)) {
        return Err(Error::Validation(format!(
            "{} returned an invalid width {w}",
            analyzer.name()
        )));
    }
    tracing::debug!(analyzer = analyzer.name(), n_bounds = bounds.len(), "sensitivity");

    Ok(SensitivityReport {
        analyzer: analyzer.name().to_string(),
        bounds: bounds.to_vec(),
        ci_widths: widths,
        num_pre_periods: input.num_pre_periods,
        num_post_periods: input.num_post_periods,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Width of a normal CI on the first post coefficient, widened by the bound.
    struct Widen;

    impl SensitivityAnalyzer for Widen {
        fn name(&self) -> &str {
            "widen"
        }

        fn ci_widths(&self, input: &SensitivityInput, bounds: &[f64]) -> Result<Vec<f64>> {
            let k = input.betahat.len();
            let j = input.num_pre_periods;
            let se = input.sigma[j * k + j].sqrt();
            Ok(bounds.iter().map(|m| 2.0 * 1.96 * se + 2.0 * m).collect())
        }
    }

    struct Short;

    impl SensitivityAnalyzer for Short {
        fn name(&self) -> &str {
            "short"
        }

        fn ci_widths(&self, _input: &SensitivityInput, _bounds: &[f64]) -> Result<Vec<f64>> {
            Ok(vec![1.0])
        }
    }

    fn input() -> SensitivityInput {
        SensitivityInput {
            betahat: vec![0.01, 0.4],
            sigma: vec![0.01, 0.0, 0.0, 0.04],
            num_pre_periods: 1,
            num_post_periods: 1,
        }
    }

    #[test]
    fn test_widths_in_bound_order() {
        let r = run_sensitivity(&Widen, &input(), &[0.0, 0.5, 1.0]).unwrap();
        assert_eq!(r.ci_widths.len(), 3);
        assert!((r.ci_widths[0] - 0.784).abs() < 1e-12);
        assert!(r.ci_widths.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(r.analyzer, "widen");
    }

    #[test]
    fn test_boundary_checks() {
        assert!(run_sensitivity(&Widen, &input(), &[]).is_err());
        assert!(run_sensitivity(&Widen, &input(), &[-1.0]).is_err());
        assert!(run_sensitivity(&Short, &input(), &[0.0, 1.0]).is_err());
        let mut bad = input();
        bad.num_post_periods = 0;
        bad.num_pre_periods = 2;
        assert!(run_sensitivity(&Widen, &bad, &[0.0]).is_err());
    }
}
