//! Small numerically-stable helpers shared by the estimators.

use statrs::distribution::{ContinuousCDF, Normal};
use tva_core::{Error, Result};

/// Stable `log(1 + exp(x))`.
#[inline]
pub fn log1pexp(x: f64) -> f64 {
    x.max(0.0) + (-x.abs()).exp().ln_1p()
}

/// Stable sigmoid: `1 / (1 + exp(-x))`.
#[inline]
pub fn sigmoid(x: f64) -> f64 {
    let e = (-x.abs()).exp();
    let recip = 1.0 / (1.0 + e);
    if x >= 0.0 { recip } else { e * recip }
}

/// Arithmetic mean; `NaN` for an empty slice.
#[inline]
pub fn mean(v: &[f64]) -> f64 {
    if v.is_empty() {
        return f64::NAN;
    }
    v.iter().sum::<f64>() / v.len() as f64
}

/// Mean of the element-wise product `a * b`.
#[inline]
pub fn mean_product(a: &[f64], b: &[f64]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    if a.is_empty() {
        return f64::NAN;
    }
    a.iter().zip(b).map(|(x, y)| x * y).sum::<f64>() / a.len() as f64
}

/// Two-sided standard-normal critical value for `conf_level` (1.96 at 0.95).
pub fn normal_critical_value(conf_level: f64) -> Result<f64> {
    if !(conf_level.is_finite() && conf_level > 0.0 && conf_level < 1.0) {
        return Err(Error::Validation(format!("conf_level must be in (0,1), got {conf_level}")));
    }
    let normal = Normal::new(0.0, 1.0)
        .map_err(|e| Error::Validation(format!("standard normal: {e}")))?;
    Ok(normal.inverse_cdf(0.5 + conf_level / 2.0))
}
