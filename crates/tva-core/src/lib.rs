//! # tva-core
//!
//! Shared error type, configuration and boundary traits for the tva-did
//! workspace.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Estimation configuration (YAML/JSON via serde).
pub mod config;
/// Error type and result alias.
pub mod error;
/// Boundary traits: fitted predictors and external sensitivity routines.
pub mod traits;
/// Shared result types.
pub mod types;

pub use config::{BootstrapConfig, ColumnMapping, DidConfig, PeriodColumns};
pub use error::{Error, Result};
pub use traits::{Predictor, SensitivityAnalyzer, SensitivityInput};
pub use types::{AttEstimate, WeightNormalization};
