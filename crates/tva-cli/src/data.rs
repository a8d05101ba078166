//! Panel CSV and YAML config loading.

use anyhow::{Context, Result};
use std::path::Path;
use tva_core::DidConfig;
use tva_inference::PanelFrame;

/// Read and validate a YAML (or JSON) estimation config.
pub fn read_config(path: &Path) -> Result<DidConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config: DidConfig = serde_yaml_ng::from_str(&raw)
        .with_context(|| format!("failed to parse config YAML {}", path.display()))?;
    config.validate().with_context(|| format!("invalid config {}", path.display()))?;
    Ok(config)
}

fn is_missing(s: &str) -> bool {
    let s = s.trim();
    s.is_empty() || s == "." || s.eq_ignore_ascii_case("na") || s.eq_ignore_ascii_case("nan")
}

fn parse_number(s: &str) -> Option<f64> {
    if is_missing(s) { Some(f64::NAN) } else { s.trim().parse::<f64>().ok() }
}

fn parse_year(s: &str) -> Option<i64> {
    let v: f64 = s.trim().parse().ok()?;
    (v.is_finite() && v.fract() == 0.0).then_some(v as i64)
}

fn parse_treatment(s: &str) -> Option<u8> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "1.0" | "true" => Some(1),
        "0" | "0.0" | "false" => Some(0),
        _ => None,
    }
}

fn parse_flag(s: &str) -> Option<bool> {
    if s.trim().is_empty() {
        return Some(false);
    }
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "1.0" | "true" | "yes" | "y" => Some(true),
        "0" | "0.0" | "false" | "no" | "n" => Some(false),
        _ => None,
    }
}

/// Load a county × year panel from a delimited file.
///
/// Key columns come from `config.columns`. Every other column becomes a
/// numeric column if all its non-missing values parse as numbers, and a
/// label column otherwise. The cluster column is always kept as labels.
pub fn read_panel(path: &Path, config: &DidConfig, delimiter: u8) -> Result<PanelFrame> {
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;

    let headers: Vec<String> = rdr
        .headers()
        .context("failed to read CSV headers")?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();
    let n_cols = headers.len();
    let mut columns: Vec<Vec<String>> = vec![Vec::new(); n_cols];
    for (line, result) in rdr.records().enumerate() {
        let record = result.with_context(|| format!("failed to read CSV row {}", line + 2))?;
        for (j, col) in columns.iter_mut().enumerate() {
            col.push(record.get(j).unwrap_or("").to_string());
        }
    }
    let n_rows = columns.first().map_or(0, Vec::len);
    if n_rows == 0 {
        anyhow::bail!("{} contains no data rows", path.display());
    }

    let index = |name: &str| -> Result<usize> {
        headers
            .iter()
            .position(|h| h == name)
            .with_context(|| format!("column '{name}' not found in {}", path.display()))
    };
    let cols = &config.columns;
    let county_j = index(&cols.county)?;
    let year_j = index(&cols.year)?;
    let treat_j = index(&cols.treatment)?;
    let flag_j = cols.exclude_flag.as_deref().map(index).transpose()?;
    let cluster_j = config.cluster_column.as_deref().map(index).transpose()?;

    let year = columns[year_j]
        .iter()
        .enumerate()
        .map(|(i, s)| {
            parse_year(s).with_context(|| format!("row {}: invalid year '{s}'", i + 2))
        })
        .collect::<Result<Vec<_>>>()?;
    let treated = columns[treat_j]
        .iter()
        .enumerate()
        .map(|(i, s)| {
            parse_treatment(s)
                .with_context(|| format!("row {}: invalid {} value '{s}'", i + 2, cols.treatment))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut frame = PanelFrame::new(columns[county_j].clone(), year, treated)?;

    if let Some(j) = flag_j {
        let flags = columns[j]
            .iter()
            .enumerate()
            .map(|(i, s)| {
                parse_flag(s).with_context(|| format!("row {}: invalid flag value '{s}'", i + 2))
            })
            .collect::<Result<Vec<_>>>()?;
        frame = frame.with_exclusions(flags)?;
    }

    for (j, name) in headers.iter().enumerate() {
        if j == county_j || j == year_j || j == treat_j || Some(j) == flag_j {
            continue;
        }
        if Some(j) == cluster_j {
            frame = frame.with_label_column(name.clone(), columns[j].clone())?;
            continue;
        }
        let parsed: Option<Vec<f64>> = columns[j].iter().map(|s| parse_number(s)).collect();
        frame = match parsed {
            Some(values) => frame.with_column(name.clone(), values)?,
            None => frame.with_label_column(name.clone(), columns[j].clone())?,
        };
    }

    tracing::info!(
        path = %path.display(),
        rows = frame.n_rows(),
        counties = frame.n_counties(),
        "panel loaded"
    );
    Ok(frame)
}
