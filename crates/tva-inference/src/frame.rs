//! Immutable county × year panel table.
//!
//! A [`PanelFrame`] is never mutated after construction: every transform
//! returns a new frame and appends a step to its lineage, so each pipeline
//! stage can report exactly which table version it ran on.

use std::collections::{BTreeMap, BTreeSet};

use tva_core::{Error, Result};

/// Columnar panel: one row per (county, year) observation.
#[derive(Debug, Clone)]
pub struct PanelFrame {
    county: Vec<String>,
    year: Vec<i64>,
    treated: Vec<u8>,
    /// Real-valued columns; missing values are `NaN`.
    numeric: BTreeMap<String, Vec<f64>>,
    /// String-valued columns (e.g. a state used for clustering).
    labels: BTreeMap<String, Vec<String>>,
    /// Rows flagged by the upstream data-quality filter.
    excluded: Vec<bool>,
    lineage: Vec<String>,
}

impl PanelFrame {
    /// Create a frame from its key columns. `treated` must be 0/1.
    pub fn new(county: Vec<String>, year: Vec<i64>, treated: Vec<u8>) -> Result<Self> {
        let n = county.len();
        if year.len() != n || treated.len() != n {
            return Err(Error::Validation(format!(
                "county ({}), year ({}) and treated ({}) must have the same length",
                n,
                year.len(),
                treated.len()
            )));
        }
        if let Some(i) = treated.iter().position(|&d| d > 1) {
            return Err(Error::Validation(format!(
                "treatment indicator must be 0 or 1 (row {i}, county {})",
                county[i]
            )));
        }
        Ok(Self {
            county,
            year,
            treated,
            numeric: BTreeMap::new(),
            labels: BTreeMap::new(),
            excluded: vec![false; n],
            lineage: vec![format!("load(rows={n})")],
        })
    }

    /// New frame with an added (or replaced) numeric column.
    pub fn with_column(mut self, name: impl Into<String>, values: Vec<f64>) -> Result<Self> {
        let name = name.into();
        self.check_len(&name, values.len())?;
        self.lineage.push(format!("with_column({name})"));
        self.numeric.insert(name, values);
        Ok(self)
    }

    /// New frame with an added (or replaced) label column.
    pub fn with_label_column(mut self, name: impl Into<String>, values: Vec<String>) -> Result<Self> {
        let name = name.into();
        self.check_len(&name, values.len())?;
        self.lineage.push(format!("with_label_column({name})"));
        self.labels.insert(name, values);
        Ok(self)
    }

    /// New frame with rows flagged by the data-quality filter.
    pub fn with_exclusions(mut self, flags: Vec<bool>) -> Result<Self> {
        self.check_len("exclusion flag", flags.len())?;
        let k = flags.iter().filter(|&&f| f).count();
        self.lineage.push(format!("flag_excluded(rows={k})"));
        self.excluded = flags;
        Ok(self)
    }

    /// New frame without the flagged rows.
    pub fn drop_excluded(&self) -> Self {
        let keep: Vec<usize> = (0..self.n_rows()).filter(|&i| !self.excluded[i]).collect();
        let dropped = self.n_rows() - keep.len();
        self.select(&keep, format!("drop_excluded(rows={dropped})"))
    }

    /// New frame keeping only rows whose year is in `years`.
    pub fn restrict_years(&self, years: &[i64]) -> Self {
        let keep: Vec<usize> =
            (0..self.n_rows()).filter(|&i| years.contains(&self.year[i])).collect();
        self.select(&keep, format!("restrict_years({years:?})"))
    }

    fn select(&self, keep: &[usize], step: String) -> Self {
        let pick_s = |v: &Vec<String>| keep.iter().map(|&i| v[i].clone()).collect::<Vec<_>>();
        let mut lineage = self.lineage.clone();
        lineage.push(step);
        Self {
            county: pick_s(&self.county),
            year: keep.iter().map(|&i| self.year[i]).collect(),
            treated: keep.iter().map(|&i| self.treated[i]).collect(),
            numeric: self
                .numeric
                .iter()
                .map(|(k, v)| (k.clone(), keep.iter().map(|&i| v[i]).collect()))
                .collect(),
            labels: self.labels.iter().map(|(k, v)| (k.clone(), pick_s(v))).collect(),
            excluded: keep.iter().map(|&i| self.excluded[i]).collect(),
            lineage,
        }
    }

    fn check_len(&self, name: &str, len: usize) -> Result<()> {
        if len != self.n_rows() {
            return Err(Error::Validation(format!(
                "column '{name}' has {len} values, frame has {} rows",
                self.n_rows()
            )));
        }
        Ok(())
    }

    /// Number of rows.
    pub fn n_rows(&self) -> usize {
        self.county.len()
    }

    /// County key per row.
    pub fn county(&self) -> &[String] {
        &self.county
    }

    /// Year per row.
    pub fn year(&self) -> &[i64] {
        &self.year
    }

    /// Treatment indicator per row.
    pub fn treated(&self) -> &[u8] {
        &self.treated
    }

    /// Data-quality exclusion flag per row.
    pub fn excluded(&self) -> &[bool] {
        &self.excluded
    }

    /// Numeric column by name.
    pub fn column(&self, name: &str) -> Result<&[f64]> {
        self.numeric
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| Error::Validation(format!("unknown numeric column '{name}'")))
    }

    /// Label column by name.
    pub fn label(&self, name: &str) -> Result<&[String]> {
        self.labels
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| Error::Validation(format!("unknown label column '{name}'")))
    }

    /// Cluster key per row: the named label column, or the county.
    pub fn cluster_labels(&self, cluster_column: Option<&str>) -> Result<&[String]> {
        match cluster_column {
            Some(name) => self.label(name),
            None => Ok(&self.county),
        }
    }

    /// Numeric column names.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.numeric.keys().map(String::as_str)
    }

    /// Distinct years, ascending.
    pub fn years(&self) -> Vec<i64> {
        self.year.iter().copied().collect::<BTreeSet<_>>().into_iter().collect()
    }

    /// Number of distinct counties.
    pub fn n_counties(&self) -> usize {
        self.county.iter().collect::<BTreeSet<_>>().len()
    }

    /// Transforms applied since load, oldest first.
    pub fn lineage(&self) -> &[String] {
        &self.lineage
    }

    /// Table version: number of transforms applied, load included.
    pub fn version(&self) -> usize {
        self.lineage.len()
    }
}
