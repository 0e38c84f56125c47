use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::rest::{HeadModel, RestError};

/// Where the data came from; selects the regularization preset.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataProvenance {
    /// Real recordings carry noise and need truncation of weak components.
    #[default]
    Recorded,
    /// Noise-free forward simulations can be inverted without truncation.
    Simulated,
}

impl DataProvenance {
    pub fn regularization(self) -> f64 {
        match self {
            DataProvenance::Recorded => 0.05,
            DataProvenance::Simulated => 0.0,
        }
    }
}

/// Truncation of the Legendre series in the forward solution.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeriesConfig {
    /// Hard limit on the number of terms per dipole.
    pub max_order: usize,
    /// Relative size of the last retained term.
    pub tolerance: f64,
}

impl SeriesConfig {
    pub fn validate(&self) -> Result<(), RestError> {
        if self.max_order == 0 {
            return Err(RestError::InvalidSeries("max_order must be at least 1".into()));
        }
        if !self.tolerance.is_finite() || self.tolerance <= 0.0 {
            return Err(RestError::InvalidSeries(format!(
                "tolerance {} must be finite and positive",
                self.tolerance
            )));
        }
        Ok(())
    }
}

impl Default for SeriesConfig {
    fn default() -> Self {
        Self {
            max_order: 2000,
            tolerance: 1e-12,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestConfig {
    /// Truncation level α of the pseudoinverse, in `[0, 1]`.
    ///
    /// Singular values of the average-referenced lead field below
    /// `α · σ_max` are discarded, so α is relative to the largest singular
    /// value. This differs from a MATLAB-style `pinv(Gar, tol)`, whose `tol`
    /// is an absolute cutoff: to reuse such a value divide it by `σ_max`
    /// (reported in `InversionDiagnostics::singular_values[0]`).
    pub regularization: f64,
    pub series: SeriesConfig,
    pub head_model: HeadModel,
    /// Rescale electrode coordinates so the outermost one lies on the unit sphere.
    pub scale_electrodes: bool,
    /// Canonical dipole table; may also be given on the command line.
    pub dipole_file: Option<PathBuf>,
    /// Lead fields kept per pipeline, one per electrode layout; 0 disables caching.
    pub max_cached_leadfields: usize,
}

impl RestConfig {
    pub fn for_provenance(provenance: DataProvenance) -> Self {
        Self {
            regularization: provenance.regularization(),
            ..Self::default()
        }
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: RestConfig = serde_json::from_str(&text)
            .with_context(|| format!("parsing config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), RestError> {
        if !self.regularization.is_finite() || !(0.0..=1.0).contains(&self.regularization) {
            return Err(RestError::InvalidRegularization(self.regularization));
        }
        self.series.validate()?;
        self.head_model.validate()
    }
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            regularization: DataProvenance::Recorded.regularization(),
            series: SeriesConfig::default(),
            head_model: HeadModel::three_shell(),
            scale_electrodes: true,
            dipole_file: None,
            max_cached_leadfields: 8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_favor_recorded_data() {
        let config = RestConfig::default();
        assert_eq!(config.regularization, 0.05);
        assert_eq!(
            RestConfig::for_provenance(DataProvenance::Simulated).regularization,
            0.0
        );
        config.validate().unwrap();
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: RestConfig =
            serde_json::from_str(r#"{"regularization": 0.1, "series": {"max_order": 500}}"#).unwrap();
        assert_eq!(config.regularization, 0.1);
        assert_eq!(config.series.max_order, 500);
        assert_eq!(config.series.tolerance, 1e-12);
        assert_eq!(config.head_model, HeadModel::three_shell());
        assert!(config.scale_electrodes);
        assert_eq!(config.max_cached_leadfields, 8);
    }

    #[test]
    fn rejects_out_of_range_regularization() {
        let config = RestConfig {
            regularization: 1.5,
            ..RestConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(RestError::InvalidRegularization(_))
        ));
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rest.json");
        std::fs::write(&path, r#"{"scale_electrodes": false, "dipole_file": "corti.dat"}"#).unwrap();
        let config = RestConfig::from_json_file(&path).unwrap();
        assert!(!config.scale_electrodes);
        assert_eq!(config.dipole_file.as_deref(), Some(Path::new("corti.dat")));
    }
}
