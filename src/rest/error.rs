use std::path::PathBuf;
use thiserror::Error;

/// Coarse classification of [`RestError`], matching what the caller can do about it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Data missing, segmented, or not aligned with the lead field.
    InputShape,
    /// Electrode positions are absent.
    MissingGeometry,
    /// Head model, electrode or dipole violates the model's invariants.
    ModelInvariant,
    /// The numeric machinery itself failed.
    Numerical,
    /// Reading the dipole reference table failed.
    Io,
}

#[derive(Debug, Error)]
pub enum RestError {
    #[error("recording has no data; load a continuous dataset first")]
    EmptyData,
    #[error("data is segmented into {epochs} epochs; REST needs continuous data")]
    SegmentedData { epochs: usize },
    #[error("channel {index} ({label}) has no 3-D electrode position")]
    MissingGeometry { index: usize, label: String },
    #[error("channel count mismatch: lead field has {expected} electrodes, data has {actual} rows")]
    ChannelMismatch { expected: usize, actual: usize },
    #[error("recording lists {labels} channels but its data has {rows} rows")]
    LabelMismatch { labels: usize, rows: usize },

    #[error("invalid head model: {0}")]
    InvalidHeadModel(String),
    #[error("electrode {index} lies at radius {radius:.4}, outside the outer shell ({limit:.4})")]
    ElectrodeOutsideModel { index: usize, radius: f64, limit: f64 },
    #[error("electrode {index} sits at the origin and has no scalp direction")]
    DegenerateElectrode { index: usize },
    #[error("dipole {index} lies at radius {radius:.4}, not inside the innermost shell ({limit:.4})")]
    DipoleOutsideModel { index: usize, radius: f64, limit: f64 },
    #[error("dipole {index} orientation has length {norm:.6}, expected a unit vector")]
    NonUnitOrientation { index: usize, norm: f64 },
    #[error("dipole {index} sits at the origin and has no radial direction")]
    DegenerateDipole { index: usize },
    #[error("{positions} dipole positions but {orientations} orientations")]
    OrientationCount { positions: usize, orientations: usize },
    #[error("dipole table must hold exactly {expected} dipoles, found {actual}")]
    DipoleCount { expected: usize, actual: usize },
    #[error("no electrodes given")]
    NoElectrodes,
    #[error("no dipoles given")]
    NoDipoles,

    #[error("series for dipole {dipole} did not converge within {max_order} terms")]
    SeriesNotConverged { dipole: usize, max_order: usize },
    #[error("invalid series settings: {0}")]
    InvalidSeries(String),
    #[error("regularization must be finite and within [0, 1], got {0}")]
    InvalidRegularization(f64),
    #[error("singular value decomposition of the average-referenced lead field failed")]
    SvdFailed,

    #[error("failed to read dipole table {path}: {source}")]
    DipoleFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("dipole table line {line}: {message}")]
    DipoleParse { line: usize, message: String },
}

impl RestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RestError::EmptyData
            | RestError::SegmentedData { .. }
            | RestError::ChannelMismatch { .. }
            | RestError::LabelMismatch { .. } => ErrorKind::InputShape,
            RestError::MissingGeometry { .. } => ErrorKind::MissingGeometry,
            RestError::InvalidHeadModel(_)
            | RestError::ElectrodeOutsideModel { .. }
            | RestError::DegenerateElectrode { .. }
            | RestError::DipoleOutsideModel { .. }
            | RestError::NonUnitOrientation { .. }
            | RestError::DegenerateDipole { .. }
            | RestError::OrientationCount { .. }
            | RestError::DipoleCount { .. }
            | RestError::NoElectrodes
            | RestError::NoDipoles => ErrorKind::ModelInvariant,
            RestError::SeriesNotConverged { .. }
            | RestError::InvalidSeries(_)
            | RestError::InvalidRegularization(_)
            | RestError::SvdFailed => ErrorKind::Numerical,
            RestError::DipoleFile { .. } | RestError::DipoleParse { .. } => ErrorKind::Io,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_mismatch_is_an_input_shape_error() {
        let err = RestError::ChannelMismatch {
            expected: 64,
            actual: 30,
        };
        assert_eq!(err.kind(), ErrorKind::InputShape);
        let msg = err.to_string();
        assert!(msg.contains("64") && msg.contains("30"));
    }

    #[test]
    fn geometry_and_model_errors_are_distinct() {
        let missing = RestError::MissingGeometry {
            index: 3,
            label: "Cz".into(),
        };
        let outside = RestError::ElectrodeOutsideModel {
            index: 3,
            radius: 1.2,
            limit: 1.0,
        };
        assert_eq!(missing.kind(), ErrorKind::MissingGeometry);
        assert_eq!(outside.kind(), ErrorKind::ModelInvariant);
        assert!(missing.to_string().contains("Cz"));
    }
}
