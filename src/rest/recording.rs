use ndarray::{Array2, Array3};

use crate::rest::RestError;
use crate::types::{Point3, ReferenceLabel};

/// One recorded channel and, when known, its electrode position.
#[derive(Clone, Debug, PartialEq)]
pub struct Channel {
    pub label: String,
    pub position: Option<Point3>,
}

impl Channel {
    pub fn new(label: impl Into<String>, position: Option<Point3>) -> Self {
        Self {
            label: label.into(),
            position,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum RecordingData {
    /// channels x samples
    Continuous(Array2<f64>),
    /// epochs x channels x samples
    Epoched(Array3<f64>),
}

impl RecordingData {
    pub fn is_empty(&self) -> bool {
        match self {
            RecordingData::Continuous(data) => data.is_empty(),
            RecordingData::Epoched(data) => data.is_empty(),
        }
    }

    pub fn num_channels(&self) -> usize {
        match self {
            RecordingData::Continuous(data) => data.nrows(),
            RecordingData::Epoched(data) => data.dim().1,
        }
    }
}

/// Host-side recording handed to the pipeline.
#[derive(Clone, Debug, PartialEq)]
pub struct Recording {
    pub channels: Vec<Channel>,
    pub data: RecordingData,
    pub sample_rate_hz: f64,
    pub reference: ReferenceLabel,
}

impl Recording {
    pub fn continuous(channels: Vec<Channel>, data: Array2<f64>, sample_rate_hz: f64) -> Self {
        Self {
            channels,
            data: RecordingData::Continuous(data),
            sample_rate_hz,
            reference: ReferenceLabel::Unknown,
        }
    }

    pub fn with_reference(mut self, reference: ReferenceLabel) -> Self {
        self.reference = reference;
        self
    }

    /// Checks everything REST needs before any computation starts.
    pub fn validate(&self) -> Result<(), RestError> {
        if self.data.is_empty() {
            return Err(RestError::EmptyData);
        }
        if let RecordingData::Epoched(data) = &self.data {
            return Err(RestError::SegmentedData {
                epochs: data.dim().0,
            });
        }
        let rows = self.data.num_channels();
        if rows != self.channels.len() {
            return Err(RestError::LabelMismatch {
                labels: self.channels.len(),
                rows,
            });
        }
        self.electrode_positions().map(|_| ())
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn samples_per_channel(&self) -> usize {
        match &self.data {
            RecordingData::Continuous(data) => data.ncols(),
            RecordingData::Epoched(data) => data.dim().0 * data.dim().2,
        }
    }

    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate_hz <= 0.0 {
            return 0.0;
        }
        self.samples_per_channel() as f64 / self.sample_rate_hz
    }

    /// Electrode positions in channel order; every channel must have one.
    pub fn electrode_positions(&self) -> Result<Vec<Point3>, RestError> {
        self.channels
            .iter()
            .enumerate()
            .map(|(index, ch)| {
                ch.position.ok_or_else(|| RestError::MissingGeometry {
                    index,
                    label: ch.label.clone(),
                })
            })
            .collect()
    }

    pub fn continuous_data(&self) -> Result<&Array2<f64>, RestError> {
        match &self.data {
            RecordingData::Continuous(data) if data.is_empty() => Err(RestError::EmptyData),
            RecordingData::Continuous(data) => Ok(data),
            RecordingData::Epoched(data) => Err(RestError::SegmentedData {
                epochs: data.dim().0,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channels(n: usize) -> Vec<Channel> {
        (0..n)
            .map(|i| Channel::new(format!("E{i}"), Some(Point3::z())))
            .collect()
    }

    #[test]
    fn valid_continuous_recording() {
        let rec = Recording::continuous(channels(3), Array2::zeros((3, 250)), 250.0);
        rec.validate().unwrap();
        assert_eq!(rec.samples_per_channel(), 250);
        assert_eq!(rec.duration_seconds(), 1.0);
        assert_eq!(rec.electrode_positions().unwrap().len(), 3);
    }

    #[test]
    fn empty_data_is_rejected_first() {
        let rec = Recording {
            channels: channels(2),
            data: RecordingData::Epoched(Array3::zeros((0, 2, 10))),
            sample_rate_hz: 100.0,
            reference: ReferenceLabel::Average,
        };
        assert!(matches!(rec.validate(), Err(RestError::EmptyData)));
        let rec = Recording::continuous(channels(2), Array2::zeros((2, 0)), 100.0);
        assert!(matches!(rec.validate(), Err(RestError::EmptyData)));
    }

    #[test]
    fn segmented_data_is_rejected() {
        let rec = Recording {
            channels: channels(2),
            data: RecordingData::Epoched(Array3::zeros((4, 2, 10))),
            sample_rate_hz: 100.0,
            reference: ReferenceLabel::Average,
        };
        assert!(matches!(
            rec.validate(),
            Err(RestError::SegmentedData { epochs: 4 })
        ));
        assert!(rec.continuous_data().is_err());
    }

    #[test]
    fn missing_position_names_the_channel() {
        let mut chans = channels(3);
        chans[1].position = None;
        chans[1].label = "Fz".into();
        let rec = Recording::continuous(chans, Array2::zeros((3, 10)), 100.0);
        match rec.validate() {
            Err(RestError::MissingGeometry { index, label }) => {
                assert_eq!(index, 1);
                assert_eq!(label, "Fz");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn label_count_must_match_rows() {
        let rec = Recording::continuous(channels(2), Array2::zeros((3, 10)), 100.0);
        assert!(matches!(
            rec.validate(),
            Err(RestError::LabelMismatch { labels: 2, rows: 3 })
        ));
    }
}
