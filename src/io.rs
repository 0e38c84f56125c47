//! Host-side file formats: JSON recordings and plain numeric tables.
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};

use crate::rest::{Channel, Recording, RecordingData};
use crate::types::{Point3, ReferenceLabel};

/// Electrode coordinates as written in JSON.
pub type Coordinates = [f64; 3];

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChannelEntry {
    pub label: String,
    #[serde(default)]
    pub position: Option<Coordinates>,
}

/// On-disk recording. Exactly one of `data` (channels x samples) or
/// `epochs` (epochs x channels x samples) is expected.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecordingFile {
    pub sample_rate_hz: f64,
    #[serde(default)]
    pub reference: ReferenceLabel,
    pub channels: Vec<ChannelEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<Vec<f64>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epochs: Option<Vec<Vec<Vec<f64>>>>,
}

fn rows_to_array(rows: Vec<Vec<f64>>) -> Result<Array2<f64>> {
    let cols = rows.first().map(Vec::len).unwrap_or(0);
    if let Some(bad) = rows.iter().position(|r| r.len() != cols) {
        bail!("row {bad} has {} samples, expected {cols}", rows[bad].len());
    }
    let n = rows.len();
    Array2::from_shape_vec((n, cols), rows.into_iter().flatten().collect())
        .map_err(|e| anyhow!("bad data shape: {e}"))
}

fn epochs_to_array(epochs: Vec<Vec<Vec<f64>>>) -> Result<Array3<f64>> {
    let n_epochs = epochs.len();
    let mut flat = Vec::new();
    let mut shape = None;
    for (idx, epoch) in epochs.into_iter().enumerate() {
        let arr = rows_to_array(epoch).with_context(|| format!("epoch {idx}"))?;
        match shape {
            None => shape = Some(arr.dim()),
            Some(s) if s != arr.dim() => bail!("epoch {idx} has shape {:?}, expected {s:?}", arr.dim()),
            Some(_) => {}
        }
        flat.extend(arr.iter().copied());
    }
    let (c, t) = shape.unwrap_or((0, 0));
    Array3::from_shape_vec((n_epochs, c, t), flat).map_err(|e| anyhow!("bad epoch shape: {e}"))
}

impl RecordingFile {
    pub fn into_recording(self) -> Result<Recording> {
        let data = match (self.data, self.epochs) {
            (Some(_), Some(_)) => bail!("recording has both 'data' and 'epochs'"),
            (Some(rows), None) => RecordingData::Continuous(rows_to_array(rows)?),
            (None, Some(epochs)) => RecordingData::Epoched(epochs_to_array(epochs)?),
            (None, None) => RecordingData::Continuous(Array2::zeros((0, 0))),
        };
        let channels = self
            .channels
            .into_iter()
            .map(|c| Channel::new(c.label, c.position.map(Point3::from)))
            .collect();
        Ok(Recording {
            channels,
            data,
            sample_rate_hz: self.sample_rate_hz,
            reference: self.reference,
        })
    }

    pub fn from_recording(recording: &Recording) -> Self {
        let channels = recording
            .channels
            .iter()
            .map(|c| ChannelEntry {
                label: c.label.clone(),
                position: c.position.map(Into::into),
            })
            .collect();
        let (data, epochs) = match &recording.data {
            RecordingData::Continuous(data) => (
                Some(data.rows().into_iter().map(|r| r.to_vec()).collect()),
                None,
            ),
            RecordingData::Epoched(data) => (
                None,
                Some(
                    data.outer_iter()
                        .map(|e| e.rows().into_iter().map(|r| r.to_vec()).collect::<Vec<_>>())
                        .collect(),
                ),
            ),
        };
        Self {
            sample_rate_hz: recording.sample_rate_hz,
            reference: recording.reference.clone(),
            channels,
            data,
            epochs,
        }
    }
}

pub fn read_recording(path: impl AsRef<Path>) -> Result<Recording> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let parsed: RecordingFile = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("parsing recording {}", path.display()))?;
    parsed.into_recording()
}

pub fn write_recording(path: impl AsRef<Path>, recording: &Recording) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut w = BufWriter::new(file);
    serde_json::to_writer(&mut w, &RecordingFile::from_recording(recording))?;
    w.flush()?;
    Ok(())
}

/// Writes a matrix as whitespace-separated rows.
pub fn write_table(path: impl AsRef<Path>, matrix: &Array2<f64>) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut w = BufWriter::new(file);
    for row in matrix.rows() {
        let mut first = true;
        for v in row {
            if !first {
                write!(w, " ")?;
            }
            write!(w, "{v:e}")?;
            first = false;
        }
        writeln!(w)?;
    }
    w.flush()?;
    Ok(())
}
