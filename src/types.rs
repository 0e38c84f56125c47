// src/types.rs
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Cartesian point or direction in the normalized head frame.
pub type Point3 = Vector3<f64>;

/// Reference convention a recording is currently expressed in.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceLabel {
    #[default]
    Unknown,
    Average,
    /// Referenced to a single named electrode.
    Channel(String),
    /// Reference electrode standardization: a point at infinity.
    Rest,
}

impl ReferenceLabel {
    pub fn is_rest(&self) -> bool {
        matches!(self, ReferenceLabel::Rest)
    }
}

impl std::fmt::Display for ReferenceLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReferenceLabel::Unknown => write!(f, "unknown"),
            ReferenceLabel::Average => write!(f, "average"),
            ReferenceLabel::Channel(label) => write!(f, "{label}"),
            ReferenceLabel::Rest => write!(f, "rest"),
        }
    }
}
