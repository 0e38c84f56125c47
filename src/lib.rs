//! Reference Electrode Standardization Technique (REST).
//!
//! Re-references continuous EEG to a point at infinity: a lead field is
//! computed for the recording's electrodes from a fixed set of cortical
//! dipoles in a three-shell spherical head, and the regularized inverse of
//! its average-referenced form restores the offset removed by average
//! referencing.
pub mod config;
pub mod io;
pub mod rest;
pub mod types;

pub use config::{DataProvenance, RestConfig, SeriesConfig};
pub use rest::{
    compute_leadfield, rereference, DipoleSource, HeadModel, Recording, RestError, RestPipeline,
};
pub use types::{Point3, ReferenceLabel};
