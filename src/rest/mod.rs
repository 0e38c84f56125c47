// src/rest/mod.rs
pub mod dipoles;
pub mod error;
pub mod head_model;
pub mod leadfield;
pub mod pipeline;
pub mod recording;
pub mod referencer;
// re-export the pieces callers reach for
pub use dipoles::{
    apply_canonical_orientations, parse_positions, DipoleProvider, DipoleSource, FileDipoles,
    InMemoryDipoles, CANONICAL_DIPOLE_COUNT, RADIAL_DIPOLE_COUNT, VERTICAL_ORIENTATION,
};
pub use error::{ErrorKind, RestError};
pub use head_model::{HeadModel, Shell};
pub use leadfield::{compute_leadfield, LeadfieldCalculator};
pub use pipeline::{scale_to_unit_sphere, RestPipeline, RestReport};
pub use recording::{Channel, Recording, RecordingData};
pub use referencer::{
    average_reference_leadfield, regularized_pinv, rereference, rereference_in_place,
    InversionDiagnostics, RestTransform,
};
