use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::rest::RestError;
use crate::types::Point3;

/// Number of dipoles in the canonical cortical table.
pub const CANONICAL_DIPOLE_COUNT: usize = 3000;
/// Leading dipoles of the canonical table that point radially outward.
pub const RADIAL_DIPOLE_COUNT: usize = 2600;
/// Orientation forced onto the trailing canonical dipoles.
pub const VERTICAL_ORIENTATION: Point3 = Point3::new(0.0, 0.0, 1.0);

/// Orientations whose length differs from one by more than this are rejected.
const UNIT_TOLERANCE: f64 = 1e-6;

/// Fixed set of equivalent current dipoles with unit orientations.
#[derive(Clone, Debug, PartialEq)]
pub struct DipoleSource {
    positions: Vec<Point3>,
    orientations: Vec<Point3>,
}

impl DipoleSource {
    pub fn new(positions: Vec<Point3>, orientations: Vec<Point3>) -> Result<Self, RestError> {
        if positions.is_empty() {
            return Err(RestError::NoDipoles);
        }
        if positions.len() != orientations.len() {
            return Err(RestError::OrientationCount {
                positions: positions.len(),
                orientations: orientations.len(),
            });
        }
        for (index, orientation) in orientations.iter().enumerate() {
            let len = orientation.norm();
            if !len.is_finite() || (len - 1.0).abs() > UNIT_TOLERANCE {
                return Err(RestError::NonUnitOrientation { index, norm: len });
            }
        }
        Ok(Self {
            positions,
            orientations,
        })
    }

    /// Every dipole oriented along its own position vector.
    pub fn radial(positions: Vec<Point3>) -> Result<Self, RestError> {
        let orientations = radial_orientations(&positions)?;
        Self::new(positions, orientations)
    }

    /// Builds the canonical 3000-dipole set and applies its orientation convention.
    pub fn canonical(positions: Vec<Point3>) -> Result<Self, RestError> {
        if positions.len() != CANONICAL_DIPOLE_COUNT {
            return Err(RestError::DipoleCount {
                expected: CANONICAL_DIPOLE_COUNT,
                actual: positions.len(),
            });
        }
        let orientations = apply_canonical_orientations(&positions)?;
        Self::new(positions, orientations)
    }

    /// Reads a canonical dipole table from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RestError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| RestError::DipoleFile {
            path: path.to_path_buf(),
            source,
        })?;
        let positions = parse_positions(&text)?;
        debug!("read {} dipole positions from {}", positions.len(), path.display());
        Self::canonical(positions)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn positions(&self) -> &[Point3] {
        &self.positions
    }

    pub fn orientations(&self) -> &[Point3] {
        &self.orientations
    }
}

fn radial_orientations(positions: &[Point3]) -> Result<Vec<Point3>, RestError> {
    positions
        .iter()
        .enumerate()
        .map(|(index, p)| {
            let len = p.norm();
            if len <= f64::EPSILON || !len.is_finite() {
                Err(RestError::DegenerateDipole { index })
            } else {
                Ok(p / len)
            }
        })
        .collect()
}

/// Orientation convention of the canonical cortical table: the first
/// [`RADIAL_DIPOLE_COUNT`] dipoles point along their normalized position, the
/// remaining ones are fixed to [`VERTICAL_ORIENTATION`].
pub fn apply_canonical_orientations(positions: &[Point3]) -> Result<Vec<Point3>, RestError> {
    let split = RADIAL_DIPOLE_COUNT.min(positions.len());
    let mut orientations = radial_orientations(&positions[..split])?;
    orientations.extend(std::iter::repeat(VERTICAL_ORIENTATION).take(positions.len() - split));
    Ok(orientations)
}

/// Parses a plain `N x 3` numeric table. Columns may be separated by
/// whitespace or commas; blank lines and `#` comments are skipped.
pub fn parse_positions(text: &str) -> Result<Vec<Point3>, RestError> {
    let mut positions = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = raw.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let values = line
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|tok| !tok.is_empty())
            .map(|tok| {
                tok.parse::<f64>().map_err(|e| RestError::DipoleParse {
                    line: idx + 1,
                    message: format!("'{tok}': {e}"),
                })
            })
            .collect::<Result<Vec<f64>, _>>()?;
        if values.len() != 3 {
            return Err(RestError::DipoleParse {
                line: idx + 1,
                message: format!("expected 3 columns, found {}", values.len()),
            });
        }
        positions.push(Point3::from_column_slice(&values));
    }
    Ok(positions)
}

/// Something that can hand over the dipole set on demand.
pub trait DipoleProvider {
    fn load_dipoles(&self) -> Result<DipoleSource, RestError>;
}

/// Canonical table stored on disk.
#[derive(Clone, Debug)]
pub struct FileDipoles {
    path: PathBuf,
}

impl FileDipoles {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DipoleProvider for FileDipoles {
    fn load_dipoles(&self) -> Result<DipoleSource, RestError> {
        let dipoles = DipoleSource::load(&self.path)?;
        info!(
            "loaded {} dipoles from {}",
            dipoles.len(),
            self.path.display()
        );
        Ok(dipoles)
    }
}

/// In-memory dipole set useful for tests and synthetic layouts.
#[derive(Clone, Debug)]
pub struct InMemoryDipoles {
    dipoles: DipoleSource,
}

impl InMemoryDipoles {
    pub fn new(dipoles: DipoleSource) -> Self {
        Self { dipoles }
    }
}

impl DipoleProvider for InMemoryDipoles {
    fn load_dipoles(&self) -> Result<DipoleSource, RestError> {
        Ok(self.dipoles.clone())
    }
}
