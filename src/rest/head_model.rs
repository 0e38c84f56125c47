use serde::{Deserialize, Serialize};

use crate::rest::RestError;

/// One homogeneous, isotropic layer of the volume conductor.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Shell {
    /// Outer radius of the layer, normalized so the scalp is 1.0.
    pub radius: f64,
    /// Conductivity relative to the brain.
    pub conductivity: f64,
}

/// Concentric spherical head model, shells ordered from the innermost outward.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Shell>", into = "Vec<Shell>")]
pub struct HeadModel {
    shells: Vec<Shell>,
}

impl HeadModel {
    /// Brain / skull / scalp radii.
    pub const CANONICAL_RADII: [f64; 3] = [0.87, 0.92, 1.0];
    /// Brain / skull / scalp conductivities (skull at 1/80 of brain).
    pub const CANONICAL_CONDUCTIVITIES: [f64; 3] = [1.0, 0.0125, 1.0];

    pub fn new(shells: Vec<Shell>) -> Result<Self, RestError> {
        let model = Self { shells };
        model.validate()?;
        Ok(model)
    }

    /// The canonical three-sphere model.
    pub fn three_shell() -> Self {
        let shells = Self::CANONICAL_RADII
            .iter()
            .zip(Self::CANONICAL_CONDUCTIVITIES)
            .map(|(&radius, conductivity)| Shell {
                radius,
                conductivity,
            })
            .collect();
        Self { shells }
    }

    /// A single homogeneous sphere.
    pub fn homogeneous(radius: f64, conductivity: f64) -> Result<Self, RestError> {
        Self::new(vec![Shell {
            radius,
            conductivity,
        }])
    }

    pub fn validate(&self) -> Result<(), RestError> {
        if self.shells.is_empty() {
            return Err(RestError::InvalidHeadModel("no shells".into()));
        }
        let mut previous = 0.0;
        for (idx, shell) in self.shells.iter().enumerate() {
            if !shell.radius.is_finite() || shell.radius <= previous {
                return Err(RestError::InvalidHeadModel(format!(
                    "shell {idx} radius {} must be finite and greater than {previous}",
                    shell.radius
                )));
            }
            if !shell.conductivity.is_finite() || shell.conductivity <= 0.0 {
                return Err(RestError::InvalidHeadModel(format!(
                    "shell {idx} conductivity {} must be finite and positive",
                    shell.conductivity
                )));
            }
            previous = shell.radius;
        }
        Ok(())
    }

    pub fn shells(&self) -> &[Shell] {
        &self.shells
    }

    pub fn outer_radius(&self) -> f64 {
        self.shells.last().map(|s| s.radius).unwrap_or(0.0)
    }

    /// Radius of the innermost (source-bearing) compartment.
    pub fn inner_radius(&self) -> f64 {
        self.shells.first().map(|s| s.radius).unwrap_or(0.0)
    }

    pub fn inner_conductivity(&self) -> f64 {
        self.shells.first().map(|s| s.conductivity).unwrap_or(0.0)
    }
}

impl Default for HeadModel {
    fn default() -> Self {
        Self::three_shell()
    }
}

impl TryFrom<Vec<Shell>> for HeadModel {
    type Error = RestError;

    fn try_from(shells: Vec<Shell>) -> Result<Self, Self::Error> {
        Self::new(shells)
    }
}

impl From<HeadModel> for Vec<Shell> {
    fn from(model: HeadModel) -> Self {
        model.shells
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_model_is_valid() {
        let model = HeadModel::three_shell();
        model.validate().unwrap();
        assert_eq!(model.shells().len(), 3);
        assert_eq!(model.outer_radius(), 1.0);
        assert_eq!(model.inner_radius(), 0.87);
        assert_eq!(model.shells()[1].conductivity, 0.0125);
    }

    #[test]
    fn rejects_unordered_radii() {
        let err = HeadModel::new(vec![
            Shell {
                radius: 0.92,
                conductivity: 1.0,
            },
            Shell {
                radius: 0.87,
                conductivity: 1.0,
            },
        ])
        .unwrap_err();
        assert!(matches!(err, RestError::InvalidHeadModel(_)));
    }

    #[test]
    fn rejects_non_positive_conductivity() {
        assert!(HeadModel::homogeneous(1.0, 0.0).is_err());
        assert!(HeadModel::homogeneous(1.0, -1.0).is_err());
        assert!(HeadModel::homogeneous(0.0, 1.0).is_err());
        assert!(HeadModel::new(Vec::new()).is_err());
    }

    #[test]
    fn deserialization_validates() {
        let ok: HeadModel =
            serde_json::from_str(r#"[{"radius":0.9,"conductivity":1.0},{"radius":1.0,"conductivity":0.5}]"#)
                .unwrap();
        assert_eq!(ok.outer_radius(), 1.0);
        let bad = serde_json::from_str::<HeadModel>(r#"[{"radius":1.0,"conductivity":0.0}]"#);
        assert!(bad.is_err());
    }
}
