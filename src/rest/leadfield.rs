//! Analytic forward solution for a current dipole inside concentric spheres.
//!
//! The potential on the outer surface is expanded in Legendre polynomials of
//! the angle between electrode and dipole:
//!
//! `V = 1/(4π σ1) Σ T_n b^(n-1) [ n P_n(c) (q·r̂0) + P_n'(c) (q·ê - c q·r̂0) ]`
//!
//! where `T_n` carries the primary (infinite-medium) field of degree `n` from
//! the innermost compartment to the scalp. `T_n` follows from continuity of
//! potential and radial current density across every interface together with
//! an insulated outer surface; it is computed once per head model by walking
//! inward from the scalp with the state renormalized after each shell.
use log::debug;
use ndarray::Array2;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::config::SeriesConfig;
use crate::rest::{DipoleSource, HeadModel, RestError};
use crate::types::Point3;

/// Radii are compared with this slack so electrodes given exactly on the scalp pass.
const RADIUS_SLACK: f64 = 1e-9;
/// Dipoles closer to the origin than this (relative to the inner radius) are treated as central.
const CENTRE_EPS: f64 = 1e-12;

/// Per-degree transfer factor kept in log form: `T_n b^(n-1) = inv_c * exp(ln_scale + (n-1) ln b)`.
#[derive(Clone, Copy, Debug)]
struct Transfer {
    ln_scale: f64,
    inv_c: f64,
}

/// Forward model bound to one head model and series setting.
#[derive(Clone, Debug)]
pub struct LeadfieldCalculator {
    outer_radius: f64,
    inner_radius: f64,
    prefactor: f64,
    transfer: Vec<Transfer>,
    tolerance: f64,
}

impl LeadfieldCalculator {
    pub fn new(model: &HeadModel, series: &SeriesConfig) -> Result<Self, RestError> {
        model.validate()?;
        series.validate()?;
        let transfer = (1..=series.max_order)
            .map(|n| transfer_factor(model, n))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            outer_radius: model.outer_radius(),
            inner_radius: model.inner_radius(),
            prefactor: 1.0 / (4.0 * std::f64::consts::PI * model.inner_conductivity()),
            transfer,
            tolerance: series.tolerance,
        })
    }

    /// `T_n`, the factor mapping the degree-`n` primary field onto the scalp.
    pub fn transfer_coefficient(&self, n: usize) -> Option<f64> {
        let t = self.transfer.get(n.checked_sub(1)?)?;
        Some(t.inv_c * t.ln_scale.exp())
    }

    /// Lead field for explicit dipole positions and orientations.
    pub fn compute(
        &self,
        electrodes: &[Point3],
        positions: &[Point3],
        orientations: &[Point3],
    ) -> Result<Array2<f64>, RestError> {
        if electrodes.is_empty() {
            return Err(RestError::NoElectrodes);
        }
        if positions.is_empty() {
            return Err(RestError::NoDipoles);
        }
        if positions.len() != orientations.len() {
            return Err(RestError::OrientationCount {
                positions: positions.len(),
                orientations: orientations.len(),
            });
        }
        let directions = electrodes
            .iter()
            .enumerate()
            .map(|(index, e)| self.electrode_direction(index, e))
            .collect::<Result<Vec<_>, _>>()?;

        let column = |j: usize| -> Result<Vec<f64>, RestError> {
            let (rhat, coefs) = self.dipole_series(j, &positions[j])?;
            let q = &orientations[j];
            Ok(directions
                .iter()
                .map(|dir| self.sum_series(dir, &rhat, q, &coefs))
                .collect())
        };

        #[cfg(feature = "parallel")]
        let columns = (0..positions.len())
            .into_par_iter()
            .map(column)
            .collect::<Result<Vec<_>, _>>()?;
        #[cfg(not(feature = "parallel"))]
        let columns = (0..positions.len())
            .map(column)
            .collect::<Result<Vec<_>, _>>()?;

        debug!(
            "lead field {} electrodes x {} dipoles",
            electrodes.len(),
            positions.len()
        );
        Ok(Array2::from_shape_fn(
            (electrodes.len(), positions.len()),
            |(i, j)| columns[j][i],
        ))
    }

    pub fn compute_for(
        &self,
        electrodes: &[Point3],
        dipoles: &DipoleSource,
    ) -> Result<Array2<f64>, RestError> {
        self.compute(electrodes, dipoles.positions(), dipoles.orientations())
    }

    /// Scalp potential at one electrode from one unit dipole.
    pub fn potential(
        &self,
        electrode: &Point3,
        position: &Point3,
        orientation: &Point3,
    ) -> Result<f64, RestError> {
        let dir = self.electrode_direction(0, electrode)?;
        let (rhat, coefs) = self.dipole_series(0, position)?;
        Ok(self.sum_series(&dir, &rhat, orientation, &coefs))
    }

    // Electrodes inside the scalp are read off at the surface point along their direction.
    fn electrode_direction(&self, index: usize, electrode: &Point3) -> Result<Point3, RestError> {
        let radius = electrode.norm();
        if !radius.is_finite() || radius > self.outer_radius * (1.0 + RADIUS_SLACK) {
            return Err(RestError::ElectrodeOutsideModel {
                index,
                radius,
                limit: self.outer_radius,
            });
        }
        if radius <= f64::EPSILON {
            return Err(RestError::DegenerateElectrode { index });
        }
        Ok(electrode / radius)
    }

    /// Unit position vector and the radius-weighted series coefficients `T_n b^(n-1)`.
    fn dipole_series(&self, index: usize, position: &Point3) -> Result<(Point3, Vec<f64>), RestError> {
        let b = position.norm();
        if !b.is_finite() || b >= self.inner_radius {
            return Err(RestError::DipoleOutsideModel {
                index,
                radius: b,
                limit: self.inner_radius,
            });
        }
        let first = self.transfer[0].inv_c * self.transfer[0].ln_scale.exp();
        if b <= CENTRE_EPS * self.inner_radius {
            // only the n = 1 term survives and it does not depend on the direction
            return Ok((Point3::z(), vec![first]));
        }

        let ln_b = b.ln();
        let mut coefs = Vec::with_capacity(64);
        coefs.push(first);
        for (k, t) in self.transfer.iter().enumerate().skip(1) {
            let n = (k + 1) as f64;
            let coef = t.inv_c * (t.ln_scale + (n - 1.0) * ln_b).exp();
            coefs.push(coef);
            if coef.abs() * n * (n + 2.0) <= self.tolerance * first.abs() {
                return Ok((position / b, coefs));
            }
        }
        if self.transfer.len() == 1 {
            return Ok((position / b, coefs));
        }
        Err(RestError::SeriesNotConverged {
            dipole: index,
            max_order: self.transfer.len(),
        })
    }

    fn sum_series(&self, dir: &Point3, rhat: &Point3, q: &Point3, coefs: &[f64]) -> f64 {
        let c = dir.dot(rhat).clamp(-1.0, 1.0);
        let q_radial = q.dot(rhat);
        let q_tangential = q.dot(dir) - c * q_radial;

        // P_n and P_n' by upward recurrence, starting at n = 1
        let (mut p_prev, mut p) = (1.0, c);
        let (mut dp_prev, mut dp) = (0.0, 1.0);
        let mut sum = 0.0;
        for (k, coef) in coefs.iter().enumerate() {
            let n = (k + 1) as f64;
            sum += coef * (n * p * q_radial + dp * q_tangential);
            let p_next = ((2.0 * n + 1.0) * c * p - n * p_prev) / (n + 1.0);
            let dp_next = dp_prev + (2.0 * n + 1.0) * p;
            p_prev = p;
            p = p_next;
            dp_prev = dp;
            dp = dp_next;
        }
        self.prefactor * sum
    }
}

/// Boundary matching for degree `n`.
///
/// In every shell `u(r) = A r^n + B r^-(n+1)`. The state `(u, j = σ r u')`
/// is continuous across interfaces and `j = 0` on the scalp. Starting from
/// `(1, 0)` at the scalp the state is carried inward to the innermost
/// interface, where the coefficient of the decaying part gives the primary
/// field amplitude `B_1`; `T_n = u(R) / B_1`.
fn transfer_factor(model: &HeadModel, n: usize) -> Result<Transfer, RestError> {
    let shells = model.shells();
    let nf = n as f64;
    let order = 2.0 * nf + 1.0;
    let (mut u, mut j) = (1.0_f64, 0.0_f64);
    let mut ln_state = 0.0;

    for k in (1..shells.len()).rev() {
        let sigma = shells[k].conductivity;
        let t = shells[k - 1].radius / shells[k].radius;
        let a = ((nf + 1.0) * u + j / sigma) / order;
        let c = (nf * u - j / sigma) / order;
        // factor t^-(n+1) out of both parts so nothing overflows
        let grow = t.powf(order);
        let inner_u = a * grow + c;
        let inner_j = sigma * (nf * a * grow - (nf + 1.0) * c);
        let norm = inner_u.abs().max(inner_j.abs());
        if norm == 0.0 || !norm.is_finite() {
            return Err(RestError::InvalidHeadModel(format!(
                "degenerate boundary state at degree {n}"
            )));
        }
        u = inner_u / norm;
        j = inner_j / norm;
        ln_state += norm.ln() - (nf + 1.0) * t.ln();
    }

    let sigma_inner = shells[0].conductivity;
    let c_hat = (nf * u - j / sigma_inner) / order;
    if c_hat == 0.0 || !c_hat.is_finite() {
        return Err(RestError::InvalidHeadModel(format!(
            "vanishing primary amplitude at degree {n}"
        )));
    }
    Ok(Transfer {
        ln_scale: -ln_state - (nf + 1.0) * shells[0].radius.ln(),
        inv_c: 1.0 / c_hat,
    })
}

/// Lead field `G` (electrodes x dipoles) for the given geometry.
pub fn compute_leadfield(
    electrodes: &[Point3],
    positions: &[Point3],
    orientations: &[Point3],
    model: &HeadModel,
    series: &SeriesConfig,
) -> Result<Array2<f64>, RestError> {
    LeadfieldCalculator::new(model, series)?.compute(electrodes, positions, orientations)
}
