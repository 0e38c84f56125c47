use log::{debug, warn};
use nalgebra::{DMatrix, DVector, SVD};
use ndarray::{Array1, Array2, Axis};

use crate::rest::RestError;

/// Above this effective condition number the inversion is reported as unstable.
pub const ILL_CONDITIONED: f64 = 1e8;

/// Observable state of the truncated inversion of the average-referenced lead field.
#[derive(Clone, Debug, PartialEq)]
pub struct InversionDiagnostics {
    pub regularization: f64,
    /// All singular values, largest first.
    pub singular_values: Vec<f64>,
    /// Singular values below this were suppressed.
    pub threshold: f64,
    pub effective_rank: usize,
    /// Largest over smallest retained singular value.
    pub condition_number: f64,
}

impl InversionDiagnostics {
    pub fn is_ill_conditioned(&self) -> bool {
        self.effective_rank == 0 || self.condition_number > ILL_CONDITIONED
    }
}

/// Thin SVD of `Gar` restricted to the retained components.
struct TruncatedSvd {
    /// electrodes x rank
    u: DMatrix<f64>,
    /// rank x dipoles
    v_t: DMatrix<f64>,
    inv_sigma: DVector<f64>,
    diagnostics: InversionDiagnostics,
}

impl TruncatedSvd {
    /// `V Σ⁺ Uᵀ`, dipoles x electrodes.
    fn pseudo_inverse(&self) -> DMatrix<f64> {
        self.v_t.transpose() * DMatrix::from_diagonal(&self.inv_sigma) * self.u.transpose()
    }
}

fn to_dmatrix(a: &Array2<f64>) -> DMatrix<f64> {
    let (rows, cols) = a.dim();
    DMatrix::from_fn(rows, cols, |i, j| a[[i, j]])
}

fn to_array2(m: &DMatrix<f64>) -> Array2<f64> {
    Array2::from_shape_fn(m.shape(), |(i, j)| m[(i, j)])
}

fn validate_regularization(alpha: f64) -> Result<(), RestError> {
    if !alpha.is_finite() || !(0.0..=1.0).contains(&alpha) {
        return Err(RestError::InvalidRegularization(alpha));
    }
    Ok(())
}

/// `G` with the across-electrode mean of every dipole column removed.
pub fn average_reference_leadfield(g: &Array2<f64>) -> Result<Array2<f64>, RestError> {
    let mean = g.mean_axis(Axis(0)).ok_or(RestError::NoElectrodes)?;
    Ok(g - &mean)
}

fn truncated_svd(gar: &Array2<f64>, alpha: f64) -> Result<TruncatedSvd, RestError> {
    validate_regularization(alpha)?;
    let (rows, cols) = gar.dim();
    if rows == 0 {
        return Err(RestError::NoElectrodes);
    }
    if cols == 0 {
        return Err(RestError::NoDipoles);
    }
    let svd = SVD::try_new(to_dmatrix(gar), true, true, f64::EPSILON, 0)
        .ok_or(RestError::SvdFailed)?;
    let u = svd.u.ok_or(RestError::SvdFailed)?;
    let v_t = svd.v_t.ok_or(RestError::SvdFailed)?;
    let singular_values: Vec<f64> = svd.singular_values.iter().copied().collect();

    let largest = singular_values.iter().copied().fold(0.0_f64, f64::max);
    let floor = rows.max(cols) as f64 * f64::EPSILON;
    let threshold = alpha.max(floor) * largest;
    let kept: Vec<usize> = singular_values
        .iter()
        .enumerate()
        .filter(|&(_, &s)| s > 0.0 && s >= threshold)
        .map(|(k, _)| k)
        .collect();
    let smallest_kept = kept
        .iter()
        .map(|&k| singular_values[k])
        .fold(f64::INFINITY, f64::min);
    let condition_number = if kept.is_empty() {
        f64::INFINITY
    } else {
        largest / smallest_kept
    };

    let mut sorted = singular_values.clone();
    sorted.sort_by(|a, b| b.total_cmp(a));
    let diagnostics = InversionDiagnostics {
        regularization: alpha,
        singular_values: sorted,
        threshold,
        effective_rank: kept.len(),
        condition_number,
    };
    if diagnostics.is_ill_conditioned() {
        warn!(
            "near-singular lead field inversion: rank {} of {}, condition {:.3e} (alpha {alpha})",
            diagnostics.effective_rank,
            singular_values.len(),
            diagnostics.condition_number
        );
    } else {
        debug!(
            "lead field inversion: rank {} of {}, condition {:.3e} (alpha {alpha})",
            diagnostics.effective_rank,
            singular_values.len(),
            diagnostics.condition_number
        );
    }
    let inv_sigma =
        DVector::from_iterator(kept.len(), kept.iter().map(|&k| 1.0 / singular_values[k]));
    Ok(TruncatedSvd {
        u: u.select_columns(&kept),
        v_t: v_t.select_rows(&kept),
        inv_sigma,
        diagnostics,
    })
}

/// Truncated pseudoinverse of an average-referenced lead field (dipoles x electrodes).
pub fn regularized_pinv(
    gar: &Array2<f64>,
    alpha: f64,
) -> Result<(Array2<f64>, InversionDiagnostics), RestError> {
    let svd = truncated_svd(gar, alpha)?;
    Ok((to_array2(&svd.pseudo_inverse()), svd.diagnostics))
}

/// The REST operator for one lead field.
///
/// With `P = pinv(Gar, α)` the re-referenced data is
/// `data_ar + 1 · mean_rows(G P data_ar)`. The mean of `G P` over electrodes is
/// a single row vector `w`, so applying the operator is a rank-one update of
/// the average-referenced data and never forms `G P` explicitly.
#[derive(Clone, Debug)]
pub struct RestTransform {
    weights: Array1<f64>,
    weight_sum: f64,
    diagnostics: InversionDiagnostics,
}

impl RestTransform {
    pub fn new(g: &Array2<f64>, alpha: f64) -> Result<Self, RestError> {
        let gar = average_reference_leadfield(g)?;
        let svd = truncated_svd(&gar, alpha)?;
        let mean = g.mean_axis(Axis(0)).ok_or(RestError::NoElectrodes)?;
        let mean = DVector::from_iterator(mean.len(), mean.iter().copied());

        // w = U Σ⁺ Vᵀ mean(G), the transpose of mean(G)ᵀ pinv(Gar)
        let w = &svd.u * (&svd.v_t * mean).component_mul(&svd.inv_sigma);
        let weights = Array1::from_iter(w.iter().copied());
        let weight_sum = w.sum();
        Ok(Self {
            weights,
            weight_sum,
            diagnostics: svd.diagnostics,
        })
    }

    pub fn channels(&self) -> usize {
        self.weights.len()
    }

    pub fn diagnostics(&self) -> &InversionDiagnostics {
        &self.diagnostics
    }

    /// The full `channels x channels` matrix `R` with `rest = R · data`.
    pub fn operator(&self) -> Array2<f64> {
        let m = self.channels();
        let shift = (1.0 + self.weight_sum) / m as f64;
        Array2::from_shape_fn((m, m), |(i, k)| {
            let identity = if i == k { 1.0 } else { 0.0 };
            identity + self.weights[k] - shift
        })
    }

    pub fn apply(&self, data: &Array2<f64>) -> Result<Array2<f64>, RestError> {
        let mut out = data.clone();
        self.apply_in_place(&mut out)?;
        Ok(out)
    }

    pub fn apply_in_place(&self, data: &mut Array2<f64>) -> Result<(), RestError> {
        let (rows, samples) = data.dim();
        if rows != self.channels() {
            return Err(RestError::ChannelMismatch {
                expected: self.channels(),
                actual: rows,
            });
        }
        if samples == 0 {
            return Err(RestError::EmptyData);
        }
        let means = data.mean_axis(Axis(0)).ok_or(RestError::EmptyData)?;
        // rest[:, t] = data[:, t] - mean_t + w · (data[:, t] - mean_t)
        let offsets = self.weights.dot(&*data) - &(means * (1.0 + self.weight_sum));
        *data += &offsets;
        Ok(())
    }
}

fn check_rows(data: &Array2<f64>, g: &Array2<f64>) -> Result<(), RestError> {
    if data.nrows() != g.nrows() {
        return Err(RestError::ChannelMismatch {
            expected: g.nrows(),
            actual: data.nrows(),
        });
    }
    Ok(())
}

/// Re-references `data` (channels x time) to infinity using lead field `g`.
pub fn rereference(data: &Array2<f64>, g: &Array2<f64>, alpha: f64) -> Result<Array2<f64>, RestError> {
    check_rows(data, g)?;
    RestTransform::new(g, alpha)?.apply(data)
}

/// In-place variant of [`rereference`]; `data` is untouched on error.
pub fn rereference_in_place(
    data: &mut Array2<f64>,
    g: &Array2<f64>,
    alpha: f64,
) -> Result<InversionDiagnostics, RestError> {
    check_rows(data, g)?;
    let transform = RestTransform::new(g, alpha)?;
    transform.apply_in_place(data)?;
    Ok(transform.diagnostics)
}
