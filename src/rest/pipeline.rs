use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use log::{debug, info};
use ndarray::Array2;
use once_cell::sync::OnceCell;

use crate::config::RestConfig;
use crate::rest::dipoles::{DipoleProvider, DipoleSource};
use crate::rest::error::RestError;
use crate::rest::leadfield::LeadfieldCalculator;
use crate::rest::recording::{Recording, RecordingData};
use crate::rest::referencer::{InversionDiagnostics, RestTransform};
use crate::types::{Point3, ReferenceLabel};

/// Exact electrode coordinates, used to reuse lead fields across recordings.
type ElectrodeKey = Vec<[u64; 3]>;

fn electrode_key(positions: &[Point3]) -> ElectrodeKey {
    positions
        .iter()
        .map(|p| [p[0].to_bits(), p[1].to_bits(), p[2].to_bits()])
        .collect()
}

/// Summary of one completed re-referencing.
#[derive(Clone, Debug)]
pub struct RestReport {
    pub channels: usize,
    pub samples: usize,
    pub dipoles: usize,
    pub leadfield_cached: bool,
    pub diagnostics: InversionDiagnostics,
}

/// Glue between a host recording and the REST core.
///
/// The dipole set is loaded on first use and shared read-only through an
/// `Arc`; it lives as long as the pipeline. Lead fields are cached per
/// electrode layout, holding at most `max_cached_leadfields` of them; the
/// oldest layout is evicted first.
pub struct RestPipeline<P: DipoleProvider> {
    provider: P,
    config: RestConfig,
    calculator: LeadfieldCalculator,
    dipoles: OnceCell<Arc<DipoleSource>>,
    leadfields: HashMap<ElectrodeKey, Arc<Array2<f64>>>,
    insertion_order: VecDeque<ElectrodeKey>,
}

impl<P: DipoleProvider> RestPipeline<P> {
    pub fn new(provider: P, config: RestConfig) -> Result<Self, RestError> {
        config.validate()?;
        let calculator = LeadfieldCalculator::new(&config.head_model, &config.series)?;
        Ok(Self {
            provider,
            config,
            calculator,
            dipoles: OnceCell::new(),
            leadfields: HashMap::new(),
            insertion_order: VecDeque::new(),
        })
    }

    pub fn config(&self) -> &RestConfig {
        &self.config
    }

    /// Shared dipole set, loaded from the provider on the first call.
    pub fn dipoles(&self) -> Result<Arc<DipoleSource>, RestError> {
        self.dipoles
            .get_or_try_init(|| self.provider.load_dipoles().map(Arc::new))
            .cloned()
    }

    pub fn cached_leadfields(&self) -> usize {
        self.leadfields.len()
    }

    pub fn clear_cache(&mut self) {
        self.leadfields.clear();
        self.insertion_order.clear();
    }

    /// Lead field for electrodes already in the model frame; the flag tells
    /// whether it came from the cache.
    pub fn leadfield(&mut self, electrodes: &[Point3]) -> Result<(Arc<Array2<f64>>, bool), RestError> {
        let key = electrode_key(electrodes);
        if let Some(g) = self.leadfields.get(&key) {
            return Ok((Arc::clone(g), true));
        }
        let dipoles = self.dipoles()?;
        let g = Arc::new(self.calculator.compute_for(electrodes, &dipoles)?);
        self.remember(key, Arc::clone(&g));
        Ok((g, false))
    }

    fn remember(&mut self, key: ElectrodeKey, g: Arc<Array2<f64>>) {
        let capacity = self.config.max_cached_leadfields;
        if capacity == 0 {
            return;
        }
        while self.insertion_order.len() >= capacity {
            let Some(oldest) = self.insertion_order.pop_front() else {
                break;
            };
            self.leadfields.remove(&oldest);
            debug!("evicted cached lead field ({} electrodes)", oldest.len());
        }
        self.insertion_order.push_back(key.clone());
        self.leadfields.insert(key, g);
    }

    /// Electrode coordinates of `recording` mapped into the model frame.
    pub fn model_electrodes(&self, recording: &Recording) -> Result<Vec<Point3>, RestError> {
        let positions = recording.electrode_positions()?;
        Ok(if self.config.scale_electrodes {
            scale_to_unit_sphere(&positions, self.config.head_model.outer_radius())
        } else {
            positions
        })
    }

    /// Re-references `recording` to REST. Nothing is written back unless the
    /// whole computation succeeds.
    pub fn rereference(&mut self, recording: &mut Recording) -> Result<RestReport, RestError> {
        recording.validate()?;
        if recording.reference.is_rest() {
            debug!("recording is already REST-referenced; applying again");
        }
        let electrodes = self.model_electrodes(recording)?;
        let (g, cached) = self.leadfield(&electrodes)?;
        let data = recording.continuous_data()?;
        if data.nrows() != g.nrows() {
            return Err(RestError::ChannelMismatch {
                expected: g.nrows(),
                actual: data.nrows(),
            });
        }

        let transform = RestTransform::new(&g, self.config.regularization)?;
        let rest = transform.apply(data)?;
        debug!(
            "previous reference '{}', {} samples at {} Hz",
            recording.reference,
            rest.ncols(),
            recording.sample_rate_hz
        );

        let report = RestReport {
            channels: rest.nrows(),
            samples: rest.ncols(),
            dipoles: g.ncols(),
            leadfield_cached: cached,
            diagnostics: transform.diagnostics().clone(),
        };
        recording.data = RecordingData::Continuous(rest);
        recording.reference = ReferenceLabel::Rest;
        info!(
            "re-referenced {} channels x {} samples to REST (rank {}, alpha {})",
            report.channels,
            report.samples,
            report.diagnostics.effective_rank,
            self.config.regularization
        );
        Ok(report)
    }
}

/// Scales all positions by one factor so the farthest lies on `radius`.
pub fn scale_to_unit_sphere(positions: &[Point3], radius: f64) -> Vec<Point3> {
    let farthest = positions.iter().map(|p| p.norm()).fold(0.0_f64, f64::max);
    if farthest <= f64::EPSILON || !farthest.is_finite() {
        return positions.to_vec();
    }
    positions
        .iter()
        .map(|p| p * (radius / farthest))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rest::dipoles::InMemoryDipoles;
    use crate::rest::recording::Channel;
    use crate::rest::ErrorKind;
    use ndarray::Array3;
    use std::cell::Cell;

    fn spiral(n: usize, radius: f64) -> Vec<Point3> {
        let golden = std::f64::consts::PI * (3.0 - 5.0_f64.sqrt());
        (0..n)
            .map(|i| {
                let z = 1.0 - 2.0 * (i as f64 + 0.5) / n as f64;
                let r = (1.0 - z * z).sqrt();
                let phi = golden * i as f64;
                Point3::new(r * phi.cos(), r * phi.sin(), z) * radius
            })
            .collect()
    }

    fn provider() -> InMemoryDipoles {
        InMemoryDipoles::new(DipoleSource::radial(spiral(40, 0.6)).unwrap())
    }

    fn recording(n: usize, radius_mm: f64) -> Recording {
        let channels = spiral(n, radius_mm)
            .into_iter()
            .enumerate()
            .map(|(i, p)| Channel::new(format!("E{i}"), Some(p)))
            .collect();
        let data = Array2::from_shape_fn((n, 50), |(c, t)| ((c + 1) as f64 * 0.1 * t as f64).sin());
        Recording::continuous(channels, data, 250.0).with_reference(ReferenceLabel::Average)
    }

    struct CountingProvider {
        inner: InMemoryDipoles,
        loads: Cell<usize>,
    }

    impl DipoleProvider for CountingProvider {
        fn load_dipoles(&self) -> Result<DipoleSource, RestError> {
            self.loads.set(self.loads.get() + 1);
            self.inner.load_dipoles()
        }
    }

    #[test]
    fn rereferences_and_marks_rest() {
        let mut pipeline = RestPipeline::new(provider(), RestConfig::default()).unwrap();
        let mut rec = recording(16, 90.0);
        let report = pipeline.rereference(&mut rec).unwrap();
        assert!(rec.reference.is_rest());
        assert_eq!(report.channels, 16);
        assert_eq!(report.samples, 50);
        assert_eq!(report.dipoles, 40);
        assert!(!report.leadfield_cached);
        assert_eq!(rec.continuous_data().unwrap().dim(), (16, 50));
    }

    #[test]
    fn dipoles_load_once_and_leadfields_are_cached() {
        let counting = CountingProvider {
            inner: provider(),
            loads: Cell::new(0),
        };
        let mut pipeline = RestPipeline::new(counting, RestConfig::default()).unwrap();
        let mut a = recording(12, 1.0);
        let mut b = recording(12, 1.0);
        pipeline.rereference(&mut a).unwrap();
        let report = pipeline.rereference(&mut b).unwrap();
        assert!(report.leadfield_cached);
        assert_eq!(pipeline.cached_leadfields(), 1);
        assert_eq!(pipeline.provider.loads.get(), 1);
        let first = pipeline.dipoles().unwrap();
        let second = pipeline.dipoles().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        pipeline.clear_cache();
        assert_eq!(pipeline.cached_leadfields(), 0);
    }

    #[test]
    fn failures_leave_the_recording_untouched() {
        let mut pipeline = RestPipeline::new(provider(), RestConfig::default()).unwrap();

        let mut missing = recording(8, 1.0);
        missing.channels[5].position = None;
        let before = missing.clone();
        let err = pipeline.rereference(&mut missing).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingGeometry);
        assert_eq!(missing, before);

        let mut segmented = recording(8, 1.0);
        segmented.data = RecordingData::Epoched(Array3::zeros((3, 8, 10)));
        let before = segmented.clone();
        let err = pipeline.rereference(&mut segmented).unwrap_err();
        assert!(matches!(err, RestError::SegmentedData { epochs: 3 }));
        assert_eq!(segmented, before);

        let mut empty = recording(8, 1.0);
        empty.data = RecordingData::Continuous(Array2::zeros((8, 0)));
        assert!(matches!(
            pipeline.rereference(&mut empty),
            Err(RestError::EmptyData)
        ));
    }

    #[test]
    fn unscaled_coordinates_outside_the_head_are_rejected() {
        let config = RestConfig {
            scale_electrodes: false,
            ..RestConfig::default()
        };
        let mut pipeline = RestPipeline::new(provider(), config).unwrap();
        let mut rec = recording(8, 90.0);
        let before = rec.clone();
        let err = pipeline.rereference(&mut rec).unwrap_err();
        assert!(matches!(err, RestError::ElectrodeOutsideModel { .. }));
        assert_eq!(rec, before);
    }

    #[test]
    fn scaling_puts_the_farthest_electrode_on_the_scalp() {
        let scaled = scale_to_unit_sphere(
            &[Point3::new(0.0, 0.0, 80.0), Point3::new(0.0, 40.0, 0.0)],
            1.0,
        );
        assert_eq!(scaled[0], Point3::z());
        assert_eq!(scaled[1], Point3::new(0.0, 0.5, 0.0));
    }

    #[test]
    fn cache_keeps_only_the_newest_layouts() {
        let config = RestConfig {
            max_cached_leadfields: 2,
            ..RestConfig::default()
        };
        let mut pipeline = RestPipeline::new(provider(), config).unwrap();
        assert_eq!(pipeline.config().max_cached_leadfields, 2);
        for n in [8, 9, 10] {
            pipeline.rereference(&mut recording(n, 1.0)).unwrap();
        }
        assert_eq!(pipeline.cached_leadfields(), 2);

        // the 8-channel layout was evicted, the 10-channel one is still there
        let oldest = pipeline.rereference(&mut recording(8, 1.0)).unwrap();
        assert!(!oldest.leadfield_cached);
        let newest = pipeline.rereference(&mut recording(10, 1.0)).unwrap();
        assert!(newest.leadfield_cached);
        assert_eq!(pipeline.cached_leadfields(), 2);
    }

    #[test]
    fn zero_capacity_disables_the_cache() {
        let config = RestConfig {
            max_cached_leadfields: 0,
            ..RestConfig::default()
        };
        let mut pipeline = RestPipeline::new(provider(), config).unwrap();
        pipeline.rereference(&mut recording(8, 1.0)).unwrap();
        let again = pipeline.rereference(&mut recording(8, 1.0)).unwrap();
        assert!(!again.leadfield_cached);
        assert_eq!(pipeline.cached_leadfields(), 0);
    }
}
