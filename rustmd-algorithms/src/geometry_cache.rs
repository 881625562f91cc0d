//! Per-spectrum detector directions, cached by instrument identity.
//!
//! A [`GeometryCache`] is built once per instrument and shared read-only
//! through a [`CacheHandle`]. The [`GeometryRegistry`] owns the caches of a
//! session and hands out the existing one when a later source reports the
//! same [`InstrumentFingerprint`].

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, info};
use nalgebra::Vector3;
use rayon::prelude::*;
use rustmd_core::{DetectorId, InstrumentId, SpectraSource};
use serde::Serialize;

use crate::error::{Error, Result};

/// Shared, read-only handle to a built cache.
pub type CacheHandle = Arc<GeometryCache>;

/// Cheap identity of a source's instrument: token plus spectrum count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct InstrumentFingerprint {
    /// Instrument identity token.
    pub instrument: InstrumentId,
    /// Number of spectra of the source.
    pub n_spectra: usize,
}

impl InstrumentFingerprint {
    /// Fingerprint of a source.
    #[must_use]
    pub fn of(source: &dyn SpectraSource) -> Self {
        Self {
            instrument: source.instrument().identity(),
            n_spectra: source.spectrum_count(),
        }
    }
}

/// Direction of one spectrum's detector(s) as seen from the sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorDirection {
    /// First detector of the spectrum.
    pub detector_id: DetectorId,
    /// Unit vector from the sample to the detector.
    pub direction: Vector3<f64>,
    /// Sample-to-detector distance (m).
    pub l2: f64,
    /// Scattering angle 2θ (radians).
    pub two_theta: f64,
    /// Azimuthal angle (radians).
    pub phi: f64,
    /// Detector fixed energy (meV), when the instrument defines one.
    pub efixed: Option<f64>,
}

/// Detector directions of every spectrum of an instrument.
#[derive(Debug, Clone, PartialEq)]
pub struct GeometryCache {
    fingerprint: Option<InstrumentFingerprint>,
    instrument_name: String,
    l1: f64,
    beam: Vector3<f64>,
    entries: Vec<Option<DetectorDirection>>,
    n_valid: usize,
}

impl GeometryCache {
    /// Builds the cache for a source.
    ///
    /// # Errors
    /// Returns an error if the source and sample coincide or if no spectrum
    /// has a resolvable detector.
    pub fn build(source: &dyn SpectraSource) -> Result<Self> {
        let instrument = source.instrument();
        let sample = instrument.sample_position();
        let beam_path = sample - instrument.source_position();
        let l1 = beam_path.norm();
        if !l1.is_finite() || l1 <= 0.0 {
            return Err(Error::InvalidInstrument {
                instrument: instrument.name().to_string(),
                reason: "source and sample positions coincide".to_string(),
            });
        }
        let beam = beam_path / l1;

        let entries: Vec<Option<DetectorDirection>> = (0..source.spectrum_count())
            .into_par_iter()
            .map(|i| {
                let ids = source.detector_ids(i);
                let positions: Vec<Vector3<f64>> = ids
                    .iter()
                    .filter_map(|&id| instrument.detector_position(id))
                    .collect();
                if positions.is_empty() {
                    return None;
                }
                #[allow(clippy::cast_precision_loss)]
                let mean = positions.iter().sum::<Vector3<f64>>() / positions.len() as f64;
                let path = mean - sample;
                let l2 = path.norm();
                if !l2.is_finite() || l2 <= 0.0 {
                    return None;
                }
                let direction = path / l2;
                let energies: Vec<f64> = ids
                    .iter()
                    .filter_map(|&id| instrument.detector_efixed(id))
                    .collect();
                #[allow(clippy::cast_precision_loss)]
                let efixed = (!energies.is_empty())
                    .then(|| energies.iter().sum::<f64>() / energies.len() as f64);
                Some(DetectorDirection {
                    detector_id: ids[0],
                    direction,
                    l2,
                    two_theta: direction.dot(&beam).clamp(-1.0, 1.0).acos(),
                    phi: direction.y.atan2(direction.x),
                    efixed,
                })
            })
            .collect();

        let n_valid = entries.iter().filter(|e| e.is_some()).count();
        if n_valid == 0 {
            return Err(Error::NoValidDetectors {
                instrument: instrument.name().to_string(),
            });
        }
        let skipped = entries.len() - n_valid;
        if skipped > 0 {
            debug!("{skipped} spectra have no resolvable detector position");
        }
        Ok(Self {
            fingerprint: Some(InstrumentFingerprint::of(source)),
            instrument_name: instrument.name().to_string(),
            l1,
            beam,
            entries,
            n_valid,
        })
    }

    /// Geometry-free cache for conversions that never look at detectors.
    #[must_use]
    pub fn placeholder(n_spectra: usize) -> Self {
        Self {
            fingerprint: None,
            instrument_name: String::new(),
            l1: 0.0,
            beam: Vector3::z(),
            entries: vec![None; n_spectra],
            n_valid: 0,
        }
    }

    /// Returns true for a placeholder cache.
    #[must_use]
    pub fn is_placeholder(&self) -> bool {
        self.fingerprint.is_none()
    }

    /// Fingerprint of the instrument the cache was built from.
    #[must_use]
    pub fn fingerprint(&self) -> Option<InstrumentFingerprint> {
        self.fingerprint
    }

    /// Instrument name.
    #[must_use]
    pub fn instrument_name(&self) -> &str {
        &self.instrument_name
    }

    /// Source-to-sample distance (m).
    #[must_use]
    pub fn l1(&self) -> f64 {
        self.l1
    }

    /// Unit vector along the incident beam.
    #[must_use]
    pub fn beam_direction(&self) -> &Vector3<f64> {
        &self.beam
    }

    /// Number of spectra covered.
    #[must_use]
    pub fn n_spectra(&self) -> usize {
        self.entries.len()
    }

    /// Number of spectra with a valid direction.
    #[must_use]
    pub fn n_valid(&self) -> usize {
        self.n_valid
    }

    /// Direction of spectrum `index`, if it has one.
    #[must_use]
    pub fn entry(&self, index: usize) -> Option<&DetectorDirection> {
        self.entries.get(index).and_then(Option::as_ref)
    }
}

/// Session-scoped map from instrument fingerprint to built cache.
#[derive(Debug, Default)]
pub struct GeometryRegistry {
    caches: HashMap<InstrumentFingerprint, CacheHandle>,
}

impl GeometryRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cache for the source's instrument, building it if absent
    /// or if `force` is set.
    ///
    /// # Errors
    /// Propagates build errors.
    pub fn get_or_build(&mut self, source: &dyn SpectraSource, force: bool) -> Result<CacheHandle> {
        let fingerprint = InstrumentFingerprint::of(source);
        if !force {
            if let Some(handle) = self.caches.get(&fingerprint) {
                info!(
                    "reusing detector geometry of '{}' ({} spectra)",
                    handle.instrument_name(),
                    fingerprint.n_spectra
                );
                return Ok(Arc::clone(handle));
            }
        }
        let handle = Arc::new(GeometryCache::build(source)?);
        info!(
            "built detector geometry of '{}': {} of {} spectra valid",
            handle.instrument_name(),
            handle.n_valid(),
            handle.n_spectra()
        );
        self.caches.insert(fingerprint, Arc::clone(&handle));
        Ok(handle)
    }

    /// Returns true if a cache for `fingerprint` exists.
    #[must_use]
    pub fn is_valid(&self, fingerprint: &InstrumentFingerprint) -> bool {
        self.caches.contains_key(fingerprint)
    }

    /// Drops the cache for `fingerprint`. Returns true if one existed.
    pub fn invalidate(&mut self, fingerprint: &InstrumentFingerprint) -> bool {
        self.caches.remove(fingerprint).is_some()
    }

    /// Drops every cache.
    pub fn invalidate_all(&mut self) {
        self.caches.clear();
    }

    /// Number of caches held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.caches.len()
    }

    /// Returns true if no cache is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.caches.is_empty()
    }
}
