//! In-memory spectra source and instrument.
//!
//! `InMemoryWorkspace` is a reference [`SpectraSource`]: it owns its
//! spectra, logs, lattice and goniometer, and a [`SimpleInstrument`] with
//! explicit detector positions. Both deserialize from JSON with the `serde`
//! feature.

use std::collections::BTreeMap;

use nalgebra::Vector3;

use crate::error::{Error, Result};
use crate::event::DetectorId;
use crate::goniometer::Goniometer;
use crate::lattice::OrientedLattice;
use crate::logs::SampleLogs;
use crate::provider::{InstrumentGeometry, InstrumentId, SpectraSource, SpectrumData, TofEvent};
use crate::units::Unit;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A detector pixel of a [`SimpleInstrument`].
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DetectorInfo {
    /// Position (m).
    pub position: [f64; 3],
    /// Analyser fixed energy (meV).
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub efixed: Option<f64>,
}

/// Instrument with explicit source, sample and detector positions.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SimpleInstrument {
    /// Instrument name.
    pub name: String,
    /// Identity token; allocated when absent.
    #[cfg_attr(feature = "serde", serde(default = "InstrumentId::unique"))]
    pub id: InstrumentId,
    /// Source position (m).
    pub source: [f64; 3],
    /// Sample position (m).
    #[cfg_attr(feature = "serde", serde(default))]
    pub sample: [f64; 3],
    /// Detectors keyed by id.
    #[cfg_attr(feature = "serde", serde(default))]
    pub detectors: BTreeMap<DetectorId, DetectorInfo>,
}

impl SimpleInstrument {
    /// Creates an instrument with no detectors and a fresh identity.
    #[must_use]
    pub fn new(name: impl Into<String>, source: [f64; 3], sample: [f64; 3]) -> Self {
        Self {
            name: name.into(),
            id: InstrumentId::unique(),
            source,
            sample,
            detectors: BTreeMap::new(),
        }
    }

    /// Adds a detector.
    #[must_use]
    pub fn with_detector(mut self, id: DetectorId, position: [f64; 3]) -> Self {
        self.detectors.insert(id, DetectorInfo { position, efixed: None });
        self
    }

    /// Adds an analyser detector with its own fixed energy.
    #[must_use]
    pub fn with_analyser(mut self, id: DetectorId, position: [f64; 3], efixed: f64) -> Self {
        self.detectors.insert(
            id,
            DetectorInfo {
                position,
                efixed: Some(efixed),
            },
        );
        self
    }

    /// Overrides the identity token.
    #[must_use]
    pub fn with_id(mut self, id: InstrumentId) -> Self {
        self.id = id;
        self
    }
}

impl InstrumentGeometry for SimpleInstrument {
    fn identity(&self) -> InstrumentId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn source_position(&self) -> Vector3<f64> {
        Vector3::from(self.source)
    }

    fn sample_position(&self) -> Vector3<f64> {
        Vector3::from(self.sample)
    }

    fn detector_position(&self, id: DetectorId) -> Option<Vector3<f64>> {
        self.detectors
            .get(&id)
            .map(|d| Vector3::from(d.position))
            .filter(|p| p.iter().all(|v| v.is_finite()))
    }

    fn detector_efixed(&self, id: DetectorId) -> Option<f64> {
        self.detectors.get(&id).and_then(|d| d.efixed)
    }
}

/// Owned data of one spectrum.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(untagged))]
pub enum SpectrumBuffer {
    /// Histogram or point data.
    Histogram {
        /// Bin boundaries or points.
        x: Vec<f64>,
        /// Counts.
        y: Vec<f64>,
        /// Errors.
        #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
        e: Option<Vec<f64>>,
    },
    /// Time-of-flight events.
    Events {
        /// Events.
        events: Vec<TofEvent>,
    },
}

impl SpectrumBuffer {
    fn view(&self) -> SpectrumData<'_> {
        match self {
            Self::Histogram { x, y, e } => SpectrumData::Histogram {
                x,
                y,
                e: e.as_deref(),
            },
            Self::Events { events } => SpectrumData::Events(events),
        }
    }
}

/// A spectrum together with its detectors.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SpectrumRecord {
    /// Contributing detectors.
    pub detector_ids: Vec<DetectorId>,
    /// Data.
    #[cfg_attr(feature = "serde", serde(flatten))]
    pub data: SpectrumBuffer,
}

/// In-memory [`SpectraSource`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct InMemoryWorkspace {
    /// Native x unit.
    #[cfg_attr(feature = "serde", serde(default = "default_unit"))]
    pub x_unit: Unit,
    /// Instrument.
    pub instrument: SimpleInstrument,
    /// Spectra in index order.
    #[cfg_attr(feature = "serde", serde(default))]
    pub spectra: Vec<SpectrumRecord>,
    /// Sample logs.
    #[cfg_attr(feature = "serde", serde(default))]
    pub logs: SampleLogs,
    /// Oriented lattice.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub lattice: Option<OrientedLattice>,
    /// Goniometer.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub goniometer: Option<Goniometer>,
}

#[cfg(feature = "serde")]
fn default_unit() -> Unit {
    Unit::Tof
}

impl InMemoryWorkspace {
    /// Creates an empty workspace.
    #[must_use]
    pub fn new(x_unit: Unit, instrument: SimpleInstrument) -> Self {
        Self {
            x_unit,
            instrument,
            spectra: Vec::new(),
            logs: SampleLogs::new(),
            lattice: None,
            goniometer: None,
        }
    }

    /// Appends a histogram or point-data spectrum.
    ///
    /// # Errors
    /// Returns an error if the array lengths are inconsistent.
    pub fn add_histogram(
        &mut self,
        detector_ids: Vec<DetectorId>,
        x: Vec<f64>,
        y: Vec<f64>,
        e: Option<Vec<f64>>,
    ) -> Result<()> {
        let data = SpectrumBuffer::Histogram { x, y, e };
        data.view().validate(self.spectra.len())?;
        self.spectra.push(SpectrumRecord { detector_ids, data });
        Ok(())
    }

    /// Appends an event-list spectrum.
    pub fn add_events(&mut self, detector_ids: Vec<DetectorId>, events: Vec<TofEvent>) {
        self.spectra.push(SpectrumRecord {
            detector_ids,
            data: SpectrumBuffer::Events { events },
        });
    }

    /// Sets the oriented lattice.
    #[must_use]
    pub fn with_lattice(mut self, lattice: OrientedLattice) -> Self {
        self.lattice = Some(lattice);
        self
    }

    /// Sets the goniometer.
    #[must_use]
    pub fn with_goniometer(mut self, goniometer: Goniometer) -> Self {
        self.goniometer = Some(goniometer);
        self
    }

    /// Replaces the sample logs.
    #[must_use]
    pub fn with_logs(mut self, logs: SampleLogs) -> Self {
        self.logs = logs;
        self
    }

    /// Checks every spectrum.
    ///
    /// # Errors
    /// Returns the first inconsistency found.
    pub fn validate(&self) -> Result<()> {
        self.spectra
            .iter()
            .enumerate()
            .try_for_each(|(i, s)| s.data.view().validate(i))
    }
}

impl SpectraSource for InMemoryWorkspace {
    fn spectrum_count(&self) -> usize {
        self.spectra.len()
    }

    fn x_unit(&self) -> Unit {
        self.x_unit
    }

    fn spectrum(&self, index: usize) -> Result<SpectrumData<'_>> {
        self.spectra
            .get(index)
            .map(|s| s.data.view())
            .ok_or_else(|| Error::InvalidSpectrum {
                index,
                reason: format!("workspace has {} spectra", self.spectra.len()),
            })
    }

    fn detector_ids(&self, index: usize) -> &[DetectorId] {
        self.spectra
            .get(index)
            .map(|s| s.detector_ids.as_slice())
            .unwrap_or_default()
    }

    fn logs(&self) -> &SampleLogs {
        &self.logs
    }

    fn lattice(&self) -> Option<&OrientedLattice> {
        self.lattice.as_ref()
    }

    fn goniometer(&self) -> Option<&Goniometer> {
        self.goniometer.as_ref()
    }

    fn instrument(&self) -> &dyn InstrumentGeometry {
        &self.instrument
    }
}
