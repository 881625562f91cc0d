//! Multidimensional events in array (`MdEvent`) and columnar (`EventBatch`) form.
//!
//! Box-tree leaves and per-worker conversion buffers store events as an
//! `EventBatch`: one column per scalar field and a flat coordinate column
//! holding `nd` values per event.

use crate::error::{Error, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Detector identifier as reported by the instrument.
pub type DetectorId = i32;

/// A single event in the output space.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MdEvent {
    /// Signal (weight).
    pub signal: f32,
    /// Squared error of the signal.
    pub error_sq: f32,
    /// Index of the run that produced the event.
    pub run_index: u16,
    /// Detector that recorded it.
    pub detector_id: DetectorId,
    /// Coordinates, one per output dimension.
    pub coords: Vec<f64>,
}

impl MdEvent {
    /// Creates an event.
    #[must_use]
    pub fn new(signal: f32, error_sq: f32, coords: Vec<f64>) -> Self {
        Self {
            signal,
            error_sq,
            run_index: 0,
            detector_id: 0,
            coords,
        }
    }

    /// Sets run index and detector id.
    #[must_use]
    pub fn with_origin(mut self, run_index: u16, detector_id: DetectorId) -> Self {
        self.run_index = run_index;
        self.detector_id = detector_id;
        self
    }
}

/// Borrowed view of one event inside an [`EventBatch`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MdEventRef<'a> {
    /// Signal (weight).
    pub signal: f32,
    /// Squared error of the signal.
    pub error_sq: f32,
    /// Run index.
    pub run_index: u16,
    /// Detector id.
    pub detector_id: DetectorId,
    /// Coordinates.
    pub coords: &'a [f64],
}

impl MdEventRef<'_> {
    /// Copies the view into an owned event.
    #[must_use]
    pub fn to_owned_event(&self) -> MdEvent {
        MdEvent {
            signal: self.signal,
            error_sq: self.error_sq,
            run_index: self.run_index,
            detector_id: self.detector_id,
            coords: self.coords.to_vec(),
        }
    }
}

/// A batch of events stored in Structure of Arrays (`SoA`) format.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EventBatch {
    nd: usize,
    /// Columnar storage for signals.
    pub signal: Vec<f32>,
    /// Columnar storage for squared errors.
    pub error_sq: Vec<f32>,
    /// Columnar storage for run indices.
    pub run_index: Vec<u16>,
    /// Columnar storage for detector ids.
    pub detector_id: Vec<DetectorId>,
    /// Flat coordinates, `nd` per event.
    pub coords: Vec<f64>,
}

impl EventBatch {
    /// Creates an empty batch for `nd`-dimensional events.
    #[must_use]
    pub fn new(nd: usize) -> Self {
        Self {
            nd,
            ..Self::default()
        }
    }

    /// Creates an empty batch with room for `capacity` events.
    #[must_use]
    pub fn with_capacity(nd: usize, capacity: usize) -> Self {
        Self {
            nd,
            signal: Vec::with_capacity(capacity),
            error_sq: Vec::with_capacity(capacity),
            run_index: Vec::with_capacity(capacity),
            detector_id: Vec::with_capacity(capacity),
            coords: Vec::with_capacity(capacity * nd),
        }
    }

    /// Number of dimensions per event.
    #[must_use]
    pub fn nd(&self) -> usize {
        self.nd
    }

    /// Returns the number of events in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.signal.len()
    }

    /// Returns true if the batch is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.signal.is_empty()
    }

    /// Clears all columns.
    pub fn clear(&mut self) {
        self.signal.clear();
        self.error_sq.clear();
        self.run_index.clear();
        self.detector_id.clear();
        self.coords.clear();
    }

    /// Pushes a single event.
    ///
    /// # Errors
    /// Returns an error if `coords` does not hold exactly `nd` values.
    pub fn push(
        &mut self,
        signal: f32,
        error_sq: f32,
        run_index: u16,
        detector_id: DetectorId,
        coords: &[f64],
    ) -> Result<()> {
        if coords.len() != self.nd {
            return Err(Error::DimensionMismatch {
                expected: self.nd,
                actual: coords.len(),
            });
        }
        self.push_unchecked(signal, error_sq, run_index, detector_id, coords);
        Ok(())
    }

    /// Pushes an owned event.
    ///
    /// # Errors
    /// Returns an error on a dimension mismatch.
    pub fn push_event(&mut self, event: &MdEvent) -> Result<()> {
        self.push(
            event.signal,
            event.error_sq,
            event.run_index,
            event.detector_id,
            &event.coords,
        )
    }

    /// Pushes a borrowed event from another batch of the same dimensionality.
    pub(crate) fn push_unchecked(
        &mut self,
        signal: f32,
        error_sq: f32,
        run_index: u16,
        detector_id: DetectorId,
        coords: &[f64],
    ) {
        self.signal.push(signal);
        self.error_sq.push(error_sq);
        self.run_index.push(run_index);
        self.detector_id.push(detector_id);
        self.coords.extend_from_slice(coords);
    }

    /// Copies event `i` of `other` into this batch.
    ///
    /// # Errors
    /// Returns an error if the batches differ in dimensionality.
    pub fn push_from(&mut self, other: &EventBatch, i: usize) -> Result<()> {
        if other.nd != self.nd {
            return Err(Error::DimensionMismatch {
                expected: self.nd,
                actual: other.nd,
            });
        }
        let e = other.get(i);
        self.push_unchecked(e.signal, e.error_sq, e.run_index, e.detector_id, e.coords);
        Ok(())
    }

    /// Appends all events from another batch to this one.
    ///
    /// # Errors
    /// Returns an error if the batches differ in dimensionality.
    pub fn append(&mut self, other: &EventBatch) -> Result<()> {
        if other.nd != self.nd {
            return Err(Error::DimensionMismatch {
                expected: self.nd,
                actual: other.nd,
            });
        }
        self.signal.extend_from_slice(&other.signal);
        self.error_sq.extend_from_slice(&other.error_sq);
        self.run_index.extend_from_slice(&other.run_index);
        self.detector_id.extend_from_slice(&other.detector_id);
        self.coords.extend_from_slice(&other.coords);
        Ok(())
    }

    /// Coordinates of event `i`.
    ///
    /// # Panics
    /// Panics if `i` is out of bounds.
    #[must_use]
    pub fn coords_of(&self, i: usize) -> &[f64] {
        &self.coords[i * self.nd..(i + 1) * self.nd]
    }

    /// Borrowed view of event `i`.
    ///
    /// # Panics
    /// Panics if `i` is out of bounds.
    #[must_use]
    pub fn get(&self, i: usize) -> MdEventRef<'_> {
        MdEventRef {
            signal: self.signal[i],
            error_sq: self.error_sq[i],
            run_index: self.run_index[i],
            detector_id: self.detector_id[i],
            coords: self.coords_of(i),
        }
    }

    /// Iterates over the events.
    pub fn iter(&self) -> impl Iterator<Item = MdEventRef<'_>> + '_ {
        (0..self.len()).map(move |i| self.get(i))
    }

    /// Sum of signals.
    #[must_use]
    pub fn total_signal(&self) -> f64 {
        self.signal.iter().map(|&s| f64::from(s)).sum()
    }

    /// Sum of squared errors.
    #[must_use]
    pub fn total_error_sq(&self) -> f64 {
        self.error_sq.iter().map(|&e| f64::from(e)).sum()
    }
}
