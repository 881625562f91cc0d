//! rustmd-core: Core types for converting time-of-flight spectra into
//! multidimensional reciprocal-space events.
//!
//! This crate provides physical units and conversions, the oriented lattice
//! and goniometer, sample logs, the provider traits through which spectra
//! and instrument geometry are consumed, and the event types stored by the
//! box tree.
//!

pub mod error;
pub mod event;
pub mod goniometer;
pub mod lattice;
pub mod logs;
pub mod provider;
pub mod units;
pub mod workspace;

pub use error::{Error, Result};
pub use event::{DetectorId, EventBatch, MdEvent, MdEventRef};
pub use goniometer::{Goniometer, GoniometerAxis, GoniometerRecord, Sense};
pub use lattice::{LatticeParameters, OrientedLattice};
pub use logs::{LogValue, SampleLogs, EFIXED_LOG, EI_LOG};
pub use provider::{InstrumentGeometry, InstrumentId, SpectraSource, SpectrumData, TofEvent};
pub use units::{ConversionParams, EnergyMode, Unit};
pub use workspace::{DetectorInfo, InMemoryWorkspace, SimpleInstrument, SpectrumBuffer, SpectrumRecord};
