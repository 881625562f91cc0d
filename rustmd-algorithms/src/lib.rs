//! rustmd-algorithms: Conversion of spectra into multidimensional event trees.
//!
//! This crate provides the conversion pipeline:
//! - **Transform** - lab / sample / HKL matrices from lattice, goniometer and projection
//! - **Geometry cache** - per-spectrum detector directions, shared per instrument
//! - **Unit converter** - per-spectrum conversion to momentum or energy transfer
//! - **Q modes** - `CopyToMD`, `|Q|` and `Q3D` coordinate transforms
//! - **Extent estimation** - conservative bounds from axis endpoints
//! - **Box tree** - adaptive arena tree with configurable splitting
//! - **Engine** - parallel per-block conversion with single-writer insertion
//!
#![warn(missing_docs)]

mod box_controller;
pub mod box_tree;
mod description;
mod engine;
pub mod error;
mod extents;
pub mod geometry_cache;
mod processing;
mod progress;
pub mod qmode;
pub mod transform;
mod unit_converter;

pub use box_controller::{BoxController, SplitInto};
pub use box_tree::{BoxNode, MdBoxTree, NodeKind};
pub use description::{
    validate_extents, DescriptionBuilder, DescriptionSummary, DimensionInfo, WorkspaceDescription,
};
pub use engine::{
    ConversionEngine, ConversionSummary, EngineState, SpectrumWorker, DEFAULT_BLOCK_SIZE,
};
pub use error::{Error, ErrorKind, Result};
pub use extents::ExtentEstimator;
pub use geometry_cache::{
    CacheHandle, DetectorDirection, GeometryCache, GeometryRegistry, InstrumentFingerprint,
};
pub use processing::{
    convert_to_md, estimate_min_max, local_min_max, ConvertToMdConfig, ConvertedWorkspace,
    WorkspaceReport,
};
pub use progress::{CancellationToken, LogProgress, NoProgress, ProgressReporter};
pub use qmode::{CoordinateTransform, QModeKind, QTransform};
pub use transform::{Projection, QScaling, ResolvedTransform, TargetFrame, TransformBuilder};
pub use unit_converter::UnitConverter;

// Re-export core types used in the public API
pub use rustmd_core::{EnergyMode, EventBatch, MdEvent, SpectraSource, Unit};
