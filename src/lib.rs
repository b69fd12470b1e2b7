//! Seismic cube crop sampling, prediction assembly and horizon stitching.
//!
//! Splits a 3D seismic cube into overlapping crops for an external
//! predictor, reassembles per-crop predictions into volumetric arrays and
//! stitches thresholded predictions into global horizon surfaces.

pub mod assemble;
pub mod batch;
pub mod error;
pub mod geometry;
pub mod grid;
pub mod inference;
pub mod merge;
pub mod snap;
pub mod surface;
pub mod volume;

pub use error::{Error, Result};
pub use geometry::{CubeBounds, Geometry, Predictor, QualityMap};
pub use grid::{CropPosition, CropShape, Grid, GridSpec, Orientation, VolumeId};
pub use merge::{MergeParams, MergeStrategy};
pub use surface::{Surface, SurfaceDump};
pub use volume::{LateralMap, Volume};
