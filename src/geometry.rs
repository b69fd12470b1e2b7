//! Interfaces to the cube data owner and the external predictor.
//!
//! The core never reads seismic data from disk itself: a [`Geometry`]
//! implementation owns the cube bounds, the quality map and the crop-loading
//! primitive, and a [`Predictor`] turns a batch of loaded crops into a batch
//! of prediction sub-volumes.

use crate::error::Result;
use crate::grid::CropShape;
use crate::volume::{LateralMap, Volume};

/// Spatial extents of the full cube along (inline, crossline, height).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CubeBounds {
    pub inlines: usize,
    pub crosslines: usize,
    pub depth: usize,
}

impl CubeBounds {
    pub fn new(inlines: usize, crosslines: usize, depth: usize) -> Self {
        Self {
            inlines,
            crosslines,
            depth,
        }
    }

    pub fn extents(&self) -> [usize; 3] {
        [self.inlines, self.crosslines, self.depth]
    }
}

/// Sampling-priority map over the lateral axes.
///
/// Cells worth sampling densely hold `1`; cells to skip hold `0` or NaN.
/// Owned by the geometry provider, read-only to the core.
#[derive(Clone, Debug)]
pub struct QualityMap {
    map: LateralMap<f32>,
}

impl QualityMap {
    pub fn new(map: LateralMap<f32>) -> Self {
        Self { map }
    }

    pub fn inlines(&self) -> usize {
        self.map.inlines
    }

    pub fn crosslines(&self) -> usize {
        self.map.crosslines
    }

    /// Whether a cell is on-grid. NaN counts as off-grid.
    pub fn is_valid(&self, i: usize, x: usize) -> bool {
        let v = *self.map.get(i, x);
        v.is_finite() && v > 0.0
    }

    pub fn valid_cells(&self) -> usize {
        self.map
            .iter()
            .filter(|(_, _, v)| v.is_finite() && **v > 0.0)
            .count()
    }

    /// Sum of validity over a row window, NaN treated as zero.
    pub fn row_sum(&self, i: usize, x_lo: usize, x_hi: usize) -> f32 {
        (x_lo..x_hi.min(self.map.crosslines))
            .map(|x| *self.map.get(i, x))
            .filter(|v| v.is_finite())
            .sum()
    }

    /// Sum of validity over a column window, NaN treated as zero.
    pub fn column_sum(&self, x: usize, i_lo: usize, i_hi: usize) -> f32 {
        (i_lo..i_hi.min(self.map.inlines))
            .map(|i| *self.map.get(i, x))
            .filter(|v| v.is_finite())
            .sum()
    }
}

/// Access to one seismic cube: bounds, quality map and crop loading.
pub trait Geometry {
    fn bounds(&self) -> CubeBounds;

    fn quality_map(&self) -> &QualityMap;

    /// Load the sub-volume anchored at `position` (absolute cells) with the
    /// given extents. Implementations must return an array of exactly
    /// `shape` extents; the caller guarantees the crop fits inside bounds.
    fn load_crop(&self, position: [usize; 3], shape: CropShape) -> Result<Volume<f32>>;
}

/// The external model. Receives a batch of uniform-shape crops and returns
/// one prediction per crop with the same spatial extents.
///
/// Implementations whose backing tensors carry a trailing channel axis of
/// size one can pass the same flat buffer to [`Volume::from_flat`]; the
/// squeeze is purely a shape change.
pub trait Predictor {
    fn predict(&self, crops: &[Volume<f32>]) -> Result<Vec<Volume<f32>>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_map_validity_and_sums() {
        let data = vec![
            1.0, 0.0, 1.0, //
            f32::NAN, 1.0, 1.0, //
        ];
        let qm = QualityMap::new(LateralMap::from_flat(2, 3, data).unwrap());

        assert!(qm.is_valid(0, 0));
        assert!(!qm.is_valid(0, 1));
        assert!(!qm.is_valid(1, 0));
        assert_eq!(qm.valid_cells(), 4);

        assert_eq!(qm.row_sum(1, 0, 3), 2.0);
        assert_eq!(qm.column_sum(2, 0, 2), 2.0);
        // Upper bound past the edge is clamped
        assert_eq!(qm.row_sum(0, 1, 10), 1.0);
    }
}
